//! ÆSC Meshwork node
//!
//! Backend for the Meshwork feature of the ÆSC Trust site: pseudonymous
//! nodes sign small presence pings, the server verifies and stores them,
//! a live map reads the latest position per node, and activity accrues SV
//! points. Nodes can also post short signals with media.
//!
//! # Architecture
//!
//! - **Models**: pings, node summaries, credentials, signals
//! - **Storage**: RocksDB-backed persistent storage (also the SV store)
//! - **Verify**: signature, clock-skew and nonce checks for pings
//! - **API**: HTTP endpoints (pings, map feed, SV, signals, QR, mail forms)
//! - **Stream**: server-sent events for live map updates
//! - **Admin Socket**: Unix socket for credential management (meshwork-admin CLI)
//!
//! # SV is cosmetic
//!
//! `/api/sv/claim`, `/api/sv/accrue` and `/api/sv/bump-streak` take any
//! `nodeId` from any caller. SV is a display score with no value attached.
//! Not a security boundary.
//!
//! # Example
//!
//! ```no_run
//! use aesc_meshwork::{MeshworkConfig, MeshworkNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MeshworkConfig::from_env()?;
//!     let node = MeshworkNode::new(config).await?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin_socket;
pub mod api;
pub mod error;
pub mod mailer;
pub mod map;
pub mod media;
pub mod models;
pub mod node;
pub mod qr;
pub mod rate_limit;
pub mod storage;
pub mod stream;
pub mod verify;

pub use error::{Error, Result};
pub use models::{NodeCredential, NodeSummary, Signal, StoredPing};
pub use node::{MeshworkConfig, MeshworkNode, MeshworkState, SvBackend};
pub use storage::Storage;
pub use verify::{PingPolicy, Verifier};

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
