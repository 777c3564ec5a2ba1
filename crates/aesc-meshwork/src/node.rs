//! Meshwork Node - the main application entry point.
//!
//! Architecture:
//! - Single daemon process with shared RocksDB storage
//! - HTTP API for the site (pings, map feed, SV, signals, QR, forms)
//! - Unix admin socket for local admin ops (meshwork-admin CLI)
//! - Background task pruning expired nonces

use crate::admin_socket::AdminSocket;
use crate::api;
use crate::error::{Error, Result};
use crate::mailer::{Mailer, MailerConfig};
use crate::map::MapMarker;
use crate::media::MediaStore;
use crate::rate_limit::RateLimiter;
use crate::storage::Storage;
use crate::stream::PRESENCE_CHANNEL_CAPACITY;
use crate::verify::{PingPolicy, Verifier};
use aesc_sv::{MemorySvStore, SvLedger, SvStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// How often expired nonces are swept.
pub const NONCE_PRUNE_INTERVAL: Duration = Duration::from_secs(10 * 60);

const DEFAULT_MAIL_API_URL: &str = "https://api.resend.com";

/// Where SV ledger rows are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SvBackend {
    /// Persistent, in the node's RocksDB
    #[default]
    RocksDb,
    /// Process memory; lost on restart
    Memory,
}

impl FromStr for SvBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rocksdb" => Ok(Self::RocksDb),
            "memory" => Ok(Self::Memory),
            other => Err(Error::Config(format!("unknown SV backend: {other}"))),
        }
    }
}

/// Configuration for a Meshwork node.
#[derive(Debug, Clone)]
pub struct MeshworkConfig {
    /// Data directory for storage and media
    pub data_dir: PathBuf,

    /// HTTP API listen address
    pub api_addr: SocketAddr,

    /// Admin socket path (for meshwork-admin CLI)
    pub admin_socket: PathBuf,

    /// Public origin prefixed to media URLs; empty means relative URLs
    pub public_url: String,

    pub ping_policy: PingPolicy,

    pub sv_backend: SvBackend,

    /// Take client IPs from `X-Forwarded-For`. Only safe behind a proxy
    /// that overwrites the header.
    pub trust_proxy: bool,

    /// Mail provider; forms answer 500 when absent
    pub mail: Option<MailerConfig>,
}

impl Default for MeshworkConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./meshwork-data");
        Self {
            admin_socket: data_dir.join("admin.sock"),
            data_dir,
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            public_url: String::new(),
            ping_policy: PingPolicy::Strict,
            sv_backend: SvBackend::RocksDb,
            trust_proxy: false,
            mail: None,
        }
    }
}

impl MeshworkConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let data_dir = var("MESHWORK_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir);

        let api_addr = match var("MESHWORK_API_ADDR") {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid MESHWORK_API_ADDR: {raw}")))?,
            None => defaults.api_addr,
        };

        let admin_socket = var("MESHWORK_ADMIN_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("admin.sock"));

        let public_url = var("MESHWORK_PUBLIC_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_default();

        let ping_policy: PingPolicy = var("MESHWORK_PING_POLICY")
            .map(|p| p.parse::<PingPolicy>())
            .transpose()?
            .unwrap_or_default();

        let sv_backend: SvBackend = var("MESHWORK_SV_BACKEND")
            .map(|b| b.parse::<SvBackend>())
            .transpose()?
            .unwrap_or_default();

        let trust_proxy = match var("MESHWORK_TRUST_PROXY").map(|v| v.to_ascii_lowercase()) {
            None => defaults.trust_proxy,
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no") => false,
            Some(v) => return Err(Error::Config(format!("invalid MESHWORK_TRUST_PROXY: {v}"))),
        };

        let mail = match (var("MAIL_API_KEY"), var("MAIL_FROM"), var("MAIL_TO")) {
            (Some(api_key), Some(from), Some(to)) => Some(MailerConfig {
                api_url: var("MAIL_API_URL").unwrap_or_else(|| DEFAULT_MAIL_API_URL.to_string()),
                api_key,
                from,
                to,
            }),
            (None, None, None) => None,
            _ => {
                return Err(Error::Config(
                    "MAIL_API_KEY, MAIL_FROM and MAIL_TO must be set together".into(),
                ))
            }
        };

        Ok(Self {
            data_dir,
            api_addr,
            admin_socket,
            public_url,
            ping_policy,
            sv_backend,
            trust_proxy,
            mail,
        })
    }

    /// Config rooted at a scratch directory.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            admin_socket: data_dir.join("admin.sock"),
            data_dir,
            ..Self::default()
        }
    }
}

/// Shared state for the Meshwork node - one instance handed to every handler.
pub struct MeshworkState {
    pub storage: Arc<Storage>,
    pub config: MeshworkConfig,
    pub ledger: SvLedger,
    pub verifier: Verifier,
    pub limiter: RateLimiter,
    pub mailer: Option<Mailer>,
    pub media: MediaStore,
    pub presence_tx: broadcast::Sender<MapMarker>,
}

impl MeshworkState {
    /// Open storage and wire up services.
    pub fn open(config: MeshworkConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let storage = Arc::new(Storage::open(config.data_dir.join("db"))?);

        let sv_store: Arc<dyn SvStore> = match config.sv_backend {
            SvBackend::RocksDb => Arc::clone(&storage) as Arc<dyn SvStore>,
            SvBackend::Memory => Arc::new(MemorySvStore::new()),
        };

        let mailer = config.mail.clone().map(Mailer::new).transpose()?;
        let media = MediaStore::new(config.data_dir.join("media"), config.public_url.clone());
        let (presence_tx, _) = broadcast::channel(PRESENCE_CHANNEL_CAPACITY);

        Ok(Self {
            verifier: Verifier::new(Arc::clone(&storage), config.ping_policy),
            ledger: SvLedger::new(sv_store),
            limiter: RateLimiter::default(),
            storage,
            mailer,
            media,
            presence_tx,
            config,
        })
    }
}

/// A Meshwork node instance.
pub struct MeshworkNode {
    state: Arc<MeshworkState>,
}

impl MeshworkNode {
    /// Create a new Meshwork node.
    pub async fn new(config: MeshworkConfig) -> Result<Self> {
        let state = Arc::new(MeshworkState::open(config)?);
        Ok(Self { state })
    }

    /// Get the shared state (for API handlers).
    pub fn state(&self) -> Arc<MeshworkState> {
        Arc::clone(&self.state)
    }

    /// Run the node (starts HTTP server, admin socket, and nonce pruning).
    pub async fn run(self) -> Result<()> {
        let config = &self.state.config;
        tracing::info!("Meshwork node starting");
        tracing::info!("  API: http://{}", config.api_addr);
        tracing::info!("  Admin: {:?}", config.admin_socket);
        tracing::info!("  Data: {:?}", config.data_dir);
        tracing::info!("  Ping policy: {:?}, SV backend: {:?}", config.ping_policy, config.sv_backend);
        if config.mail.is_none() {
            tracing::warn!("Mail provider not configured; contact and subscribe will fail");
        }

        // Start admin socket server in background
        let admin_socket = AdminSocket::new(self.state(), config.admin_socket.clone());
        tokio::spawn(async move {
            if let Err(e) = admin_socket.run().await {
                tracing::error!("Admin socket error: {}", e);
            }
        });

        let prune_state = self.state();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(NONCE_PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = prune_state.verifier.prune_nonces(crate::now_ms()) {
                    tracing::warn!("Nonce prune failed: {}", e);
                }
            }
        });

        // Build HTTP API
        let app = api::build_router(self.state());

        // Start HTTP server
        let listener = tokio::net::TcpListener::bind(config.api_addr).await?;
        tracing::info!("HTTP server listening on {}", config.api_addr);

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key: &str| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_without_env() {
        let config = MeshworkConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.api_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.admin_socket, PathBuf::from("./meshwork-data/admin.sock"));
        assert_eq!(config.ping_policy, PingPolicy::Strict);
        assert_eq!(config.sv_backend, SvBackend::RocksDb);
        assert!(!config.trust_proxy);
        assert!(config.mail.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let config = MeshworkConfig::from_lookup(lookup(&[
            ("MESHWORK_DATA_DIR", "/srv/mesh"),
            ("MESHWORK_API_ADDR", "127.0.0.1:9090"),
            ("MESHWORK_PUBLIC_URL", "https://aesc.example/"),
            ("MESHWORK_PING_POLICY", "advisory"),
            ("MESHWORK_SV_BACKEND", "memory"),
            ("MESHWORK_TRUST_PROXY", "true"),
            ("MAIL_API_KEY", "k"),
            ("MAIL_FROM", "site@aesc.example"),
            ("MAIL_TO", "team@aesc.example"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/mesh"));
        assert_eq!(config.admin_socket, PathBuf::from("/srv/mesh/admin.sock"));
        assert_eq!(config.api_addr.port(), 9090);
        assert_eq!(config.public_url, "https://aesc.example");
        assert_eq!(config.ping_policy, PingPolicy::Advisory);
        assert_eq!(config.sv_backend, SvBackend::Memory);
        assert!(config.trust_proxy);
        assert_eq!(config.mail.unwrap().api_url, DEFAULT_MAIL_API_URL);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let bad_addr = MeshworkConfig::from_lookup(lookup(&[("MESHWORK_API_ADDR", "nope")]));
        assert!(matches!(bad_addr, Err(Error::Config(_))));
        let bad_policy = MeshworkConfig::from_lookup(lookup(&[("MESHWORK_PING_POLICY", "lax")]));
        assert!(matches!(bad_policy, Err(Error::Config(_))));
        let bad_proxy = MeshworkConfig::from_lookup(lookup(&[("MESHWORK_TRUST_PROXY", "maybe")]));
        assert!(matches!(bad_proxy, Err(Error::Config(_))));
        let partial_mail = MeshworkConfig::from_lookup(lookup(&[("MAIL_API_KEY", "k")]));
        assert!(matches!(partial_mail, Err(Error::Config(_))));
    }

    #[test]
    fn state_opens_both_backends() {
        let dir = tempdir().unwrap();
        let state = MeshworkState::open(MeshworkConfig::for_data_dir(dir.path())).unwrap();
        state.ledger.accrue("n1", aesc_sv::ActivityKind::Ping, 1.0, 0).unwrap();
        assert_eq!(state.ledger.list().unwrap().len(), 1);
        drop(state);

        // RocksDB rows survive a reopen.
        let state = MeshworkState::open(MeshworkConfig::for_data_dir(dir.path())).unwrap();
        assert_eq!(state.ledger.list().unwrap().len(), 1);
        drop(state);

        let mut config = MeshworkConfig::for_data_dir(dir.path());
        config.sv_backend = SvBackend::Memory;
        let state = MeshworkState::open(config).unwrap();
        assert!(state.ledger.list().unwrap().is_empty());
    }
}
