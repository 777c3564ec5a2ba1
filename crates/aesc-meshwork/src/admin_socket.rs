//! Unix socket server for admin commands.
//!
//! Provides a local IPC interface for provisioning node credentials,
//! inspecting SV rows and sweeping nonces. One JSON command per line in,
//! one JSON response per line out.

use crate::error::Result;
use crate::models::{validate_node_id, NodeCredential};
use crate::node::MeshworkState;
use aesc_sign::{Credential, Scheme, Secret};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Admin command sent over the socket.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Register or replace a node credential. Without a key, an HMAC
    /// secret is generated and returned once.
    RegisterNode {
        node_id: String,
        scheme: Scheme,
        #[serde(default)]
        key: Option<String>,
    },
    /// Remove a node credential
    RevokeNode { node_id: String },
    /// List registered nodes
    ListNodes,
    /// Show a node's SV row
    SvGet { node_id: String },
    /// Extend a node's streak
    SvBumpStreak {
        node_id: String,
        #[serde(default)]
        by: Option<u32>,
    },
    /// Drop expired nonces now
    PruneNonces,
    /// Ping (health check)
    Ping,
}

/// Response from admin command.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    List { items: Vec<String> },
    Value { value: serde_json::Value },
    Pong,
}

impl AdminResponse {
    fn error(e: impl std::fmt::Display) -> Self {
        AdminResponse::Error { error: e.to_string() }
    }
}

/// Admin socket server.
pub struct AdminSocket {
    state: Arc<MeshworkState>,
    socket_path: PathBuf,
}

impl AdminSocket {
    /// Create a new admin socket server.
    pub fn new(state: Arc<MeshworkState>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            state,
            socket_path: socket_path.into(),
        }
    }

    /// Bind the socket, owner-only. A stale socket file is replaced.
    ///
    /// The socket is created inside a private 0700 directory and renamed
    /// into place once it is 0600, so it is never reachable by other users.
    pub fn bind(&self) -> Result<UnixListener> {
        let staging = staging_dir(&self.socket_path);
        let _ = std::fs::remove_dir_all(&staging);
        std::fs::DirBuilder::new().mode(0o700).create(&staging)?;

        let staged = staging.join("admin.sock");
        let bound = UnixListener::bind(&staged).and_then(|listener| {
            std::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o600))?;
            let _ = std::fs::remove_file(&self.socket_path);
            std::fs::rename(&staged, &self.socket_path)?;
            Ok(listener)
        });
        let _ = std::fs::remove_dir_all(&staging);

        let listener = bound?;
        tracing::info!("Admin socket listening on {:?}", self.socket_path);
        Ok(listener)
    }

    /// Run the admin socket server.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            tracing::error!("Admin connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept admin connection: {}", e);
                }
            }
        }
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }
}

async fn handle_connection(stream: UnixStream, state: Arc<MeshworkState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<AdminCommand>(&line) {
            Ok(cmd) => execute_command(cmd, &state),
            Err(e) => AdminResponse::Error {
                error: format!("Invalid command: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

fn register_node(state: &MeshworkState, node_id: String, scheme: Scheme, key: Option<String>) -> AdminResponse {
    if let Err(e) = validate_node_id(&node_id) {
        return AdminResponse::error(e);
    }

    let (credential, generated) = match (scheme, key) {
        (Scheme::Hmac, None) => {
            let secret = Secret::generate();
            (Credential::hmac(&secret), Some(secret.to_prefixed_hex()))
        }
        (scheme, Some(key)) => match Credential::parse(scheme, &key) {
            Ok(credential) => (credential, None),
            Err(e) => return AdminResponse::error(e),
        },
        (Scheme::Ed25519, None) => return AdminResponse::error("ed25519 registration requires a public key"),
    };

    let record = NodeCredential {
        node_id: node_id.clone(),
        credential,
        created_at: Utc::now(),
    };
    if let Err(e) = state.storage.put_credential(&record) {
        return AdminResponse::error(e);
    }

    tracing::info!(node_id = %node_id, scheme = scheme.as_str(), "Registered node credential");
    let message = match generated {
        Some(secret) => format!("Registered {node_id} ({}); secret: {secret}", scheme.as_str()),
        None => format!("Registered {node_id} ({})", scheme.as_str()),
    };
    AdminResponse::Ok { message }
}

fn execute_command(cmd: AdminCommand, state: &MeshworkState) -> AdminResponse {
    match cmd {
        AdminCommand::RegisterNode { node_id, scheme, key } => register_node(state, node_id, scheme, key),

        AdminCommand::RevokeNode { node_id } => match state.storage.delete_credential(&node_id) {
            Ok(true) => {
                tracing::info!(node_id = %node_id, "Revoked node credential");
                AdminResponse::Ok {
                    message: format!("Revoked {node_id}"),
                }
            }
            Ok(false) => AdminResponse::error(format!("no credential for {node_id}")),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::ListNodes => match state.storage.list_credentials() {
            Ok(creds) => AdminResponse::List {
                items: creds
                    .iter()
                    .map(|c| {
                        format!(
                            "{} {} {}",
                            c.node_id,
                            c.credential.scheme.as_str(),
                            c.credential.fingerprint()
                        )
                    })
                    .collect(),
            },
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::SvGet { node_id } => {
            match state.ledger.get(&node_id, crate::now_ms()).map(serde_json::to_value) {
                Ok(Ok(value)) => AdminResponse::Value { value },
                Ok(Err(e)) => AdminResponse::error(e),
                Err(e) => AdminResponse::error(e),
            }
        }

        AdminCommand::SvBumpStreak { node_id, by } => {
            match state
                .ledger
                .bump_streak(&node_id, by.unwrap_or(1), crate::now_ms())
                .map(serde_json::to_value)
            {
                Ok(Ok(value)) => AdminResponse::Value { value },
                Ok(Err(e)) => AdminResponse::error(e),
                Err(e) => AdminResponse::error(e),
            }
        }

        AdminCommand::PruneNonces => match state.verifier.prune_nonces(crate::now_ms()) {
            Ok(removed) => AdminResponse::Ok {
                message: format!("Pruned {removed} nonces"),
            },
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Ping => AdminResponse::Pong,
    }
}

/// Private directory next to `socket_path` used while binding.
fn staging_dir(socket_path: &Path) -> PathBuf {
    let name = socket_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "admin.sock".to_string());
    let parent = socket_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    parent.join(format!(".{name}.{}.bind", std::process::id()))
}

/// Default socket path.
pub fn default_socket_path() -> PathBuf {
    let data_dir = std::env::var("MESHWORK_DATA_DIR").unwrap_or_else(|_| "./meshwork-data".to_string());
    PathBuf::from(data_dir).join("admin.sock")
}
