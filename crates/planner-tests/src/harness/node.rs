use anyhow::Result;
use planner_node::handler::NodeState;
use planner_node::socket;
use planner_realtime::{MemoryBackend, RegistryConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;

/// A test node daemon serving an in-memory backend from a temp socket.
pub struct TestNode {
    pub state: Arc<NodeState>,
    pub socket_path: PathBuf,
    shutdown_tx: Option<oneshot::Sender<()>>,
    _socket_dir: TempDir,
}

impl TestNode {
    /// Spawn a node with default registry settings.
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(RegistryConfig::default()).await
    }

    /// Spawn a node with the given registry settings.
    pub async fn spawn_with(config: RegistryConfig) -> Result<Self> {
        let socket_dir = TempDir::new()?;
        let socket_path = socket_dir.path().join("planner.sock");

        let state = NodeState::new(MemoryBackend::new(), config);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let state_for_socket = state.clone();
        let socket_path_clone = socket_path.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = socket::serve(state_for_socket.clone(), &socket_path_clone) => {
                    if let Err(e) = result {
                        tracing::debug!(err = %e, "socket server stopped");
                    }
                }
                _ = shutdown_rx => {
                    tracing::debug!("node shutdown signal received");
                }
                _ = state_for_socket.shutdown.cancelled() => {
                    tracing::debug!("node shutdown requested by client");
                }
            }
        });

        // Wait for socket to be ready
        for _ in 0..50 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        Ok(Self {
            state,
            socket_path,
            shutdown_tx: Some(shutdown_tx),
            _socket_dir: socket_dir,
        })
    }

    pub fn backend(&self) -> &MemoryBackend {
        &self.state.backend
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.state.hub.dispose();
        std::fs::remove_file(&self.socket_path).ok();
    }
}
