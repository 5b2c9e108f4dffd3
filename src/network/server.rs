use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::ConnectionManager;

/// Время ожидания закрытия соединений при остановке сервера.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// TCP-сервер эталонного транспорта.
pub struct RelayServer {
    listener: TcpListener,
    manager: Arc<ConnectionManager>,
}

impl RelayServer {
    /// Открывает слушающий сокет.
    pub async fn bind(
        addr: &str,
        manager: Arc<ConnectionManager>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self { listener, manager })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Принимает соединения, пока не завершится `shutdown`.
    pub async fn run<F>(
        self,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(addr = %self.local_addr()?, "Listening for connections");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => {
                            let manager = self.manager.clone();
                            tokio::spawn(async move {
                                if let Err(e) = manager.handle_connection(socket, addr).await {
                                    error!(%addr, error = %e, "Error handling connection");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "Failed to accept connection"),
                    }
                }
            }
        }

        self.manager.shutdown();
        if let Err(e) = self.manager.wait_for_shutdown(SHUTDOWN_GRACE).await {
            warn!(error = %e, "Some connections did not close in time");
        }
        Ok(())
    }
}
