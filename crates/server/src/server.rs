use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use micro_file_http::connection::HttpConnection;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::session::ConnectionSession;

#[derive(Debug, Default)]
pub struct ServerBuilder {
    address: Option<Vec<SocketAddr>>,
    config: Option<SessionConfig>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Addresses that fail to resolve leave the address unset.
    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = match address.to_socket_addrs() {
            Ok(addresses) => Some(addresses.collect()),
            Err(e) => {
                warn!(cause = %e, "can't resolve listen address");
                None
            }
        };
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let address = self.address.filter(|address| !address.is_empty()).ok_or(ServerBuildError::MissingAddress)?;
        let config = self.config.ok_or(ServerBuildError::MissingConfig)?;
        Ok(Server { address, config: Arc::new(config) })
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("address must be set")]
    MissingAddress,
    #[error("session config must be set")]
    MissingConfig,
}

/// Accepts connections and runs one [`ConnectionSession`] per connection on its own task.
#[derive(Debug)]
pub struct Server {
    address: Vec<SocketAddr>,
    config: Arc<SessionConfig>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub async fn start(self) -> io::Result<()> {
        info!("start listening at {:?}", self.address);
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return Err(e);
            }
        };

        self.serve(tcp_listener).await;
        Ok(())
    }

    /// Runs the accept loop on an already bound listener. Never returns.
    pub async fn serve(self, tcp_listener: TcpListener) {
        loop {
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let connection = HttpConnection::new(reader, writer);
                match connection.process(|writer| ConnectionSession::new(config, writer)).await {
                    Ok(()) => {
                        info!(%remote_addr, "finished process, connection shutdown");
                    }
                    Err(e) => {
                        error!(%remote_addr, cause = %e, "connection failed, connection shutdown");
                    }
                }
            });
        }
    }
}
