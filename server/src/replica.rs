use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::handlers;

/// One simulated backend instance. The identifier and delay settings are
/// fixed at construction and each listener owns its own copy, so a replica
/// can never observe another replica's identity.
#[derive(Debug, Clone)]
pub struct Replica {
    pub id: u32,
    pub addr: SocketAddr,
    pub default_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Replica {
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(self.addr).await
    }

    /// Accept loop for this replica. Never returns; the fleet is torn down
    /// with the process.
    pub async fn serve(self, listener: TcpListener) {
        let replica = Arc::new(self);
        match listener.local_addr() {
            Ok(addr) => tracing::info!(replica = replica.id, %addr, "replica started"),
            Err(_) => tracing::info!(replica = replica.id, "replica started"),
        }

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::error!(replica = replica.id, error = %err, "failed to accept connection");
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            let replica = replica.clone();

            tokio::task::spawn(async move {
                let service = {
                    let replica = replica.clone();
                    service_fn(move |req| handlers::handle_request(replica.clone(), req))
                };
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!(replica = replica.id, error = ?err, "error handling connection");
                }
            });
        }
    }
}
