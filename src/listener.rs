//! One bound listening socket per configured bind address.

use crate::cipher::CipherConfig;
use crate::config::Config;
use crate::errors::Error;
use crate::pair;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Binds `(host, config.server_port)` and accepts connections forever,
/// spawning one task per accepted connection so a single slow pair never
/// blocks the accept loop, and a failure on one connection never takes the
/// listener down.
pub async fn serve(host: String, config: Arc<Config>, cipher_config: Arc<CipherConfig>) -> Result<(), Error> {
    let bind_addr = format!("{}:{}", host, config.server_port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| Error::Config(format!("binding {}: {}", bind_addr, e)))?;

    log::info!("listening on {}", bind_addr);

    loop {
        let (socket, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Usually transient (out of file descriptors, etc): log and
                // keep serving other clients.
                log::error!("accept error on {}: {}", bind_addr, e);
                continue;
            }
        };

        if let Err(e) = socket.set_nodelay(true) {
            log::debug!("{}: set_nodelay failed: {}", peer_addr, e);
        }

        let config = config.clone();
        let cipher_config = cipher_config.clone();
        tokio::spawn(async move {
            pair::run(socket, peer_addr, config, cipher_config).await;
        });
    }
}
