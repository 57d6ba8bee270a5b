//! Top-level orchestration: one listener task per configured bind host,
//! sharing the process-wide config and cipher config.

use crate::cipher::CipherConfig;
use crate::config::Config;
use crate::errors::Error;
use crate::listener;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Spawns a listener for every `config.server_host` entry and waits for the
/// first one to fail. A listener only fails on a bind error at startup;
/// per-connection faults are handled and logged inside the listener itself,
/// so in practice this only returns once something has gone wrong at
/// startup.
pub async fn run(config: Arc<Config>, cipher_config: Arc<CipherConfig>) -> Result<(), Error> {
    if config.server_host.is_empty() {
        return Err(Error::Config("no server_host entries configured".to_string()));
    }

    let mut listeners: JoinSet<Result<(), Error>> = JoinSet::new();

    for host in &config.server_host {
        let host = host.clone();
        let config = config.clone();
        let cipher_config = cipher_config.clone();
        listeners.spawn(async move { listener::serve(host, config, cipher_config).await });
    }

    match listeners.join_next().await {
        Some(Ok(result)) => result,
        Some(Err(join_error)) => Err(Error::Config(format!("listener task panicked: {}", join_error))),
        None => Ok(()),
    }
}
