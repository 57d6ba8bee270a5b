use ssrelay::cipher::CipherConfig;
use ssrelay::config::Config;
use std::process::ExitCode;
use std::sync::Arc;

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let loaded = Config::load(&args);
    // Logging needs to come up before we can report a config error, but the
    // verbosity flag lives in the config we're trying to report about, so
    // fall back to non-verbose if parsing failed.
    let verbose = loaded.as_ref().map(|c| c.verbose).unwrap_or(false);
    init_logging(verbose);

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            log::error!("startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    config.write_pid_file();
    let cipher_config = Arc::new(CipherConfig::new(&config.password, config.method));
    log::info!("cipher method: {}", config.method);

    let config = Arc::new(config);

    match ssrelay::server::run(config, cipher_config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}
