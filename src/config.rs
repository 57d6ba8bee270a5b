//! Configuration: bind hosts/port, password, cipher method, connect
//! timeout, PID file. Loaded from an optional TOML file, then overridden by
//! CLI flags.

use crate::cipher::CipherMethod;
use crate::errors::Error;
use serde_derive::Deserialize;
use std::fs;
use std::io::Write;

fn default_timeout() -> u64 {
    60
}

fn default_port() -> u16 {
    8388
}

fn default_method() -> CipherMethod {
    CipherMethod::Rc4
}

/// Process-wide configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// One or more bind hosts; the listener binds `(host, server_port)` for
    /// each of them.
    #[serde(default = "default_hosts")]
    pub server_host: Vec<String>,

    /// The single bind port shared by every `server_host`.
    #[serde(default = "default_port")]
    pub server_port: u16,

    /// Shared secret the cipher key is derived from.
    pub password: String,

    #[serde(default = "default_method")]
    pub method: CipherMethod,

    /// Upstream connect timeout, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Optional PID file written once the listener is up.
    #[serde(default)]
    pub pid_file: Option<String>,

    /// Gates `debug!` logging; wired to `env_logger`'s filter in `main`.
    #[serde(default)]
    pub verbose: bool,
}

fn default_hosts() -> Vec<String> {
    vec!["0.0.0.0".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_host: default_hosts(),
            server_port: default_port(),
            password: String::new(),
            method: default_method(),
            timeout: default_timeout(),
            pid_file: None,
            verbose: false,
        }
    }
}

impl Config {
    /// Loads a config file, if given, then applies CLI overrides on top.
    /// CLI flags always win over file values.
    pub fn load(args: &[String]) -> Result<Config, Error> {
        let mut config_path: Option<String> = None;
        let mut overrides = CliOverrides::default();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    config_path = Some(next_arg(args, &mut i, "--config")?);
                }
                "--bind" => {
                    overrides.server_host.push(next_arg(args, &mut i, "--bind")?);
                }
                "--port" => {
                    let raw = next_arg(args, &mut i, "--port")?;
                    overrides.server_port = Some(
                        raw.parse()
                            .map_err(|_| Error::Config(format!("invalid --port: {}", raw)))?,
                    );
                }
                "--password" => {
                    overrides.password = Some(next_arg(args, &mut i, "--password")?);
                }
                "--timeout" => {
                    let raw = next_arg(args, &mut i, "--timeout")?;
                    overrides.timeout = Some(
                        raw.parse()
                            .map_err(|_| Error::Config(format!("invalid --timeout: {}", raw)))?,
                    );
                }
                "--pid-file" => {
                    overrides.pid_file = Some(next_arg(args, &mut i, "--pid-file")?);
                }
                "-v" | "--verbose" => {
                    overrides.verbose = true;
                    i += 1;
                }
                other => {
                    return Err(Error::Config(format!("unrecognized argument: {}", other)));
                }
            }
        }

        let mut config = match config_path {
            Some(path) => Config::from_file(&path)?,
            None => Config::default(),
        };

        overrides.apply(&mut config);

        if config.password.is_empty() {
            return Err(Error::Config(
                "password is required (set it in the config file or pass --password)".to_string(),
            ));
        }

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Config, Error> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {}", path, e)))?;
        toml::from_str(&contents).map_err(|e| Error::Config(format!("parsing {}: {}", path, e)))
    }

    /// Writes the process PID to `pid_file`, if configured. Best-effort: a
    /// failure here is logged, not fatal.
    pub fn write_pid_file(&self) {
        if let Some(path) = &self.pid_file {
            match fs::File::create(path) {
                Ok(mut f) => {
                    if let Err(e) = writeln!(f, "{}", std::process::id()) {
                        log::error!("failed to write pid file {}: {}", path, e);
                    }
                }
                Err(e) => log::error!("failed to create pid file {}: {}", path, e),
            }
        }
    }
}

#[derive(Default)]
struct CliOverrides {
    server_host: Vec<String>,
    server_port: Option<u16>,
    password: Option<String>,
    timeout: Option<u64>,
    pid_file: Option<String>,
    verbose: bool,
}

impl CliOverrides {
    fn apply(self, config: &mut Config) {
        if !self.server_host.is_empty() {
            config.server_host = self.server_host;
        }
        if let Some(port) = self.server_port {
            config.server_port = port;
        }
        if let Some(password) = self.password {
            config.password = password;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if self.pid_file.is_some() {
            config.pid_file = self.pid_file;
        }
        if self.verbose {
            config.verbose = true;
        }
    }
}

fn next_arg(args: &[String], i: &mut usize, flag: &str) -> Result<String, Error> {
    let value = args
        .get(*i + 1)
        .cloned()
        .ok_or_else(|| Error::Config(format!("{} requires a value", flag)))?;
    *i += 2;
    Ok(value)
}
