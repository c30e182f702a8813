use clap::Parser;
use duo_common::types::DEFAULT_HOST;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "duos")]
#[command(about = "duo relay chat server")]
#[command(version)]
pub struct Args {
    /// Port to listen on.
    #[arg(long, env = "DUOS_PORT")]
    pub port: u16,
    /// Host name or address to bind.
    #[arg(long, default_value = DEFAULT_HOST, env = "DUOS_HOST")]
    pub host: String,
    /// PEM file holding the server certificate chain.
    #[arg(long, default_value = "cert.pem", env = "DUOS_CERT")]
    pub cert: PathBuf,
    /// PEM file holding the private key. Defaults to the certificate file.
    #[arg(long, env = "DUOS_KEY")]
    pub key: Option<PathBuf>,
    /// JSON credential table.
    #[arg(long, default_value = "users.json", env = "DUOS_USERS")]
    pub users: PathBuf,
    /// Maximum number of authenticated peers.
    #[arg(long, default_value = "2", env = "DUOS_CAPACITY")]
    pub capacity: usize,
    /// TLS handshake timeout in seconds.
    #[arg(long, default_value = "10", env = "DUOS_HANDSHAKE_TIMEOUT")]
    pub handshake_timeout: u64,
    /// Outbound frames buffered per connection before messages are dropped.
    #[arg(long, default_value = "64", env = "DUOS_QUEUE_DEPTH")]
    pub queue_depth: usize,
    /// PBKDF2 iterations for newly registered passwords.
    #[arg(long, default_value = "100000", env = "DUOS_HASH_ITERATIONS")]
    pub hash_iterations: u32,
    /// Socket address for the metrics endpoint. Disabled when unset.
    #[arg(long, env = "DUOS_METRICS")]
    pub metrics_addr: Option<SocketAddr>,
    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` wins if set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host name or address to bind.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Certificate chain PEM file.
    pub cert: PathBuf,
    /// Private key PEM file, if separate from `cert`.
    pub key: Option<PathBuf>,
    /// Credential table path.
    pub users: PathBuf,
    /// Maximum number of authenticated peers.
    pub capacity: usize,
    /// TLS handshake timeout in seconds.
    pub handshake_timeout: u64,
    /// Per-connection outbound queue depth.
    pub queue_depth: usize,
    /// PBKDF2 iterations for new registrations.
    pub hash_iterations: u32,
    /// Metrics endpoint address.
    pub metrics_addr: Option<SocketAddr>,
}

impl ServerConfig {
    /// Path of the private key, falling back to the certificate file.
    #[must_use]
    pub fn key_path(&self) -> &Path {
        self.key.as_deref().unwrap_or(&self.cert)
    }

    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty".to_string());
        }

        if self.capacity == 0 {
            return Err("capacity must be greater than 0".to_string());
        }
        if self.capacity > 1024 {
            return Err("capacity exceeds reasonable limit (1024)".to_string());
        }

        if self.handshake_timeout == 0 {
            return Err("handshake_timeout must be greater than 0".to_string());
        }
        if self.handshake_timeout > 300 {
            return Err("handshake_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.queue_depth == 0 {
            return Err("queue_depth must be greater than 0".to_string());
        }
        if self.queue_depth > 65_536 {
            return Err("queue_depth exceeds reasonable limit (65536)".to_string());
        }

        if self.hash_iterations < 1_000 {
            return Err("hash_iterations must be at least 1000".to_string());
        }
        if self.hash_iterations > 10_000_000 {
            return Err("hash_iterations exceeds reasonable limit (10,000,000)".to_string());
        }

        if self.users.as_os_str().is_empty() {
            return Err("users path must not be empty".to_string());
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            cert: args.cert,
            key: args.key,
            users: args.users,
            capacity: args.capacity,
            handshake_timeout: args.handshake_timeout,
            queue_depth: args.queue_depth,
            hash_iterations: args.hash_iterations,
            metrics_addr: args.metrics_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            host: "localhost".to_string(),
            port: 9000,
            cert: PathBuf::from("cert.pem"),
            key: None,
            users: PathBuf::from("users.json"),
            capacity: 2,
            handshake_timeout: 10,
            queue_depth: 64,
            hash_iterations: 100_000,
            metrics_addr: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn key_defaults_to_cert() {
        let mut c = valid_config();
        assert_eq!(c.key_path(), Path::new("cert.pem"));
        c.key = Some(PathBuf::from("key.pem"));
        assert_eq!(c.key_path(), Path::new("key.pem"));
    }

    #[test]
    fn empty_host() {
        let mut c = valid_config();
        c.host = "  ".to_string();
        assert!(c.validate().unwrap_err().contains("host"));
    }

    #[test]
    fn capacity_zero() {
        let mut c = valid_config();
        c.capacity = 0;
        assert!(c.validate().unwrap_err().contains("capacity"));
    }

    #[test]
    fn capacity_too_large() {
        let mut c = valid_config();
        c.capacity = 1025;
        assert!(c.validate().unwrap_err().contains("capacity"));
    }

    #[test]
    fn handshake_timeout_bounds() {
        let mut c = valid_config();
        c.handshake_timeout = 0;
        assert!(c.validate().unwrap_err().contains("handshake_timeout"));
        c.handshake_timeout = 301;
        assert!(c.validate().unwrap_err().contains("handshake_timeout"));
    }

    #[test]
    fn queue_depth_bounds() {
        let mut c = valid_config();
        c.queue_depth = 0;
        assert!(c.validate().unwrap_err().contains("queue_depth"));
        c.queue_depth = 65_537;
        assert!(c.validate().unwrap_err().contains("queue_depth"));
    }

    #[test]
    fn hash_iterations_bounds() {
        let mut c = valid_config();
        c.hash_iterations = 999;
        assert!(c.validate().unwrap_err().contains("hash_iterations"));
        c.hash_iterations = 10_000_001;
        assert!(c.validate().unwrap_err().contains("hash_iterations"));
    }

    #[test]
    fn empty_users_path() {
        let mut c = valid_config();
        c.users = PathBuf::new();
        assert!(c.validate().unwrap_err().contains("users"));
    }

    #[test]
    fn boundary_values_valid() {
        let mut c = valid_config();
        c.capacity = 1;
        c.handshake_timeout = 1;
        c.queue_depth = 1;
        c.hash_iterations = 1_000;
        assert!(c.validate().is_ok());

        c.capacity = 1024;
        c.handshake_timeout = 300;
        c.queue_depth = 65_536;
        c.hash_iterations = 10_000_000;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn args_require_port() {
        assert!(Args::try_parse_from(["duos"]).is_err());
        let args = Args::try_parse_from(["duos", "--port", "9000"]).unwrap();
        let config = ServerConfig::from(args);
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.capacity, 2);
        assert_eq!(config.users, PathBuf::from("users.json"));
    }
}
