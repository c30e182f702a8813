use clap::Parser;
use duo_common::types::DEFAULT_HOST;
use std::path::PathBuf;

/// CLI arguments for the terminal client.
#[derive(Parser, Debug, Clone)]
#[command(name = "duoc")]
#[command(about = "duo relay chat client")]
#[command(version)]
pub struct Args {
    /// Server port.
    #[arg(long, env = "DUOC_PORT")]
    pub port: u16,
    /// Server host name; must match the certificate.
    #[arg(long, default_value = DEFAULT_HOST, env = "DUOC_HOST")]
    pub host: String,
    /// PEM file holding the server certificate to trust.
    #[arg(long, default_value = "cert.pem", env = "DUOC_CERT")]
    pub cert: PathBuf,
    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_required() {
        assert!(Args::try_parse_from(["duoc"]).is_err());
    }

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["duoc", "--port", "4433"]).unwrap();
        assert_eq!(args.port, 4433);
        assert_eq!(args.host, "localhost");
        assert_eq!(args.cert, PathBuf::from("cert.pem"));
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn overrides() {
        let args = Args::try_parse_from([
            "duoc", "--port", "1", "--host", "chat.example", "--cert", "/tmp/c.pem", "-vv",
        ])
        .unwrap();
        assert_eq!(args.host, "chat.example");
        assert_eq!(args.cert, PathBuf::from("/tmp/c.pem"));
        assert_eq!(args.verbose, 2);
    }
}
