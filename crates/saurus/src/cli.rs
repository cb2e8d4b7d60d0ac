//! Command-line interface handling for the Saurus relay.
//!
//! Every option overrides the matching setting of the configuration file.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "saurus.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the TLS certificate chain
    pub cert_file: Option<PathBuf>,
    /// Optional override for the TLS private key
    pub key_file: Option<PathBuf>,
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list. The first item is the program name.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            cert_file: matches.get_one::<String>("cert").map(PathBuf::from),
            key_file: matches.get_one::<String>("key").map(PathBuf::from),
        }
    }
}

fn command() -> Command {
    Command::new("saurus")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Relay between game servers and their companion apps")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 0.0.0.0:8443)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("cert")
                .long("cert")
                .value_name("FILE")
                .help("PEM certificate chain; enables TLS together with --key"),
        )
        .arg(
            Arg::new("key")
                .long("key")
                .value_name("FILE")
                .help("PEM private key; enables TLS together with --cert"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_arguments() {
        let args = CliArgs::try_parse_from(["saurus"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("saurus.toml"));
        assert_eq!(args.bind_address, None);
        assert_eq!(args.log_level, None);
        assert!(!args.json_logs);
        assert_eq!(args.cert_file, None);
    }

    #[test]
    fn every_override_is_picked_up() {
        let args = CliArgs::try_parse_from([
            "saurus",
            "-c",
            "prod.toml",
            "--bind",
            "0.0.0.0:443",
            "-l",
            "debug",
            "--json-logs",
            "--cert",
            "fullchain.pem",
            "--key",
            "privkey.pem",
        ])
        .unwrap();

        assert_eq!(args.config_path, PathBuf::from("prod.toml"));
        assert_eq!(args.bind_address.as_deref(), Some("0.0.0.0:443"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.cert_file, Some(PathBuf::from("fullchain.pem")));
        assert_eq!(args.key_file, Some(PathBuf::from("privkey.pem")));
    }

    #[test]
    fn unknown_flag_is_an_error() {
        assert!(CliArgs::try_parse_from(["saurus", "--plugins", "dir"]).is_err());
    }
}
