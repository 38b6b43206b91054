//! Command-line interface handling for the world daemon.
//!
//! Every option here overrides the matching value of the configuration file.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the number of map worker threads
    pub workers: Option<usize>,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    ///
    /// Exits the process with a usage message when an argument is malformed,
    /// such as a non-numeric worker count.
    pub fn parse() -> Self {
        let matches = Self::command().get_matches();

        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            workers: matches.get_one::<usize>("workers").copied(),
        }
    }

    fn command() -> Command {
        Command::new("World Daemon")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Map and instance lifecycle server for a persistent world")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
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
                Arg::new("workers")
                    .short('w')
                    .long("workers")
                    .value_name("COUNT")
                    .help("Map update worker threads (0 updates maps on the tick thread)")
                    .value_parser(clap::value_parser!(usize)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> CliArgs {
        let matches = CliArgs::command().get_matches_from(args);
        CliArgs {
            config_path: PathBuf::from(matches.get_one::<String>("config").unwrap()),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            workers: matches.get_one::<usize>("workers").copied(),
        }
    }

    #[test]
    fn test_defaults() {
        let args = parse_from(&["worldd"]);
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert!(args.log_level.is_none());
        assert!(!args.json_logs);
        assert!(args.workers.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = parse_from(&["worldd", "-c", "realm.toml", "-l", "debug", "--json-logs", "-w", "4"]);
        assert_eq!(args.config_path, PathBuf::from("realm.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.workers, Some(4));
    }

    #[test]
    fn test_rejects_non_numeric_workers() {
        let result = CliArgs::command().try_get_matches_from(["worldd", "--workers", "many"]);
        assert!(result.is_err());
    }
}
