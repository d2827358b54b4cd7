mod cmd;
mod logging;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "resilink", version, about = "Resilient line transport over flaky links")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Log verbosity. `RUST_LOG` overrides this when set.
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);
    if let Err(err) = cmd::run(cli.command).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_serve() {
        let cli = Cli::try_parse_from([
            "resilink", "serve", "--port", "9000", "--expect", "one", "--expect", "two",
        ])
        .unwrap();
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.port, 9000);
                assert_eq!(args.expected, ["one", "two"]);
                assert_eq!(args.timeout_ms, 5000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_send_with_defaults() {
        let cli = Cli::try_parse_from(["resilink", "send", "sensor-1"]).unwrap();
        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.identity, "sensor-1");
                assert_eq!(args.host, "127.0.0.1");
                assert_eq!(args.port, 8123);
                assert!(!args.best_effort);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn serve_requires_expected_clients() {
        assert!(Cli::try_parse_from(["resilink", "serve"]).is_err());
    }

    #[test]
    fn global_log_flags_parse_after_subcommand() {
        let cli =
            Cli::try_parse_from(["resilink", "send", "sensor-1", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
