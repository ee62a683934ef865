//! relay-core command line entry point.
//!
//! ## CLI Subcommands
//!
//! - `relay-core-cli config show|defaults|validate` - Inspect configuration
//! - `relay-core-cli replay <FILE>` - Replay a request sequence offline
//! - `relay-core-cli version` - Show version information

use std::path::Path;
use std::process::ExitCode;

use relay_core::cli::config_cmd;
use relay_core::cli::replay::run_replay_file;
use relay_core::telemetry::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => ExitCode::from(config_cmd::run_show() as u8),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => ExitCode::from(config_cmd::run_validate() as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "replay" => {
            let Some(path) = args.get(2) else {
                eprintln!("replay requires a file argument");
                print_command_help("replay");
                return ExitCode::from(2u8);
            };
            if let Err(e) = init_logging(&LogConfig::from_env()) {
                eprintln!("Logging disabled: {}", e);
            }
            match run_replay_file(Path::new(path)).await {
                Ok(code) => ExitCode::from(code as u8),
                Err(e) => {
                    eprintln!("Replay failed: {}", e);
                    ExitCode::from(2u8)
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("relay-core {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "relay-core - request coordination proxy v{}

USAGE:
    relay-core-cli [COMMAND] [OPTIONS]

COMMANDS:
    config       Inspect configuration (show, defaults, validate)
    replay       Replay a JSON request sequence against an in-process transport
    version      Show version information
    help         Show this help message

ENVIRONMENT:
    RELAY_CONFIG         TOML config file
    RELAY_*              Per-option overrides (see `config defaults`)
    RUST_LOG             Log filter (default: relay_core=info)
    RELAY_LOG_FORMAT     json or pretty

EXIT CODES:
    0  Success
    1  Failure / configuration warnings
    2  Usage or input error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "config" => {
            eprintln!(
                "relay-core-cli config - Inspect configuration

USAGE:
    relay-core-cli config [show|defaults|validate]

DESCRIPTION:
    show      Print the effective configuration (defaults, RELAY_CONFIG file, env)
    defaults  Print the built-in defaults
    validate  Warn about combinations that have no effect; exit 1 if any

EXAMPLES:
    relay-core-cli config show
    RELAY_CONFIG=relay.toml relay-core-cli config validate
"
            );
        }
        "replay" => {
            eprintln!(
                "relay-core-cli replay - Replay a request sequence

USAGE:
    relay-core-cli replay <FILE>

DESCRIPTION:
    Reads a JSON array of requests ({{\"url\", \"type\", \"data\", \"tid\", \"lowPriority\", \"async\"}})
    and control steps ({{\"action\": \"begin|commit|abort|wait|flush\", \"tid\", \"ms\"}}),
    runs them through a proxy whose transport echoes every call, then prints
    each wire call and each request outcome as a JSON line, followed by the
    proxy counters.
"
            );
        }
        _ => print_usage(),
    }
}
