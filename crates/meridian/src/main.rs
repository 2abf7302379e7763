//! Meridian entry point.

use std::path::PathBuf;

use meridian::bootstrap::{run, BootOptions};

fn parse_args() -> BootOptions {
    let mut args = std::env::args().skip(1);
    let mut options = BootOptions::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => options.config_file = Some(PathBuf::from(path)),
                None => {
                    eprintln!("--config requires a path");
                    std::process::exit(1);
                }
            },
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("meridian {}", meridian::VERSION);
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
        }
    }

    options
}

fn print_help() {
    println!(
        r"Meridian - server-rendered web application host

USAGE:
    meridian [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    MONGODB_URI            Data store connection string (required)
    MERIDIAN_ENV           Deployment mode: development or production (default)
    BUILD_FLAG_IS_DEV      'false' marks a production client build
    MERIDIAN_CONFIG        Configuration file, if --config is not given
    MERIDIAN__<KEY>        Override any configuration key,
                           e.g. MERIDIAN__SERVICE_WORKER__ENABLED=false
    RUST_LOG               Log filter, overrides logging.level

EXAMPLES:
    MONGODB_URI=localhost:27017/app meridian
    MERIDIAN_ENV=development MONGODB_URI=localhost/app meridian -c meridian.toml
"
    );
}

#[tokio::main]
async fn main() {
    let options = parse_args();

    if let Err(error) = run(options).await {
        tracing::error!(error = %error, "✗ {error}");
        eprintln!("meridian: {error}");
        std::process::exit(error.exit_code());
    }
}
