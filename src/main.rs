//! Kodegen Bundler Universal - merge x64 and arm64 macOS apps.
//!
//! This binary fuses two architecture-specific builds of a macOS application
//! into one universal bundle, with atomic output and full cleanup on failure.

use kodegen_bundler_universal::cli;
use std::process;

#[tokio::main]
async fn main() {
    let args = cli::parse_args();

    // Initialize logging; RUST_LOG still wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    // Run CLI and get exit code
    let exit_code = match cli::run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            for suggestion in e.recovery_suggestions() {
                eprintln!("  hint: {}", suggestion);
            }
            1
        }
    };

    process::exit(exit_code);
}
