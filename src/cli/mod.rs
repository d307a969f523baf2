//! Command line interface for the universal app merger.
//!
//! Parses arguments, runs one merge and reports the outcome.

mod args;

pub use args::{Args, FuserChoice, InspectorChoice};

use crate::error::{CliError, Result};
use crate::merger::{MergeReport, Merger};

/// Main CLI entry point
pub async fn run(args: Args) -> Result<i32> {
    args.validate()
        .map_err(|reason| CliError::InvalidArguments { reason })?;

    let options = args.to_options()?;
    let inspector = args.inspector.resolve();
    let fuser = args.fuser.resolve();
    log::debug!("using inspector {:?} and fuser {:?}", inspector, fuser);

    let report = Merger::new(options, inspector, fuser).merge().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(0)
}

fn print_summary(report: &MergeReport) {
    println!("Universal app: {}", report.output.display());
    println!("  asar mode:      {:?}", report.asar_mode);
    println!("  fused binaries: {}", report.fused.len());
    if !report.fused_archive_entries.is_empty() {
        println!("  fused in asar:  {}", report.fused_archive_entries.len());
    }
    match report.shim {
        Some(kind) => println!("  shim:           {:?}", kind),
        None => println!("  shim:           none"),
    }
    for (archive, integrity) in &report.integrity {
        println!("  integrity:      {} {}", archive, integrity.hash);
    }
}

/// Parse arguments without executing (for testing)
pub fn parse_args() -> Args {
    Args::parse_args()
}
