//! gridxfer CLI - parallel, fault-tolerant bulk transfers
//!
//! Reads a transfer plan from a file or stdin and runs it through the
//! external copy tool with bounded parallelism.

use clap::Parser;
use gridxfer::config::{CliArgs, OutputFormat, TransferConfig};
use gridxfer::engine::{Arbiter, Engine, ToolCommand};
use gridxfer::error::{GridXferError, IoResultExt, Result};
use gridxfer::manifest::{ManifestMode, ManifestReader, UriRewrite};
use gridxfer::probe::{check_proxy, select_tool, ToolProfile};
use gridxfer::session::{RunSummary, TransferSession, EXIT_TRANSFER_FAILED};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();
    let config = match TransferConfig::from_cli(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging; RUST_LOG wins over -q/-v
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(&config) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn run(config: &TransferConfig) -> Result<i32> {
    let tool = select_tool(config.tool.as_deref())?;
    if config.show_config {
        config.print_summary();
        print_tool(&tool);
    }

    if config.skip_proxy_check {
        info!("proxy check skipped");
    } else if let Some(remaining) = check_proxy(config.proxy_info.as_deref(), config.min_proxy_lifetime)? {
        info!("grid proxy valid for another {} s", remaining);
    }

    let arbiter = match &config.arbitration_table {
        Some(path) => Arbiter::from_json_file(path, config.force_retry)?,
        None => Arbiter::new(gridxfer::engine::builtin_rules(), config.force_retry),
    };
    let command = ToolCommand::new(
        &tool.path,
        config.tool_args.clone(),
        tool.capabilities,
        config.passive,
        config.quiet,
    );
    let engine = Arc::new(
        Engine::new(command, arbiter).with_force_symlink(config.force_symlink),
    );

    let mut session = TransferSession::new(config, engine);
    let rejected = submit_manifest(config, &mut session)?;
    let summary = session.finish()?;
    report(config, &summary)?;

    if rejected > 0 {
        error!("{} manifest sections were rejected", rejected);
        return Ok(EXIT_TRANSFER_FAILED);
    }
    Ok(summary.exit_code())
}

/// Feed every manifest section to the session; returns rejected sections
fn submit_manifest(config: &TransferConfig, session: &mut TransferSession) -> Result<usize> {
    let input: Box<dyn BufRead> = match &config.manifest {
        Some(path) => Box::new(BufReader::new(File::open(path).with_path(path)?)),
        None => Box::new(io::stdin().lock()),
    };
    let mode = if config.pairs {
        ManifestMode::Pairs
    } else {
        ManifestMode::Sections
    };
    let rewrite = UriRewrite::new(&config.base_uri, &config.base_mount);

    let mut rejected = 0;
    let mut reader = ManifestReader::new(input, mode, rewrite);
    for section in reader.by_ref() {
        match section {
            Ok(section) => session.submit(section)?,
            Err(e @ GridXferError::Manifest { .. }) => {
                error!("{}", e);
                rejected += 1;
            }
            Err(e) => return Err(e),
        }
    }
    debug!("manifest done after {} lines", reader.line_number());
    Ok(rejected)
}

fn print_tool(tool: &ToolProfile) {
    println!("# copy tool: {}", tool.path.display());
    println!("# tool options: 0x{}", tool.capabilities);
    match tool.version {
        Some(v) => println!("# tool version: {}.{}", v / 1000, v % 1000),
        None => println!("# tool version: unknown"),
    }
    println!("# batching possible: {}", tool.supports_batching());
}

fn report(config: &TransferConfig, summary: &RunSummary) -> Result<()> {
    match config.output_format {
        OutputFormat::Text => {
            for line in summary.text_lines(config.quiet) {
                println!("{}", line);
            }
        }
        OutputFormat::Json => println!("{}", summary.to_json()?),
    }
    Ok(())
}
