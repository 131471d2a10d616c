//! Configuration settings for gridxfer
//!
//! Defines the command line, its defaults, and the immutable runtime
//! configuration handed to the queue, the engine and the probe.

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default maximum number of concurrent tool invocations
pub const DEFAULT_PARALLEL: usize = 4;
/// Default TCP buffer size (0 lets the tool decide)
pub const DEFAULT_BUFSIZE: u32 = 0;
/// Default number of parallel data streams
pub const DEFAULT_STREAMS: u32 = 1;
/// Default maximum attempts per pair
pub const DEFAULT_RETRIES: u32 = 3;
/// Default sleep before the first attempt, in seconds
pub const DEFAULT_INITIAL: f64 = 0.0;
/// Default exponential back-off base, in seconds
pub const DEFAULT_BACKOFF: f64 = 5.0;
/// Minimum remaining proxy lifetime, in seconds
pub const DEFAULT_MIN_PROXY_LIFETIME: i64 = 3600;

/// gridxfer - parallel, fault-tolerant bulk transfers through an external copy tool
#[derive(Parser, Debug, Clone)]
#[command(name = "gridxfer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Parallel, fault-tolerant bulk transfers through globus-url-copy")]
#[command(long_about = r#"
gridxfer reads a transfer plan and runs many independent transfers through
an external copy tool, with bounded parallelism, retries with exponential
back-off, and failure classification.

Manifest (section mode):
  LFN [any|all|optional]
   source-uri            (one leading blank)
    destination-uri      (two leading blanks)

Manifest (--pairs): alternating source and destination lines.

Examples:
  gridxfer gsiftp://gk.example.org/storage /storage plan.txt
  gridxfer -P 8 -r 5 -T 10 --pairs gsiftp://gk/st /st < pairs.txt
"#)]
pub struct CliArgs {
    /// Base URI of the local gatekeeper; matching lines use BASEMNT instead
    #[arg(value_name = "BASEURI")]
    pub base_uri: String,

    /// Local mount point corresponding to BASEURI
    #[arg(value_name = "BASEMNT")]
    pub base_mount: String,

    /// Transfer plan (default: stdin)
    #[arg(value_name = "MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Path to the copy tool (default: auto-detect)
    #[arg(short = 'g', long = "tool", value_name = "PATH")]
    pub tool: Option<PathBuf>,

    /// Pass option o (hyphen prepended) with optional value v to the tool
    #[arg(short = 'G', long = "tool-arg", value_name = "O[,V]")]
    pub tool_args: Vec<String>,

    /// Never batch pairs into from-file invocations
    #[arg(short = 'N', long)]
    pub no_batch: bool,

    /// Do not add -fast and -p (avoids passive mode)
    #[arg(short = 'n', long)]
    pub no_passive: bool,

    /// Maximum number of parallel tool invocations
    #[arg(short = 'P', long, default_value_t = DEFAULT_PARALLEL, value_name = "NUM")]
    pub parallel: usize,

    /// Replace existing destinations when symlinking local files
    #[arg(short = 'f', long)]
    pub force_symlink: bool,

    /// TCP buffer size for the tool's -tcp-bs option
    #[arg(short = 't', long, default_value_t = DEFAULT_BUFSIZE, value_name = "BYTES")]
    pub tcp_buffer_size: u32,

    /// Number of streams for the tool's -p option
    #[arg(short = 'p', long, default_value_t = DEFAULT_STREAMS, value_name = "NUM")]
    pub streams: u32,

    /// Maximum number of attempts per transfer
    #[arg(short = 'r', long, default_value_t = DEFAULT_RETRIES, value_name = "NUM")]
    pub retries: u32,

    /// Be less noisy (repeatable)
    #[arg(short = 'q', long, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Be more verbose (repeatable)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Retry almost all tool failures
    #[arg(short = 'R', long)]
    pub force_retry: bool,

    /// Base interval of the exponential back-off, in seconds
    #[arg(short = 'T', long, default_value_t = DEFAULT_BACKOFF, value_name = "SECS")]
    pub backoff: f64,

    /// Sleep before the first attempt, in seconds
    #[arg(short = 'i', long, default_value_t = DEFAULT_INITIAL, value_name = "SECS")]
    pub initial: f64,

    /// Show the active configuration after parsing
    #[arg(short = 's', long)]
    pub show_config: bool,

    /// Distribute batched pairs by source host instead of round-robin
    #[arg(short = 'S', long)]
    pub sort_by_host: bool,

    /// Read alternating source/destination lines instead of sections
    #[arg(long)]
    pub pairs: bool,

    /// Path to grid-proxy-info (default: auto-detect)
    #[arg(long, value_name = "PATH")]
    pub proxy_info: Option<PathBuf>,

    /// Skip the grid proxy lifetime check
    #[arg(long)]
    pub skip_proxy_check: bool,

    /// Minimum remaining proxy lifetime, in seconds
    #[arg(long, default_value_t = DEFAULT_MIN_PROXY_LIFETIME, value_name = "SECS")]
    pub min_proxy_lifetime: i64,

    /// JSON file replacing the built-in failure classification rules
    #[arg(long, value_name = "PATH")]
    pub arbitration_table: Option<PathBuf>,

    /// Output format for the completion report
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

/// Output format for the completion report
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable comment lines
    #[default]
    Text,
    /// JSON document
    Json,
}

/// Placement of batched pairs into temporary files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// Cycle through the slots
    #[default]
    RoundRobin,
    /// Hash the source host so pairs from one server share a slot
    SourceHost,
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum worker threads
    pub parallel: usize,
    /// TCP buffer size in bytes
    pub tcp_buffer_size: u32,
    /// Parallel data streams
    pub streams: u32,
    /// Maximum attempts per pair
    pub retries: u32,
    /// Sleep before the first attempt
    pub initial: Duration,
    /// Exponential back-off base
    pub backoff: Duration,
    /// Quietness: positive is quieter, negative more verbose
    pub quiet: i32,
    /// Retry every regular non-zero exit
    pub force_retry: bool,
    /// Replace existing symlink destinations
    pub force_symlink: bool,
    /// Allow -fast and -p
    pub passive: bool,
    /// Allow from-file batching when the tool supports it
    pub batching: bool,
    /// Batch placement policy
    pub placement: Placement,
    /// Explicit copy tool path
    pub tool: Option<PathBuf>,
    /// Extra arguments passed verbatim to the tool
    pub tool_args: Vec<String>,
    /// Gatekeeper base URI (rewritten on manifest lines)
    pub base_uri: String,
    /// `file://` URI replacing `base_uri`
    pub base_mount: String,
    /// Manifest path (None = stdin)
    pub manifest: Option<PathBuf>,
    /// Pair-mode manifest
    pub pairs: bool,
    /// Explicit grid-proxy-info path
    pub proxy_info: Option<PathBuf>,
    /// Skip the proxy check
    pub skip_proxy_check: bool,
    /// Minimum remaining proxy lifetime, in seconds
    pub min_proxy_lifetime: i64,
    /// Custom arbitration rules
    pub arbitration_table: Option<PathBuf>,
    /// Report format
    pub output_format: OutputFormat,
    /// Print the configuration
    pub show_config: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            parallel: DEFAULT_PARALLEL,
            tcp_buffer_size: DEFAULT_BUFSIZE,
            streams: DEFAULT_STREAMS,
            retries: DEFAULT_RETRIES,
            initial: Duration::from_secs_f64(DEFAULT_INITIAL),
            backoff: Duration::from_secs_f64(DEFAULT_BACKOFF),
            quiet: 0,
            force_retry: false,
            force_symlink: false,
            passive: true,
            batching: true,
            placement: Placement::RoundRobin,
            tool: None,
            tool_args: Vec::new(),
            base_uri: String::new(),
            base_mount: String::new(),
            manifest: None,
            pairs: false,
            proxy_info: None,
            skip_proxy_check: false,
            min_proxy_lifetime: DEFAULT_MIN_PROXY_LIFETIME,
            arbitration_table: None,
            output_format: OutputFormat::Text,
            show_config: false,
        }
    }
}

impl TransferConfig {
    /// Create config from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        let mut config = Self::default();

        config.parallel = max_procs(args.parallel);
        config.tcp_buffer_size = args.tcp_buffer_size;
        config.streams = max_files(args.streams);
        config.retries = args.retries.max(1);
        config.initial = parse_seconds(args.initial, config.initial);
        config.backoff = parse_seconds(args.backoff, config.backoff);
        config.quiet = i32::from(args.quiet) - i32::from(args.verbose);
        config.force_retry = args.force_retry;
        config.force_symlink = args.force_symlink;
        config.passive = !args.no_passive;
        config.batching = !args.no_batch;
        config.placement = if args.sort_by_host {
            Placement::SourceHost
        } else {
            Placement::RoundRobin
        };
        config.tool = args.tool.clone();
        config.tool_args = expand_tool_args(&args.tool_args)?;
        config.base_uri = args.base_uri.clone();
        config.base_mount = mount_uri(&args.base_mount)?;
        config.manifest = args.manifest.clone();
        config.pairs = args.pairs;
        config.proxy_info = args.proxy_info.clone();
        config.skip_proxy_check = args.skip_proxy_check;
        config.min_proxy_lifetime = args.min_proxy_lifetime;
        config.arbitration_table = args.arbitration_table.clone();
        config.output_format = args.output_format;
        config.show_config = args.show_config;

        Ok(config)
    }

    /// Maximum number of items admitted to the queue
    pub fn queue_limit(&self) -> usize {
        self.parallel.max(1) * 2
    }

    /// Tracing filter directive for this quietness level
    pub fn log_directive(&self) -> &'static str {
        match self.quiet {
            i32::MIN..=-2 => "trace",
            -1 => "debug",
            0 => "info",
            1 => "warn",
            _ => "error",
        }
    }

    /// Print the active configuration
    pub fn print_summary(&self) {
        println!("#\n# Currently active values for gridxfer {}:", env!("CARGO_PKG_VERSION"));
        for name in ["GLOBUS_TCP_PORT_RANGE", "GLOBUS_TCP_SOURCE_RANGE", "GLOBUS_LOCATION"] {
            let value = std::env::var(name).unwrap_or_else(|_| "(not set)".to_string());
            println!("# {}={}", name, value);
        }
        println!("# max. tool bufsize: {}", self.tcp_buffer_size);
        println!("# max. tool streams: {}", self.streams);
        println!("# max. tool retries: {}", self.retries);
        println!(
            "# xfer pair slotting: {}",
            match self.placement {
                Placement::RoundRobin => "round-robin",
                Placement::SourceHost => "src-host-sorted",
            }
        );
        if self.tool_args.is_empty() {
            println!("# tool addit. args: (none)");
        } else {
            println!("# tool addit. args: {}", self.tool_args.join(" "));
        }
        println!("# max. parallel tool: {}", self.parallel);
        println!("# chosen quietness: {}", self.quiet);
        println!("# use force w/ symlink: {}", self.force_symlink);
        println!("# forceful retries: {}", self.force_retry);
        println!("# initial interval: {:.3} s", self.initial.as_secs_f64());
        println!("# backoff interval: {:.3} s", self.backoff.as_secs_f64());
        println!("# external TFN base: {}", self.base_uri);
        println!("# internal SFN base: {}", self.base_mount);
        println!(
            "# list of file base: {}",
            self.manifest
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "stdin".to_string())
        );
    }
}

/// Turn `-G o,v` values into tool arguments: `-o` followed by `v`
pub fn expand_tool_args(raw: &[String]) -> Result<Vec<String>, String> {
    let mut args = Vec::with_capacity(raw.len() * 2);
    for item in raw {
        if item.is_empty() {
            continue;
        }
        match item.split_once(',') {
            Some((option, value)) => {
                if option.is_empty() {
                    return Err(format!("Invalid tool argument: {}", item));
                }
                args.push(format!("-{}", option));
                args.push(value.to_string());
            }
            None => args.push(format!("-{}", item)),
        }
    }
    Ok(args)
}

/// Build the `file:` URI for a local mount point
pub fn mount_uri(mount: &str) -> Result<String, String> {
    if mount.is_empty() {
        return Err("Empty base mount point".to_string());
    }
    if mount.starts_with('/') {
        Ok(format!("file://{}", mount))
    } else {
        Ok(format!("file:///{}", mount))
    }
}

fn parse_seconds(value: f64, fallback: Duration) -> Duration {
    if value.is_finite() && value >= 0.0 {
        Duration::from_secs_f64(value)
    } else {
        fallback
    }
}

/// Clamp the worker count to the process limit
pub fn max_procs(requested: usize) -> usize {
    clamp_to_limit(requested, resource_limit(nix::sys::resource::Resource::RLIMIT_NPROC))
}

/// Clamp the stream count to the open-file limit
pub fn max_files(requested: u32) -> u32 {
    let limit = resource_limit(nix::sys::resource::Resource::RLIMIT_NOFILE);
    clamp_to_limit(requested as usize, limit) as u32
}

fn clamp_to_limit(requested: usize, limit: Option<u64>) -> usize {
    let requested = requested.max(1);
    match limit {
        Some(limit) if limit > 0 && (requested as u64) > limit => limit as usize,
        _ => requested,
    }
}

fn resource_limit(resource: nix::sys::resource::Resource) -> Option<u64> {
    match nix::sys::resource::getrlimit(resource) {
        Ok((soft, _)) if soft != nix::sys::resource::RLIM_INFINITY => Some(soft as u64),
        _ => None,
    }
}
