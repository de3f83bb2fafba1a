use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use diskscan::drives::GenericTables;
use diskscan::report::{IoEvent, ReportSink, ScanStart, ScanSummary, StrideProgress};
use diskscan::{run_scan, CancellationToken, Conclusion, MountPolicy, ScanConfig, ScanMode};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "diskscan")]
#[command(about = "Read every sector of a disk, time it, and judge the disk's health")]
#[command(version)]
struct Cli {
    /// Block device to scan, e.g. /dev/sdb
    device: PathBuf,

    /// Rewrite slow or unreadable regions (opens the device read-write)
    #[arg(long)]
    fix: bool,

    /// Scan order: seq or random
    #[arg(short, long)]
    mode: Option<ScanMode>,

    /// Bytes per read
    #[arg(long)]
    read_size: Option<usize>,

    /// Number of latency graph buckets
    #[arg(long)]
    latency_graph_len: Option<usize>,

    /// Scan even when the device is mounted
    #[arg(long)]
    allow_mounted: bool,

    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the JSON scan summary here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seed for the random scan order
    #[arg(long)]
    seed: Option<u64>,

    /// Request real-time scheduling while scanning
    #[arg(long)]
    realtime: bool,

    /// More log output; repeat for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log as JSON lines
    #[arg(long)]
    json_log: bool,
}

impl Cli {
    /// Command-line flags override the loaded configuration.
    fn apply(&self, config: &mut ScanConfig) {
        config.fix |= self.fix;
        config.realtime |= self.realtime;
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(read_size) = self.read_size {
            config.read_size = read_size;
        }
        if let Some(len) = self.latency_graph_len {
            config.latency_graph_len = len;
        }
        if self.allow_mounted {
            config.mount_policy = MountPolicy::Allow;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
    }
}

fn init_logging(verbose: u8, json: bool) {
    let default = match verbose {
        0 => "diskscan=info",
        1 => "diskscan=debug",
        _ => "diskscan=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Drives an indicatif bar from scan events.
struct ProgressSink {
    bar: ProgressBar,
    sector_size: u64,
}

impl ProgressSink {
    fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            sector_size: 512,
        }
    }
}

impl ReportSink for ProgressSink {
    fn on_start(&mut self, start: &ScanStart) {
        self.sector_size = start.sector_size as u64;
        let bar = ProgressBar::new(start.total_sectors * self.sector_size);
        let style = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        bar.set_style(style);
        bar.set_message(format!("{} scan", start.mode));
        self.bar = bar;
    }

    fn on_io(&mut self, event: &IoEvent<'_>) {
        self.bar.inc(event.len as u64);
    }

    fn on_stride(&mut self, progress: &StrideProgress) {
        if progress.errors > 0 {
            self.bar.set_message(format!("{} errors", progress.errors).red().to_string());
        }
    }

    fn on_done(&mut self, _summary: &ScanSummary) {
        self.bar.finish_and_clear();
    }
}

fn print_verdict(summary: &ScanSummary) {
    let verdict = summary.conclusion.to_string().to_uppercase();
    let verdict = match summary.conclusion {
        Conclusion::Passed => verdict.green().bold(),
        Conclusion::Failed(_) => verdict.red().bold(),
        Conclusion::Aborted | Conclusion::ScanProblem => verdict.yellow().bold(),
    };
    println!("{}: {}", summary.device.bold(), verdict);
    if let Some(problem) = &summary.problem {
        println!("  {}", problem);
    }
    if let Some(identity) = &summary.identity {
        if !identity.model.is_empty() {
            println!("  model {} serial {}", identity.model, identity.serial);
        }
    }
    println!(
        "  {} reads, {} errors, max latency {} ms",
        summary.reads, summary.num_errors, summary.max_latency_ms
    );
    for entry in summary.histogram.iter().filter(|e| e.count > 0) {
        match entry.latency_ms {
            Some(ms) => println!("  < {:>6} ms: {}", ms, entry.count),
            None => println!("  >  30000 ms: {}", entry.count),
        }
    }
    if let Some(repairs) = &summary.repairs {
        if !repairs.is_empty() {
            println!("  {} regions rewritten ({} failed)", repairs.len(), repairs.failures());
        }
    }
}

#[cfg(target_os = "linux")]
fn scan(device: &std::path::Path, config: ScanConfig, cancel: &CancellationToken) -> ScanSummary {
    use diskscan::drives::SystemMounts;
    use diskscan::io::linux::LinuxOpener;

    let opener = LinuxOpener {
        data_timeout: config.long_timeout(),
    };
    let mut sink = ProgressSink::new();
    run_scan(device, config, &opener, &SystemMounts, &GenericTables, cancel, &mut sink)
}

#[cfg(not(target_os = "linux"))]
fn scan(device: &std::path::Path, config: ScanConfig, _cancel: &CancellationToken) -> ScanSummary {
    let _ = (&GenericTables, ProgressSink::new());
    ScanSummary::problem(
        &device.display().to_string(),
        config.mode,
        config.fix,
        chrono::Utc::now(),
        "raw device access is only implemented for Linux".to_string(),
    )
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_log);

    let mut config = ScanConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid command-line options")?;

    let cancel = CancellationToken::new();
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, cancel.flag())
            .context("Failed to install signal handler")?;
    }

    let summary = scan(&cli.device, config, &cancel);
    print_verdict(&summary);

    if let Some(path) = &cli.output {
        summary.save_json(path)?;
        tracing::info!(path = %path.display(), "Summary written");
    }

    std::process::exit(summary.conclusion.exit_code());
}
