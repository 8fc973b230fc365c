//! geofence-replay
//!
//! Replays recorded position fixes (JSON lines) against a set of fences and
//! prints one line per committed transition.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;
use tracing_subscriber::EnvFilter;

use geofence_monitor::{
    Fence, FenceIdStore, JsonFileIdStore, MemoryIdStore, MonitorConfig, MonitorCoordinator,
    MonitorError, MonitorResult, PositionFix, ReplaySource, TransitionEvent,
};

/// Replay configuration
#[derive(Default)]
struct Config {
    /// JSON array of fences
    fences: Option<PathBuf>,
    /// JSON lines of fixes; stdin when absent
    fixes: Option<PathBuf>,
    /// Monitor configuration JSON
    config: Option<PathBuf>,
    /// Fence id store
    store: Option<PathBuf>,
    /// Print notification text instead of log lines
    notify: bool,
}

fn usage() {
    println!("geofence-replay - replay position fixes against geofences");
    println!();
    println!("USAGE:");
    println!("    geofence-replay --fences <FILE> [OPTIONS] < fixes.jsonl");
    println!();
    println!("OPTIONS:");
    println!("    -f, --fences <FILE>     JSON array of fences (required)");
    println!("    -x, --fixes <FILE>      JSON lines of fixes [default: stdin]");
    println!("    -c, --config <FILE>     Monitor configuration JSON");
    println!("    -s, --store <FILE>      Persist fence ids to FILE");
    println!("    -n, --notify            Print notifications instead of log lines");
    println!("    -h, --help              Print help information");
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || -> PathBuf {
            if i + 1 < args.len() {
                i += 1;
                PathBuf::from(&args[i])
            } else {
                eprintln!("error: {flag} requires a value");
                std::process::exit(1);
            }
        };
        match flag {
            "--fences" | "-f" => config.fences = Some(value()),
            "--fixes" | "-x" => config.fixes = Some(value()),
            "--config" | "-c" => config.config = Some(value()),
            "--store" | "-s" => config.store = Some(value()),
            "--notify" | "-n" => config.notify = true,
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("error: unknown argument: {other}");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

fn read_fences(path: &Path) -> MonitorResult<Vec<Fence>> {
    let data = fs::read(path).map_err(|e| MonitorError::Config {
        reason: format!("cannot read {}: {e}", path.display()),
    })?;
    serde_json::from_slice(&data).map_err(|e| MonitorError::Config {
        reason: format!("invalid fences in {}: {e}", path.display()),
    })
}

fn read_fixes(reader: impl BufRead) -> Vec<PositionFix> {
    let mut fixes = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "stopped reading fixes");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PositionFix>(&line) {
            Ok(fix) => fixes.push(fix),
            Err(e) => warn!(line = line_no + 1, error = %e, "skipping unparsable fix"),
        }
    }
    fixes
}

fn run(config: Config) -> MonitorResult<()> {
    let Some(fences_path) = config.fences.as_ref() else {
        return Err(MonitorError::Config {
            reason: "--fences is required".to_string(),
        });
    };
    let fences = read_fences(fences_path)?;

    let monitor_cfg = match &config.config {
        Some(path) => {
            let json = fs::read_to_string(path).map_err(|e| MonitorError::Config {
                reason: format!("cannot read {}: {e}", path.display()),
            })?;
            MonitorConfig::from_json_str(&json)?
        }
        None => MonitorConfig::default(),
    };

    let fixes = match &config.fixes {
        Some(path) => {
            let file = fs::File::open(path).map_err(|e| MonitorError::Config {
                reason: format!("cannot open {}: {e}", path.display()),
            })?;
            read_fixes(BufReader::new(file))
        }
        None => read_fixes(io::stdin().lock()),
    };

    let store: Box<dyn FenceIdStore> = match &config.store {
        Some(path) => Box::new(JsonFileIdStore::new(path)),
        None => Box::new(MemoryIdStore::new()),
    };

    let notify = config.notify;
    let sink = move |event: &TransitionEvent| {
        let line = if notify {
            let n = event.notification();
            format!("{}: {}", n.title, n.body)
        } else {
            format!("{} {}", event.timestamp.to_rfc3339(), event.log_line())
        };
        let _ = writeln!(io::stdout().lock(), "{line}");
    };

    let monitor = MonitorCoordinator::new(
        monitor_cfg,
        Arc::new(ReplaySource::new(fixes)),
        Arc::new(sink),
        store,
    )?;
    for fence in fences {
        monitor.add_fence(fence)?;
    }

    monitor.start()?;
    monitor.wait();

    let stats = monitor.stats();
    monitor.shutdown();

    eprintln!(
        "processed={} stale={} rejected={} events={} dropped={}",
        stats.processed_fixes,
        stats.stale_fixes,
        stats.rejected_fixes,
        stats.events_emitted,
        stats.events_dropped
    );
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let config = parse_args();
    if let Err(err) = run(config) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
