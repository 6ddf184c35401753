//! Region Scope CLI - Inspect and replay recorded region telemetry logs.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};

use region_scope::{
    ProtocolVersion, Session, SessionConfig, Snapshot,
    replay::{LogReader, LogRecorder, RecorderConfig},
    schema::{AGE_BUCKETS, Affiliation, RegionState, age_bucket_label},
    selection::{parse_selection, parse_selection_within},
};

const MIB: f64 = 1024.0 * 1024.0;

/// Inspect and replay recorded region telemetry logs.
#[derive(Parser, Debug)]
#[command(name = "region-scope")]
#[command(about = "Snapshot timeline tools for region-based GC telemetry")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print an overview of a recorded log
    Summary {
        /// Recorded log file
        log: PathBuf,

        /// Protocol assumed for metadata lines without a version (1 or 2)
        #[arg(long, value_parser = parse_version)]
        default_version: Option<ProtocolVersion>,

        /// Regions of the last snapshot to print, e.g. "0-3, 10"
        #[arg(long)]
        regions: Option<String>,
    },
    /// Replay a recorded log in real time, printing each snapshot reached
    Replay {
        /// Recorded log file
        log: PathBuf,

        /// JSON session configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Replay speed multiplier
        #[arg(long)]
        speed: Option<f64>,

        /// Protocol assumed for metadata lines without a version (1 or 2)
        #[arg(long, value_parser = parse_version)]
        default_version: Option<ProtocolVersion>,
    },
    /// Rewrite a log keeping every Nth snapshot
    Thin {
        /// Recorded log file
        log: PathBuf,

        /// Output log file
        output: PathBuf,

        /// Keep every Nth snapshot
        #[arg(long, default_value_t = 1)]
        every: u32,

        /// Stop after this many snapshots (0 = all)
        #[arg(long, default_value_t = 0)]
        max: u64,
    },
    /// Print the default session configuration
    ExampleConfig,
}

fn parse_version(text: &str) -> Result<ProtocolVersion, String> {
    text.trim_start_matches(['v', 'V'])
        .parse::<u64>()
        .ok()
        .and_then(ProtocolVersion::from_number)
        .ok_or_else(|| format!("unsupported protocol version {text:?}"))
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args = Args::parse();
    let result = match args.command {
        Command::Summary {
            log,
            default_version,
            regions,
        } => summary(&log, default_version, regions.as_deref()),
        Command::Replay {
            log,
            config,
            speed,
            default_version,
        } => replay(&log, config, speed, default_version),
        Command::Thin {
            log,
            output,
            every,
            max,
        } => thin(&log, &output, every, max),
        Command::ExampleConfig => example_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn summary(
    log: &Path,
    default_version: Option<ProtocolVersion>,
    regions: Option<&str>,
) -> CliResult {
    // Syntax errors are reported before the log is read.
    if let Some(expr) = regions {
        parse_selection(expr)?;
    }

    let mut reader = LogReader::new();
    if let Some(version) = default_version {
        reader = reader.with_default_version(version);
    }
    let snapshots = reader.parse(log)?;

    println!("Region Scope Summary");
    println!("====================");
    println!("Log: {}", log.display());
    println!("Snapshots: {}", snapshots.len());

    let (Some(first), Some(last)) = (snapshots.first(), snapshots.last()) else {
        return Ok(());
    };
    println!(
        "Span: {}ms - {}ms ({}ms)",
        first.timestamp(),
        last.timestamp(),
        last.timestamp().saturating_sub(first.timestamp())
    );
    println!(
        "Regions: {} x {:.1} MiB ({})",
        last.region_count(),
        last.region_size() as f64 / MIB,
        last.protocol_version()
    );

    let degenerated = snapshots.iter().filter(|s| s.is_degenerated()).count();
    let full = snapshots.iter().filter(|s| s.is_full_gc()).count();
    println!("Degenerated cycles seen: {degenerated}, full GCs seen: {full}");
    println!();

    println!("Last snapshot at {}ms:", last.timestamp());
    print_snapshot(last);

    if let Some(expr) = regions {
        println!();
        println!("Selected regions:");
        for index in parse_selection_within(expr, last.region_count())? {
            if let Some(region) = last.region(index) {
                println!(
                    "  {:>6}: {:<22} used={:>3.0}% live={:>3.0}% age={:>2} {:?}",
                    index,
                    region.state().label(),
                    region.used() * 100.0,
                    region.live() * 100.0,
                    region.age(),
                    region.affiliation()
                );
            }
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("  Phase: {:?}", snapshot.gc_phase());
    println!(
        "  Used: {:.1} / {:.1} MiB, live {:.1} MiB",
        snapshot.used() as f64 / MIB,
        snapshot.total() as f64 / MIB,
        snapshot.live() as f64 / MIB
    );
    println!(
        "  Collection set: {:.1} MiB, humongous: {:.1} MiB",
        snapshot.collection_set_used() as f64 / MIB,
        snapshot.humongous_used() as f64 / MIB
    );
    for affiliation in Affiliation::ALL {
        println!(
            "  {:?}: {} regions, used {:.1} MiB",
            affiliation,
            snapshot.affiliation_count(affiliation),
            snapshot.used_by(affiliation) as f64 / MIB
        );
    }
    for state in RegionState::ALL {
        let count = snapshot.state_count(state);
        if count > 0 {
            println!("  {:<22} {}", state.label(), count);
        }
    }
    let ages: Vec<String> = (0..AGE_BUCKETS)
        .map(|b| format!("{}:{}", age_bucket_label(b), snapshot.age_bucket_count(b)))
        .collect();
    println!("  Ages: {}", ages.join(" "));
}

fn replay(
    log: &Path,
    config: Option<PathBuf>,
    speed: Option<f64>,
    default_version: Option<ProtocolVersion>,
) -> CliResult {
    let mut config = match config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(speed) = speed {
        config.speed_multiplier = speed;
    }
    if let Some(version) = default_version {
        config.default_log_version = version;
    }
    let tick = config.replay_tick();

    let mut session = Session::new(config)?;
    let count = session.load_log(log)?;
    println!("Replaying {count} snapshots at {}x", session.speed_multiplier());

    let timeline = session.timeline();
    session.play()?;

    let mut shown = 0;
    loop {
        let done = timeline.at_end() || !session.is_playing();
        let cursor = timeline.cursor();
        if cursor != shown {
            shown = cursor;
            if let Some(snapshot) = timeline.latest() {
                println!(
                    "[{cursor}/{count}] {}ms {:?} used {:.1}/{:.1} MiB",
                    snapshot.timestamp(),
                    snapshot.phase(),
                    snapshot.used() as f64 / MIB,
                    snapshot.total() as f64 / MIB
                );
            }
        }
        if done {
            break;
        }
        thread::sleep(tick.max(Duration::from_millis(1)));
    }

    session.stop();
    println!("Replay finished at {}ms of playback", session.elapsed_millis());
    Ok(())
}

fn example_config() -> CliResult {
    println!("Example configuration (config.json):");
    println!("{}", serde_json::to_string_pretty(&SessionConfig::default())?);
    Ok(())
}

fn thin(log: &Path, output: &Path, every: u32, max: u64) -> CliResult {
    let snapshots = LogReader::new().parse(log)?;
    let config = RecorderConfig {
        snapshot_skip: every.max(1),
        max_snapshots: max,
    };
    let mut recorder = LogRecorder::create(output, config)?;
    for snapshot in &snapshots {
        recorder.record(snapshot)?;
    }
    let stats = recorder.finalize()?;
    println!("Wrote {stats} to {}", output.display());
    Ok(())
}
