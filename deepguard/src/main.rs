//! DeepGuard - Main entry point
//!
//! Runs recursive workloads under the checkpoint guard and inspects the
//! checkpoints they leave behind.

mod workload;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use deepguard_recursion::CheckpointStore;
use deepguard_recursion::FileCheckpointStore;
use deepguard_recursion::GuardConfig;
use deepguard_recursion::GuardError;
use deepguard_recursion::IntegrityValidator;
use deepguard_recursion::MemoryCheckpointStore;
use deepguard_recursion::RecursionCheckpointManager;
use deepguard_recursion::StoreConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;
use workload::AckermannMemo;
use workload::Flow;
use workload::Guarded;
use workload::Interrupt;
use workload::WalkLog;

/// DeepGuard - checkpointed recursion with loop detection
#[derive(Parser, Debug)]
#[command(name = "deepguard")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a recursive workload under the guard
    Run(RunArgs),
    /// List the checkpoints in a store directory and verify their digests
    Inspect {
        /// Checkpoint directory to inspect
        #[arg(long)]
        store_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, value_enum, default_value = "ackermann")]
    workload: Workload,

    /// First Ackermann argument
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(0..=3))]
    m: u64,

    /// Second Ackermann argument, or the cycle length for `cycle`
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(0..=12))]
    n: u64,

    /// Stop a computation that recurses deeper than this
    #[arg(long, default_value_t = 10_000)]
    max_depth: usize,

    /// Configuration file (defaults to ~/.deepguard/config.toml)
    #[arg(long, env = "DEEPGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Persist checkpoints to this directory instead of the configured store
    #[arg(long)]
    store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Workload {
    /// Memoized Ackermann function; deep but loop-free
    Ackermann,
    /// Walk around a cycle forever until the guard intervenes
    Cycle,
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Workload::Ackermann => write!(f, "ackermann"),
            Workload::Cycle => write!(f, "cycle"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG takes precedence
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "deepguard={log_level},deepguard_recursion={log_level}"
        ))
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Inspect { store_dir } => inspect(store_dir).await,
    }
}

fn load_config(args: &RunArgs) -> Result<GuardConfig> {
    let mut config = match &args.config {
        Some(path) => GuardConfig::from_file(path)?,
        None => GuardConfig::load()?,
    };

    if let Some(dir) = &args.store_dir {
        config.store = StoreConfig::File { path: dir.clone() };
    }

    config.validate()?;
    Ok(config)
}

async fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    info!("Starting {} workload with {:?}", args.workload, config.store);

    match config.store.clone() {
        StoreConfig::Memory => {
            let manager =
                RecursionCheckpointManager::new(config, Arc::new(MemoryCheckpointStore::new()));
            run_workload(&manager, &args).await
        }
        StoreConfig::File { path } => {
            let store = FileCheckpointStore::new(path)?;
            let manager = RecursionCheckpointManager::new(config, Arc::new(store));
            run_workload(&manager, &args).await
        }
    }
}

async fn run_workload<St: CheckpointStore>(
    manager: &RecursionCheckpointManager<St>,
    args: &RunArgs,
) -> Result<()> {
    let guarded = Guarded {
        manager,
        max_depth: args.max_depth,
    };

    match args.workload {
        Workload::Ackermann => {
            let mut ctx = manager.new_context(AckermannMemo::default());
            let flow = guarded.ackermann(&mut ctx, None, args.m, args.n).await?;
            report(&format!("ackermann({}, {})", args.m, args.n), flow)?;
            println!(
                "calls: {}, memoized: {}",
                ctx.state().calls,
                ctx.state().memo.len()
            );
            finish(manager, &mut ctx).await?;
        }
        Workload::Cycle => {
            let length = usize::try_from(args.n)?.max(1);
            let mut ctx = manager.new_context(WalkLog::default());
            let next = move |node: usize| Some((node + 1) % length);
            let flow = guarded.walk(&mut ctx, None, &next, 0).await?;
            report(&format!("cycle of length {length}"), flow)?;
            println!("visited before rollback point: {}", ctx.state().visited.len());
            finish(manager, &mut ctx).await?;
        }
    }

    Ok(())
}

fn report<T: std::fmt::Display>(label: &str, flow: Flow<T>) -> Result<()> {
    match flow {
        Flow::Done(value) => println!("{label} = {value}"),
        Flow::Interrupted(Interrupt::Aborted(exit)) => {
            println!(
                "{label}: loop detected, restored checkpoint {} at depth {} (unwound {} frames in {:?})",
                exit.restoration.checkpoint_id,
                exit.restoration.restored_depth,
                exit.unwind_frames,
                exit.restoration.elapsed
            );
        }
        Flow::Interrupted(Interrupt::TooDeep(depth)) => {
            return Err(eyre!("{label}: exceeded maximum depth at {depth}"));
        }
    }
    Ok(())
}

async fn finish<St: CheckpointStore, S>(
    manager: &RecursionCheckpointManager<St>,
    ctx: &mut deepguard_recursion::RecursionContext<S>,
) -> Result<()> {
    let evicted = manager.apply_retention(ctx).await?;
    let stats = manager.stats();

    println!(
        "checkpoints: {} created ({} emergency), {} failed, {} evicted",
        stats.checkpoints_created,
        stats.emergency_checkpoints,
        stats.creation_failures,
        evicted.len()
    );
    println!(
        "loops detected: {}, restorations: {} ({} failed)",
        stats.loops_detected, stats.restorations, stats.failed_restorations
    );
    Ok(())
}

async fn inspect(store_dir: PathBuf) -> Result<()> {
    if !store_dir.is_dir() {
        return Err(eyre!("{} is not a directory", store_dir.display()));
    }

    let store = FileCheckpointStore::new(store_dir)?;
    let validator = IntegrityValidator::new();
    let summaries = store.list().await?;

    if summaries.is_empty() {
        println!("No checkpoints in {}", store.base_path().display());
        return Ok(());
    }

    let mut corrupted = 0usize;
    for summary in &summaries {
        let status = match store.get(summary.id).await {
            Ok(Some(checkpoint)) if validator.verify(&checkpoint) => "ok",
            Ok(Some(_)) | Err(GuardError::CheckpointCorrupted { .. }) => {
                corrupted += 1;
                "CORRUPTED"
            }
            Ok(None) => "missing",
            Err(e) => return Err(e.into()),
        };

        println!(
            "{}  depth {:>6}  {:<13}  {:>8} bytes  {}  {}",
            summary.id,
            summary.depth,
            summary.trigger.to_string(),
            summary.payload_len,
            summary.created_at.format("%Y-%m-%d %H:%M:%S"),
            status
        );
    }

    println!(
        "{} checkpoints, {} corrupted",
        summaries.len(),
        corrupted
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_workload_display() {
        assert_eq!(format!("{}", Workload::Ackermann), "ackermann");
        assert_eq!(format!("{}", Workload::Cycle), "cycle");
    }

    #[test]
    fn test_cli_parsing() {
        use clap::CommandFactory;

        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "deepguard", "run", "--workload", "cycle", "--n", "4", "--store-dir", "/tmp/dg",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(matches!(args.workload, Workload::Cycle));
        assert_eq!(args.n, 4);
        assert_eq!(args.store_dir, Some(PathBuf::from("/tmp/dg")));

        assert!(Cli::try_parse_from(["deepguard", "run", "--m", "4"]).is_err());
    }

    #[test]
    fn test_store_dir_overrides_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        GuardConfig::default().to_file(&config_path).unwrap();

        let args = RunArgs {
            workload: Workload::Ackermann,
            m: 1,
            n: 1,
            max_depth: 100,
            config: Some(config_path),
            store_dir: Some(dir.path().join("checkpoints")),
        };
        let config = load_config(&args).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::File {
                path: dir.path().join("checkpoints")
            }
        );
    }
}
