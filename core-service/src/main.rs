//! flowgan - command line front end for the core service

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use flow_anomaly_core::constants::{self, APP_VERSION, CONFUSION_MATRIX_FILE, HISTORY_FILE, PROGRESS_LOG};
use flow_anomaly_core::logic::config::RunConfig;
use flow_anomaly_core::logic::dataset::{read_vectors, LabeledSet, PredictionWriter, TrainingSet};
use flow_anomaly_core::logic::features::Label;
use flow_anomaly_core::logic::model::{
    detect, normalizer_for, CheckpointSlot, CheckpointStore, ConfusionExport, Scorer, ThresholdPolicy,
};
use flow_anomaly_core::logic::storage;
use flow_anomaly_core::logic::training::{
    parse_progress, FileSink, LogSink, MetricsExport, MetricsHistory, Patience, Tee, Trainer,
};

#[derive(Parser)]
#[command(name = "flowgan", version, about = "Adversarial anomaly detection for network flow features")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run configuration documents
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Train a Generator/Discriminator pair
    Train(TrainArgs),

    /// Score a batch of flow records with a saved checkpoint
    Score(ScoreArgs),

    /// Print the metrics export of a run
    Metrics(MetricsArgs),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a default config document
    Init { path: PathBuf },
}

#[derive(Args)]
struct TrainArgs {
    #[arg(long)]
    config: PathBuf,

    /// Normal-only training records (JSONL)
    #[arg(long)]
    train: PathBuf,

    /// Labeled held-out records (JSONL)
    #[arg(long)]
    validation: PathBuf,

    /// Output directory for checkpoints, history and progress log
    #[arg(long)]
    out: Option<PathBuf>,

    /// Stop after N epochs without ROC-AUC improvement
    #[arg(long)]
    patience: Option<usize>,

    /// Smallest ROC-AUC gain that counts as an improvement
    #[arg(long, default_value_t = 0.0)]
    min_delta: f32,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Percentile,
    RocOptimal,
    CostWeighted,
}

#[derive(Args)]
struct ScoreArgs {
    /// Checkpoint directory
    #[arg(long)]
    checkpoint: PathBuf,

    /// best | current
    #[arg(long, default_value = "best")]
    slot: String,

    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    percentile: Option<f32>,

    #[arg(long, value_enum, default_value = "percentile")]
    strategy: StrategyArg,

    #[arg(long, default_value_t = 1.0)]
    fp_cost: f32,

    #[arg(long, default_value_t = 1.0)]
    fn_cost: f32,

    /// Normalize against the checkpoint's stored score range instead of the batch
    #[arg(long)]
    reference_range: bool,

    /// Per-record predictions (JSONL)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct MetricsArgs {
    /// Run output directory (reads history.json)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Progress log to parse
    #[arg(long)]
    log: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Config(ConfigCommand::Init { path }) => config_init(&path),
        Command::Train(args) => train(args),
        Command::Score(args) => score(args),
        Command::Metrics(args) => metrics(args),
    }
}

fn config_init(path: &Path) -> Result<()> {
    RunConfig::default()
        .save(path)
        .with_context(|| format!("Failed to write config {}", path.display()))?;
    log::info!("Wrote default config to {}", path.display());
    Ok(())
}

fn train(args: TrainArgs) -> Result<()> {
    log::info!("flowgan v{} - training", APP_VERSION);

    let config = RunConfig::load(&args.config).context("Failed to load config")?;
    let train_set = TrainingSet::load(&args.train)
        .with_context(|| format!("Failed to load training data {}", args.train.display()))?;
    let validation = LabeledSet::load(&args.validation)
        .with_context(|| format!("Failed to load validation data {}", args.validation.display()))?;

    let out = args.out.unwrap_or_else(constants::get_output_dir);
    let store = CheckpointStore::open(&out)
        .with_context(|| format!("Cannot use output directory {}", out.display()))?;
    let progress = Tee::new()
        .with(LogSink)
        .with(FileSink::append(&out.join(PROGRESS_LOG)).context("Cannot open progress log")?);

    let mut trainer = Trainer::new(config)?.with_progress(progress);
    if let Some(patience) = args.patience {
        trainer = trainer.with_stopping(Patience::new(patience).with_min_delta(args.min_delta));
    }

    let report = trainer.fit(&train_set, &validation, &store).context("Training failed")?;
    if let Some(best) = report.best() {
        log::info!("Best epoch {} (roc {:.4}) saved to {}", best.epoch, best.roc_auc, store.dir().display());
    }
    println!("{}", serde_json::to_string_pretty(&report.outcome)?);
    Ok(())
}

fn score(args: ScoreArgs) -> Result<()> {
    let slot: CheckpointSlot = args.slot.parse()?;
    let store = CheckpointStore::open_existing(&args.checkpoint)?;
    let checkpoint = store
        .load(slot)
        .with_context(|| format!("Failed to load {} checkpoint from {}", slot, args.checkpoint.display()))?;
    let normalizer = normalizer_for(&checkpoint, args.reference_range);

    let (vectors, labels) =
        read_vectors(&args.input).with_context(|| format!("Failed to read {}", args.input.display()))?;
    let truth: Option<Vec<Label>> = labels.iter().copied().collect();
    if truth.is_none() && labels.iter().any(Option::is_some) {
        log::warn!("Some records are unlabeled, skipping evaluation");
    }

    let policy = match args.strategy {
        StrategyArg::Percentile => ThresholdPolicy::Percentile {
            percentile: args.percentile.unwrap_or_else(constants::get_percentile),
        },
        StrategyArg::RocOptimal => ThresholdPolicy::RocOptimal,
        StrategyArg::CostWeighted => ThresholdPolicy::CostWeighted { fp_cost: args.fp_cost, fn_cost: args.fn_cost },
    };
    if policy.needs_labels() && truth.is_none() {
        bail!("Threshold strategy needs a label on every record");
    }

    let scorer = Scorer::new(checkpoint);
    let strategy = policy.strategy();
    let report = detect(&scorer, &vectors, truth.as_deref(), &normalizer, strategy.as_ref())?;
    println!("{}", serde_json::to_string_pretty(&report.summary)?);

    if let Some(output) = &args.output {
        PredictionWriter::create(output)?.write_report(&report)?;
    }
    if let Some(evaluation) = &report.evaluation {
        match evaluation.roc_auc {
            Some(auc) => log::info!(
                "ROC-AUC {:.4}, accuracy {:.4}, f1 {:.4}",
                auc,
                evaluation.confusion.accuracy(),
                evaluation.confusion.f1()
            ),
            None => log::info!("Accuracy {:.4} (single-class batch)", evaluation.confusion.accuracy()),
        }
        let dir = args
            .output
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or(args.checkpoint.as_path())
            .to_path_buf();
        storage::save_json(&ConfusionExport::from(evaluation.confusion), &dir.join(CONFUSION_MATRIX_FILE))?;
    }
    Ok(())
}

fn metrics(args: MetricsArgs) -> Result<()> {
    let export = match (args.out, args.log) {
        (Some(dir), _) => {
            let path = dir.join(HISTORY_FILE);
            let history =
                MetricsHistory::load(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            MetricsExport::from_history(&history)
        }
        (None, Some(log)) => {
            let text =
                std::fs::read_to_string(&log).with_context(|| format!("Failed to read {}", log.display()))?;
            parse_progress(&text)
        }
        (None, None) => bail!("Either --out or --log is required"),
    };

    match export {
        Some(export) => println!("{}", serde_json::to_string_pretty(&export)?),
        None => bail!("No completed epochs recorded yet"),
    }
    Ok(())
}
