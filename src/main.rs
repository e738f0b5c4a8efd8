//! CIFAR Hybrid CLI
//!
//! Entry point for training and inspecting CIFAR-10 classifiers with the Burn
//! framework.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::module::Module;
use burn::optim::{decay::WeightDecayConfig, momentum::MomentumConfig, SgdConfig};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use cifar_hybrid::backend::{backend_name, device_for, DefaultBackend, TrainingBackend};
use cifar_hybrid::config::{RunConfig, SchedulerKind};
use cifar_hybrid::dataset::cifar10::{self, DatasetSplit};
use cifar_hybrid::dataset::{BatchOrder, CifarDataset, CifarLoader, CLASS_NAMES};
use cifar_hybrid::model::{ModelKind, Network, ResNetVariant};
use cifar_hybrid::training::{
    CheckpointPolicy, FileCheckpointStore, LearningRateScheduler, OrchestratorConfig,
    TrainingOrchestrator,
};
use cifar_hybrid::utils::logging::{init_logging, LogConfig};
use cifar_hybrid::utils::sinks::{
    BarProgress, CsvScalarWriter, FanOutSink, NoProgress, ProgressSink, TracingScalarSink,
};
use cifar_hybrid::utils::{format_duration, format_number};

/// CIFAR-10 classification with hybrid conv-attention and ResNet models
#[derive(Parser, Debug)]
#[command(name = "cifar_hybrid")]
#[command(version)]
#[command(about = "Train CIFAR-10 classifiers with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model, keeping the checkpoint with the best test accuracy
    Train(RunArgs),

    /// Print the parameter count of the selected architecture
    Profile(RunArgs),

    /// Show class counts of the dataset splits
    Stats {
        /// Directory containing cifar-10-batches-bin
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Download and extract the CIFAR-10 binary archive
    Download {
        /// Output directory for the dataset
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Print the effective configuration as TOML
    ShowConfig(RunArgs),
}

/// Run options; anything given here overrides the `--config` file
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// TOML file with run options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Resume from the stored checkpoint
    #[arg(short, long)]
    resume: bool,

    /// Accelerator index
    #[arg(long)]
    device_id: Option<usize>,

    /// Training batch size
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Evaluation batch size
    #[arg(long)]
    test_batch_size: Option<usize>,

    /// Model family
    #[arg(short, long, value_enum)]
    model: Option<ModelKind>,

    /// ResNet depth (conv models only)
    #[arg(long, value_enum)]
    variant: Option<ResNetVariant>,

    /// Transformer encoder blocks (hybrid only)
    #[arg(long)]
    depth: Option<usize>,

    /// Attention heads (hybrid only)
    #[arg(long)]
    heads: Option<usize>,

    /// Number of epochs to run
    #[arg(short, long)]
    epochs: Option<usize>,

    #[arg(long)]
    momentum: Option<f64>,

    #[arg(long)]
    weight_decay: Option<f64>,

    /// Learning rate schedule
    #[arg(long, value_enum)]
    scheduler: Option<SchedulerKind>,

    /// Warmup length of the warmup-cosine schedule
    #[arg(long)]
    warmup_epochs: Option<usize>,

    /// Seed for the training batch order
    #[arg(long)]
    seed: Option<u64>,

    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Hide the per-batch progress bar
    #[arg(long)]
    no_progress: bool,
}

impl RunArgs {
    /// File config (or defaults) with command line overrides applied
    fn resolve(self, verbose: bool) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::default(),
        };

        macro_rules! set {
            ($field:ident, $arg:expr) => {
                if let Some(value) = $arg {
                    config.$field = value;
                }
            };
        }

        set!(learning_rate, self.lr);
        set!(device_id, self.device_id);
        set!(batch_size, self.batch_size);
        set!(test_batch_size, self.test_batch_size);
        set!(model_kind, self.model);
        set!(architecture_variant, self.variant);
        set!(attention_depth, self.depth);
        set!(attention_heads, self.heads);
        set!(epochs, self.epochs);
        set!(momentum, self.momentum);
        set!(weight_decay, self.weight_decay);
        set!(scheduler, self.scheduler);
        set!(warmup_epochs, self.warmup_epochs);
        set!(seed, self.seed);
        set!(data_dir, self.data_dir);
        set!(checkpoint_dir, self.checkpoint_dir);
        set!(log_dir, self.log_dir);

        config.resume |= self.resume;
        config.verbose |= verbose;
        if self.no_progress {
            config.progress = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train(args) => cmd_train(args.resolve(cli.verbose)?)?,
        Commands::Profile(args) => cmd_profile(&args.resolve(cli.verbose)?)?,
        Commands::Stats { data_dir } => cmd_stats(&data_dir)?,
        Commands::Download { data_dir } => cmd_download(&data_dir)?,
        Commands::ShowConfig(args) => println!("{}", args.resolve(cli.verbose)?.to_toml()?),
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +------------------------------------------------------------+
 |   CIFAR-10 Hybrid Classifier                               |
 |   Convolution + attention training with Burn + Rust        |
 +------------------------------------------------------------+
  "#
        .green()
    );
}

fn ensure_dataset(data_dir: &Path) -> Result<()> {
    if cifar10::is_available(data_dir) {
        return Ok(());
    }

    #[cfg(feature = "download")]
    {
        cifar10::download(data_dir)?;
        Ok(())
    }

    #[cfg(not(feature = "download"))]
    {
        anyhow::bail!(
            "CIFAR-10 not found in {}. Extract cifar-10-binary.tar.gz there or rebuild with --features download",
            cifar10::batches_dir(data_dir).display()
        )
    }
}

fn cmd_train(config: RunConfig) -> Result<()> {
    let architecture = config.architecture();

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Model:         {}", architecture.describe());
    println!("  Backend:       {} (device {})", backend_name(), config.device_id);
    println!("  Epochs:        {}", config.epochs);
    println!("  Batch size:    {} (test {})", config.batch_size, config.test_batch_size);
    println!("  Learning rate: {} ({:?})", config.learning_rate, config.scheduler);
    println!("  Resume:        {}", config.resume);
    println!();

    ensure_dataset(&config.data_dir)?;
    let device = device_for(config.device_id);

    let train_items = cifar10::load_split(&config.data_dir, DatasetSplit::Train)?;
    let test_items = cifar10::load_split(&config.data_dir, DatasetSplit::Test)?;

    let train_loader = CifarLoader::<TrainingBackend>::new(
        Arc::new(CifarDataset::from_items(train_items)),
        config.batch_size,
        BatchOrder::Shuffled { seed: config.seed },
        device.clone(),
    )?;
    let eval_loader = CifarLoader::<DefaultBackend>::new(
        Arc::new(CifarDataset::from_items(test_items)),
        config.test_batch_size,
        BatchOrder::Sequential,
        device.clone(),
    )?;

    let model: Network<TrainingBackend> = architecture.init(&device)?;
    let mut store =
        FileCheckpointStore::<TrainingBackend>::new(&config.checkpoint_dir, config.label(), device);

    let csv = CsvScalarWriter::create(&config.run_log_dir())?;
    info!("Writing scalars to {:?}", csv.path());
    let mut scalars = FanOutSink::new().with(TracingScalarSink).with(csv);
    let mut progress: Box<dyn ProgressSink> = if config.progress {
        Box::new(BarProgress::new())
    } else {
        Box::new(NoProgress)
    };

    let mut optimizer = SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(config.momentum)
                .with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32)))
        .init::<TrainingBackend, Network<TrainingBackend>>();

    let start = std::time::Instant::now();
    let summary = {
        let mut orchestrator = TrainingOrchestrator::<TrainingBackend>::new(
            OrchestratorConfig {
                total_epochs: config.epochs,
                resume: config.resume,
            },
            CheckpointPolicy::new(config.label(), architecture.describe()),
            &train_loader,
            &eval_loader,
            &mut scalars,
            &mut *progress,
        );

        let (model, state) = orchestrator.start(model, &store)?;
        let mut scheduler =
            LearningRateScheduler::new(config.scheduler_type(state.epoch), config.learning_rate)?;
        let (_, summary) = orchestrator.run(model, &mut optimizer, &mut scheduler, &mut store, state)?;
        summary
    };

    let summary_path = config.run_log_dir().join("summary.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("writing {}", summary_path.display()))?;

    println!();
    println!("{}", "Training finished".green().bold());
    println!(
        "  Epochs:        {}..{} in {}",
        summary.first_epoch,
        summary.end_epoch,
        format_duration(start.elapsed().as_secs_f64())
    );
    println!("  Best accuracy: {:.2}%", summary.best_accuracy);
    println!("  Checkpoints:   {} saved to {:?}", summary.checkpoints_saved, config.checkpoint_dir);
    println!("  Summary:       {:?}", summary_path);

    Ok(())
}

fn cmd_profile(config: &RunConfig) -> Result<()> {
    let architecture = config.architecture();
    let device = device_for(config.device_id);
    let model: Network<DefaultBackend> = architecture.init(&device)?;

    println!("{}", "Model Profile:".cyan().bold());
    println!("  Architecture: {}", architecture.describe());
    println!("  Parameters:   {}", format_number(model.num_params()));

    Ok(())
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    info!("Computing dataset statistics for: {:?}", data_dir);

    if !cifar10::is_available(data_dir) {
        println!(
            "{} CIFAR-10 not found in {:?}",
            "Error:".red(),
            cifar10::batches_dir(data_dir)
        );
        println!();
        println!("Download it first:");
        println!("  cifar_hybrid download --data-dir {}", data_dir.display());
        return Ok(());
    }

    for split in [DatasetSplit::Train, DatasetSplit::Test] {
        let dataset = CifarDataset::from_items(cifar10::load_split(data_dir, split)?);
        let counts = dataset.class_distribution();

        println!("{}", format!("{:?} split:", split).cyan().bold());
        println!("  Total samples: {}", format_number(counts.iter().sum()));
        for (name, count) in CLASS_NAMES.iter().zip(counts.iter()) {
            println!("  {:<12} {}", name, format_number(*count));
        }
        println!();
    }

    Ok(())
}

fn cmd_download(data_dir: &Path) -> Result<()> {
    #[cfg(feature = "download")]
    {
        cifar10::download(data_dir)?;
        println!("{} CIFAR-10 ready in {:?}", "Done:".green(), cifar10::batches_dir(data_dir));
        Ok(())
    }

    #[cfg(not(feature = "download"))]
    {
        println!(
            "{} this build has no downloader. Rebuild with --features download, or fetch",
            "Note:".yellow()
        );
        println!("  https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz");
        println!("and extract it into {:?}", data_dir);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::try_parse_from([
            "cifar_hybrid",
            "train",
            "--model",
            "cnn",
            "--variant",
            "resnet152",
            "--epochs",
            "5",
            "--resume",
        ])
        .unwrap();

        let Commands::Train(args) = cli.command else {
            panic!("expected train");
        };
        let config = args.resolve(false).unwrap();

        assert_eq!(config.model_kind, ModelKind::Conv);
        assert_eq!(config.architecture_variant, ResNetVariant::ResNet152);
        assert_eq!(config.epochs, 5);
        assert!(config.resume);
        assert_eq!(config.batch_size, 256);
    }

    #[test]
    fn test_warmup_cosine_flags() {
        let cli = Cli::try_parse_from([
            "cifar_hybrid",
            "train",
            "--scheduler",
            "warmup-cosine",
            "--warmup-epochs",
            "10",
        ])
        .unwrap();

        let Commands::Train(args) = cli.command else {
            panic!("expected train");
        };
        let config = args.resolve(false).unwrap();

        assert_eq!(config.scheduler, SchedulerKind::WarmupCosine);
        assert_eq!(config.warmup_epochs, 10);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = RunArgs {
            heads: Some(0),
            ..Default::default()
        };
        assert!(args.resolve(false).is_err());
    }
}
