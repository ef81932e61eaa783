//! Panel Train CLI
//!
//! Entry point for the segmentation, classification and mounting detection
//! training pipelines.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use panel_train::backend::{backend_name, default_device, ComputeDevice, TrainingBackend};
use panel_train::model::BackboneConfig;
use panel_train::training::checkpoint::save_checkpoint;
use panel_train::training::trainer::{
    CLASSIFIER_CHECKPOINT, DETECTOR_CHECKPOINT, SEGMENTATION_CHECKPOINT,
};
use panel_train::utils::logging::{init_logging, LogConfig, LogLevel};
use panel_train::{
    ArchitectureConfig, ImageArray, MaskArray, PanelTrainer, StatisticsMode, TrainerConfig,
    TrainingHistory,
};

/// Solar panel training pipelines
///
/// Trains a panel segmentation network, a panel presence classifier and a
/// mounting-configuration detector on satellite imagery.
#[derive(Parser, Debug)]
#[command(name = "panel_train")]
#[command(version)]
#[command(about = "Solar panel segmentation, classification and mounting detection training", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Hyperparameters shared by all pipelines
#[derive(Args, Debug)]
struct TrainArgs {
    /// Number of training epochs
    #[arg(short, long, default_value = "10")]
    epochs: usize,

    /// Batch size for training
    #[arg(short, long, default_value = "8")]
    batch_size: usize,

    /// Learning rate
    #[arg(short, long, default_value = "0.0001")]
    learning_rate: f64,

    /// Random seed for shuffling and oversampling
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Width of the first backbone stage (64 for full VGG16)
    #[arg(long, default_value = "64")]
    base_filters: usize,

    /// Pretrained backbone weights
    #[arg(long)]
    pretrained: Option<PathBuf>,

    /// Directory for charts
    #[arg(long, default_value = "output/reports")]
    report_dir: PathBuf,
}

impl TrainArgs {
    fn trainer(&self) -> Result<PanelTrainer<TrainingBackend>> {
        let config =
            TrainerConfig::new(self.batch_size, self.epochs, self.learning_rate).with_seed(self.seed);
        let architecture = ArchitectureConfig {
            backbone: BackboneConfig {
                base_filters: self.base_filters,
                pretrained_weights: self.pretrained.clone(),
            },
            ..ArchitectureConfig::compact(self.base_filters)
        };

        Ok(PanelTrainer::new(config, default_device())?
            .with_architecture(architecture)?
            .with_report_dir(&self.report_dir))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the panel segmentation network on image and mask directories
    Segment {
        #[arg(long)]
        train_images: PathBuf,

        #[arg(long)]
        train_masks: PathBuf,

        #[arg(long)]
        val_images: PathBuf,

        #[arg(long)]
        val_masks: PathBuf,

        /// Checkpoint path (extension is added)
        #[arg(short, long, default_value = "output/models/semantic_segmentation")]
        checkpoint: PathBuf,

        #[command(flatten)]
        train: TrainArgs,
    },

    /// Train the panel presence classifier on class subdirectories
    Classify {
        #[arg(long)]
        train_dir: PathBuf,

        #[arg(long)]
        val_dir: PathBuf,

        /// Checkpoint path (extension is added)
        #[arg(short, long, default_value = "output/models/panel_classifier")]
        checkpoint: PathBuf,

        #[command(flatten)]
        train: TrainArgs,
    },

    /// Train the mounting-configuration detector on images/ + annotations/ splits
    Detect {
        #[arg(long)]
        train_dir: PathBuf,

        #[arg(long)]
        val_dir: PathBuf,

        /// Checkpoint path (extension is added)
        #[arg(short, long, default_value = "output/models/mounting_detector")]
        checkpoint: PathBuf,

        /// Run on the CPU even when an accelerator backend is built
        #[arg(long, default_value = "false")]
        cpu: bool,

        #[command(flatten)]
        train: TrainArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&log_config(cli.verbose, cli.quiet, cli.log_level.as_deref()));

    print_banner();
    info!("Backend: {}", backend_name());

    match cli.command {
        Commands::Segment {
            train_images,
            train_masks,
            val_images,
            val_masks,
            checkpoint,
            train,
        } => cmd_segment(
            &train_images,
            &train_masks,
            &val_images,
            &val_masks,
            &checkpoint,
            &train,
        ),
        Commands::Classify {
            train_dir,
            val_dir,
            checkpoint,
            train,
        } => cmd_classify(&train_dir, &val_dir, &checkpoint, &train),
        Commands::Detect {
            train_dir,
            val_dir,
            checkpoint,
            cpu,
            train,
        } => cmd_detect(&train_dir, &val_dir, &checkpoint, cpu, &train),
    }
}

fn log_config(verbose: bool, quiet: bool, level: Option<&str>) -> LogConfig {
    let mut config = if verbose {
        LogConfig::verbose()
    } else if quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    if let Some(level) = level {
        config.level = LogLevel::parse(level);
    }
    config
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ==================================================================
   Panel Train
   Solar panel segmentation, classification and mounting detection
 ==================================================================
  "#
        .green()
    );
}

fn cmd_segment(
    train_images: &Path,
    train_masks: &Path,
    val_images: &Path,
    val_masks: &Path,
    checkpoint: &Path,
    args: &TrainArgs,
) -> Result<()> {
    let trainer = args.trainer()?;

    println!("{}", "Loading image and mask arrays...".cyan());
    let train_x = ImageArray::load_dir(train_images).context("loading training images")?;
    let train_y = MaskArray::load_dir(train_masks).context("loading training masks")?;
    let val_x = ImageArray::load_dir(val_images).context("loading validation images")?;
    let val_y = MaskArray::load_dir(val_masks).context("loading validation masks")?;

    println!("{}", "Starting segmentation training...".green().bold());
    let (_, history) = trainer.train_segmentation(&train_x, &train_y, &val_x, &val_y, checkpoint)?;

    report(&trainer, &history, StatisticsMode::Segmentation, checkpoint, SEGMENTATION_CHECKPOINT)
}

fn cmd_classify(train_dir: &Path, val_dir: &Path, checkpoint: &Path, args: &TrainArgs) -> Result<()> {
    let trainer = args.trainer()?;

    println!("{}", "Starting classifier training...".green().bold());
    let (_, history) = trainer.train_panel_classifier(train_dir, val_dir, checkpoint)?;

    report(&trainer, &history, StatisticsMode::Classification, checkpoint, CLASSIFIER_CHECKPOINT)
}

fn cmd_detect(
    train_dir: &Path,
    val_dir: &Path,
    checkpoint: &Path,
    cpu: bool,
    args: &TrainArgs,
) -> Result<()> {
    let trainer = args.trainer()?;
    let device = if cpu {
        ComputeDevice::Cpu
    } else {
        ComputeDevice::Accelerator
    };

    println!("{}", "Starting mounting detector training...".green().bold());
    let model = trainer.train_mounting_config_classifier(train_dir, val_dir, device)?;

    let written = save_checkpoint(&model, checkpoint)
        .with_context(|| format!("saving {}", DETECTOR_CHECKPOINT))?;
    println!("{} {:?}", "Detector saved to".green(), written);
    Ok(())
}

/// Save the history next to the checkpoint and chart it
fn report(
    trainer: &PanelTrainer<TrainingBackend>,
    history: &TrainingHistory,
    mode: StatisticsMode,
    checkpoint: &Path,
    name: &str,
) -> Result<()> {
    let history_path = checkpoint.with_extension("history.json");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    history
        .save(&history_path)
        .with_context(|| format!("saving {} history", name))?;
    info!("History saved to {:?}", history_path);

    let charts = trainer.training_statistics(history, mode)?;
    println!(
        "{} {} charts in {:?}",
        "Wrote".green(),
        charts.len(),
        trainer.report_dir()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_flags() {
        assert_eq!(log_config(false, false, None).level, LogLevel::Info);
        assert_eq!(log_config(true, false, None).level, LogLevel::Debug);
        assert_eq!(log_config(false, true, None).level, LogLevel::Error);
        assert_eq!(log_config(false, true, Some("warn")).level, LogLevel::Warn);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let parsed = Cli::try_parse_from([
            "panel_train",
            "-v",
            "-q",
            "classify",
            "--train-dir",
            "t",
            "--val-dir",
            "v",
        ]);
        assert!(parsed.is_err());
    }
}
