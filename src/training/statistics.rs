//! Training curve reporter.
//!
//! Renders a finished run's history as SVG charts on an explicit [`Canvas`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::training::history::{validation_key, TrainingHistory, ACCURACY, LOSS, OVERLAP_COEFFICIENT};
use crate::utils::charts::Canvas;
use crate::utils::error::{PanelTrainError, Result};

/// Chart file name of the detection loss curve
pub const DETECTION_LOSS_CHART: &str = "Detection_loss";

/// Which pipeline produced the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatisticsMode {
    /// Adds the overlap coefficient curves
    Segmentation,
    Classification,
}

/// Per-epoch series of one split, ready to plot
struct SplitCurves<'a> {
    overlap: Option<&'a [f64]>,
    loss: &'a [f64],
    accuracy: &'a [f64],
}

fn training_curves<'a>(history: &'a TrainingHistory, mode: StatisticsMode) -> Result<SplitCurves<'a>> {
    let require = |key: &str| {
        history
            .get(key)
            .ok_or_else(|| PanelTrainError::MissingMetric(key.to_string()))
    };

    Ok(SplitCurves {
        overlap: match mode {
            StatisticsMode::Segmentation => Some(require(OVERLAP_COEFFICIENT)?),
            StatisticsMode::Classification => None,
        },
        loss: require(LOSS)?,
        accuracy: require(ACCURACY)?,
    })
}

/// Validation curves, or the first missing key
fn validation_curves(
    history: &TrainingHistory,
    mode: StatisticsMode,
) -> std::result::Result<SplitCurves<'_>, String> {
    let lookup = |metric: &str| {
        let key = validation_key(metric);
        history.get(&key).ok_or(key)
    };

    Ok(SplitCurves {
        overlap: match mode {
            StatisticsMode::Segmentation => Some(lookup(OVERLAP_COEFFICIENT)?),
            StatisticsMode::Classification => None,
        },
        loss: lookup(LOSS)?,
        accuracy: lookup(ACCURACY)?,
    })
}

/// Plot every curve of `history` and return the written files in order.
///
/// Missing training metrics are an error. Missing validation metrics only
/// skip the validation charts.
pub fn training_statistics(
    history: &TrainingHistory,
    mode: StatisticsMode,
    canvas: &Canvas,
) -> Result<Vec<PathBuf>> {
    let train = training_curves(history, mode)?;
    let val = match validation_curves(history, mode) {
        Ok(curves) => Some(curves),
        Err(key) => {
            warn!("No validation metrics available ('{}' missing), skipping validation plots", key);
            None
        }
    };

    let mut written = Vec::new();
    let mut single = |name: &str, values: &[f64]| -> Result<()> {
        let figure = canvas.figure(name).line(name, values);
        written.push(canvas.save(&figure, name)?);
        Ok(())
    };

    if let Some(overlap) = train.overlap {
        single("Train_dice_coef", overlap)?;
    }
    single("Train_loss", train.loss)?;
    single("Train_accuracy", train.accuracy)?;

    if let Some(val) = &val {
        if let Some(overlap) = val.overlap {
            single("VAL_dice_coef", overlap)?;
        }
        single("VAL_loss", val.loss)?;
        single("VAL_accuracy", val.accuracy)?;
    }

    let combined = |title: &str, prefix: &str, curves: &SplitCurves| {
        let mut figure = canvas
            .figure(title)
            .line(&format!("{}_accuracy", prefix), curves.accuracy)
            .line(&format!("{}_loss", prefix), curves.loss);
        if let Some(overlap) = curves.overlap {
            figure = figure.line(&format!("{}_dice_coef", prefix), overlap);
        }
        figure
    };

    let figure = combined("Training statistics", "train", &train);
    written.push(canvas.save(&figure, "Training statistics")?);

    if let Some(val) = &val {
        let figure = combined("Validation statistics", "val", val);
        written.push(canvas.save(&figure, "Validation statistics")?);
    }

    info!("Wrote {} charts to {:?}", written.len(), canvas.output_dir());
    Ok(written)
}

/// Render a per-epoch loss sequence, as returned by the detection fit loop
pub fn plot_losses(losses: &[f64], canvas: &Canvas) -> Result<PathBuf> {
    let figure = canvas
        .figure("Detection loss")
        .y_label("Loss")
        .line("loss", losses);
    canvas.save(&figure, DETECTION_LOSS_CHART)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_stem().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn history(keys: &[&str]) -> TrainingHistory {
        let mut history = TrainingHistory::new();
        for key in keys {
            history.push(key, 0.5);
            history.push(key, 0.75);
        }
        history
    }

    #[test]
    fn test_segmentation_with_validation() {
        let dir = TempDir::new().unwrap();
        let history = history(&[
            "loss",
            "accuracy",
            "overlap_coefficient",
            "val_loss",
            "val_accuracy",
            "val_overlap_coefficient",
        ]);

        let written =
            training_statistics(&history, StatisticsMode::Segmentation, &Canvas::new(dir.path()))
                .unwrap();
        assert_eq!(
            names(&written),
            vec![
                "Train_dice_coef",
                "Train_loss",
                "Train_accuracy",
                "VAL_dice_coef",
                "VAL_loss",
                "VAL_accuracy",
                "Training statistics",
                "Validation statistics",
            ]
        );
        assert!(written.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_training_keys_only() {
        let dir = TempDir::new().unwrap();
        let history = history(&["loss", "accuracy"]);

        let written =
            training_statistics(&history, StatisticsMode::Classification, &Canvas::new(dir.path()))
                .unwrap();
        assert_eq!(
            names(&written),
            vec!["Train_loss", "Train_accuracy", "Training statistics"]
        );
    }

    #[test]
    fn test_partial_validation_is_skipped() {
        let dir = TempDir::new().unwrap();
        let history = history(&["loss", "accuracy", "val_loss"]);

        let written =
            training_statistics(&history, StatisticsMode::Classification, &Canvas::new(dir.path()))
                .unwrap();
        assert_eq!(written.len(), 3);
    }

    #[test]
    fn test_missing_training_metric_is_an_error() {
        let dir = TempDir::new().unwrap();
        let history = history(&["loss", "accuracy"]);

        let result =
            training_statistics(&history, StatisticsMode::Segmentation, &Canvas::new(dir.path()));
        assert!(matches!(
            result,
            Err(PanelTrainError::MissingMetric(key)) if key == "overlap_coefficient"
        ));
    }

    #[test]
    fn test_plot_losses() {
        let dir = TempDir::new().unwrap();
        let path = plot_losses(&[1.0, 0.6, 0.4], &Canvas::new(dir.path())).unwrap();
        assert_eq!(path, dir.path().join("Detection_loss.svg"));
        let svg = std::fs::read_to_string(path).unwrap();
        assert!(svg.contains("<svg"));
    }
}
