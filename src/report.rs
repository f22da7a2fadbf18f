// Records training progress to `metrics.csv` in the logging directory when
// CSV reporting is enabled. Step rows carry the running train loss; epoch rows
// add the evaluation loss and metric.
//
//   epoch,step,train_loss,eval_loss,eval_accuracy,learning_rate
//   1,10,0.693100,,,0.000020
//   1,125,0.681200,0.671000,0.584000,0.000013

use crate::error::{PipelineError, Result};
use crate::training::EpochMetrics;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// External reporting sink for training metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportSink {
    /// Metrics only go to the log
    Disabled,
    /// Metrics are also appended to `metrics.csv` in the logging directory
    Csv,
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Opens `metrics.csv` in `dir`, writing the header if the file is new.
    pub fn new(dir: impl AsRef<Path>, metric_name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|err| PipelineError::persistence(dir, err))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            fs::write(
                &csv_path,
                format!("epoch,step,train_loss,eval_loss,eval_{metric_name},learning_rate\n"),
            )
            .map_err(|err| PipelineError::persistence(&csv_path, err))?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log_step(&self, epoch: usize, step: usize, train_loss: f64, learning_rate: f64) -> Result<()> {
        self.append(format_args!(
            "{epoch},{step},{train_loss:.6},,,{learning_rate:.8}"
        ))
    }

    pub fn log_epoch(&self, m: &EpochMetrics) -> Result<()> {
        let optional = |value: Option<f64>| value.map(|v| format!("{v:.6}")).unwrap_or_default();
        self.append(format_args!(
            "{},{},{:.6},{},{},{:.8}",
            m.epoch,
            m.step,
            m.train_loss,
            optional(m.eval_loss),
            optional(m.eval_metric),
            m.learning_rate,
        ))
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    fn append(&self, row: std::fmt::Arguments<'_>) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .map_err(|err| PipelineError::persistence(&self.csv_path, err))?;
        writeln!(file, "{row}").map_err(|err| PipelineError::persistence(&self.csv_path, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_follow_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path(), "accuracy").unwrap();
        logger.log_step(1, 10, 0.6931, 2e-5).unwrap();
        logger
            .log_epoch(&EpochMetrics {
                epoch: 1,
                step: 125,
                train_loss: 0.68,
                eval_loss: Some(0.67),
                eval_metric: Some(0.584),
                learning_rate: 1.3e-5,
            })
            .unwrap();

        // reopening must not duplicate the header
        let logger = MetricsLogger::new(dir.path(), "accuracy").unwrap();
        let content = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "epoch,step,train_loss,eval_loss,eval_accuracy,learning_rate");
        assert_eq!(lines[1], "1,10,0.693100,,,0.00002000");
        assert_eq!(lines[2], "1,125,0.680000,0.670000,0.584000,0.00001300");
    }

    #[test]
    fn test_report_sink_serialization() {
        assert_eq!(serde_json::to_string(&ReportSink::Disabled).unwrap(), "\"disabled\"");
        assert_eq!(serde_json::from_str::<ReportSink>("\"csv\"").unwrap(), ReportSink::Csv);
    }
}
