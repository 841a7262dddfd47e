//! JSON generation report written after an image batch.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ImageSettings;
use crate::constants::REPORT_FILENAME;
use crate::error::AdtoonError;

/// Counts over the whole batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Items attempted
    pub total: usize,
    /// Items with an image
    pub success: usize,
    /// Items without one
    pub failed: usize,
    /// `success / total` as a percentage, 0 for an empty batch
    pub success_rate: f64,
}

impl Summary {
    /// Builds the summary from raw counts.
    pub fn from_counts(total: usize, success: usize) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if total > 0 {
            success as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total,
            success,
            failed: total.saturating_sub(success),
            success_rate,
        }
    }
}

/// Whether an item produced an image.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailStatus {
    /// The image was written
    Success,
    /// Nothing was written
    Failed,
}

/// One line of the report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportDetail {
    /// Scene number
    pub index: usize,
    /// Prompt sent to the image model
    pub prompt: String,
    /// Path of the image, if any
    pub result: Option<String>,
    /// `success` or `failed`
    pub status: DetailStatus,
}

/// The report file contents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    /// RFC 3339 local time the report was produced
    pub timestamp: String,
    /// Image settings the batch used
    pub settings: ImageSettings,
    /// Counts
    pub summary: Summary,
    /// Per-item lines in index order
    pub details: Vec<ReportDetail>,
}

impl GenerationReport {
    /// Builds a report from `(index, prompt, result)` entries.
    pub fn new<I>(settings: &ImageSettings, now: DateTime<Local>, entries: I) -> Self
    where
        I: IntoIterator<Item = (usize, String, Option<PathBuf>)>,
    {
        let mut details: Vec<ReportDetail> = entries
            .into_iter()
            .map(|(index, prompt, result)| ReportDetail {
                index,
                prompt,
                status: if result.is_some() {
                    DetailStatus::Success
                } else {
                    DetailStatus::Failed
                },
                result: result.map(|path| path.display().to_string()),
            })
            .collect();
        details.sort_by_key(|detail| detail.index);

        let success = details
            .iter()
            .filter(|detail| detail.status == DetailStatus::Success)
            .count();
        Self {
            timestamp: now.to_rfc3339(),
            settings: settings.clone(),
            summary: Summary::from_counts(details.len(), success),
            details,
        }
    }

    /// Paths of every generated image, in index order.
    pub fn generated_files(&self) -> Vec<&str> {
        self.details
            .iter()
            .filter_map(|detail| detail.result.as_deref())
            .collect()
    }

    /// Writes `generation_report.json` into `output_dir` and returns its path.
    pub async fn save(&self, output_dir: &Path) -> Result<PathBuf, AdtoonError> {
        tokio::fs::create_dir_all(output_dir).await?;
        let path = output_dir.join(REPORT_FILENAME);
        tokio::fs::write(&path, serde_json::to_vec_pretty(self)?).await?;
        info!("Saved generation report to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GenerationReport {
        GenerationReport::new(
            &ImageSettings::default(),
            Local::now(),
            vec![
                (3, "third".to_string(), Some(PathBuf::from("out/scene_3.png"))),
                (1, "first".to_string(), Some(PathBuf::from("out/scene_1.png"))),
                (2, "second".to_string(), None),
            ],
        )
    }

    #[test]
    fn summary_counts_and_rate() {
        let report = sample();
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.success, 2);
        assert_eq!(report.summary.failed, 1);
        assert!((report.summary.success_rate - 66.666).abs() < 0.01);
        assert_eq!(Summary::from_counts(0, 0).success_rate, 0.0);
    }

    #[test]
    fn details_are_sorted_with_status() {
        let report = sample();
        let indices: Vec<usize> = report.details.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(report.details[1].status, DetailStatus::Failed);
        assert_eq!(report.details[1].result, None);
        assert_eq!(
            report.generated_files(),
            vec!["out/scene_1.png", "out/scene_3.png"]
        );
    }

    #[test]
    fn serializes_with_expected_keys() {
        let value = serde_json::to_value(sample()).expect("serialize");
        for key in ["timestamp", "settings", "summary", "details"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["details"][1]["status"], "failed");
        assert_eq!(value["summary"]["success"], 2);
    }
}
