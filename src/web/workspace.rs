//! Per-server working state: the current scene set, generated images, the
//! batch status and an error log.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::{RwLock, watch};
use tracing::error;

use crate::error::AdtoonError;
use crate::scenes::SceneSet;

/// An operation that failed, kept for the error log on the home page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ErrorEntry {
    pub(crate) timestamp: DateTime<Local>,
    pub(crate) operation: String,
    pub(crate) message: String,
}

#[derive(Debug, Default)]
pub(crate) struct Workspace {
    pub(crate) narrative: Option<String>,
    pub(crate) scene_model: Option<String>,
    pub(crate) scenes: Option<SceneSet>,
    pub(crate) scenes_path: Option<PathBuf>,
    /// scene number -> image on disk
    pub(crate) images: BTreeMap<usize, PathBuf>,
    pub(crate) report_path: Option<PathBuf>,
    pub(crate) errors: Vec<ErrorEntry>,
}

impl Workspace {
    /// Drops everything, as if the server had just started.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Swaps in a new scene set; images made for the old one no longer apply.
    pub(crate) fn set_scenes(&mut self, scenes: SceneSet, path: PathBuf) {
        self.scenes = Some(scenes);
        self.scenes_path = Some(path);
        self.images.clear();
        self.report_path = None;
    }

    /// Whether the PNG on disk for scene `index` may be shown. With a scene
    /// set loaded only images rendered for that set count.
    pub(crate) fn shows_image(&self, index: usize) -> bool {
        self.scenes.is_none() || self.images.contains_key(&index)
    }

    pub(crate) fn record_error(&mut self, operation: &str, message: String) {
        self.errors.push(ErrorEntry {
            timestamp: Local::now(),
            operation: operation.to_string(),
            message,
        });
    }
}

/// Where image generation is at. At most one image call is in flight:
/// either a single scene or the background batch holds the status.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum BatchStatus {
    #[default]
    Idle,
    Rendering {
        scene: usize,
    },
    Running {
        done: usize,
        total: usize,
        succeeded: usize,
    },
    Finished {
        succeeded: usize,
        failed: Vec<usize>,
        retry_rounds: usize,
    },
    Failed(String),
}

impl BatchStatus {
    pub(crate) fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. } | Self::Rendering { .. })
    }

    /// One-line description for the sidebar.
    pub(crate) fn label(&self) -> String {
        match self {
            Self::Idle => "No batch has run yet".to_string(),
            Self::Rendering { scene } => format!("Generating the image for scene {scene}"),
            Self::Running { done, total, succeeded } => {
                format!("Generating images: {done}/{total} done, {succeeded} succeeded")
            }
            Self::Finished {
                succeeded,
                failed,
                retry_rounds,
            } if failed.is_empty() => {
                format!("Batch finished: {succeeded} images after {retry_rounds} retry rounds")
            }
            Self::Finished {
                succeeded,
                failed,
                ..
            } => format!(
                "Batch finished: {succeeded} images, scenes {} failed",
                failed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Self::Failed(message) => format!("Batch failed: {message}"),
        }
    }
}

/// Holds the image status for one single-scene render. Dropping it puts the
/// previous status back, also when the request is cancelled mid-render.
pub(crate) struct RenderClaim {
    status: Arc<watch::Sender<BatchStatus>>,
    previous: BatchStatus,
}

impl RenderClaim {
    /// `None` while a batch or another single render holds the status.
    pub(crate) fn acquire(status: &Arc<watch::Sender<BatchStatus>>, scene: usize) -> Option<Self> {
        let mut previous = None;
        status.send_if_modified(|current| {
            if current.is_running() {
                return false;
            }
            previous = Some(std::mem::replace(current, BatchStatus::Rendering { scene }));
            true
        });
        previous.map(|previous| Self {
            status: Arc::clone(status),
            previous,
        })
    }
}

impl Drop for RenderClaim {
    fn drop(&mut self) {
        self.status.send_replace(std::mem::take(&mut self.previous));
    }
}

/// Awaits `operation`, logging a failure and adding it to the workspace error
/// log before handing it back.
pub(crate) async fn guarded<T, F>(
    workspace: &RwLock<Workspace>,
    label: &str,
    operation: F,
) -> Result<T, AdtoonError>
where
    F: Future<Output = Result<T, AdtoonError>>,
{
    match operation.await {
        Ok(value) => Ok(value),
        Err(err) => {
            error!("{label} failed: {err}");
            workspace.write().await.record_error(label, err.to_string());
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenes::fixtures::scene_set;

    #[tokio::test]
    async fn guarded_logs_failures_only() {
        let workspace = RwLock::new(Workspace::default());

        let ok: Result<u8, AdtoonError> = guarded(&workspace, "fine", async { Ok(1) }).await;
        assert_eq!(ok.ok(), Some(1));
        assert!(workspace.read().await.errors.is_empty());

        let err: Result<u8, AdtoonError> = guarded(&workspace, "image generation", async {
            Err(AdtoonError::Api("quota".to_string()))
        })
        .await;
        assert!(err.is_err());
        let ws = workspace.read().await;
        assert_eq!(ws.errors.len(), 1);
        assert_eq!(ws.errors[0].operation, "image generation");
        assert!(ws.errors[0].message.contains("quota"));
    }

    #[test]
    fn new_scenes_drop_old_images_and_reset_clears_all() {
        let mut ws = Workspace::default();
        ws.images.insert(1, PathBuf::from("scene_1.png"));
        ws.record_error("x", "y".to_string());
        ws.set_scenes(scene_set(), PathBuf::from("scenes.json"));
        assert!(ws.images.is_empty());
        assert!(ws.scenes.is_some());
        assert_eq!(ws.errors.len(), 1);

        ws.reset();
        assert!(ws.scenes.is_none());
        assert!(ws.errors.is_empty());
    }

    #[test]
    fn status_labels() {
        assert!(
            BatchStatus::Running {
                done: 3,
                total: 18,
                succeeded: 2
            }
            .label()
            .contains("3/18")
        );
        let finished = BatchStatus::Finished {
            succeeded: 16,
            failed: vec![4, 9],
            retry_rounds: 3,
        };
        assert!(finished.label().ends_with("scenes 4, 9 failed"));
        assert!(!finished.is_running());
    }

    #[test]
    fn render_claim_is_exclusive_and_restores_status() {
        let finished = BatchStatus::Finished {
            succeeded: 18,
            failed: vec![],
            retry_rounds: 0,
        };
        let status = Arc::new(watch::Sender::new(finished.clone()));

        let claim = RenderClaim::acquire(&status, 4).expect("free");
        assert_eq!(*status.borrow(), BatchStatus::Rendering { scene: 4 });
        assert!(status.borrow().is_running());
        assert!(RenderClaim::acquire(&status, 5).is_none());

        drop(claim);
        assert_eq!(*status.borrow(), finished);

        status.send_replace(BatchStatus::Running {
            done: 0,
            total: 18,
            succeeded: 0,
        });
        assert!(RenderClaim::acquire(&status, 1).is_none());
    }

    #[test]
    fn only_images_of_the_loaded_set_are_shown() {
        let mut ws = Workspace::default();
        assert!(ws.shows_image(3));

        ws.set_scenes(scene_set(), PathBuf::from("scenes.json"));
        assert!(!ws.shows_image(3));
        ws.images.insert(3, PathBuf::from("scene_3.png"));
        assert!(ws.shows_image(3));
    }
}
