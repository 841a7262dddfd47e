//! Scene set to illustrations: one scene, or all 18 through the rate-limited
//! batch runner followed by a retry pass and a report.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, instrument};

use crate::batch::{BatchResults, BatchRunner, Progress, RetryOutcome};
use crate::config::ImageSettings;
use crate::error::AdtoonError;
use crate::openai::ImageRenderer;
use crate::prompts::{scene_image_prompt, scene_image_prompt_with_context};
use crate::report::GenerationReport;
use crate::scenes::{SceneIndex, SceneSet};
use crate::util::scene_image_filename;

/// How a whole-set run is paced and finished off.
#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// Pause between consecutive image calls
    pub delay: Duration,
    /// Retry rounds over failures, 0 disables the retry pass
    pub max_retries: usize,
    /// Write `generation_report.json` when done
    pub write_report: bool,
}

/// Everything a whole-set run produced.
#[derive(Debug)]
pub struct SceneBatch {
    /// Image path per scene number, `None` for failures
    pub results: BatchResults<PathBuf>,
    /// Prompt sent for each scene number
    pub prompts: BTreeMap<usize, String>,
    /// What the retry pass did
    pub retry: RetryOutcome,
    /// Where the report went, when one was written
    pub report_path: Option<PathBuf>,
}

async fn render_to_file(
    renderer: &dyn ImageRenderer,
    prompt: &str,
    settings: &ImageSettings,
    path: PathBuf,
) -> Result<PathBuf, AdtoonError> {
    // a failed render must not leave the previous picture in place
    match tokio::fs::remove_file(&path).await {
        Ok(()) => debug!("Removed previous {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    let bytes = renderer.render(prompt, settings).await?;
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// Renders a single scene into `output_dir/scene_<N>.png`.
#[instrument(skip(renderer, scenes, settings, output_dir), fields(scene = %index))]
pub async fn generate_scene_image(
    renderer: &dyn ImageRenderer,
    scenes: &SceneSet,
    index: SceneIndex,
    settings: &ImageSettings,
    output_dir: &Path,
) -> Result<PathBuf, AdtoonError> {
    tokio::fs::create_dir_all(output_dir).await?;
    let prompt = scene_image_prompt(scenes, index);
    let path = output_dir.join(scene_image_filename(index.get()));
    let path = render_to_file(renderer, &prompt, settings, path).await?;
    info!("Scene {index} saved to {}", path.display());
    Ok(path)
}

/// Renders all 18 scenes one at a time, pausing `options.delay` between
/// calls. Failing scenes don't stop the run; they get up to
/// `options.max_retries` more rounds. Only an unusable output directory (or
/// report write) fails the whole call.
#[instrument(skip_all, fields(model = %settings.model))]
pub async fn generate_all_scenes<P>(
    renderer: &dyn ImageRenderer,
    scenes: &SceneSet,
    settings: &ImageSettings,
    output_dir: &Path,
    options: &BatchOptions,
    on_progress: P,
) -> Result<SceneBatch, AdtoonError>
where
    P: FnMut(Progress),
{
    tokio::fs::create_dir_all(output_dir).await?;

    let context = scenes.story_context();
    let prompts: BTreeMap<usize, String> = SceneIndex::all()
        .map(|index| {
            (
                index.get(),
                scene_image_prompt_with_context(&context, scenes, index),
            )
        })
        .collect();
    let items: Vec<(usize, String)> = prompts
        .iter()
        .map(|(index, prompt)| (*index, prompt.clone()))
        .collect();

    info!(
        "Rendering {} scenes, {} seconds apart",
        items.len(),
        options.delay.as_secs_f32()
    );
    let op = |index: usize, prompt: String| async move {
        let path = output_dir.join(scene_image_filename(index));
        render_to_file(renderer, &prompt, settings, path).await
    };

    let mut runner = BatchRunner::new(options.delay);
    let mut results = runner.run_with_progress(items, op, on_progress).await;

    let retry = if options.max_retries > 0 {
        runner
            .retry_failed(
                &mut results,
                options.max_retries,
                |index| prompts.get(&index).cloned(),
                op,
            )
            .await
    } else {
        RetryOutcome {
            remaining: results.failed(),
            ..Default::default()
        }
    };

    let report_path = if options.write_report {
        let report = GenerationReport::new(
            settings,
            Local::now(),
            results.iter().map(|(index, path)| {
                (
                    index,
                    prompts.get(&index).cloned().unwrap_or_default(),
                    path.cloned(),
                )
            }),
        );
        Some(report.save(output_dir).await?)
    } else {
        None
    };

    Ok(SceneBatch {
        results,
        prompts,
        retry,
        report_path,
    })
}


#[cfg(test)]
mod tests {
    use super::fakes::FlakyRenderer;
    use super::*;
    use crate::report::DetailStatus;
    use crate::scenes::fixtures::scene_set;
    use tokio::time::Instant;

    fn options(max_retries: usize) -> BatchOptions {
        BatchOptions {
            delay: Duration::from_secs(12),
            max_retries,
            write_report: true,
        }
    }

    #[tokio::test]
    async fn single_scene_lands_in_output_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = FlakyRenderer::default();
        let index = SceneIndex::new(4).expect("index");
        let path = generate_scene_image(
            &renderer,
            &scene_set(),
            index,
            &ImageSettings::default(),
            dir.path(),
        )
        .await
        .expect("render");
        assert_eq!(path, dir.path().join("scene_4.png"));
        assert!(path.exists());
        assert_eq!(*renderer.calls.lock().expect("lock"), vec![4]);
    }

    #[tokio::test]
    async fn single_scene_failure_is_returned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = FlakyRenderer::failing(&[(2, 1)]);
        let index = SceneIndex::new(2).expect("index");
        let err = generate_scene_image(
            &renderer,
            &scene_set(),
            index,
            &ImageSettings::default(),
            dir.path(),
        )
        .await
        .expect_err("fails once");
        assert!(matches!(err, AdtoonError::Api(_)));
        assert!(!dir.path().join("scene_2.png").exists());
    }

    #[tokio::test]
    async fn failed_rerender_removes_the_old_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stale = dir.path().join("scene_6.png");
        std::fs::write(&stale, crate::util::tiny_png()).expect("seed");

        let renderer = FlakyRenderer::failing(&[(6, 1)]);
        let index = SceneIndex::new(6).expect("index");
        generate_scene_image(
            &renderer,
            &scene_set(),
            index,
            &ImageSettings::default(),
            dir.path(),
        )
        .await
        .expect_err("fails once");
        assert!(!stale.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn whole_set_paces_calls_and_retries_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = FlakyRenderer::failing(&[(5, 1), (9, 2)]);
        let start = Instant::now();
        let mut progress = Vec::new();

        let batch = generate_all_scenes(
            &renderer,
            &scene_set(),
            &ImageSettings::default(),
            dir.path(),
            &options(3),
            |p| progress.push(p.index),
        )
        .await
        .expect("batch");

        assert_eq!(progress, (1..=18).collect::<Vec<_>>());
        assert_eq!(batch.results.success_count(), 18);
        assert_eq!(batch.retry.rounds, 2);
        assert_eq!(batch.retry.recovered, vec![5, 9]);
        // 18 batch calls + 2 in round one + 1 in round two, all paced
        let calls = renderer.calls.lock().expect("lock").len();
        assert_eq!(calls, 21);
        assert_eq!(start.elapsed(), Duration::from_secs(12) * 20);

        let report_path = batch.report_path.expect("report written");
        let report: GenerationReport =
            serde_json::from_slice(&std::fs::read(report_path).expect("read report"))
                .expect("parse report");
        assert_eq!(report.summary.success, 18);
        assert!(report.details.iter().all(|d| d.status == DetailStatus::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failures_are_reported_as_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = FlakyRenderer::failing(&[(18, 10)]);
        let batch = generate_all_scenes(
            &renderer,
            &scene_set(),
            &ImageSettings::default(),
            dir.path(),
            &options(0),
            |_| {},
        )
        .await
        .expect("batch");

        assert_eq!(batch.results.failed(), vec![18]);
        assert_eq!(batch.retry.rounds, 0);
        assert_eq!(batch.retry.remaining, vec![18]);
        let report: GenerationReport = serde_json::from_slice(
            &std::fs::read(dir.path().join("generation_report.json")).expect("read"),
        )
        .expect("parse");
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.details[17].status, DetailStatus::Failed);
        assert!(report.details[17].prompt.contains("scene 18"));
    }
}
