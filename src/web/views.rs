use std::io::ErrorKind;

use axum::http::header::CONTENT_DISPOSITION;
use chrono::Local;
use tracing::warn;

use super::prelude::*;
use crate::config::validate_scene_model;
use crate::constants::{EXAMPLE_NARRATIVE, SCENE_COUNT, SCENE_MODELS};
use crate::pipeline::{BatchOptions, generate_all_scenes, generate_scene_image};
use crate::scenes::{SceneIndex, SceneSet};
use crate::util::{
    format_file_size, image_dimensions, sanitize_filename, scene_image_filename, scenes_filename,
};

const GALLERY_COLUMNS: usize = 3;

#[derive(Clone, Debug)]
pub(crate) struct ModelOption {
    pub(crate) name: String,
    pub(crate) selected: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct SceneRow {
    pub(crate) index: usize,
    pub(crate) script: String,
    pub(crate) keyword: String,
    pub(crate) has_image: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct ErrorRow {
    pub(crate) timestamp: String,
    pub(crate) operation: String,
    pub(crate) message: String,
}

#[derive(Template, WebTemplate)]
#[template(path = "home.html")]
pub(crate) struct HomeTemplate {
    narrative: String,
    models: Vec<ModelOption>,
    image_settings: String,
    has_scenes: bool,
    scenes: Vec<SceneRow>,
    scene_count: usize,
    image_count: usize,
    batch_running: bool,
    batch_label: String,
    has_report: bool,
    has_flash: bool,
    flash_message: String,
    flash_class: String,
    has_errors: bool,
    errors: Vec<ErrorRow>,
}

/// handles the / GET
pub(crate) async fn home_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<HomeTemplate, AdtoonError> {
    let flash = flash::take_flash_message(&session).await?;
    let (has_flash, flash_message, flash_class) = match flash {
        Some(message) => (true, message.text.to_string(), message.class.to_string()),
        None => (false, String::new(), String::new()),
    };
    let batch = state.batch.borrow().clone();

    let ws = state.workspace.read().await;
    let selected = ws
        .scene_model
        .clone()
        .unwrap_or_else(|| state.config.scene_model.clone());
    let models = SCENE_MODELS
        .iter()
        .map(|name| ModelOption {
            name: (*name).to_string(),
            selected: *name == selected,
        })
        .collect();
    let scenes: Vec<SceneRow> = ws
        .scenes
        .iter()
        .flat_map(SceneSet::iter)
        .map(|(index, scene)| SceneRow {
            index: index.get(),
            script: scene.script.clone(),
            keyword: scene.main_keyword.clone(),
            has_image: ws.images.contains_key(&index.get()),
        })
        .collect();
    let errors: Vec<ErrorRow> = ws
        .errors
        .iter()
        .rev()
        .map(|entry| ErrorRow {
            timestamp: entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            operation: entry.operation.clone(),
            message: entry.message.clone(),
        })
        .collect();
    let image = &state.config.image;

    Ok(HomeTemplate {
        narrative: ws
            .narrative
            .clone()
            .unwrap_or_else(|| EXAMPLE_NARRATIVE.to_string()),
        models,
        image_settings: format!(
            "{} / {} / {} / {}",
            image.model, image.size, image.quality, image.style
        ),
        has_scenes: !scenes.is_empty(),
        scenes,
        scene_count: SCENE_COUNT,
        image_count: ws.images.len(),
        batch_running: batch.is_running(),
        batch_label: batch.label(),
        has_report: ws.report_path.is_some(),
        has_flash,
        flash_message,
        flash_class,
        has_errors: !errors.is_empty(),
        errors,
    })
}

#[derive(Deserialize)]
pub(crate) struct ScenesForm {
    narrative: String,
    model: Option<String>,
}

/// `POST /scenes`: narrative to a validated, saved scene set.
pub(crate) async fn generate_scenes_handler(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<ScenesForm>,
) -> Result<Redirect, AdtoonError> {
    let model = form
        .model
        .filter(|model| !model.trim().is_empty())
        .unwrap_or_else(|| state.config.scene_model.clone());
    validate_scene_model(&model)?;
    let narrative = form.narrative.trim().to_string();
    {
        let mut ws = state.workspace.write().await;
        ws.narrative = Some(form.narrative);
        ws.scene_model = Some(model.clone());
    }
    if narrative.is_empty() {
        flash::set_flash(&session, flash::FLASH_NARRATIVE_REQUIRED).await?;
        return Ok(Redirect::to("/"));
    }

    let outcome = guarded(&state.workspace, "scene generation", async {
        let scenes = state.writer.write_scenes(&narrative, &model).await?;
        let path = state.config.scenes_dir.join(scenes_filename(Local::now()));
        scenes.save(&path).await?;
        Ok::<_, AdtoonError>((scenes, path))
    })
    .await;
    let flag = match outcome {
        Ok((scenes, path)) => {
            info!("Scenes saved to {}", path.display());
            state.workspace.write().await.set_scenes(scenes, path);
            flash::FLASH_SCENES_READY
        }
        Err(_) => flash::FLASH_SCENES_FAILED,
    };
    flash::set_flash(&session, flag).await?;
    Ok(Redirect::to("/"))
}

/// `GET /scenes.json`: the current scene file as a download.
pub(crate) async fn scenes_json_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AdtoonError> {
    let ws = state.workspace.read().await;
    let scenes = ws
        .scenes
        .as_ref()
        .ok_or_else(|| AdtoonError::NotFound("no scenes generated yet".to_string()))?;
    let filename = ws
        .scenes_path
        .as_ref()
        .and_then(|path| path.file_name())
        .map_or_else(
            || "scenes.json".to_string(),
            |name| sanitize_filename(&name.to_string_lossy()),
        );
    let body = scenes.to_json_pretty()?;
    Ok((
        [
            (CONTENT_TYPE, "application/json".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    ))
}

#[derive(Deserialize)]
pub(crate) struct SceneForm {
    scene: usize,
}

/// `POST /images/scene`: one illustration, generated in the request.
pub(crate) async fn generate_scene_handler(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<SceneForm>,
) -> Result<Redirect, AdtoonError> {
    let index = SceneIndex::new(form.scene)?;
    let scenes = state.workspace.read().await.scenes.clone();
    let Some(scenes) = scenes else {
        flash::set_flash(&session, flash::FLASH_SCENES_REQUIRED).await?;
        return Ok(Redirect::to("/"));
    };
    let Some(claim) = RenderClaim::acquire(&state.batch, index.get()) else {
        return Err(AdtoonError::Busy);
    };

    let outcome = guarded(
        &state.workspace,
        "scene image generation",
        generate_scene_image(
            state.renderer.as_ref(),
            &scenes,
            index,
            &state.config.image,
            &state.config.output_dir,
        ),
    )
    .await;
    let flag = {
        let mut ws = state.workspace.write().await;
        let current = ws.scenes.as_ref() == Some(&scenes);
        match outcome {
            Ok(path) => {
                if current {
                    ws.images.insert(index.get(), path);
                }
                flash::FLASH_IMAGE_READY
            }
            Err(_) => {
                ws.images.remove(&index.get());
                flash::FLASH_IMAGE_FAILED
            }
        }
    };
    drop(claim);
    flash::set_flash(&session, flag).await?;
    Ok(Redirect::to("/"))
}

/// `POST /images/all`: starts the paced batch in the background. Only one
/// batch runs at a time.
pub(crate) async fn generate_all_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<Redirect, AdtoonError> {
    let scenes = state.workspace.read().await.scenes.clone();
    let Some(scenes) = scenes else {
        flash::set_flash(&session, flash::FLASH_SCENES_REQUIRED).await?;
        return Ok(Redirect::to("/"));
    };
    let started = state.batch.send_if_modified(|status| {
        if status.is_running() {
            return false;
        }
        *status = BatchStatus::Running {
            done: 0,
            total: SCENE_COUNT,
            succeeded: 0,
        };
        true
    });
    if !started {
        return Err(AdtoonError::Busy);
    }

    tokio::spawn(run_batch(state.clone(), scenes));
    flash::set_flash(&session, flash::FLASH_BATCH_STARTED).await?;
    Ok(Redirect::to("/"))
}

async fn run_batch(state: AppState, scenes: SceneSet) {
    let options = BatchOptions {
        delay: state.config.rate_limit_delay,
        max_retries: state.config.max_retries,
        write_report: true,
    };
    let status = state.batch.clone();
    let mut succeeded = 0;
    let outcome = guarded(
        &state.workspace,
        "batch image generation",
        generate_all_scenes(
            state.renderer.as_ref(),
            &scenes,
            &state.config.image,
            &state.config.output_dir,
            &options,
            |progress| {
                if progress.succeeded {
                    succeeded += 1;
                }
                status.send_replace(BatchStatus::Running {
                    done: progress.done,
                    total: progress.total,
                    succeeded,
                });
            },
        ),
    )
    .await;

    let final_status = match outcome {
        Ok(batch) => {
            let mut ws = state.workspace.write().await;
            // the workspace may have been reset or given new scenes meanwhile
            if ws.scenes.as_ref() == Some(&scenes) {
                for (index, path) in batch.results.iter() {
                    match path {
                        Some(path) => ws.images.insert(index, path.clone()),
                        None => ws.images.remove(&index),
                    };
                }
                ws.report_path.clone_from(&batch.report_path);
            }
            for index in &batch.retry.remaining {
                ws.record_error(
                    "batch image generation",
                    format!(
                        "scene {index} still failing after {} retry rounds",
                        batch.retry.rounds
                    ),
                );
            }
            BatchStatus::Finished {
                succeeded: batch.results.success_count(),
                failed: batch.results.failed(),
                retry_rounds: batch.retry.rounds,
            }
        }
        Err(err) => BatchStatus::Failed(err.to_string()),
    };
    debug!("Batch done: {final_status:?}");
    state.batch.send_replace(final_status);
}

/// `POST /reset`: forgets the workspace. Files on disk stay.
pub(crate) async fn reset_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<Redirect, AdtoonError> {
    state.workspace.write().await.reset();
    state.batch.send_if_modified(|status| {
        if status.is_running() || *status == BatchStatus::Idle {
            return false;
        }
        *status = BatchStatus::Idle;
        true
    });
    flash::set_flash(&session, flash::FLASH_WORKSPACE_CLEARED).await?;
    Ok(Redirect::to("/"))
}

#[derive(Clone, Debug)]
pub(crate) struct GalleryItem {
    pub(crate) index: usize,
    pub(crate) script: String,
    pub(crate) keyword: String,
    pub(crate) url: String,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) size: String,
}

#[derive(Template, WebTemplate)]
#[template(path = "gallery.html")]
pub(crate) struct GalleryTemplate {
    is_grid: bool,
    item_count: usize,
    scene_count: usize,
    rows: Vec<Vec<GalleryItem>>,
    current: Option<GalleryItem>,
    position: usize,
    prev_scene: usize,
    next_scene: usize,
    has_report: bool,
}

#[derive(Deserialize)]
pub(crate) struct GalleryQuery {
    view: Option<String>,
    scene: Option<usize>,
}

/// Every scene image in the output directory that belongs to the loaded
/// scene set, in scene order.
async fn gallery_items(state: &AppState) -> Result<Vec<GalleryItem>, AdtoonError> {
    let (scenes, shown): (Option<SceneSet>, Vec<SceneIndex>) = {
        let ws = state.workspace.read().await;
        let shown = SceneIndex::all()
            .filter(|index| ws.shows_image(index.get()))
            .collect();
        (ws.scenes.clone(), shown)
    };
    let mut items = Vec::new();
    for index in shown {
        let path = state
            .config
            .output_dir
            .join(scene_image_filename(index.get()));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        let (width, height) = match image_dimensions(&bytes) {
            Ok(dimensions) => dimensions,
            Err(err) => {
                warn!("Skipping {}: {err}", path.display());
                continue;
            }
        };
        let (script, keyword) = scenes
            .as_ref()
            .map(|scenes| {
                let scene = scenes.get(index);
                (scene.script.clone(), scene.main_keyword.clone())
            })
            .unwrap_or_default();
        items.push(GalleryItem {
            index: index.get(),
            script,
            keyword,
            url: format!("/images/{index}"),
            width,
            height,
            size: format_file_size(bytes.len() as u64),
        });
    }
    Ok(items)
}

/// `GET /gallery?view=grid|slide&scene=N`
pub(crate) async fn gallery_handler(
    State(state): State<AppState>,
    Query(query): Query<GalleryQuery>,
) -> Result<GalleryTemplate, AdtoonError> {
    let is_grid = query.view.as_deref() != Some("slide");
    let items = gallery_items(&state).await?;
    let item_count = items.len();

    let position = query
        .scene
        .and_then(|scene| items.iter().position(|item| item.index == scene))
        .unwrap_or(0);
    let current = items.get(position).cloned();
    let (prev_scene, next_scene) = if item_count == 0 {
        (0, 0)
    } else {
        (
            items[(position + item_count - 1) % item_count].index,
            items[(position + 1) % item_count].index,
        )
    };
    let rows = items
        .chunks(GALLERY_COLUMNS)
        .map(<[GalleryItem]>::to_vec)
        .collect();
    let has_report = state.workspace.read().await.report_path.is_some();

    Ok(GalleryTemplate {
        is_grid,
        item_count,
        scene_count: SCENE_COUNT,
        rows,
        current,
        position: position + 1,
        prev_scene,
        next_scene,
        has_report,
    })
}
