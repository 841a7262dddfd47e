use std::io::ErrorKind;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use axum::http::response::Builder;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use httpdate::{fmt_http_date, parse_http_date};

use super::prelude::*;
use crate::constants::IMAGE_CACHE_CONTROL;
use crate::scenes::SceneIndex;
use crate::util::scene_image_filename;

/// Validators for a scene PNG on disk.
#[derive(Clone, Debug)]
pub(crate) struct ImageCacheHeaders {
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
    modified_at: Option<SystemTime>,
}

impl ImageCacheHeaders {
    pub(crate) fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let modified_at = metadata.modified().ok();
        Self {
            etag: weak_etag(metadata.len(), modified_at),
            last_modified: modified_at
                .and_then(|modified| HeaderValue::from_str(&fmt_http_date(modified)).ok()),
            modified_at,
        }
    }

    fn apply(&self, mut builder: Builder) -> Builder {
        builder = builder.header(CACHE_CONTROL, IMAGE_CACHE_CONTROL.as_str());
        if let Some(etag) = &self.etag {
            builder = builder.header(ETAG, etag.clone());
        }
        if let Some(last_modified) = &self.last_modified {
            builder = builder.header(LAST_MODIFIED, last_modified.clone());
        }
        builder
    }

    /// `If-None-Match` wins over `If-Modified-Since` when both are sent.
    pub(crate) fn is_not_modified(&self, headers: &HeaderMap) -> bool {
        if let Some(if_none_match) = headers.get(IF_NONE_MATCH) {
            let Ok(value) = if_none_match.to_str() else {
                return false;
            };
            let value = value.trim();
            return value == "*"
                || self
                    .etag
                    .as_ref()
                    .and_then(|etag| etag.to_str().ok())
                    .is_some_and(|etag| value.split(',').any(|candidate| candidate.trim() == etag));
        }

        if let (Some(if_modified_since), Some(modified_at)) =
            (headers.get(IF_MODIFIED_SINCE), self.modified_at)
            && let Ok(value) = if_modified_since.to_str()
            && let Ok(since) = parse_http_date(value)
        {
            // http dates have whole-second resolution
            let modified_secs = modified_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let since_secs = since
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            return modified_secs <= since_secs;
        }
        false
    }
}

fn weak_etag(size: u64, modified_at: Option<SystemTime>) -> Option<HeaderValue> {
    let stamp = modified_at
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |duration| duration.as_secs());
    HeaderValue::from_str(&format!("W/\"{size}-{stamp}\"")).ok()
}

/// `GET /images/{index}`: the PNG for one scene, with cache validators.
pub(crate) async fn scene_image_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(index): Path<usize>,
) -> Result<Response, AdtoonError> {
    let index = SceneIndex::new(index)?;
    let not_found = || AdtoonError::NotFound(format!("image for scene {index}"));
    if !state.workspace.read().await.shows_image(index.get()) {
        return Err(not_found());
    }
    let image_path = state
        .config
        .output_dir
        .join(scene_image_filename(index.get()));

    let metadata = match tokio::fs::metadata(&image_path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(not_found()),
        Err(err) => return Err(err.into()),
    };
    let cache = ImageCacheHeaders::from_metadata(&metadata);
    if cache.is_not_modified(&headers) {
        return cache
            .apply(Response::builder().status(StatusCode::NOT_MODIFIED))
            .body(Body::empty())
            .map_err(AdtoonError::from);
    }

    let bytes = match tokio::fs::read(&image_path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(not_found()),
        Err(err) => return Err(err.into()),
    };
    cache
        .apply(Response::builder().header(CONTENT_TYPE, "image/png"))
        .body(Body::from(bytes))
        .map_err(AdtoonError::from)
}
