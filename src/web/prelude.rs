pub(crate) use crate::error::AdtoonError;
pub(crate) use crate::web::AppState;
pub(crate) use crate::web::flash;
pub(crate) use crate::web::workspace::{BatchStatus, RenderClaim, guarded};
pub(crate) use askama::Template;
pub(crate) use askama_web::WebTemplate;
pub(crate) use axum::extract::{Form, Path, Query, State};
pub(crate) use axum::http::header::CONTENT_TYPE;
pub(crate) use axum::response::{IntoResponse, Redirect};
pub(crate) use serde::Deserialize;
pub(crate) use tower_sessions::Session;
pub(crate) use tracing::{debug, info};
