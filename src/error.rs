//! Error handling

use axum::response::IntoResponse;
use tracing::{info, warn};

use crate::scenes::{SceneIndexError, SceneSetError};

/// Errors raised by the generation pipelines and the web front-end.
#[derive(Debug)]
pub enum AdtoonError {
    /// When you didn't do the right thing
    BadRequest(String),
    /// The language model produced a scene set that breaks the 18-scene schema
    Validation(SceneSetError),
    /// A scene number outside 1..=18
    SceneIndex(SceneIndexError),
    /// An external API answered with an error or an unusable payload
    Api(String),
    /// The HTTP request itself failed
    Http(reqwest::Error),
    /// Reading or writing a local file failed
    Io(std::io::Error),
    /// JSON could not be parsed or produced
    Json(serde_json::Error),
    /// When a requested resource is not found
    NotFound(String),
    /// A batch is already running, a second one can't start
    Busy,
    /// When an internal server error occurs
    InternalServerError(String),
}

impl std::fmt::Display for AdtoonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(message) => write!(f, "Bad request: {message}"),
            Self::Validation(err) => write!(f, "Scene validation failed: {err}"),
            Self::SceneIndex(err) => write!(f, "{err}"),
            Self::Api(message) => write!(f, "API error: {message}"),
            Self::Http(err) => write!(f, "HTTP request failed: {err}"),
            Self::Io(err) => write!(f, "File error: {err}"),
            Self::Json(err) => write!(f, "JSON error: {err}"),
            Self::NotFound(what) => write!(f, "Not found: {what}"),
            Self::Busy => write!(f, "An image batch is already running"),
            Self::InternalServerError(message) => write!(f, "Internal error: {message}"),
        }
    }
}

impl std::error::Error for AdtoonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::SceneIndex(err) => Some(err),
            Self::Http(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SceneSetError> for AdtoonError {
    fn from(err: SceneSetError) -> Self {
        AdtoonError::Validation(err)
    }
}

impl From<SceneIndexError> for AdtoonError {
    fn from(err: SceneIndexError) -> Self {
        AdtoonError::SceneIndex(err)
    }
}

impl From<reqwest::Error> for AdtoonError {
    fn from(err: reqwest::Error) -> Self {
        AdtoonError::Http(err)
    }
}

impl From<std::io::Error> for AdtoonError {
    fn from(err: std::io::Error) -> Self {
        AdtoonError::Io(err)
    }
}

impl From<serde_json::Error> for AdtoonError {
    fn from(err: serde_json::Error) -> Self {
        AdtoonError::Json(err)
    }
}

impl From<axum::http::Error> for AdtoonError {
    fn from(err: axum::http::Error) -> Self {
        AdtoonError::InternalServerError(err.to_string())
    }
}

impl From<url::ParseError> for AdtoonError {
    fn from(err: url::ParseError) -> Self {
        AdtoonError::Api(format!("invalid URL: {err}"))
    }
}

fn text_response(
    status: axum::http::StatusCode,
    body: &'static str,
) -> axum::response::Response {
    let mut response = axum::response::Response::new(axum::body::Body::from(body));
    *response.status_mut() = status;
    response
}

impl IntoResponse for AdtoonError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        match self {
            AdtoonError::BadRequest(message) => {
                info!("Bad request received: {message}");
                text_response(StatusCode::BAD_REQUEST, "Bad Request")
            }
            AdtoonError::SceneIndex(err) => {
                info!("Bad scene index: {err}");
                text_response(StatusCode::BAD_REQUEST, "Bad Request")
            }
            AdtoonError::Validation(err) => {
                warn!("Scene validation failed: {err}");
                text_response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Generated scenes failed validation",
                )
            }
            AdtoonError::Api(message) => {
                tracing::error!("Upstream API error: {message}");
                text_response(StatusCode::BAD_GATEWAY, "Upstream API error")
            }
            AdtoonError::Http(err) => {
                tracing::error!("Upstream request failed: {err}");
                text_response(StatusCode::BAD_GATEWAY, "Upstream request failed")
            }
            AdtoonError::NotFound(what) => {
                tracing::error!("404 {what}");
                text_response(StatusCode::NOT_FOUND, "Not Found")
            }
            AdtoonError::Busy => {
                info!("Rejected batch request while another batch is running");
                text_response(StatusCode::CONFLICT, "An image batch is already running")
            }
            AdtoonError::Io(err) => {
                tracing::error!("File error: {err}");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AdtoonError::Json(err) => {
                tracing::error!("JSON error: {err}");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AdtoonError::InternalServerError(message) => {
                tracing::error!("Internal server error: {}", message);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn validation_errors_map_to_unprocessable() {
        let err = AdtoonError::from(SceneSetError::WrongCount {
            expected: 18,
            found: 17,
        });
        assert_eq!(
            err.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn busy_maps_to_conflict() {
        assert_eq!(AdtoonError::Busy.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn display_includes_cause() {
        let err = AdtoonError::from(SceneSetError::MissingScene("scene_7".to_string()));
        assert!(err.to_string().contains("scene_7"));
    }
}
