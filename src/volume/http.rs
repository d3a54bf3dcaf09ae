//! Write API
//!
//! `POST` with the SQL in the body. The target segment is the first label of
//! the `Host` header (`<segment>.<anything>`). Any failure answers 500 with
//! `500 Server Error: <reason>`.

use crate::common::{Result, Settings};
use crate::coordinator::segment::Segment;
use crate::volume::sqlite::execute_write_blocking;
use crate::volume::write::{Denial, WriteAuthorizer};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header::HOST, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

const MAX_QUERY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct WriteState {
    pub settings: Arc<Settings>,
    pub authorizer: Arc<WriteAuthorizer>,
}

impl WriteState {
    /// Validate, authorize, then execute
    pub async fn write(&self, segment_id: &str, body: &[u8]) -> Result<()> {
        let query = std::str::from_utf8(body)
            .map_err(|_| Denial::Unparseable("query is not valid UTF-8".into()))?;
        self.authorizer.validate(query)?;

        let segment = Segment::new(segment_id, None);
        self.authorizer
            .authorize(&segment, &self.settings.hostname)
            .await?;

        tracing::info!("Writing to segment {}", segment_id);
        execute_write_blocking(self.settings.segment_path(segment_id), query.to_string()).await
    }
}

/// Segment id from a `Host` header value
pub fn segment_from_host(host: &str) -> Option<&str> {
    let name = host.split(':').next()?;
    name.split('.').next().filter(|label| !label.is_empty())
}

pub fn create_router(state: WriteState) -> Router {
    Router::new()
        .route("/", post(handle_write))
        .route("/*path", post(handle_write))
        .layer(DefaultBodyLimit::disable())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_QUERY_BYTES)),
        )
        .with_state(state)
}

async fn handle_write(
    State(state): State<WriteState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let segment_id = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(segment_from_host);

    let result = match segment_id {
        Some(segment_id) => state.write(segment_id, &body).await,
        None => Err(Denial::MissingSegment.into()),
    };

    match result {
        Ok(()) => (StatusCode::OK, "OK".to_string()),
        Err(e) => {
            tracing::warn!("Write failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("500 Server Error: {}", e),
            )
        }
    }
}
