use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use carfinder::{
    EmbeddingVector, ImageFormat, ImageUpload, InputError, SourceId, SourceOverrides,
    VehicleAttributes,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `?enable=a,b&disable=c` on image routes.
#[derive(Debug, Default, Deserialize)]
pub struct SourceParams {
    #[serde(default)]
    pub enable: Option<String>,
    #[serde(default)]
    pub disable: Option<String>,
}

impl SourceParams {
    fn overrides(&self) -> Result<SourceOverrides, InputError> {
        SourceOverrides::parse(self.enable.as_deref(), self.disable.as_deref())
    }
}

/// Search from attributes recognized elsewhere.
#[derive(Debug, Deserialize)]
pub struct AttributeSearchRequest {
    pub attributes: VehicleAttributes,

    /// Optional embedding for the index lookup
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,

    #[serde(default)]
    pub sources: SourceOverrides,
}

/// One known source and whether requests query it by default.
#[derive(Debug, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: SourceId,
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourcesResponse {
    pub sources: Vec<SourceInfo>,
}

/// Format declared by `Content-Type`. Absent and `application/octet-stream`
/// leave detection to the image contents.
fn declared_format(headers: &HeaderMap) -> Result<Option<ImageFormat>, InputError> {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| InputError::UnknownContentType("<non-ascii>".into()))?;
    let essence = raw.split(';').next().unwrap_or_default().trim();
    if essence.is_empty() || essence.eq_ignore_ascii_case("application/octet-stream") {
        return Ok(None);
    }
    ImageFormat::from_mime(essence)
        .map(Some)
        .ok_or_else(|| InputError::UnknownContentType(essence.to_string()))
}

fn upload_from(headers: &HeaderMap, body: Bytes) -> Result<ImageUpload, InputError> {
    let upload = ImageUpload::new(body);
    Ok(match declared_format(headers)? {
        Some(format) => upload.with_declared_format(format),
        None => upload,
    })
}

/// Supported formats and maximum upload size
pub async fn formats(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.search.policy().describe())
}

/// Known sources and their default enable flags
pub async fn sources(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let enabled = state.search.default_sources();
    let sources = state
        .search
        .known_sources()
        .into_iter()
        .map(|id| SourceInfo {
            enabled: enabled.contains(&id),
            id,
        })
        .collect();
    Json(SourcesResponse { sources })
}

/// Photo in, ranked listings out
pub async fn search_image(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<SourceParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    let overrides = params.overrides()?;
    let upload = upload_from(&headers, body)?;
    let response = state.search.search(upload, &overrides).await?;
    Ok(Json(response))
}

/// Recognition only: validate the image and return the detected vehicle
pub async fn recognize(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    let upload = upload_from(&headers, body)?;
    let recognition = state.search.recognize(upload).await?;
    Ok(Json(recognition))
}

/// Search from already-detected attributes
pub async fn search_attributes(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<AttributeSearchRequest>,
) -> ServerResult<impl IntoResponse> {
    let embedding = request
        .embedding
        .map(EmbeddingVector::new)
        .transpose()
        .map_err(|e| ServerError::from(InputError::InvalidEmbedding(e.to_string())))?;
    let response = state
        .search
        .search_attributes(request.attributes, embedding, &request.sources)
        .await?;
    Ok(Json(response))
}
