use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use carfinder::{EmbeddingIndex, EmbeddingVector, ListingRecord, Price, SourceId, VehicleAttributes};
use index::IndexError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A listing to index together with its embedding
#[derive(Debug, Deserialize)]
pub struct ListingInsert {
    pub source: SourceId,
    pub url: String,
    pub title: String,

    /// Asking price in whole dollars
    #[serde(default)]
    pub price: Option<u64>,

    #[serde(default)]
    pub mileage: Option<u32>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default)]
    pub attributes: VehicleAttributes,

    pub embedding: Vec<f32>,
}

impl ListingInsert {
    fn into_entry(self) -> ServerResult<(EmbeddingVector, ListingRecord)> {
        let embedding = EmbeddingVector::new(self.embedding)?;
        let mut builder = ListingRecord::builder(self.source, self.url, self.title)
            .with_price(self.price.map(Price::from_dollars))
            .with_mileage(self.mileage)
            .with_attributes(self.attributes)
            .with_embedding(embedding.clone());
        if let Some(location) = self.location {
            builder = builder.with_location(location);
        }
        if let Some(image_url) = self.image_url {
            builder = builder.with_image_url(image_url);
        }
        Ok((embedding, builder.build()?))
    }
}

/// Batch insert request
#[derive(Debug, Deserialize)]
pub struct InsertListingsRequest {
    pub listings: Vec<ListingInsert>,
}

/// Response from index insert
#[derive(Debug, Serialize, Deserialize)]
pub struct InsertListingsResponse {
    /// Canonical ids in request order
    pub inserted: Vec<String>,
    pub total_listings: usize,
    pub version: u64,
}

fn ready_index(state: &ServerState) -> ServerResult<Arc<EmbeddingIndex>> {
    match state.search.index() {
        Some(index) => Ok(index.clone()),
        None => {
            let reason = state
                .search
                .index_status()
                .reason
                .unwrap_or_else(|| "embedding index unavailable".to_string());
            Err(ServerError::Index(IndexError::Unavailable(reason)))
        }
    }
}

/// Index size, dimension, metric and availability
pub async fn index_stats(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.search.index_status())
}

/// Insert listings into the live index
///
/// The whole batch is validated before anything is written and becomes
/// visible to searches as a single new snapshot.
pub async fn insert_listings(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<InsertListingsRequest>,
) -> ServerResult<impl IntoResponse> {
    if request.listings.is_empty() {
        return Err(ServerError::BadRequest("listings must not be empty".into()));
    }
    let index = ready_index(&state)?;

    let entries = request
        .listings
        .into_iter()
        .map(ListingInsert::into_entry)
        .collect::<ServerResult<Vec<_>>>()?;
    let inserted: Vec<String> = entries
        .iter()
        .map(|(_, record)| record.canonical_id().to_string())
        .collect();

    let writer = index.clone();
    tokio::task::spawn_blocking(move || writer.insert_batch(entries))
        .await
        .map_err(|e| ServerError::Internal(format!("index insert task failed: {e}")))??;

    tracing::info!(
        inserted = inserted.len(),
        total = index.len(),
        version = index.version(),
        "indexed listings"
    );
    Ok(Json(InsertListingsResponse {
        inserted,
        total_listings: index.len(),
        version: index.version(),
    }))
}

/// Get an indexed listing by canonical id
pub async fn get_listing(
    State(state): State<Arc<ServerState>>,
    Path(canonical_id): Path<String>,
) -> ServerResult<impl IntoResponse> {
    let index = ready_index(&state)?;
    let record = index.get(&canonical_id)?.ok_or(ServerError::NotFound)?;
    Ok(Json(record))
}
