//! carfinder server - HTTP REST API for photo-based vehicle search
//!
//! Exposes the [`carfinder::VehicleSearch`] pipeline over HTTP: upload a car
//! photo, get ranked listings merged from the embedding index and live
//! marketplace scrapes.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! - `GET /` - API information
//! - `GET /health` - Liveness probe
//! - `GET /ready` - Readiness probe including index state
//! - `GET /metrics` - Prometheus metrics
//! - `POST /api/v1/search` - Search by image (raw body, `Content-Type: image/*`,
//!   optional `?enable=`/`?disable=` source lists)
//! - `POST /api/v1/search/attributes` - Search by already-detected attributes
//! - `POST /api/v1/recognize` - Recognize the vehicle in an image without searching
//! - `GET /api/v1/formats` - Supported formats and size limit
//! - `GET /api/v1/sources` - Known sources and default enable flags
//! - `GET /api/v1/index/stats` - Embedding index status
//! - `POST /api/v1/index/listings` - Insert listings with embeddings
//! - `GET /api/v1/index/listings/{canonical_id}` - Get an indexed listing
//!
//! Errors are returned as `{"error": {"code", "message", "details"?}}`.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod telemetry;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
