//! carfinder listing model.
//!
//! Shared value types for everything that flows between the index, the
//! marketplace adapters and the aggregator.
//!
//! ## What lives here
//!
//! - [`SourceId`]: validated, lower-case marketplace identifier
//! - [`EmbeddingVector`]: immutable, cheaply cloned `f32` vector
//! - [`VehicleAttributes`]: make/model/year/body/color, all optional
//! - [`ListingRecord`]: one marketplace listing, built through
//!   [`ListingRecord::builder`]
//! - [`Price`] and [`parse_mileage`]: lenient parsing of marketplace text
//!
//! ## Identity
//!
//! `canonical_id = hex(SHA-256(source || 0x00 || normalized_url))[..32]`.
//! Two observations of the same listing always share an id, whichever stream
//! (index or live scrape) produced them. See [`normalize_url`].
//!
//! Nothing in this crate performs I/O.

mod error;
mod identity;
mod price;
mod record;

pub use crate::error::ListingError;
pub use crate::identity::{canonical_id, canonical_id_for, normalize_url, CANONICAL_ID_LEN};
pub use crate::price::{parse_mileage, Price};
pub use crate::record::{
    EmbeddingVector, ListingRecord, ListingRecordBuilder, SourceId, VehicleAttributes,
};
