//! catalog-resolver library
//!
//! Resolves incoming listen events into canonical, deduplicated artists,
//! releases and tracks. MusicBrainz may be consulted to canonicalise names
//! and discover aliases, but resolution never depends on it being reachable.

pub mod alias;
pub mod authority;
pub mod coalesce;
pub mod error;
pub mod images;
pub mod merge;
pub mod models;
pub mod parser;
pub mod queue;
pub mod resolve;
pub mod store;
pub mod submit;

pub use crate::error::{CatalogError, CatalogResult};
pub use crate::submit::{Catalog, SubmitListenOpts, SubmitOutcome};
