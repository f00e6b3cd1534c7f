//! Entity resolution
//!
//! Each resolver walks an ordered list of named strategies. A strategy either
//! matches, reports that it found nothing, or reports that the authority could
//! not be reached; the last two both fall through to the next strategy. When
//! every strategy falls through the resolver creates the entity.

pub mod artist;
pub mod release;
pub mod track;

pub use artist::{ArtistOpts, ArtistResolver};
pub use release::{ReleaseOpts, ReleaseResolver};
pub use track::{TrackOpts, TrackResolver};

use crate::authority::MetadataAuthority;
use crate::images::ImageSource;
use crate::store::Store;
use std::sync::Arc;

/// Outcome of one resolution strategy
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Matched(T),
    NotFound,
    /// Authority failed; the chain moves on
    Unreachable,
}

/// Dependencies shared by every resolver
#[derive(Clone)]
pub struct ResolverContext {
    pub store: Arc<dyn Store>,
    pub authority: Arc<dyn MetadataAuthority>,
    pub images: Arc<dyn ImageSource>,
}

impl ResolverContext {
    pub fn new(
        store: Arc<dyn Store>,
        authority: Arc<dyn MetadataAuthority>,
        images: Arc<dyn ImageSource>,
    ) -> Self {
        Self {
            store,
            authority,
            images,
        }
    }
}

/// Case-insensitive name comparison used across resolvers
pub(crate) fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_handles_non_ascii() {
        assert!(same_name("BJÖRK", "björk"));
        assert!(!same_name("Björk", "Bjork"));
    }
}
