//! The boundary between live page objects and stored bytes.
//!
//! The store never looks inside a page. Whatever renders pages supplies a
//! [`PageSerializer`] that turns them into bytes and back.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::{Error, PageId, Result};

/// A live page object the cache can hold.
pub trait ManageablePage: Send + Sync {
    /// Id of the page within its session.
    fn page_id(&self) -> PageId;
}

/// Converts pages to bytes and back.
///
/// Both directions must be pure: the same page always yields bytes that
/// deserialize to an equivalent page.
pub trait PageSerializer<P>: Send + Sync {
    fn serialize(&self, page: &P) -> Result<Vec<u8>>;

    fn deserialize(&self, data: &[u8]) -> Result<P>;
}

/// [`PageSerializer`] for any serde type, encoded as JSON.
pub struct JsonPageSerializer<P> {
    _page: PhantomData<fn() -> P>,
}

impl<P> JsonPageSerializer<P> {
    pub fn new() -> Self {
        Self { _page: PhantomData }
    }
}

impl<P> Default for JsonPageSerializer<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PageSerializer<P> for JsonPageSerializer<P>
where
    P: Serialize + DeserializeOwned,
{
    fn serialize(&self, page: &P) -> Result<Vec<u8>> {
        serde_json::to_vec(page).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn deserialize(&self, data: &[u8]) -> Result<P> {
        serde_json::from_slice(data).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Form {
        id: u32,
        step: u8,
    }

    #[test]
    fn test_json_roundtrip() {
        let serializer = JsonPageSerializer::<Form>::new();
        let bytes = serializer.serialize(&Form { id: 1, step: 2 }).unwrap();
        assert_eq!(serializer.deserialize(&bytes).unwrap(), Form { id: 1, step: 2 });
    }

    #[test]
    fn test_json_garbage_is_serialization_error() {
        let serializer = JsonPageSerializer::<Form>::new();
        assert!(matches!(
            serializer.deserialize(b"\x00\x01"),
            Err(Error::Serialization(_))
        ));
    }
}
