//! Content fragments extracted from a document.
//!
//! A fragment is one unit of retrievable content: a windowed text chunk or a
//! single raster image. Fragments are immutable once stored and are owned by
//! the session that ingested them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The kind of content a fragment or query carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modality::Text => write!(f, "text"),
            Modality::Image => write!(f, "image"),
        }
    }
}

/// Where a fragment came from inside the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocator {
    /// Zero-based page number
    pub page: usize,
    /// Ordinal of the chunk or image within its page
    pub position: usize,
}

/// Fragment content. Images are always stored PNG-encoded so they can be
/// handed to a vision model without another conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FragmentPayload {
    Text {
        content: String,
    },
    Image {
        #[serde(with = "png_base64")]
        png: Vec<u8>,
        width: u32,
        height: u32,
    },
}

/// One unit of retrievable content extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentFragment {
    /// Unique within a session, monotonically assigned at ingestion
    pub id: u64,
    pub payload: FragmentPayload,
    pub locator: SourceLocator,
    pub created_at: DateTime<Utc>,
}

impl ContentFragment {
    pub fn new_text(id: u64, content: String, locator: SourceLocator) -> Self {
        Self {
            id,
            payload: FragmentPayload::Text { content },
            locator,
            created_at: Utc::now(),
        }
    }

    pub fn new_image(id: u64, png: Vec<u8>, width: u32, height: u32, locator: SourceLocator) -> Self {
        Self {
            id,
            payload: FragmentPayload::Image { png, width, height },
            locator,
            created_at: Utc::now(),
        }
    }

    pub fn modality(&self) -> Modality {
        match self.payload {
            FragmentPayload::Text { .. } => Modality::Text,
            FragmentPayload::Image { .. } => Modality::Image,
        }
    }

    /// Text content, if this is a text fragment.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            FragmentPayload::Text { content } => Some(content),
            FragmentPayload::Image { .. } => None,
        }
    }
}

/// Insertion-ordered store mapping fragment ids to fragments.
///
/// Every id present in the vector index must resolve here; the store and the
/// index for one document are built together and published together.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct FragmentStore {
    fragments: Vec<ContentFragment>,
    #[serde(skip)]
    by_id: HashMap<u64, usize>,
}

/// Errors raised when populating a fragment store.
#[derive(Debug, thiserror::Error)]
pub enum FragmentStoreError {
    #[error("duplicate fragment id {0}")]
    DuplicateId(u64),
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Insert a fragment. Ids must be unique within the store.
    pub fn insert(&mut self, fragment: ContentFragment) -> Result<(), FragmentStoreError> {
        if self.by_id.contains_key(&fragment.id) {
            return Err(FragmentStoreError::DuplicateId(fragment.id));
        }
        self.by_id.insert(fragment.id, self.fragments.len());
        self.fragments.push(fragment);
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&ContentFragment> {
        self.by_id.get(&id).map(|&pos| &self.fragments[pos])
    }

    pub fn contains(&self, id: u64) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ContentFragment> {
        self.fragments.iter()
    }

    /// Rebuild the id lookup after deserialization (serde skips it).
    pub fn rebuild_lookup(&mut self) {
        self.by_id = self
            .fragments
            .iter()
            .enumerate()
            .map(|(pos, f)| (f.id, pos))
            .collect();
    }
}

/// Serde helper storing PNG bytes as base64 in JSON.
mod png_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
