use serde_json::Value;

use crate::error::Result;
use crate::merkle::leaf_hash;
use crate::objecthash::{object_hash, object_hash_with_redaction, shed_redactable};
use crate::path::default_hashes;
use crate::types::{Hash, MAP_DEPTH};

/// How map values are requested and decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EntryFormat {
    /// Opaque bytes, hashed as-is.
    #[default]
    Raw,
    /// JSON document, hashed with the object hash.
    Json,
    /// Redactable JSON as seen by a reader who may not see every member.
    RedactedJson,
}

impl EntryFormat {
    /// Token appended to the request path to select this format.
    pub fn format_suffix(&self) -> &'static str {
        match self {
            EntryFormat::Raw => "",
            EntryFormat::Json | EntryFormat::RedactedJson => "/xjson",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> VerifiableEntry {
        let bytes = bytes.to_vec();
        match self {
            EntryFormat::Raw => VerifiableEntry::Raw(bytes),
            EntryFormat::Json => VerifiableEntry::Json(bytes),
            EntryFormat::RedactedJson => VerifiableEntry::RedactedJson(bytes),
        }
    }
}

/// A value read from the map, able to compute its own leaf hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifiableEntry {
    Raw(Vec<u8>),
    Json(Vec<u8>),
    RedactedJson(Vec<u8>),
}

impl VerifiableEntry {
    /// Bytes exactly as returned by the server.
    pub fn data(&self) -> &[u8] {
        match self {
            VerifiableEntry::Raw(b)
            | VerifiableEntry::Json(b)
            | VerifiableEntry::RedactedJson(b) => b,
        }
    }

    /// True when the key holds no value. Absent keys hash to the empty leaf.
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    pub fn leaf_hash(&self) -> Result<Hash> {
        if self.is_empty() {
            return Ok(default_hashes()[MAP_DEPTH]);
        }
        match self {
            VerifiableEntry::Raw(b) => Ok(leaf_hash(b)),
            VerifiableEntry::Json(b) => {
                let value: Value = serde_json::from_slice(b)?;
                Ok(leaf_hash(&object_hash(&value)?))
            }
            VerifiableEntry::RedactedJson(b) => {
                let value: Value = serde_json::from_slice(b)?;
                Ok(leaf_hash(&object_hash_with_redaction(&value)?))
            }
        }
    }

    /// Parsed JSON value with redaction salts removed, `None` for raw entries.
    pub fn value(&self) -> Result<Option<Value>> {
        match self {
            VerifiableEntry::Raw(_) => Ok(None),
            VerifiableEntry::Json(b) => Ok(Some(serde_json::from_slice(b)?)),
            VerifiableEntry::RedactedJson(b) => {
                let value: Value = serde_json::from_slice(b)?;
                Ok(Some(shed_redactable(&value)?))
            }
        }
    }
}

/// A value to be written to the map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadableEntry {
    Raw(Vec<u8>),
    Json(Vec<u8>),
    /// JSON the server stores in redactable form.
    RedactableJson(Vec<u8>),
}

impl UploadableEntry {
    pub fn format_suffix(&self) -> &'static str {
        match self {
            UploadableEntry::Raw(_) => "",
            UploadableEntry::Json(_) => "/xjson",
            UploadableEntry::RedactableJson(_) => "/xjson/redactable",
        }
    }

    pub fn data_for_upload(&self) -> &[u8] {
        match self {
            UploadableEntry::Raw(b)
            | UploadableEntry::Json(b)
            | UploadableEntry::RedactableJson(b) => b,
        }
    }
}
