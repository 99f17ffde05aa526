//! Error types for campaign loading, store mutation and the wire protocol

use std::io;
use thiserror::Error;

/// Failures while loading, validating or persisting a campaign
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid campaign JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot read image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("asset {0} was not fetched")]
    MissingAsset(String),

    #[error("fragment {id}: {reason}")]
    InvalidFragment { id: String, reason: String },

    #[error("token {token} references unknown fragment {fragment}")]
    UnknownFragment { token: String, fragment: String },

    #[error("{owner} references unknown character {character}")]
    UnknownCharacter { owner: String, character: String },

    #[error("token {0} must reference exactly one of fragment_id or character_id")]
    AmbiguousToken(String),

    #[error("duplicate token id {0}")]
    DuplicateToken(String),

    #[error("document version {0} is newer than this build supports")]
    UnsupportedVersion(u32),

    #[error("campaign has no pages")]
    NoPages,

    #[error("{cursor} = {index} is outside 0..{len}")]
    CursorOutOfRange {
        cursor: &'static str,
        index: usize,
        len: usize,
    },
}

impl CampaignError {
    pub(crate) fn io(path: impl Into<String>, source: io::Error) -> Self {
        CampaignError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Violations of the store's local invariants
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("unknown token {0}")]
    UnknownToken(String),

    #[error("token {id} is invalid: {reason}")]
    InvalidToken { id: String, reason: String },

    #[error("page {index} is outside 0..{len}")]
    PageOutOfRange { index: usize, len: usize },

    #[error("only the master may {0}")]
    NotMaster(&'static str),
}

/// Reasons an inbound datagram is discarded
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown method {0:?}")]
    UnknownMethod(String),

    #[error("invalid params for {method}: {source}")]
    InvalidParams {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode message: {0}")]
    Encode(#[source] serde_json::Error),
}
