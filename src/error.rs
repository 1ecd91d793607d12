use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed reading upload {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed reading multipart upload: {0}")]
    Upload(String),
}

/// Failure of one enrichment round trip. None of these are fatal to the
/// session: the caller records the message and returns to idle.
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("enrichment request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("enrichment call timed out after {0}s")]
    Timeout(u64),

    #[error("enrichment backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid enrichment response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("enrichment cycle cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("email request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("email backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}
