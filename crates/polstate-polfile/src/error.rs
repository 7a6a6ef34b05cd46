use thiserror::Error;

/// Policy file decoding errors. Parsing fails fast; no partial file is recovered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolFileError {
    #[error("invalid policy file signature {0:#010x} (expected \"PReg\")")]
    BadSignature(u32),

    #[error("unsupported policy file version {0} (expected 1)")]
    UnsupportedVersion(u32),

    #[error("policy file truncated at offset {offset:#x}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("malformed entry at offset {offset:#x}: {reason}")]
    MalformedEntry { offset: usize, reason: String },
}
