//! Crate-wide error enums, one per subsystem (§7 of SPEC_FULL.md).

use thiserror::Error;

/// Errors from the flag codec (`crate::flag`).
#[derive(Debug, Error)]
pub enum FlagError {
    #[error("flag token is malformed: {0}")]
    Malformed(String),

    #[error("flag signature does not verify")]
    InvalidSignature,

    #[error("entropy source exhausted while minting a flag")]
    EntropyExhausted,
}

/// Errors from the probe driver (`crate::probe`).
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("checker process I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the persistence layer (`crate::store`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not reach the backing store: {0}")]
    Connection(String),

    #[error("team subnet conflicts with an existing team")]
    SubnetConflict,

    #[error("flag token already exists")]
    DuplicateToken,

    #[error("flag has already been captured")]
    AlreadyCaptured,

    #[error("a team cannot capture its own flag")]
    SelfCapture,

    #[error("flag is outside the capture window")]
    FlagExpired,

    #[error("no such flag")]
    UnknownFlag,

    #[error("no such record")]
    NotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Errors from the submission receiver (`crate::receiver`).
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("peer address could not be matched to a configured team subnet")]
    UnknownTeam,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from configuration loading (`crate::config`).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
