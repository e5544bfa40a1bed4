#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A logical channel name that is neither a catalog name nor an alias.
    #[error("unknown channel name: {0}")]
    UnknownChannel(String),

    #[error("duplicate channel name: {0}")]
    DuplicateName(String),
    #[error("channel {0} has an empty identifier")]
    EmptyIdentifier(String),
    #[error("channel {channel} references unknown decode table {table}")]
    UnknownDecodeTable { channel: String, table: String },
    #[error("status channel {0} has no decode table")]
    MissingDecodeTable(String),
    #[error("decode table {0} has no codes")]
    EmptyDecodeTable(String),
    #[error("alias {alias} is invalid: {reason}")]
    InvalidAlias { alias: String, reason: String },

    #[error("session is already connected")]
    AlreadyConnected,
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
