use thiserror::Error;

/// The crate-wide error currency. Scoped to the failure kinds the runtime can
/// actually produce; everything else is an invariant violation and panics at
/// the point of detection instead of being threaded through `Result`.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("buffer pool exhausted")]
    PoolExhausted,

    #[error("arena exhausted: {0}")]
    ArenaExhausted(String),

    #[error("buffers leaked: {count} still outstanding at shutdown")]
    BuffersLeaked { count: usize },

    #[error("origin {origin} stalled: no contiguous watermark progress for {idle_ms}ms")]
    OriginStalled { origin: u64, idle_ms: u64 },

    #[error("channel rejected: {0}")]
    ChannelRejected(String),

    #[error("channel unrecoverable: {0}")]
    ChannelUnrecoverable(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("codec error: {0}")]
    CodecError(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<bincode::error::EncodeError> for CoreError {
    fn from(e: bincode::error::EncodeError) -> Self {
        CoreError::CodecError(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for CoreError {
    fn from(e: bincode::error::DecodeError) -> Self {
        CoreError::CodecError(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::ChannelRejected(e.to_string())
    }
}
