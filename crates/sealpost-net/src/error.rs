use thiserror::Error;

/// A frame the decoder could not deliver. The connection survives these.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Malformed JSON frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes buffered (max {max})")]
    Oversized { size: usize, max: usize },
}

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection closed")]
    Closed,

    #[error("Cannot send an empty message")]
    EmptyMessage,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
