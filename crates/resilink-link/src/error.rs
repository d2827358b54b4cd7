use resilink_frame::FrameError;

/// Errors surfaced by link endpoints.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// No live transport is bound to the connection.
    #[error("transport is down")]
    TransportDown,

    /// The very first connection attempt never produced a live link.
    ///
    /// Later outages are recovered silently; this one is fatal because it
    /// usually means a bad address or a server that is not running.
    #[error("initial connection to {addr} failed")]
    InitialConnect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A second transport presented an identity that is already live.
    #[error("identity {0:?} is already connected")]
    IdentityConflict(String),

    /// Invalid endpoint configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A received payload is not valid UTF-8.
    #[error("received payload is not valid UTF-8")]
    InvalidUtf8,

    /// The connection has been closed locally.
    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
