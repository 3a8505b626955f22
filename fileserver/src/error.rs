use std::path::PathBuf;

/// Everything a request handler can fail with. Only the message reaches the client.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("stat {}: {source}", path.display())]
    NotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0}: path escapes the root directory")]
    OutsideRoot(String),

    #[error("Cannot open directory")]
    CannotOpenDirectory,

    #[error("Extract required")]
    ExtractRequired,

    #[error("readdir {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("exec {program}: {source}")]
    ToolUnavailable {
        program: String,
        source: std::io::Error,
    },

    #[error("reading output of {program}: {source}")]
    ToolIo {
        program: String,
        source: std::io::Error,
    },

    #[error("creating scratch directory: {0}")]
    Scratch(std::io::Error),

    #[error("open {}: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot send filename {0:?} in a header")]
    BadFilename(String),

    #[error("encoding response: {0}")]
    Encode(#[from] serde_json::Error),
}
