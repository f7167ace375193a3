//! Error kinds shared across the FIFO decode, calibration, and cube-writing
//! pipeline.
//!
//! Individual stages return [`CubeError`] so callers can match on the kind;
//! the top-level pipeline and CLI wrap these in `anyhow::Error` with added
//! context, the same split used throughout this crate's dependencies for
//! binary-format readers/writers.

pub type Result<T> = std::result::Result<T, CubeError>;

#[derive(thiserror::Error, Debug)]
pub enum CubeError {
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("unexpected end of file while reading a record")]
    UnexpectedEof,

    #[error("could not infer a consistent pixel grid from sync markers: {0}")]
    SyncMarkersInvalid(&'static str),

    #[error("derived time-bin count is zero for downsampling shift {shift}")]
    InvalidDownsampling { shift: u32 },

    #[error("unrecognised file format: {0}")]
    UnrecognizedFormat(String),

    #[error("zlib deflate returned a non-terminal status: {0}")]
    CompressionError(String),

    #[error("could not open {path} for writing: {source}")]
    WriteOpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
