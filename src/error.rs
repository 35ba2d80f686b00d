use std::fmt::Display;

use memcore_utils::align::AlignError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Out of memory: no free block fits {size} bytes aligned to {alignment}")]
    OutOfMemory { size: u64, alignment: u64 },

    #[error("Alignment: {0}")]
    Align(#[from] AlignError),

    #[error("Zero-sized allocation")]
    ZeroSize,

    #[error("Leak: {net} heap allocations outstanding")]
    Leak { net: i64 },

    #[error("Not clear: {0}")]
    NotClear(String),

    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Options: {0}")]
    Options(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Logs and panics. Used for programmer errors that are not meant to be caught.
#[track_caller]
pub(crate) fn fatal(msg: impl Display) -> ! {
    tracing::error!("{}", msg);
    panic!("{}", msg);
}
