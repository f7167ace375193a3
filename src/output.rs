//! Serialization of a finished cube to (and back from) the self-describing
//! binary container format.

pub mod reader;
pub mod tag;
pub mod writer;
