//! Core data types shared by the source, transformer and destination.

pub mod value;

pub use value::{SourceRow, SqlValue, TransformedRow};
