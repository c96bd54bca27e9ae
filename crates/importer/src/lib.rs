//! Batch import of provider records into the catalog.

pub mod error;
pub mod locks;
pub mod runner;
pub mod source;

pub use error::{RunError, SourceError};
pub use locks::KeyedLocks;
pub use runner::{ImportRunner, ImportSettings};
pub use source::{ImportSource, InlineSource, JsonFileSource};
