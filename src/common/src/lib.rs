pub mod cli;
pub mod config;
pub mod document;
pub mod storage;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use document::{Document, DocumentRef};
pub use store::{DocumentStore, StoreError, StoreResult};
