//! Test utilities for docsweep.
//!
//! Reusable helpers for building test configurations, seeding in-memory
//! stores and injecting store failures.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::{Fault, FaultyStore, TestConfigBuilder, seeded_store};
//!
//! let config = TestConfigBuilder::new()
//!     .with_relation("boxroTalks", "articleId", "storyArticles")
//!     .build();
//! let store = seeded_store(&[("storyArticles", "a1", json!({}))]);
//! let faulty = FaultyStore::new(store).fail_batch_call(1, Fault::Transient);
//! ```

mod config_builder;
mod faulty_store;

pub use config_builder::TestConfigBuilder;
pub use faulty_store::{Fault, FaultyStore};

use std::sync::Arc;

use crate::store::InMemoryStore;

/// Build an in-memory store holding the given `(collection, id, body)`
/// documents. Bodies that are not JSON objects are skipped.
pub fn seeded_store(documents: &[(&str, &str, serde_json::Value)]) -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    for (collection, id, body) in documents {
        store.insert_json(collection, id, body.clone());
    }
    Arc::new(store)
}
