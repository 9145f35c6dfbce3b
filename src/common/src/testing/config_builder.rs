//! Test configuration builder for creating test setups quickly.

use crate::config::{Configuration, FieldRuleConfig, RelationConfig};
use std::time::Duration;

/// Builder for creating test configurations.
///
/// Defaults to an in-memory store, millisecond backoff and the usual
/// 500-operation batch ceiling.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .with_relation("boxroTalks", "articleId", "storyArticles")
///     .with_field_rule("banners", "thumbnail", "cardThumbnail")
///     .with_max_batch_ops(2)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.store.dsn = "memory://".to_string();
        config.store.timeout = Duration::from_secs(5);
        config.sweeper.base_delay = Duration::from_millis(1);
        config.sweeper.max_delay = Duration::from_millis(4);
        Self { config }
    }

    /// Add an unnamed relation; its name is derived from the fields.
    pub fn with_relation(mut self, child: &str, foreign_key: &str, parent: &str) -> Self {
        self.config.catalog.relations.push(RelationConfig {
            name: None,
            child_collection: child.to_string(),
            foreign_key_field: foreign_key.to_string(),
            parent_collection: parent.to_string(),
        });
        self
    }

    pub fn with_named_relation(
        mut self,
        name: &str,
        child: &str,
        foreign_key: &str,
        parent: &str,
    ) -> Self {
        self.config.catalog.relations.push(RelationConfig {
            name: Some(name.to_string()),
            child_collection: child.to_string(),
            foreign_key_field: foreign_key.to_string(),
            parent_collection: parent.to_string(),
        });
        self
    }

    /// Add an unnamed field prune rule.
    pub fn with_field_rule(mut self, collection: &str, deprecated: &str, replacement: &str) -> Self {
        self.config.catalog.field_rules.push(FieldRuleConfig {
            name: None,
            collection: collection.to_string(),
            deprecated_field: deprecated.to_string(),
            replacement_field: replacement.to_string(),
        });
        self
    }

    pub fn with_max_batch_ops(mut self, max_batch_ops: usize) -> Self {
        self.config.sweeper.max_batch_ops = max_batch_ops;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.sweeper.max_retries = max_retries;
        self
    }

    pub fn with_revalidation(mut self) -> Self {
        self.config.sweeper.revalidate_before_delete = true;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store.timeout = timeout;
        self
    }

    pub fn with_store_dsn(mut self, dsn: &str) -> Self {
        self.config.store.dsn = dsn.to_string();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Configuration {
        self.config
    }
}
