use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "docsweep.toml";

/// Prefix for environment overrides, e.g. `DOCSWEEP__STORE__DSN`.
pub const ENV_PREFIX: &str = "DOCSWEEP__";

/// Replacement for secrets in printed configuration.
pub const REDACTED: &str = "****";

/// Mask the password of a DSN such as `s3://key:secret@host/bucket`.
///
/// DSNs that do not parse but still look like they carry userinfo have
/// everything between the scheme and the last `@` masked.
pub fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) if url.password().is_some() => match url.set_password(Some(REDACTED)) {
            Ok(()) => url.to_string(),
            Err(()) => REDACTED.to_string(),
        },
        Ok(_) => dsn.to_string(),
        Err(_) => match (dsn.find("://"), dsn.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}{REDACTED}{}", &dsn[..scheme_end + 3], &dsn[at..])
            }
            _ => dsn.to_string(),
        },
    }
}

fn serialize_redacted_dsn<S: Serializer>(dsn: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&redact_dsn(dsn))
}

/// Document store connection settings.
///
/// The credential is accepted from any provider but never serialized, so it
/// does not leak through `docsweep config --json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store DSN: `memory://`, `file:///path/to/docs` or
    /// `s3://[key:secret@]host[:port]/bucket`.
    ///
    /// Env: DOCSWEEP__STORE__DSN
    ///
    /// Serialized with its password masked.
    #[serde(serialize_with = "serialize_redacted_dsn")]
    pub dsn: String,
    /// Path prefix under which collections live.
    #[serde(default)]
    pub prefix: String,
    /// Project identifier of the managed store, if it has one.
    ///
    /// Env: DOCSWEEP__STORE__PROJECT_ID
    #[serde(default)]
    pub project_id: Option<String>,
    /// Service credential (secret access key for `s3://` DSNs).
    ///
    /// Env: DOCSWEEP__STORE__CREDENTIAL
    #[serde(default, skip_serializing)]
    pub credential: Option<String>,
    /// Upper bound for every single store call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl StoreConfig {
    /// The DSN with any embedded password masked, safe to print.
    pub fn redacted_dsn(&self) -> String {
        redact_dsn(&self.dsn)
    }

    /// True when a credential is configured that the DSN gives no use for.
    ///
    /// Only `s3://key@host/bucket` (an access key without a password)
    /// takes its secret from the credential.
    pub fn has_unused_credential(&self) -> bool {
        if self.credential.is_none() {
            return false;
        }
        match Url::parse(&self.dsn) {
            Ok(url) => {
                url.scheme() != "s3" || url.username().is_empty() || url.password().is_some()
            }
            Err(_) => true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("memory://"),
            prefix: String::new(),
            project_id: None,
            credential: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Batch and retry behavior of a sweep run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Maximum operations per committed batch.
    ///
    /// Env: DOCSWEEP__SWEEPER__MAX_BATCH_OPS
    #[serde(default = "default_max_batch_ops")]
    pub max_batch_ops: usize,
    /// Retry attempts after the first failed attempt of a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every further attempt.
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    /// Ceiling for the backoff delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Re-resolve orphan parents right before committing their chunk.
    #[serde(default)]
    pub revalidate_before_delete: bool,
}

fn default_max_batch_ops() -> usize {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            max_batch_ops: default_max_batch_ops(),
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            revalidate_before_delete: false,
        }
    }
}

/// A child -> parent reference as written in the config file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub child_collection: String,
    pub foreign_key_field: String,
    pub parent_collection: String,
}

/// A deprecated field superseded by a replacement field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRuleConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub collection: String,
    pub deprecated_field: String,
    pub replacement_field: String,
}

/// Declarative sweep catalog. Relations are swept before field rules, each
/// list in the order written.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
    #[serde(default)]
    pub field_rules: Vec<FieldRuleConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Document store configuration
    pub store: StoreConfig,
    /// Batch executor configuration
    pub sweeper: SweeperConfig,
    /// Relations and field rules to sweep
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl Configuration {
    /// Load from `docsweep.toml` (if present) and `DOCSWEEP__*` env vars.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    /// Load from an explicit TOML file, then apply env overrides.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check numeric knobs and the store DSN.
    ///
    /// Catalog entries are validated separately when the catalog is built.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.dsn.trim().is_empty() {
            anyhow::bail!("store.dsn cannot be empty");
        }

        if self.store.timeout.is_zero() {
            anyhow::bail!("store.timeout must be positive");
        }

        if self.sweeper.max_batch_ops == 0 {
            anyhow::bail!(
                "sweeper.max_batch_ops must be positive, got {}",
                self.sweeper.max_batch_ops
            );
        }

        if self.sweeper.max_delay < self.sweeper.base_delay {
            anyhow::bail!(
                "sweeper.max_delay ({:?}) must not be smaller than sweeper.base_delay ({:?})",
                self.sweeper.max_delay,
                self.sweeper.base_delay
            );
        }

        Ok(())
    }
}
