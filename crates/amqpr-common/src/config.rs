//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration, error, and identifier primitives."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Environment variable that overrides the default config file search path.
pub const ENV_CONFIG_PATH: &str = "AMQPR_CONFIG";

/// Default candidate paths checked, in order, when no explicit path or
/// environment override is given.
const DEFAULT_CANDIDATE_PATHS: &[&str] = &["amqpr.toml", "config/amqpr.toml"];

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_prefetch_count() -> u32 {
    200
}

fn default_fast_first() -> bool {
    false
}

/// Connection scheme for an [`EndpointConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain AMQP over TCP.
    Amqp,
    /// AMQP over TLS.
    Amqps,
}

/// A single broker endpoint in the rotation.
///
/// Immutable after construction; equality is structural, matching every
/// field including credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Connection scheme.
    pub scheme: Scheme,
    /// Broker hostname or IP address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Username presented during SASL negotiation.
    pub user: String,
    /// Password presented during SASL negotiation.
    pub password: String,
    /// Optional AMQP container id advertised on `open`.
    #[serde(default)]
    pub container_id: Option<String>,
}

impl EndpointConfig {
    /// Construct a new endpoint.
    pub fn new(
        scheme: Scheme, host: impl Into<String>, port: u16, user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            container_id: None,
        }
    }

    /// Attach an explicit container id.
    pub fn with_container_id(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }
}

/// Routing-type capability advertised by a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingType {
    /// Anycast delivery to a single consumer on a queue.
    Queue,
    /// Multicast delivery to every subscribed consumer on a topic.
    Topic,
}

impl RoutingType {
    /// The AMQP capability symbol Artemis expects on the link's source/target.
    pub const fn capability(self) -> &'static str {
        match self {
            RoutingType::Queue => "queue",
            RoutingType::Topic => "topic",
        }
    }
}

/// Whether a producer parks sends while not attached, or fails fast.
///
/// Controls whether an unattached producer parks or fails fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    /// Park the send until the producer re-attaches.
    AwaitCredit,
    /// Fail fast with a retryable error while not attached.
    FireAndForgetWithFlowControl,
}

/// How a consumer's credit window refills after settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditRefillMode {
    /// Add one credit back after every settled message.
    PerMessage,
    /// Accumulate settlements and replenish once `batch_size` have settled.
    Batched {
        /// Number of settlements to accumulate before replenishing.
        batch_size: u32,
    },
}

impl Default for CreditRefillMode {
    fn default() -> Self {
        CreditRefillMode::PerMessage
    }
}

/// Per-producer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Target address.
    pub address: String,
    /// Routing-type capability to advertise.
    pub routing_type: RoutingType,
    /// Optional fixed message priority.
    #[serde(default)]
    pub message_priority: Option<u8>,
    /// Optional time-to-live applied to every send.
    #[serde(default, with = "duration_ms_opt")]
    pub time_to_live: Option<Duration>,
    /// Parked-vs-fail-fast behavior while not attached.
    #[serde(default = "default_send_mode")]
    pub send_mode: SendMode,
}

fn default_send_mode() -> SendMode {
    SendMode::AwaitCredit
}

/// Per-consumer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Source address.
    pub address: String,
    /// Optional queue name; combined with `address` as a FQQN (`address::queue`).
    #[serde(default)]
    pub queue: Option<String>,
    /// Routing-type capability to advertise.
    pub routing_type: RoutingType,
    /// Broker-granted credit window size.
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u32,
    /// Credit replenishment policy.
    #[serde(default)]
    pub credit_refill_mode: CreditRefillMode,
}

impl ConsumerConfig {
    /// The fully-qualified link address: `address::queue` when a queue is set,
    /// otherwise just `address`.
    pub fn link_address(&self) -> String {
        match &self.queue {
            Some(queue) => format!("{}::{}", self.address, queue),
            None => self.address.clone(),
        }
    }
}

/// Description of one of the four recovery-policy variants.
///
/// Pure data; [`amqpr_policy`](../amqpr_policy/index.html) turns this into a
/// validated, executable [`RecoveryPolicy`](../amqpr_policy/trait.RecoveryPolicy.html).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoveryPolicyConfig {
    /// Fixed delay between every attempt.
    Constant {
        /// Delay applied to every attempt, in milliseconds.
        delay_ms: u64,
        /// Bound on the number of attempts; `None` means unbounded.
        #[serde(default)]
        retry_count: Option<u64>,
        /// Whether the first attempt fires immediately.
        #[serde(default = "default_fast_first")]
        fast_first: bool,
    },
    /// Delay grows linearly with the attempt index.
    Linear {
        /// Delay applied to the first real attempt, in milliseconds.
        initial_delay_ms: u64,
        /// Optional ceiling on the delay, in milliseconds.
        #[serde(default)]
        max_delay_ms: Option<u64>,
        /// Bound on the number of attempts; `None` means unbounded.
        #[serde(default)]
        retry_count: Option<u64>,
        /// Growth factor applied per attempt.
        factor: f64,
        /// Whether the first attempt fires immediately.
        #[serde(default = "default_fast_first")]
        fast_first: bool,
    },
    /// Delay grows geometrically with the attempt index.
    Exponential {
        /// Delay applied to the first real attempt, in milliseconds.
        initial_delay_ms: u64,
        /// Optional ceiling on the delay, in milliseconds.
        #[serde(default)]
        max_delay_ms: Option<u64>,
        /// Bound on the number of attempts; `None` means unbounded.
        #[serde(default)]
        retry_count: Option<u64>,
        /// Growth factor applied per attempt; must be `>= 1`.
        factor: f64,
        /// Whether the first attempt fires immediately.
        #[serde(default = "default_fast_first")]
        fast_first: bool,
    },
    /// Delay is drawn uniformly from a window that widens with each attempt.
    DecorrelatedJitter {
        /// Delay applied to the first real attempt, in milliseconds.
        initial_delay_ms: u64,
        /// Ceiling on the sampling window, in milliseconds.
        max_delay_ms: u64,
        /// Bound on the number of attempts; `None` means unbounded.
        #[serde(default)]
        retry_count: Option<u64>,
        /// Whether the first attempt fires immediately.
        #[serde(default = "default_fast_first")]
        fast_first: bool,
        /// Optional deterministic seed, used by tests.
        #[serde(default)]
        seed: Option<u64>,
    },
}

/// Available log formats for the ambient logging configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// Newline-delimited JSON, suitable for log aggregation.
    #[default]
    StructuredJson,
    /// Human-readable formatting for local development.
    Pretty,
}

/// Logging configuration shared by every binary embedding this workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Directory for the rolling daily log file.
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    /// Optional filename prefix; defaults to the embedding service name.
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            directory: default_logging_directory(),
            file_prefix: None,
        }
    }
}

/// Top-level client configuration aggregating endpoints, recovery policy,
/// and per-producer/per-consumer defaults, plus the ambient logging
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Ordered, non-empty endpoint rotation.
    pub endpoints: Vec<EndpointConfig>,
    /// Recovery policy governing reconnect cadence.
    pub recovery_policy: RecoveryPolicyConfig,
    /// Ambient logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Validate the parts of the configuration that are cheap to check
    /// without constructing a runtime policy object: the endpoint list must
    /// be non-empty and every endpoint's host must be non-empty. Policy
    /// parameter validation happens in `amqpr_policy` when the concrete
    /// policy is built, so the detailed error variants live alongside the
    /// code that needs them.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.endpoints.is_empty() {
            return Err(ConfigurationError::EmptyEndpointList);
        }
        for endpoint in &self.endpoints {
            if endpoint.host.trim().is_empty() {
                return Err(ConfigurationError::InvalidEndpoint {
                    message: "host must not be empty".into(),
                });
            }
        }
        Ok(())
    }

    /// Load configuration from `path`, parsing it as TOML and validating the
    /// result.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source: source.into(),
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            message: source.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration the way every binary embedding this workspace
    /// does: from the path named by [`ENV_CONFIG_PATH`] if set, otherwise
    /// from the first of [`DEFAULT_CANDIDATE_PATHS`] that exists.
    pub fn load() -> Result<Self, ConfigurationError> {
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Self::from_path(path);
        }
        for candidate in DEFAULT_CANDIDATE_PATHS {
            if Path::new(candidate).is_file() {
                return Self::from_path(candidate);
            }
        }
        Err(ConfigurationError::NoConfigFileFound)
    }
}

mod duration_ms_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_endpoint_list() {
        let config = ClientConfig {
            endpoints: Vec::new(),
            recovery_policy: RecoveryPolicyConfig::Constant {
                delay_ms: 100,
                retry_count: None,
                fast_first: false,
            },
            logging: LoggingConfig::default(),
        };
        assert_eq!(config.validate(), Err(ConfigurationError::EmptyEndpointList));
    }

    #[test]
    fn consumer_config_builds_fqqn_when_queue_present() {
        let consumer = ConsumerConfig {
            address: "orders".into(),
            queue: Some("orders.q1".into()),
            routing_type: RoutingType::Queue,
            prefetch_count: 50,
            credit_refill_mode: CreditRefillMode::PerMessage,
        };
        assert_eq!(consumer.link_address(), "orders::orders.q1");
    }

    #[test]
    fn consumer_config_uses_bare_address_without_queue() {
        let consumer = ConsumerConfig {
            address: "orders".into(),
            queue: None,
            routing_type: RoutingType::Topic,
            prefetch_count: 50,
            credit_refill_mode: CreditRefillMode::PerMessage,
        };
        assert_eq!(consumer.link_address(), "orders");
    }

    #[test]
    fn validate_rejects_blank_endpoint_host() {
        let config = ClientConfig {
            endpoints: vec![EndpointConfig::new(Scheme::Amqp, "  ", 5672, "admin", "admin")],
            recovery_policy: RecoveryPolicyConfig::Constant {
                delay_ms: 100,
                retry_count: None,
                fast_first: false,
            },
            logging: LoggingConfig::default(),
        };
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::InvalidEndpoint {
                message: "host must not be empty".into(),
            })
        );
    }

    #[test]
    fn from_path_loads_and_validates_a_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("amqpr.toml");
        std::fs::write(
            &path,
            r#"
            recovery_policy = { kind = "constant", delay_ms = 100 }

            [[endpoints]]
            scheme = "amqp"
            host = "broker.local"
            port = 5672
            user = "admin"
            password = "admin"
            "#,
        )
        .expect("write temp config");

        let config = ClientConfig::from_path(&path).expect("load config");
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.endpoints[0].host, "broker.local");
    }

    #[test]
    fn from_path_rejects_a_config_with_an_empty_endpoint_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("amqpr.toml");
        std::fs::write(
            &path,
            r#"
            endpoints = []
            recovery_policy = { kind = "constant", delay_ms = 100 }
            "#,
        )
        .expect("write temp config");

        assert_eq!(
            ClientConfig::from_path(&path).unwrap_err(),
            ConfigurationError::EmptyEndpointList
        );
    }

    #[test]
    fn from_path_reports_a_missing_file_as_an_io_error() {
        let missing = PathBuf::from("/nonexistent/amqpr.toml");
        match ClientConfig::from_path(&missing) {
            Err(ConfigurationError::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn load_uses_env_config_path_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
            recovery_policy = { kind = "constant", delay_ms = 50 }

            [[endpoints]]
            scheme = "amqps"
            host = "broker.example"
            port = 5671
            user = "admin"
            password = "admin"
            "#,
        )
        .expect("write temp config");

        std::env::set_var(ENV_CONFIG_PATH, &path);
        let result = ClientConfig::load();
        std::env::remove_var(ENV_CONFIG_PATH);

        let config = result.expect("load via env override");
        assert_eq!(config.endpoints[0].host, "broker.example");
    }

    #[test]
    fn recovery_policy_config_round_trips_through_json() {
        let policy = RecoveryPolicyConfig::Exponential {
            initial_delay_ms: 10,
            max_delay_ms: Some(250),
            retry_count: None,
            factor: 3.0,
            fast_first: false,
        };
        let json = serde_json::to_string(&policy).expect("serialize");
        let round_tripped: RecoveryPolicyConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(policy, round_tripped);
    }
}
