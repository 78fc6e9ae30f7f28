use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DanceflowConfig {
    pub posture: PostureConfig,
    pub expression: ExpressionConfig,
    pub store: StoreConfig,
    pub verification: VerificationConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PostureConfig {
    /// Nose-to-hip horizontal offset (in torso heights) that scores 0
    #[serde(default = "default_spine_max_deviation")]
    pub spine_max_deviation: f64,

    /// Shoulder height difference (in shoulder widths) that scores 0
    #[serde(default = "default_shoulder_max_tilt")]
    pub shoulder_max_tilt: f64,

    /// Elbow spread (in shoulder widths) that scores 100
    #[serde(default = "default_arm_target_spread")]
    pub arm_target_spread: f64,

    /// Distance from the target spread at which the arm score reaches 0
    #[serde(default = "default_arm_spread_tolerance")]
    pub arm_spread_tolerance: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExpressionConfig {
    /// Mouth opening ratio above which the face reads as Surprise
    #[serde(default = "default_mouth_open_threshold")]
    pub mouth_open_threshold: f64,

    /// Smile width ratio above which the face reads as Joy
    #[serde(default = "default_smile_width_threshold")]
    pub smile_width_threshold: f64,

    /// Inner brow distance ratio below which the face reads as Anger
    #[serde(default = "default_brow_distance_threshold")]
    pub brow_distance_threshold: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    File,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoreConfig {
    /// Storage backend for session summaries
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// Directory holding one JSON collection per dance
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Upper bound on the total serialized size of all collections
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct VerificationConfig {
    /// Run the verification worker after each persisted session
    #[serde(default = "default_verification_enabled")]
    pub enabled: bool,

    /// Simulated round-trip of the mock verification authority
    #[serde(default = "default_verification_delay_ms")]
    pub delay_ms: u64,

    /// Verdict returned by the mock verification authority
    #[serde(default = "default_mock_outcome")]
    pub mock_outcome: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Log every published event at debug level
    #[serde(default = "default_debug_events")]
    pub debug_events: bool,
}

impl DanceflowConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("danceflow.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("posture.spine_max_deviation", default_spine_max_deviation())?
            .set_default("posture.shoulder_max_tilt", default_shoulder_max_tilt())?
            .set_default("posture.arm_target_spread", default_arm_target_spread())?
            .set_default("posture.arm_spread_tolerance", default_arm_spread_tolerance())?
            .set_default(
                "expression.mouth_open_threshold",
                default_mouth_open_threshold(),
            )?
            .set_default(
                "expression.smile_width_threshold",
                default_smile_width_threshold(),
            )?
            .set_default(
                "expression.brow_distance_threshold",
                default_brow_distance_threshold(),
            )?
            .set_default("store.backend", "file")?
            .set_default("store.path", default_store_path())?
            .set_default("store.quota_bytes", default_quota_bytes())?
            .set_default("verification.enabled", default_verification_enabled())?
            .set_default("verification.delay_ms", default_verification_delay_ms())?
            .set_default("verification.mock_outcome", default_mock_outcome())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("system.debug_events", default_debug_events())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // DANCEFLOW__STORE__PATH style overrides; keys contain underscores
            .add_source(Environment::with_prefix("DANCEFLOW").separator("__"))
            .build()?;

        let config: DanceflowConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("posture.spine_max_deviation", self.posture.spine_max_deviation),
            ("posture.shoulder_max_tilt", self.posture.shoulder_max_tilt),
            ("posture.arm_target_spread", self.posture.arm_target_spread),
            ("posture.arm_spread_tolerance", self.posture.arm_spread_tolerance),
            (
                "expression.mouth_open_threshold",
                self.expression.mouth_open_threshold,
            ),
            (
                "expression.smile_width_threshold",
                self.expression.smile_width_threshold,
            ),
            (
                "expression.brow_distance_threshold",
                self.expression.brow_distance_threshold,
            ),
        ];

        for (key, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Message(format!(
                    "{} must be a finite value greater than 0",
                    key
                )));
            }
        }

        if self.store.quota_bytes == 0 {
            return Err(ConfigError::Message(
                "Store quota_bytes must be greater than 0".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::File && self.store.path.trim().is_empty() {
            return Err(ConfigError::Message(
                "Store path must be set for the file backend".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for DanceflowConfig {
    fn default() -> Self {
        Self {
            posture: PostureConfig::default(),
            expression: ExpressionConfig::default(),
            store: StoreConfig {
                backend: default_store_backend(),
                path: default_store_path(),
                quota_bytes: default_quota_bytes(),
            },
            verification: VerificationConfig {
                enabled: default_verification_enabled(),
                delay_ms: default_verification_delay_ms(),
                mock_outcome: default_mock_outcome(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                debug_events: default_debug_events(),
            },
        }
    }
}

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            spine_max_deviation: default_spine_max_deviation(),
            shoulder_max_tilt: default_shoulder_max_tilt(),
            arm_target_spread: default_arm_target_spread(),
            arm_spread_tolerance: default_arm_spread_tolerance(),
        }
    }
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            mouth_open_threshold: default_mouth_open_threshold(),
            smile_width_threshold: default_smile_width_threshold(),
            brow_distance_threshold: default_brow_distance_threshold(),
        }
    }
}

// Default value functions
fn default_spine_max_deviation() -> f64 {
    0.5
}
fn default_shoulder_max_tilt() -> f64 {
    0.25
}
fn default_arm_target_spread() -> f64 {
    1.6
}
fn default_arm_spread_tolerance() -> f64 {
    0.8
}

fn default_mouth_open_threshold() -> f64 {
    0.08
}
fn default_smile_width_threshold() -> f64 {
    0.5
}
fn default_brow_distance_threshold() -> f64 {
    0.12
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::File
}
fn default_store_path() -> String {
    "./sessions".to_string()
}
fn default_quota_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_verification_enabled() -> bool {
    true
}
fn default_verification_delay_ms() -> u64 {
    1500
}
fn default_mock_outcome() -> bool {
    true
}

fn default_event_bus_capacity() -> usize {
    256
}
fn default_debug_events() -> bool {
    false
}
