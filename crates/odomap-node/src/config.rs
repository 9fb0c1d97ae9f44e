//! Node configuration – reads/writes `odomap.toml`.
//!
//! The file carries the node's own settings (frame names, publication
//! timing, queue bound) with the core's [`OdometryConfig`] flattened into
//! the same table, so one file configures the whole process:
//!
//! ```toml
//! odom_frame_id = "odom"
//! base_frame_id = "base_link"
//! map_publish_period = 2.0
//! beam_step = 2
//!
//! [matcher]
//! max_iterations = 30
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use odomap_core::OdometryConfig;
use odomap_types::OdomError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_odom_frame")]
    pub odom_frame_id: String,

    /// Laser origins are resolved into this frame.
    #[serde(default = "default_base_frame")]
    pub base_frame_id: String,

    /// Name the scan stream is known by; informational only.
    #[serde(default = "default_scan_topic")]
    pub scan_topic: String,

    /// Seconds the published odom→base transform is dated into the future.
    #[serde(default = "default_transform_tolerance")]
    pub transform_tolerance: f64,

    /// Seconds between map publications.
    #[serde(default = "default_map_publish_period")]
    pub map_publish_period: f64,

    /// Pending scans held for reordering before the oldest is dropped.
    #[serde(default = "default_scan_queue_capacity")]
    pub scan_queue_capacity: usize,

    #[serde(flatten)]
    pub odometry: OdometryConfig,
}

fn default_odom_frame() -> String {
    "odom".to_string()
}
fn default_base_frame() -> String {
    "base_link".to_string()
}
fn default_scan_topic() -> String {
    "/scan".to_string()
}
fn default_transform_tolerance() -> f64 {
    0.1
}
fn default_map_publish_period() -> f64 {
    5.0
}
fn default_scan_queue_capacity() -> usize {
    32
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            odom_frame_id: default_odom_frame(),
            base_frame_id: default_base_frame(),
            scan_topic: default_scan_topic(),
            transform_tolerance: default_transform_tolerance(),
            map_publish_period: default_map_publish_period(),
            scan_queue_capacity: default_scan_queue_capacity(),
            odometry: OdometryConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn map_publish_interval(&self) -> Duration {
        Duration::from_secs_f64(self.map_publish_period)
    }

    /// Check node settings, then the core's.
    pub fn validate(&self) -> Result<(), OdomError> {
        if self.odom_frame_id.is_empty() || self.base_frame_id.is_empty() {
            return Err(OdomError::Config("frame ids must not be empty".to_string()));
        }
        if self.odom_frame_id == self.base_frame_id {
            return Err(OdomError::Config(format!(
                "odom and base frame are both '{}'",
                self.odom_frame_id
            )));
        }
        if !(self.transform_tolerance.is_finite() && self.transform_tolerance >= 0.0) {
            return Err(OdomError::Config("transform_tolerance must be >= 0".to_string()));
        }
        if !(self.map_publish_period.is_finite() && self.map_publish_period > 0.0) {
            return Err(OdomError::Config("map_publish_period must be positive".to_string()));
        }
        if self.scan_queue_capacity == 0 {
            return Err(OdomError::Config("scan_queue_capacity must be at least 1".to_string()));
        }
        self.odometry.validate()
    }
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<NodeConfig>, OdomError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| OdomError::Io(format!("failed to read config at {}: {e}", path.display())))?;
    let mut cfg: NodeConfig =
        toml::from_str(&raw).map_err(|e| OdomError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ODOMAP_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ODOMAP_ODOM_FRAME` | `odom_frame_id` |
/// | `ODOMAP_BASE_FRAME` | `base_frame_id` |
/// | `ODOMAP_SCAN_TOPIC` | `scan_topic` |
/// | `ODOMAP_MAX_RANGE` | `max_range` |
/// | `ODOMAP_BEAM_STEP` | `beam_step` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut NodeConfig) {
    if let Ok(v) = std::env::var("ODOMAP_ODOM_FRAME") {
        cfg.odom_frame_id = v;
    }
    if let Ok(v) = std::env::var("ODOMAP_BASE_FRAME") {
        cfg.base_frame_id = v;
    }
    if let Ok(v) = std::env::var("ODOMAP_SCAN_TOPIC") {
        cfg.scan_topic = v;
    }
    if let Ok(v) = std::env::var("ODOMAP_MAX_RANGE")
        && let Ok(range) = v.parse::<f64>()
    {
        cfg.odometry.max_range = range;
    }
    if let Ok(v) = std::env::var("ODOMAP_BEAM_STEP")
        && let Ok(step) = v.parse::<usize>()
    {
        cfg.odometry.beam_step = step;
    }
}

/// Save the config to `path`, creating parent directories if necessary.
pub fn save_to(cfg: &NodeConfig, path: &Path) -> Result<(), OdomError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| OdomError::Io(format!("failed to create config directory: {e}")))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| OdomError::Serialization(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| OdomError::Io(format!("failed to write config at {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that read or write `ODOMAP_*` variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_valid() {
        let cfg = NodeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.odom_frame_id, "odom");
        assert_eq!(cfg.map_publish_interval(), Duration::from_secs(5));
    }

    #[test]
    fn roundtrip_default_config() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("nested").join("odomap.toml");

        let cfg = NodeConfig::default();
        save_to(&cfg, &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.base_frame_id, cfg.base_frame_id);
        assert_eq!(loaded.odometry, cfg.odometry);
        assert_eq!(loaded.scan_queue_capacity, 32);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&dir.path().join("odomap.toml")).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("odomap.toml");
        fs::write(
            &path,
            r#"
            map_publish_period = 2.0
            resolution = 0.1

            [log_odds]
            l_hit = 1.2
            "#,
        )
        .expect("write");

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.map_publish_period, 2.0);
        assert_eq!(cfg.odometry.resolution, 0.1);
        assert_eq!(cfg.odometry.log_odds.l_hit, 1.2);
        assert_eq!(cfg.odometry.log_odds.l_miss, -0.4);
        assert_eq!(cfg.transform_tolerance, 0.1);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("odomap.toml");
        fs::write(&path, "beam_step = \"many\"").expect("write");
        assert!(matches!(load_from(&path), Err(OdomError::Config(_))));
    }

    #[test]
    fn identical_frames_are_rejected() {
        let cfg = NodeConfig {
            base_frame_id: "odom".to_string(),
            ..NodeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn apply_env_overrides_changes_frames_and_beam_step() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: these variables are only touched by this test.
        unsafe {
            std::env::set_var("ODOMAP_BASE_FRAME", "chassis");
            std::env::set_var("ODOMAP_BEAM_STEP", "3");
        }
        let mut cfg = NodeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.base_frame_id, "chassis");
        assert_eq!(cfg.odometry.beam_step, 3);
        unsafe {
            std::env::remove_var("ODOMAP_BASE_FRAME");
            std::env::remove_var("ODOMAP_BEAM_STEP");
        }
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_range() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: this variable is only touched by this test.
        unsafe { std::env::set_var("ODOMAP_MAX_RANGE", "far") };
        let mut cfg = NodeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.odometry.max_range, 30.0);
        unsafe { std::env::remove_var("ODOMAP_MAX_RANGE") };
    }
}
