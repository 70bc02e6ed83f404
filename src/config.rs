use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::audio::diag_ring::RingRetention;
use crate::defaults;
use crate::error::{KwsError, Result};
use crate::pipeline::orchestrator::{PipelineConfig, RefreshPolicy, StreamOptions};
use crate::stream::protocol::{TagSet, WireFormat};

/// Where a run's audio comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioInput {
    Microphone,
    Wav,
    Host,
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineSettings,
    pub stream: StreamSettings,
    pub audio: AudioSettings,
}

/// Window refresh, decision and run-length settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub frame_samples: usize,
    pub threshold: f32,
    pub refresh: RefreshPolicy,
    pub max_inferences: Option<u64>,
    pub abort_on_host_activity: bool,
    /// Path to the JSON weights of the reference linear model
    pub model: Option<PathBuf>,
}

/// Host link payload selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamSettings {
    pub raw_audio: bool,
    pub features: bool,
    pub output: bool,
    pub ready_signals: bool,
    pub tags: TagSet,
    pub checksum: bool,
    pub diagnostic_frames: usize,
    pub ring_retention: RingRetention,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AudioSettings {
    pub device: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frame_samples: defaults::FRAME_SAMPLES,
            threshold: defaults::THRESHOLD,
            refresh: RefreshPolicy::Shift,
            max_inferences: None,
            abort_on_host_activity: false,
            model: None,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        let options = StreamOptions::default();
        Self {
            raw_audio: options.raw_audio,
            features: options.features,
            output: options.output,
            ready_signals: options.ready_signals,
            tags: options.tags,
            checksum: false,
            diagnostic_frames: defaults::DIAGNOSTIC_FRAMES,
            ring_retention: RingRetention::MostRecent,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - KWSPOT_THRESHOLD → pipeline.threshold
    /// - KWSPOT_REFRESH → pipeline.refresh (shift | block)
    /// - KWSPOT_AUDIO_DEVICE → audio.device
    ///
    /// Unparseable values are logged and ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(threshold) = std::env::var("KWSPOT_THRESHOLD")
            && !threshold.is_empty()
        {
            match threshold.parse::<f32>() {
                Ok(value) => self.pipeline.threshold = value,
                Err(e) => warn!(value = %threshold, error = %e, "ignoring KWSPOT_THRESHOLD"),
            }
        }

        if let Ok(refresh) = std::env::var("KWSPOT_REFRESH")
            && !refresh.is_empty()
        {
            match refresh.parse::<RefreshPolicy>() {
                Ok(policy) => self.pipeline.refresh = policy,
                Err(e) => warn!(error = %e, "ignoring KWSPOT_REFRESH"),
            }
        }

        if let Ok(device) = std::env::var("KWSPOT_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/kwspot/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("kwspot")
            .join("config.toml")
    }

    /// Reject values no pipeline run can work with.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.pipeline.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(
                "pipeline.threshold",
                format!("{threshold} is outside [0, 1]"),
            ));
        }
        if self.pipeline.frame_samples == 0 {
            return Err(invalid("pipeline.frame_samples", "must be greater than zero"));
        }
        if self.pipeline.max_inferences == Some(0) {
            return Err(invalid("pipeline.max_inferences", "must be at least 1"));
        }
        if self.stream.raw_audio && self.stream.diagnostic_frames == 0 {
            return Err(invalid(
                "stream.diagnostic_frames",
                "must be greater than zero when streaming raw audio",
            ));
        }
        if self.pipeline.abort_on_host_activity && self.stream.tags == TagSet::HostFed {
            return Err(invalid(
                "pipeline.abort_on_host_activity",
                "host-fed runs receive audio over the link and cannot abort on host traffic",
            ));
        }
        Ok(())
    }

    /// Validate for a run fed by `input`.
    ///
    /// Only host-fed runs have an inbound link: they must use the host tag
    /// set, and nothing else may stream under it or watch for host traffic.
    pub fn validate_for(&self, input: AudioInput) -> Result<()> {
        self.validate()?;
        match input {
            AudioInput::Host => {
                if self.stream.tags != TagSet::HostFed {
                    return Err(invalid("stream.tags", "host-fed runs stream with host_fed tags"));
                }
            }
            AudioInput::Microphone | AudioInput::Wav => {
                if self.stream.tags == TagSet::HostFed {
                    return Err(invalid(
                        "stream.tags",
                        "host_fed tags are reserved for audio received over the host link",
                    ));
                }
                if self.pipeline.abort_on_host_activity {
                    return Err(invalid(
                        "pipeline.abort_on_host_activity",
                        "this run has no inbound host link to watch",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Pipeline settings for one run.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            frame_samples: self.pipeline.frame_samples,
            threshold: self.pipeline.threshold,
            refresh: self.pipeline.refresh,
            diagnostic_frames: self.stream.diagnostic_frames,
            ring_retention: self.stream.ring_retention,
            max_inferences: self.pipeline.max_inferences,
            abort_on_host_activity: self.pipeline.abort_on_host_activity,
            stream: StreamOptions {
                raw_audio: self.stream.raw_audio,
                features: self.stream.features,
                output: self.stream.output,
                ready_signals: self.stream.ready_signals,
                tags: self.stream.tags,
            },
        }
    }

    /// Wire format for the host link. Byte order is always the pinned one.
    pub fn wire_format(&self) -> WireFormat {
        WireFormat {
            byte_order: defaults::WIRE_BYTE_ORDER,
            checksum: self.stream.checksum,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> KwsError {
    KwsError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::protocol::ByteOrder;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_kwspot_env() {
        remove_env("KWSPOT_THRESHOLD");
        remove_env("KWSPOT_REFRESH");
        remove_env("KWSPOT_AUDIO_DEVICE");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.pipeline.frame_samples, 1024);
        assert_eq!(config.pipeline.threshold, 0.5);
        assert_eq!(config.pipeline.refresh, RefreshPolicy::Shift);
        assert_eq!(config.pipeline.max_inferences, None);
        assert!(!config.pipeline.abort_on_host_activity);

        assert!(!config.stream.raw_audio);
        assert!(config.stream.output);
        assert!(config.stream.ready_signals);
        assert_eq!(config.stream.tags, TagSet::Microphone);
        assert_eq!(config.stream.diagnostic_frames, 16);
        assert_eq!(config.stream.ring_retention, RingRetention::MostRecent);

        assert_eq!(config.audio.device, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_for_host_requires_host_tags() {
        let mut config = Config::default();
        assert!(config.validate_for(AudioInput::Host).is_err());

        config.stream.tags = TagSet::HostFed;
        assert!(config.validate_for(AudioInput::Host).is_ok());

        config.pipeline.abort_on_host_activity = true;
        assert!(config.validate_for(AudioInput::Host).is_err());
    }

    #[test]
    fn test_validate_for_local_input_rejects_host_link_settings() {
        for input in [AudioInput::Microphone, AudioInput::Wav] {
            let mut config = Config::default();
            assert!(config.validate_for(input).is_ok());

            config.stream.tags = TagSet::HostFed;
            assert!(config.validate_for(input).is_err(), "{input:?}");

            config.stream.tags = TagSet::Microphone;
            config.pipeline.abort_on_host_activity = true;
            match config.validate_for(input) {
                Err(KwsError::ConfigInvalidValue { key, .. }) => {
                    assert_eq!(key, "pipeline.abort_on_host_activity")
                }
                other => panic!("Expected ConfigInvalidValue for {input:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [pipeline]
            frame_samples = 512
            threshold = 0.8
            refresh = "block"
            max_inferences = 10
            model = "/opt/kws/model.json"

            [stream]
            raw_audio = true
            features = true
            tags = "host_fed"
            checksum = true
            diagnostic_frames = 8
            ring_retention = "first"

            [audio]
            device = "hw:0,0"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.pipeline.frame_samples, 512);
        assert_eq!(config.pipeline.threshold, 0.8);
        assert_eq!(config.pipeline.refresh, RefreshPolicy::Block);
        assert_eq!(config.pipeline.max_inferences, Some(10));
        assert_eq!(
            config.pipeline.model,
            Some(PathBuf::from("/opt/kws/model.json"))
        );

        assert!(config.stream.raw_audio);
        assert!(config.stream.features);
        assert_eq!(config.stream.tags, TagSet::HostFed);
        assert!(config.stream.checksum);
        assert_eq!(config.stream.diagnostic_frames, 8);
        assert_eq!(config.stream.ring_retention, RingRetention::First);

        assert_eq!(config.audio.device, Some("hw:0,0".to_string()));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [pipeline]
            threshold = 0.7
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.pipeline.threshold, 0.7);
        assert_eq!(config.pipeline.frame_samples, 1024);
        assert_eq!(config.stream, StreamSettings::default());
        assert_eq!(config.audio, AudioSettings::default());
    }

    #[test]
    fn test_env_override_threshold_and_refresh() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_kwspot_env();

        set_env("KWSPOT_THRESHOLD", "0.9");
        set_env("KWSPOT_REFRESH", "block");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.pipeline.threshold, 0.9);
        assert_eq!(config.pipeline.refresh, RefreshPolicy::Block);
        assert_eq!(config.audio.device, None); // Not overridden

        clear_kwspot_env();
    }

    #[test]
    fn test_env_override_device() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_kwspot_env();

        set_env("KWSPOT_AUDIO_DEVICE", "hw:1,0");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.device, Some("hw:1,0".to_string()));

        clear_kwspot_env();
    }

    #[test]
    fn test_env_override_invalid_values_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_kwspot_env();

        set_env("KWSPOT_THRESHOLD", "loud");
        set_env("KWSPOT_REFRESH", "sideways");
        set_env("KWSPOT_AUDIO_DEVICE", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config, Config::default());

        clear_kwspot_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [pipeline
            threshold = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        assert!(Config::load(temp_file.path()).is_err());
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_default_path_ends_with_kwspot_config() {
        let path = Config::default_path();
        assert!(path.ends_with("kwspot/config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let mut config = Config::default();
        config.pipeline.threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(KwsError::ConfigInvalidValue { key, .. }) if key == "pipeline.threshold"
        ));
    }

    #[test]
    fn test_validate_rejects_raw_audio_without_ring() {
        let mut config = Config::default();
        config.stream.raw_audio = true;
        config.stream.diagnostic_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_host_abort_in_host_fed_mode() {
        let mut config = Config::default();
        config.stream.tags = TagSet::HostFed;
        config.pipeline.abort_on_host_activity = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_config_and_wire_format() {
        let mut config = Config::default();
        config.pipeline.refresh = RefreshPolicy::Block;
        config.stream.features = true;
        config.stream.checksum = true;

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.refresh, RefreshPolicy::Block);
        assert!(pipeline.stream.features);
        assert_eq!(pipeline.diagnostic_frames, 16);

        let format = config.wire_format();
        assert!(format.checksum);
        assert_eq!(format.byte_order, ByteOrder::Little);
    }
}
