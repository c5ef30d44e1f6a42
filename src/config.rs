// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::path::Path;
use std::time::Duration;

use ::config::{Config, File, FileFormat};
use duration_string::DurationString;
use serde::Deserialize;

mod audio;
mod engine;
mod error;
mod resources;

pub use self::audio::Audio;
pub use self::engine::{Engine, Preview, Recorder};
pub use self::error::ConfigError;
pub use self::resources::Resources;

/// The sampler configuration. Every section is optional and every field has a default, so an
/// empty file is a valid configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct SamplerConfig {
    #[serde(default)]
    audio: Audio,

    #[serde(default)]
    resources: Resources,

    #[serde(default)]
    engine: Engine,

    #[serde(default)]
    preview: Preview,

    #[serde(default)]
    recorder: Recorder,
}

impl SamplerConfig {
    /// Loads the configuration from a YAML file.
    pub fn load(path: &Path) -> Result<SamplerConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .build()?
            .try_deserialize::<SamplerConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses the configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<SamplerConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<SamplerConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces the audio section.
    pub fn with_audio(mut self, audio: Audio) -> SamplerConfig {
        self.audio = audio;
        self
    }

    /// Replaces the resources section.
    pub fn with_resources(mut self, resources: Resources) -> SamplerConfig {
        self.resources = resources;
        self
    }

    /// Checks every duration parses and the bus format is usable.
    fn validate(&self) -> Result<(), ConfigError> {
        self.engine.max_loop_gap()?;
        self.engine.load_timeout()?;
        self.preview.gap()?;
        self.recorder.meter_interval()?;
        if self.audio.sample_rate() == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.sample_rate",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.audio.channels() == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.channels",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn preview(&self) -> &Preview {
        &self.preview
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }
}

/// Parses an optional duration string ("2s", "500ms"), falling back to the default.
pub(crate) fn parse_duration(
    field: &'static str,
    value: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => DurationString::from_string(value.to_string())
            .map(Duration::from)
            .map_err(|_| ConfigError::InvalidDuration {
                field,
                value: value.to_string(),
            }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = SamplerConfig::default();
        assert_eq!(config.audio().output_device(), "default");
        assert_eq!(config.audio().sample_rate(), 44100);
        assert_eq!(config.audio().channels(), 2);
        assert_eq!(config.engine().max_loop_gap().unwrap(), Duration::from_secs(2));
        assert_eq!(config.engine().playback_tap_frames(), 4096);
        assert_eq!(config.engine().recording_tap_frames(), 1024);
        assert_eq!(config.engine().load_timeout().unwrap(), Duration::from_secs(10));
        assert_eq!(config.preview().gap().unwrap(), Duration::from_millis(500));
        assert_eq!(
            config.recorder().meter_interval().unwrap(),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
audio:
  output_device: mock-output
  input_device: mock-input
  sample_rate: 48000
  channels: 1
  block_frames: 256
resources:
  resource_dir: /opt/samples
  documents_dir: /tmp/docs
engine:
  max_loop_gap: 3s
  playback_tap_frames: 2048
  load_timeout: 500ms
preview:
  gap: 250ms
"#;
        let config = SamplerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.audio().output_device(), "mock-output");
        assert_eq!(config.audio().input_device(), "mock-input");
        assert_eq!(config.audio().sample_rate(), 48000);
        assert_eq!(config.audio().channels(), 1);
        assert_eq!(config.audio().block_frames(), 256);
        assert_eq!(config.resources().resource_dir(), PathBuf::from("/opt/samples"));
        assert_eq!(config.resources().documents_dir(), PathBuf::from("/tmp/docs"));
        assert_eq!(config.resources().temp_dir(), std::env::temp_dir());
        assert_eq!(config.engine().max_loop_gap().unwrap(), Duration::from_secs(3));
        assert_eq!(config.engine().playback_tap_frames(), 2048);
        assert_eq!(config.engine().recording_tap_frames(), 1024);
        assert_eq!(
            config.engine().load_timeout().unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(config.preview().gap().unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_duration() {
        let yaml = r#"
engine:
  max_loop_gap: forever
"#;
        assert!(matches!(
            SamplerConfig::from_yaml(yaml),
            Err(ConfigError::InvalidDuration {
                field: "engine.max_loop_gap",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_channels() {
        let yaml = r#"
audio:
  channels: 0
"#;
        assert!(matches!(
            SamplerConfig::from_yaml(yaml),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sampler.yaml");
        std::fs::write(&path, "audio:\n  output_device: mock\n").unwrap();

        let config = SamplerConfig::load(&path).unwrap();
        assert_eq!(config.audio().output_device(), "mock");

        assert!(matches!(
            SamplerConfig::load(&dir.path().join("missing.yaml")),
            Err(ConfigError::Load(_))
        ));
    }
}
