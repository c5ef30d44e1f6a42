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
use std::time::Duration;

use serde::Deserialize;

use super::{parse_duration, ConfigError};

const DEFAULT_MAX_LOOP_GAP: Duration = Duration::from_secs(2);
const DEFAULT_PLAYBACK_TAP_FRAMES: usize = 4096;
const DEFAULT_RECORDING_TAP_FRAMES: usize = 1024;
const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PREVIEW_GAP: Duration = Duration::from_millis(500);
const DEFAULT_METER_INTERVAL: Duration = Duration::from_millis(50);

/// A YAML representation of the layer engine configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Engine {
    /// The gap between loops when a layer's delay factor is 0.
    max_loop_gap: Option<String>,

    /// Frames per visualization chunk while playing.
    playback_tap_frames: Option<usize>,

    /// Frames per chunk while recording the mixdown.
    recording_tap_frames: Option<usize>,

    /// How long a decode may take before the load is abandoned.
    load_timeout: Option<String>,
}

impl Engine {
    /// Returns the maximum loop gap (default: 2s).
    pub fn max_loop_gap(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            "engine.max_loop_gap",
            self.max_loop_gap.as_deref(),
            DEFAULT_MAX_LOOP_GAP,
        )
    }

    /// Returns the visualization chunk size (default: 4096).
    pub fn playback_tap_frames(&self) -> usize {
        self.playback_tap_frames
            .unwrap_or(DEFAULT_PLAYBACK_TAP_FRAMES)
            .max(1)
    }

    /// Returns the mixdown chunk size (default: 1024).
    pub fn recording_tap_frames(&self) -> usize {
        self.recording_tap_frames
            .unwrap_or(DEFAULT_RECORDING_TAP_FRAMES)
            .max(1)
    }

    /// Returns the decode timeout (default: 10s).
    pub fn load_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            "engine.load_timeout",
            self.load_timeout.as_deref(),
            DEFAULT_LOAD_TIMEOUT,
        )
    }
}

/// A YAML representation of the preview player configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Preview {
    /// The gap between repeats of an auditioned sample.
    gap: Option<String>,
}

impl Preview {
    /// Returns the preview gap (default: 500ms).
    pub fn gap(&self) -> Result<Duration, ConfigError> {
        parse_duration("preview.gap", self.gap.as_deref(), DEFAULT_PREVIEW_GAP)
    }
}

/// A YAML representation of the recorder configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Recorder {
    /// How often the recording time and level meter are published.
    meter_interval: Option<String>,
}

impl Recorder {
    /// Returns the meter interval (default: 50ms).
    pub fn meter_interval(&self) -> Result<Duration, ConfigError> {
        let interval = parse_duration(
            "recorder.meter_interval",
            self.meter_interval.as_deref(),
            DEFAULT_METER_INTERVAL,
        )?;
        if interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "recorder.meter_interval",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(interval)
    }
}
