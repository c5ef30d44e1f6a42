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
use serde::Deserialize;

const DEFAULT_DEVICE: &str = "default";
const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_CHANNELS: u16 = 2;
const DEFAULT_BLOCK_FRAMES: usize = 512;

/// A YAML representation of the audio configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Audio {
    /// The output device. Names starting with "mock" select the mock device.
    output_device: Option<String>,

    /// The microphone device. Names starting with "mock" select the mock input.
    input_device: Option<String>,

    /// Mix bus sample rate in Hz (default: 44100)
    sample_rate: Option<u32>,

    /// Mix bus channel count (default: 2)
    channels: Option<u16>,

    /// Frames mixed per block (default: 512). Smaller blocks lower latency.
    block_frames: Option<usize>,
}

impl Audio {
    /// New will create a new Audio configuration using the given devices.
    pub fn new(output_device: &str, input_device: &str) -> Audio {
        Audio {
            output_device: Some(output_device.to_string()),
            input_device: Some(input_device.to_string()),
            ..Default::default()
        }
    }

    /// Returns the output device from the configuration.
    pub fn output_device(&self) -> &str {
        self.output_device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    /// Returns the input device from the configuration.
    pub fn input_device(&self) -> &str {
        self.input_device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    /// Returns the mix bus sample rate (default: 44100)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// Returns the mix bus channel count (default: 2)
    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS)
    }

    /// Returns the frames mixed per block (default: 512)
    pub fn block_frames(&self) -> usize {
        self.block_frames.unwrap_or(DEFAULT_BLOCK_FRAMES).max(1)
    }
}
