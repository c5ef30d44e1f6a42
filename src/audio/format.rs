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

use std::{error::Error, fmt, time::Duration};

/// The format of the mix bus: every attached node is converted to it, and the tap and
/// the mixdown file use it as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved output channels
    pub channels: u16,
}

impl BusFormat {
    /// Creates a new BusFormat
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, Box<dyn Error>> {
        if sample_rate == 0 {
            return Err("Sample rate must be greater than 0".into());
        }
        if channels == 0 {
            return Err("Channel count must be greater than 0".into());
        }

        Ok(BusFormat {
            sample_rate,
            channels,
        })
    }

    /// Converts a frame count into a duration at this format's sample rate.
    pub fn frames_to_duration(&self, frames: usize) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    /// Converts a duration into a frame count at this format's sample rate, rounding up.
    pub fn duration_to_frames(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * self.sample_rate as f64).ceil() as usize
    }

    /// Returns the hound spec used when writing this format to disk.
    pub fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        }
    }
}

impl Default for BusFormat {
    /// Creates a default bus format (44.1kHz stereo)
    fn default() -> Self {
        BusFormat {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

impl fmt::Display for BusFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}
