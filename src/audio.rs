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
use std::sync::atomic::{AtomicU64, Ordering};
use std::{error::Error, fmt, sync::Arc};

use crate::config;

pub mod cpal;
pub mod decode;
pub mod format;
pub mod mixer;
pub mod mock;
pub mod node;
pub mod pcm;
pub mod thread_priority;

pub use format::BusFormat;
pub use mixer::{AudioMixer, TapError};
pub use node::PlayerNode;
pub use pcm::{PcmBuffer, ResampleError};

/// Global counter for mix bus node IDs.
static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returns a node ID that is unique for the life of the process.
pub fn next_node_id() -> u64 {
    NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// An output device pulls a mix bus and sends the result to hardware (or, for the mock, to
/// nowhere on a virtual clock).
pub trait Device: fmt::Display + Send + Sync {
    /// Starts pulling the given mixer. Starting a running device is a no-op.
    fn start(&self, mixer: AudioMixer) -> Result<(), Box<dyn Error>>;

    /// Stops pulling the mixer. Stopping a stopped device is a no-op.
    fn stop(&self);

    /// Returns true while the device is pulling a mixer.
    fn is_running(&self) -> bool;

    /// The format the device expects the mix bus to be in.
    fn format(&self) -> BusFormat;
}

/// A message produced by a capturing input device.
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    /// A block of mono samples at the device's capture rate.
    Samples(Vec<f32>),
    /// The device failed; no further samples will arrive.
    Failed(String),
}

/// An input device captures microphone audio, downmixed to mono.
pub trait InputDevice: fmt::Display + Send + Sync {
    /// Asks for access to the microphone. Returns true if access was granted.
    fn request_permission(&self) -> bool;

    /// Starts capturing, delivering blocks to the given sender until stopped.
    fn start_capture(&self, sink: crossbeam_channel::Sender<Capture>)
        -> Result<(), Box<dyn Error>>;

    /// Stops capturing. Once this returns no further blocks are delivered.
    fn stop_capture(&self);

    /// The capture sample rate.
    fn sample_rate(&self) -> u32;
}

/// Gets the output device named in the configuration.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    let format = BusFormat::new(config.sample_rate(), config.channels())?;
    let device = config.output_device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(device, format, config.block_frames())));
    };

    Ok(Arc::new(cpal::Device::get(device, format, config.block_frames())?))
}

/// Gets the input device named in the configuration.
pub fn get_input_device(config: &config::Audio) -> Result<Arc<dyn InputDevice>, Box<dyn Error>> {
    let device = config.input_device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::InputDevice::get(
            device,
            config.sample_rate(),
            config.block_frames(),
        )));
    };

    Ok(Arc::new(cpal::InputDevice::get(device)?))
}
