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
// Core mix bus logic shared by the cpal and mock output devices.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::format::BusFormat;
use super::node::PlayerNode;

/// Callback invoked with each full chunk of interleaved bus output.
pub type TapCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Errors from installing a tap on the mix bus.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TapError {
    #[error("A tap is already installed on the mix bus")]
    AlreadyInstalled,

    #[error("Tap chunk size must be greater than 0")]
    InvalidChunkSize,
}

/// A tap observing the bus output in fixed-size chunks.
struct Tap {
    /// Samples per delivered chunk (frames * channels).
    chunk_samples: usize,
    /// Output accumulated since the last delivered chunk.
    pending: Vec<f32>,
    callback: TapCallback,
}

/// The mix bus. Player nodes are attached to it and summed into the output device, and at
/// most one tap can observe the summed output.
#[derive(Clone)]
pub struct AudioMixer {
    /// Nodes currently attached to the bus.
    nodes: Arc<RwLock<Vec<Arc<PlayerNode>>>>,
    /// The installed tap, if any.
    tap: Arc<Mutex<Option<Tap>>>,
    /// The bus format.
    format: BusFormat,
    /// Total frames rendered since the mixer was created.
    frames_processed: Arc<AtomicU64>,
}

impl AudioMixer {
    /// Creates a new mixer for the given bus format.
    pub fn new(format: BusFormat) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(Vec::new())),
            tap: Arc::new(Mutex::new(None)),
            format,
            frames_processed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attaches a node to the bus. A node already attached with the same ID is replaced.
    pub fn attach(&self, node: Arc<PlayerNode>) {
        let mut nodes = self.nodes.write();
        nodes.retain(|existing| existing.id() != node.id());
        nodes.push(node);
    }

    /// Detaches the node with the given ID, returning it if it was attached.
    pub fn detach(&self, id: u64) -> Option<Arc<PlayerNode>> {
        let mut nodes = self.nodes.write();
        let index = nodes.iter().position(|node| node.id() == id)?;
        Some(nodes.remove(index))
    }

    /// Returns the IDs of the attached nodes, in attachment order.
    pub fn node_ids(&self) -> Vec<u64> {
        self.nodes.read().iter().map(|node| node.id()).collect()
    }

    /// Returns the number of attached nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Installs the single tap on the bus. The callback receives chunks of `chunk_frames`
    /// interleaved frames from the rendering thread.
    pub fn install_tap(&self, chunk_frames: usize, callback: TapCallback) -> Result<(), TapError> {
        if chunk_frames == 0 {
            return Err(TapError::InvalidChunkSize);
        }
        let mut tap = self.tap.lock();
        if tap.is_some() {
            return Err(TapError::AlreadyInstalled);
        }
        let chunk_samples = chunk_frames * self.format.channels as usize;
        *tap = Some(Tap {
            chunk_samples,
            pending: Vec::with_capacity(chunk_samples),
            callback,
        });
        Ok(())
    }

    /// Removes the tap. Once this returns the callback will not be invoked again. Returns
    /// false if no tap was installed.
    pub fn remove_tap(&self) -> bool {
        self.tap.lock().take().is_some()
    }

    /// Returns true if a tap is installed.
    pub fn has_tap(&self) -> bool {
        self.tap.lock().is_some()
    }

    /// Renders `frames` frames of the mix into the interleaved output block, then feeds the tap.
    pub fn process_into_output(&self, output: &mut [f32], frames: usize) {
        let samples = (frames * self.format.channels as usize).min(output.len());
        let output = &mut output[..samples];
        output.fill(0.0);

        {
            let nodes = self.nodes.read();
            for node in nodes.iter() {
                node.render_into(output, frames);
            }
        }
        self.frames_processed
            .fetch_add(frames as u64, Ordering::Relaxed);

        let mut tap = self.tap.lock();
        if let Some(tap) = tap.as_mut() {
            tap.pending.extend_from_slice(output);
            while tap.pending.len() >= tap.chunk_samples {
                let rest = tap.pending.split_off(tap.chunk_samples);
                (tap.callback)(&tap.pending);
                tap.pending = rest;
            }
        }
    }

    /// Renders a fresh block of `frames` frames. Used by the mock device and tests.
    pub fn process_frames(&self, frames: usize) -> Vec<f32> {
        let mut output = vec![0.0; frames * self.format.channels as usize];
        self.process_into_output(&mut output, frames);
        output
    }

    /// Returns the total number of frames rendered by this mixer.
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// Gets the bus format.
    pub fn format(&self) -> BusFormat {
        self.format
    }
}
