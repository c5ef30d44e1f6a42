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

//! Events delivered to the UI collaborator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::engine::{Layer, LayerId};

/// Everything the engine, recorder and preview player report back to the UI.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A layer finished loading and was registered. Carries the waveform to draw.
    LayerAdded { layer: Layer, waveform: Arc<[f32]> },

    /// A layer failed to load and was not registered. Carries the load error's message.
    LayerLoadFailed { id: LayerId, error: String },

    /// A layer's buffer was scheduled on the mix bus. `cycle` counts from 0 per loop.
    LayerScheduled { id: LayerId, cycle: u64 },

    /// A chunk of mix bus output for the visualizer (first bus channel).
    OutputBufferChanged(Arc<[f32]>),

    /// A mixdown file was produced and can be shared.
    ShareFile(PathBuf),

    /// The outcome of a microphone permission request.
    RecordingPermission(bool),

    /// Periodic recording progress. Powers are in dBFS.
    RecordingTimeChanged {
        elapsed: Duration,
        average_power: f32,
        peak_power: f32,
    },

    /// A microphone capture ended.
    RecordingFinished { success: bool, path: PathBuf },

    /// A play-once preview reached the end of its sample.
    PreviewFinished { sample_id: String },
}

pub type EventReceiver = crossbeam_channel::Receiver<EngineEvent>;

/// Sending half of the UI event channel. Sends never block and never fail loudly; a UI that
/// went away simply stops receiving.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: crossbeam_channel::Sender<EngineEvent>,
}

impl EventSender {
    /// Sends an event to the UI.
    pub fn emit(&self, event: EngineEvent) {
        if let Err(e) = self.sender.send(event) {
            trace!(event = ?e.0, "Event dropped, receiver is gone");
        }
    }
}

/// Creates a new unbounded event channel.
pub fn channel() -> (EventSender, EventReceiver) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (EventSender { sender }, receiver)
}
