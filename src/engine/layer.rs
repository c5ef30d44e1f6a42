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
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::audio::{PcmBuffer, PlayerNode};
use crate::catalog::InstrumentKind;
use crate::playsync::CancelHandle;
use crate::schedule::SharedFactor;

/// Unique identifier of a layer, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> LayerId {
        LayerId(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        LayerId::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A snapshot of one layer as seen by callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub source_sample_id: String,
    pub source_path: PathBuf,
    pub kind: InstrumentKind,
    /// "<Label> <n>", assigned once when the layer is registered.
    pub display_name: String,
    /// Linear gain in [0,1].
    pub volume: f32,
    /// Controls the gap between loops; 1 plays back to back, 0 waits the full gap.
    pub delay_factor: f32,
    pub is_muted: bool,
    pub is_playing: bool,
    /// Length of one pass of the decoded buffer.
    pub duration: Duration,
}

impl Layer {
    /// The gain the layer's node should currently have.
    pub fn audible_gain(&self) -> f32 {
        if self.is_muted {
            0.0
        } else {
            self.volume
        }
    }
}

/// Everything the engine owns for one layer.
pub(crate) struct LayerEntry {
    pub(crate) layer: Layer,
    pub(crate) buffer: Arc<PcmBuffer>,
    pub(crate) node: Arc<PlayerNode>,
    pub(crate) delay_factor: SharedFactor,
    /// Present while the layer's loop is running.
    pub(crate) loop_handle: Option<CancelHandle>,
}

impl LayerEntry {
    /// Stops the loop and the node. The order matters: cancelling first means the loop can't
    /// reschedule after the node is stopped.
    pub(crate) fn stop(&mut self) {
        if let Some(cancel_handle) = self.loop_handle.take() {
            cancel_handle.cancel();
        }
        self.node.stop();
        self.layer.is_playing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audible_gain() {
        let mut layer = Layer {
            id: LayerId::new(),
            source_sample_id: "piano_1".to_string(),
            source_path: PathBuf::from("piano_1.wav"),
            kind: InstrumentKind::Piano,
            display_name: "Piano 0".to_string(),
            volume: 0.7,
            delay_factor: 0.0,
            is_muted: false,
            is_playing: false,
            duration: Duration::from_secs(1),
        };
        assert_eq!(layer.audible_gain(), 0.7);
        layer.is_muted = true;
        assert_eq!(layer.audible_gain(), 0.0);
    }

    #[test]
    fn test_layer_ids_are_unique() {
        assert_ne!(LayerId::new(), LayerId::new());
    }
}
