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
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::format::BusFormat;
use super::pcm::{PcmBuffer, ResampleError};
use crate::playsync::CancelHandle;

/// Current playback state of a node.
struct Playback {
    /// Read position in frames.
    position: usize,
    /// Whether the scheduled buffer is being rendered.
    playing: bool,
    /// Signalled when the scheduled buffer has been fully rendered.
    completion: Option<oneshot::Sender<()>>,
}

/// A player node holds one buffer, already converted to the bus format, and renders it into
/// the mix bus with a linear gain. Scheduling the buffer returns a receiver that resolves when
/// the buffer has played to its end; stopping the node closes that receiver instead.
pub struct PlayerNode {
    /// Unique ID of this node on the mix bus.
    id: u64,
    /// Interleaved samples in the bus format.
    data: Arc<Vec<f32>>,
    /// Number of interleaved channels in data.
    channels: usize,
    /// Linear gain, stored as f32 bits.
    gain: AtomicU32,
    /// Playback state, touched by the mixing thread and the control side.
    playback: Mutex<Playback>,
}

impl PlayerNode {
    /// Creates a node for the given buffer, converting it to the bus format.
    pub fn new(id: u64, buffer: &PcmBuffer, format: BusFormat) -> Result<PlayerNode, ResampleError> {
        let data = buffer.to_bus(format)?;
        Ok(PlayerNode {
            id,
            data: Arc::new(data),
            channels: format.channels as usize,
            gain: AtomicU32::new(1.0f32.to_bits()),
            playback: Mutex::new(Playback {
                position: 0,
                playing: false,
                completion: None,
            }),
        })
    }

    /// Returns the node ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the number of frames in the buffer.
    pub fn frame_length(&self) -> usize {
        self.data.len() / self.channels
    }

    /// Sets the linear gain applied while rendering. Audible from the next rendered block.
    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Returns the linear gain.
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    /// Returns true while a scheduled buffer is being rendered.
    pub fn is_playing(&self) -> bool {
        self.playback.lock().playing
    }

    /// Schedules the buffer to play from the start. Any earlier schedule is replaced and its
    /// receiver is closed.
    #[cfg(test)]
    pub(crate) fn schedule(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut playback = self.playback.lock();
        playback.position = 0;
        playback.playing = true;
        playback.completion = Some(tx);
        rx
    }

    /// Schedules the buffer unless the cancel handle has fired. The check and the schedule
    /// happen under the playback lock, so a concurrent `cancel` followed by `stop` can never
    /// leave the node playing.
    pub fn schedule_unless(&self, cancel_handle: &CancelHandle) -> Option<oneshot::Receiver<()>> {
        let mut playback = self.playback.lock();
        if cancel_handle.is_cancelled() {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        playback.position = 0;
        playback.playing = true;
        playback.completion = Some(tx);
        Some(rx)
    }

    /// Stops rendering and closes any pending completion.
    pub fn stop(&self) {
        let mut playback = self.playback.lock();
        playback.position = 0;
        playback.playing = false;
        playback.completion = None;
    }

    /// Adds up to `frames` frames of this node into the interleaved output block.
    pub fn render_into(&self, output: &mut [f32], frames: usize) {
        let mut playback = self.playback.lock();
        if !playback.playing {
            return;
        }

        let total_frames = self.frame_length();
        let to_render = frames
            .min(total_frames.saturating_sub(playback.position))
            .min(output.len() / self.channels);
        let gain = self.gain();

        if gain != 0.0 {
            let start = playback.position * self.channels;
            let end = start + to_render * self.channels;
            for (out, sample) in output.iter_mut().zip(&self.data[start..end]) {
                *out += sample * gain;
            }
        }
        playback.position += to_render;

        if playback.position >= total_frames {
            playback.playing = false;
            if let Some(completion) = playback.completion.take() {
                // The receiver may already be gone if the loop was cancelled.
                let _ = completion.send(());
            }
        }
    }
}

impl std::fmt::Debug for PlayerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerNode")
            .field("id", &self.id)
            .field("frames", &self.frame_length())
            .field("gain", &self.gain())
            .field("playing", &self.is_playing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_node(samples: Vec<f32>) -> PlayerNode {
        PlayerNode::new(
            1,
            &PcmBuffer::new(vec![samples], 1000),
            BusFormat::new(1000, 1).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_idle_node_renders_nothing() {
        let node = mono_node(vec![0.5, 0.5]);
        let mut output = vec![0.0; 2];
        node.render_into(&mut output, 2);
        assert_eq!(output, vec![0.0, 0.0]);
    }

    #[test]
    fn test_render_applies_gain() {
        let node = mono_node(vec![0.5, 1.0]);
        node.set_gain(0.5);
        let _completion = node.schedule();

        let mut output = vec![0.0; 2];
        node.render_into(&mut output, 2);
        assert_eq!(output, vec![0.25, 0.5]);
    }

    #[test]
    fn test_completion_fires_at_end() {
        let node = mono_node(vec![0.1, 0.2, 0.3]);
        let mut completion = node.schedule();

        let mut output = vec![0.0; 2];
        node.render_into(&mut output, 2);
        assert!(completion.try_recv().is_err());
        assert!(node.is_playing());

        node.render_into(&mut output, 2);
        assert!(completion.try_recv().is_ok());
        assert!(!node.is_playing());
    }

    #[test]
    fn test_stop_closes_completion() {
        let node = mono_node(vec![0.1, 0.2, 0.3]);
        let mut completion = node.schedule();
        node.stop();
        assert_eq!(
            completion.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        );
        assert!(!node.is_playing());
    }

    #[test]
    fn test_schedule_unless_cancelled() {
        let node = mono_node(vec![0.1, 0.2]);
        let cancel_handle = CancelHandle::new();
        assert!(node.schedule_unless(&cancel_handle).is_some());
        assert!(node.is_playing());

        node.stop();
        cancel_handle.cancel();
        assert!(node.schedule_unless(&cancel_handle).is_none());
        assert!(!node.is_playing());
    }

    #[test]
    fn test_new_converts_to_bus_format() {
        let node = PlayerNode::new(
            2,
            &PcmBuffer::new(vec![vec![0.25; 100]], 500),
            BusFormat::new(1000, 2).unwrap(),
        )
        .unwrap();
        assert_eq!(node.frame_length(), 200);
    }

    #[test]
    fn test_reschedule_restarts_from_the_top() {
        let node = mono_node(vec![0.1, 0.2]);
        let _first = node.schedule();
        let mut output = vec![0.0; 1];
        node.render_into(&mut output, 1);

        let _second = node.schedule();
        let mut output = vec![0.0; 1];
        node.render_into(&mut output, 1);
        assert_eq!(output, vec![0.1]);
    }
}
