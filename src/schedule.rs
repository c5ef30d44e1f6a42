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

//! The loop scheduler: play a buffer, wait a gap, play it again, until cancelled.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::audio::PlayerNode;
use crate::playsync::CancelHandle;

/// A normalized [0,1] control shared between the UI side and a running loop.
#[derive(Clone, Debug)]
pub struct SharedFactor(Arc<AtomicU32>);

impl SharedFactor {
    pub fn new(value: f32) -> SharedFactor {
        SharedFactor(Arc::new(AtomicU32::new(value.clamp(0.0, 1.0).to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Stores the value clamped to [0,1].
    pub fn set(&self, value: f32) {
        self.0
            .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

/// How long to wait between the end of one pass and the start of the next.
#[derive(Clone, Debug)]
pub enum Gap {
    /// Always the same gap.
    Fixed(Duration),
    /// `(1 - delay_factor) * max_gap`, re-read every cycle.
    Scaled {
        max_gap: Duration,
        delay_factor: SharedFactor,
    },
}

impl Gap {
    /// The gap for the cycle that is about to wait.
    pub fn current(&self) -> Duration {
        match self {
            Gap::Fixed(gap) => *gap,
            Gap::Scaled {
                max_gap,
                delay_factor,
            } => max_gap.mul_f64(1.0 - delay_factor.get() as f64),
        }
    }
}

/// Whether a loop repeats or plays its buffer once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Repeat {
    Forever,
    Once,
}

/// How a loop task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The loop was cancelled, or its node was stopped underneath it.
    Cancelled,
    /// A `Repeat::Once` loop played its buffer to the end.
    Finished,
}

/// Runs a loop on the given node until cancelled. `on_scheduled` is called with the cycle
/// number each time the buffer is scheduled.
///
/// The cancel handle is checked under the node lock right before every schedule, and both
/// waits (for the buffer to finish and for the gap to pass) race against cancellation, so a
/// stopped loop never reschedules.
pub async fn run_loop<F>(
    node: Arc<PlayerNode>,
    gap: Gap,
    repeat: Repeat,
    cancel_handle: CancelHandle,
    mut on_scheduled: F,
) -> LoopOutcome
where
    F: FnMut(u64) + Send,
{
    let mut cycle: u64 = 0;
    loop {
        let Some(completion) = node.schedule_unless(&cancel_handle) else {
            return LoopOutcome::Cancelled;
        };
        on_scheduled(cycle);

        tokio::select! {
            biased;
            _ = cancel_handle.cancelled() => return LoopOutcome::Cancelled,
            result = completion => {
                if result.is_err() {
                    return LoopOutcome::Cancelled;
                }
            }
        }

        if repeat == Repeat::Once {
            return LoopOutcome::Finished;
        }

        let wait = gap.current();
        debug!(node = node.id(), cycle, gap = ?wait, "Loop pass complete");
        if !wait.is_zero() {
            tokio::select! {
                biased;
                _ = cancel_handle.cancelled() => return LoopOutcome::Cancelled,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        cycle += 1;
    }
}
