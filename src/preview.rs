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
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, span, Level};

use crate::audio::{self, AudioMixer, PlayerNode};
use crate::catalog::CatalogSample;
use crate::config::SamplerConfig;
use crate::events::{EngineEvent, EventSender};
use crate::loader::{self, LoadError};
use crate::playsync::CancelHandle;
use crate::schedule::{self, Gap, LoopOutcome, Repeat};

/// How a preview plays its sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewMode {
    /// Loop with the configured gap until stopped or replaced.
    Loop,
    /// Play once, then emit `PreviewFinished`.
    Once,
}

/// Resolves when a started preview ends, either by finishing or by being stopped.
pub struct PreviewCompletion {
    receiver: oneshot::Receiver<LoopOutcome>,
}

impl PreviewCompletion {
    pub async fn wait(self) -> LoopOutcome {
        self.receiver.await.unwrap_or(LoopOutcome::Cancelled)
    }
}

/// The preview that is currently playing.
struct Current {
    sample_id: String,
    node: Arc<PlayerNode>,
    cancel_handle: CancelHandle,
}

struct Inner {
    mixer: AudioMixer,
    device: Arc<dyn audio::Device>,
    events: EventSender,
    gap: Duration,
    load_timeout: Duration,
    resource_dir: PathBuf,
    current: Mutex<Option<Current>>,
}

impl Inner {
    /// Stops the current preview if the predicate accepts it.
    fn stop_if<F>(&self, predicate: F) -> bool
    where
        F: FnOnce(&Current) -> bool,
    {
        let mut current = self.current.lock();
        if !current.as_ref().is_some_and(predicate) {
            return false;
        }
        let Some(previous) = current.take() else {
            return false;
        };
        previous.cancel_handle.cancel();
        previous.node.stop();
        self.mixer.detach(previous.node.id());
        self.device.stop();
        debug!(sample = previous.sample_id, "Stopped preview.");
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(current) = self.current.get_mut().take() {
            current.cancel_handle.cancel();
            current.node.stop();
        }
        self.device.stop();
    }
}

/// Auditions catalog samples one at a time on a mix bus of its own, separate from the layer
/// engine's.
#[derive(Clone)]
pub struct PreviewPlayer {
    inner: Arc<Inner>,
}

impl PreviewPlayer {
    /// Creates a preview player on the output device named in the configuration.
    pub fn new(config: &SamplerConfig, events: EventSender) -> Result<PreviewPlayer, Box<dyn Error>> {
        let device = audio::get_device(config.audio())?;
        Self::with_device(device, config, events)
    }

    /// Creates a preview player on the given output device.
    pub fn with_device(
        device: Arc<dyn audio::Device>,
        config: &SamplerConfig,
        events: EventSender,
    ) -> Result<PreviewPlayer, Box<dyn Error>> {
        let mixer = AudioMixer::new(device.format());
        Ok(PreviewPlayer {
            inner: Arc::new(Inner {
                mixer,
                device,
                events,
                gap: config.preview().gap()?,
                load_timeout: config.engine().load_timeout()?,
                resource_dir: config.resources().resource_dir(),
                current: Mutex::new(None),
            }),
        })
    }

    /// Plays the sample. Replaces whatever was previewing, unless it is this same sample, in
    /// which case nothing changes and None is returned.
    pub async fn play(
        &self,
        sample: &CatalogSample,
        mode: PreviewMode,
    ) -> Result<Option<PreviewCompletion>, LoadError> {
        if self.current_sample().as_deref() == Some(sample.id) {
            debug!(sample = sample.id, "Already previewing.");
            return Ok(None);
        }

        let loaded = loader::load_audio(
            sample.path(&self.inner.resource_dir),
            self.inner.mixer.format(),
            self.inner.load_timeout,
        )
        .await?;

        let span = span!(Level::INFO, "preview", sample = sample.id);
        let _enter = span.enter();

        self.stop();
        let node = Arc::new(loaded.node);
        let cancel_handle = CancelHandle::new();

        {
            let mut current = self.inner.current.lock();
            if current.is_some() {
                // Another play won the race while this one was decoding.
                debug!("Preview replaced while loading.");
                return Ok(None);
            }
            self.inner.mixer.attach(node.clone());
            if let Err(e) = self.inner.device.start(self.inner.mixer.clone()) {
                error!(device = %self.inner.device, err = %e, "Unable to start preview output.");
                self.inner.mixer.detach(node.id());
                return Ok(None);
            }
            *current = Some(Current {
                sample_id: sample.id.to_string(),
                node: node.clone(),
                cancel_handle: cancel_handle.clone(),
            });
        }
        info!(mode = ?mode, "Previewing sample.");

        let (sender, receiver) = oneshot::channel();
        let repeat = match mode {
            PreviewMode::Loop => Repeat::Forever,
            PreviewMode::Once => Repeat::Once,
        };
        let inner = Arc::downgrade(&self.inner);
        let sample_id = sample.id.to_string();
        let gap = Gap::Fixed(self.inner.gap);
        tokio::spawn(async move {
            let on_scheduled = |cycle: u64| {
                debug!(sample = %sample_id, cycle, "Scheduled preview pass.");
            };
            let outcome =
                schedule::run_loop(node.clone(), gap, repeat, cancel_handle, on_scheduled).await;
            if outcome == LoopOutcome::Finished {
                if let Some(inner) = inner.upgrade() {
                    inner.stop_if(|current| current.node.id() == node.id());
                    inner
                        .events
                        .emit(EngineEvent::PreviewFinished { sample_id });
                }
            }
            let _ = sender.send(outcome);
        });

        Ok(Some(PreviewCompletion { receiver }))
    }

    /// Stops the preview, if one is playing.
    pub fn stop(&self) {
        self.inner.stop_if(|_| true);
    }

    pub fn is_playing(&self) -> bool {
        self.inner.current.lock().is_some()
    }

    /// The ID of the sample being previewed.
    pub fn current_sample(&self) -> Option<String> {
        self.inner
            .current
            .lock()
            .as_ref()
            .map(|current| current.sample_id.clone())
    }

    /// The preview mix bus.
    pub fn mixer(&self) -> &AudioMixer {
        &self.inner.mixer
    }

    #[cfg(test)]
    fn current_node(&self) -> Option<Arc<PlayerNode>> {
        self.inner
            .current
            .lock()
            .as_ref()
            .map(|current| current.node.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::catalog;
    use crate::events::{self, EventReceiver};
    use crate::testutil::{drain_events, init_tracing, test_config, write_wav};

    fn setup() -> (tempfile::TempDir, PreviewPlayer, EventReceiver) {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        for id in ["piano_1", "piano_2"] {
            write_wav(
                &dir.path().join(format!("{}.wav", id)),
                &[vec![0.5f32; 200]],
                1000,
            )
            .unwrap();
        }
        let (sender, receiver) = events::channel();
        let player = PreviewPlayer::new(&test_config(dir.path()), sender).unwrap();
        (dir, player, receiver)
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_preview() {
        let (_dir, player, _events) = setup();
        let piano_1 = catalog::find("piano_1").unwrap();
        let piano_2 = catalog::find("piano_2").unwrap();

        let completion = player.play(piano_1, PreviewMode::Loop).await.unwrap();
        assert!(completion.is_some());
        assert!(player.is_playing());
        assert_eq!(player.current_sample().as_deref(), Some("piano_1"));

        // Still looping after several passes.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(player.is_playing());

        // Restarting the same sample changes nothing.
        assert!(player.play(piano_1, PreviewMode::Loop).await.unwrap().is_none());
        assert_eq!(player.mixer().node_count(), 1);

        // A different sample replaces it.
        let replaced = completion.unwrap();
        assert!(player.play(piano_2, PreviewMode::Loop).await.unwrap().is_some());
        assert_eq!(replaced.wait().await, LoopOutcome::Cancelled);
        assert_eq!(player.current_sample().as_deref(), Some("piano_2"));
        assert_eq!(player.mixer().node_count(), 1);

        player.stop();
        assert!(!player.is_playing());
        assert_eq!(player.mixer().node_count(), 0);
        let processed = player.mixer().frames_processed();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(player.mixer().frames_processed(), processed);
    }

    /// Returns the time between the first two schedules of the playing preview, watching the
    /// node go from idle to playing.
    async fn schedule_interval(player: &PreviewPlayer) -> Duration {
        let node = player.current_node().unwrap();
        let mut starts = Vec::new();
        let mut was_playing = false;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while starts.len() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "preview never rescheduled");
            let playing = node.is_playing();
            if playing && !was_playing {
                starts.push(tokio::time::Instant::now());
            }
            was_playing = playing;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        starts[1] - starts[0]
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_preview_waits_for_gap() {
        let (_dir, player, _events) = setup();
        let piano_1 = catalog::find("piano_1").unwrap();
        player.play(piano_1, PreviewMode::Loop).await.unwrap().unwrap();

        // 200ms of audio followed by the 500ms gap.
        let interval = schedule_interval(&player).await;
        assert!(interval >= Duration::from_millis(690), "{:?}", interval);
        assert!(interval <= Duration::from_millis(730), "{:?}", interval);
        player.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_preview_finishes() {
        let (_dir, player, events) = setup();
        let piano_1 = catalog::find("piano_1").unwrap();

        let completion = player
            .play(piano_1, PreviewMode::Once)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completion.wait().await, LoopOutcome::Finished);
        assert!(!player.is_playing());

        let events = drain_events(&events);
        assert!(events.iter().any(|event| matches!(
            event,
            EngineEvent::PreviewFinished { sample_id } if sample_id == "piano_1"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sample() {
        let (_dir, player, _events) = setup();
        let drum = catalog::find("drum_2").unwrap();
        assert!(player.play(drum, PreviewMode::Loop).await.is_err());
        assert!(!player.is_playing());
    }
}
