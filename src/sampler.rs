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

//! The sampler ties the layer engine, the preview player and the recorder together the way
//! the UI drives them.

use std::error::Error;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::catalog::CatalogSample;
use crate::config::SamplerConfig;
use crate::engine::{Layer, LayerEngine, LayerId};
use crate::events::EventSender;
use crate::loader::{LayerRequest, LoadError};
use crate::preview::{PreviewMode, PreviewPlayer};
use crate::recorder::{Recorder, RecorderError};
use crate::schedule::LoopOutcome;

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error("The microphone can't be used while layers are playing or recording")]
    EngineBusy,
}

/// What a microphone toggle did.
#[derive(Debug, Clone, PartialEq)]
pub enum MicrophoneToggle {
    /// Capture started into the given file.
    Started(PathBuf),
    /// Capture stopped and was added as a layer.
    Added(Layer),
    /// Capture stopped but failed, so nothing was added.
    Discarded(PathBuf),
}

pub struct Sampler {
    engine: LayerEngine,
    preview: PreviewPlayer,
    recorder: Recorder,
    resource_dir: PathBuf,
}

impl Sampler {
    /// Creates every component from the configuration, sharing one event channel. Must be
    /// called from within a tokio runtime.
    pub fn new(config: &SamplerConfig, events: EventSender) -> Result<Sampler, Box<dyn Error>> {
        Ok(Sampler {
            engine: LayerEngine::new(config, events.clone())?,
            preview: PreviewPlayer::new(config, events.clone())?,
            recorder: Recorder::new(config, events)?,
            resource_dir: config.resources().resource_dir(),
        })
    }

    pub fn engine(&self) -> &LayerEngine {
        &self.engine
    }

    pub fn preview(&self) -> &PreviewPlayer {
        &self.preview
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Loops a catalog sample in the preview player.
    pub async fn audition(&self, sample: &CatalogSample) -> Result<(), SamplerError> {
        self.preview.play(sample, PreviewMode::Loop).await?;
        Ok(())
    }

    /// Stops the preview and adds the sample as a layer.
    pub async fn select_sample(&self, sample: &CatalogSample) -> Result<Layer, SamplerError> {
        self.preview.stop();
        let layer = self
            .engine
            .add_layer(LayerRequest::from_catalog(sample, &self.resource_dir))
            .await?;
        Ok(layer)
    }

    /// Plays the sample once and adds it as a layer when the preview finishes. Returns None if
    /// the preview was stopped or replaced first.
    pub async fn audition_then_add(
        &self,
        sample: &CatalogSample,
    ) -> Result<Option<Layer>, SamplerError> {
        // A preview of this same sample is already running; start over so it plays once.
        if self.preview.current_sample().as_deref() == Some(sample.id) {
            self.preview.stop();
        }
        let Some(completion) = self.preview.play(sample, PreviewMode::Once).await? else {
            return Ok(None);
        };
        if completion.wait().await != LoopOutcome::Finished {
            info!(sample = sample.id, "Preview interrupted, not adding layer.");
            return Ok(None);
        }
        let layer = self
            .engine
            .add_layer(LayerRequest::from_catalog(sample, &self.resource_dir))
            .await?;
        Ok(Some(layer))
    }

    /// Starts or stops microphone capture. Starting is refused while the engine is playing or
    /// recording. A successful capture becomes a microphone layer.
    pub async fn toggle_microphone(&self) -> Result<MicrophoneToggle, SamplerError> {
        if self.recorder.is_recording() {
            let recording = self.recorder.stop_recording()?;
            if !recording.success {
                warn!(path = ?recording.path, "Microphone capture failed, not adding layer.");
                return Ok(MicrophoneToggle::Discarded(recording.path));
            }
            let layer = self
                .engine
                .add_layer(LayerRequest::microphone(recording.path))
                .await?;
            return Ok(MicrophoneToggle::Added(layer));
        }

        if self.engine.is_playing_all() || self.engine.is_recording() {
            warn!("Ignoring microphone while the engine is busy.");
            return Err(SamplerError::EngineBusy);
        }
        let path = self.recorder.start_recording()?;
        Ok(MicrophoneToggle::Started(path))
    }

    /// Toggles a layer's mute. Muting the layer that is soloed also stops the solo.
    pub fn toggle_mute(&self, id: LayerId) -> Option<bool> {
        let muted = self.engine.toggle_mute(id)?;
        if muted && self.engine.active_layer_id() == Some(id) {
            self.engine.play_single(id);
        }
        Some(muted)
    }
}
