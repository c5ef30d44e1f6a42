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
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, span, warn, Level};

use crate::audio::{self, AudioMixer};
use crate::catalog::InstrumentKind;
use crate::config::{ConfigError, SamplerConfig};
use crate::events::{EngineEvent, EventSender};
use crate::loader::{self, LayerRequest, LoadError, LoadedAudio};
use crate::playsync::CancelHandle;
use crate::schedule::{self, Gap, Repeat, SharedFactor};

mod layer;
mod mixdown;

pub use self::layer::{Layer, LayerId};
use self::layer::LayerEntry;
use self::mixdown::Mixdown;

/// What the mix bus as a whole is doing.
enum Transport {
    Idle,
    PlayingAll,
    Recording(Mixdown),
}

/// All mutable engine state, guarded by one lock.
struct EngineState {
    /// Registered layers in registration order.
    layers: Vec<LayerEntry>,
    /// Per-kind naming counters. Only ever incremented.
    counters: HashMap<InstrumentKind, u32>,
    transport: Transport,
    /// The layer in solo preview, if any.
    active_layer: Option<LayerId>,
}

impl EngineState {
    fn entry(&self, id: LayerId) -> Option<&LayerEntry> {
        self.layers.iter().find(|entry| entry.layer.id == id)
    }

    fn entry_mut(&mut self, id: LayerId) -> Option<&mut LayerEntry> {
        self.layers.iter_mut().find(|entry| entry.layer.id == id)
    }

    fn is_idle(&self) -> bool {
        matches!(self.transport, Transport::Idle)
    }
}

/// Resolved engine settings.
#[derive(Clone, Debug)]
struct Settings {
    max_loop_gap: Duration,
    playback_tap_frames: usize,
    recording_tap_frames: usize,
    load_timeout: Duration,
    temp_dir: PathBuf,
}

impl Settings {
    fn from_config(config: &SamplerConfig) -> Result<Settings, ConfigError> {
        Ok(Settings {
            max_loop_gap: config.engine().max_loop_gap()?,
            playback_tap_frames: config.engine().playback_tap_frames(),
            recording_tap_frames: config.engine().recording_tap_frames(),
            load_timeout: config.engine().load_timeout()?,
            temp_dir: config.resources().temp_dir(),
        })
    }
}

struct Inner {
    state: Mutex<EngineState>,
    mixer: AudioMixer,
    device: Arc<dyn audio::Device>,
    events: EventSender,
    settings: Settings,
    runtime: tokio::runtime::Handle,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for entry in state.layers.iter_mut() {
            entry.stop();
        }
        self.mixer.remove_tap();
        self.device.stop();
    }
}

/// The layer engine owns every layer, the mix bus they play into and the output device that
/// pulls it. All operations are safe to call from any thread; the engine is cheap to clone.
#[derive(Clone)]
pub struct LayerEngine {
    inner: Arc<Inner>,
}

impl LayerEngine {
    /// Creates an engine using the output device named in the configuration. Must be called
    /// from within a tokio runtime, which is used for loads and loop tasks.
    pub fn new(config: &SamplerConfig, events: EventSender) -> Result<LayerEngine, Box<dyn Error>> {
        let device = audio::get_device(config.audio())?;
        Self::with_device(device, config, events)
    }

    /// Creates an engine on the given output device.
    pub fn with_device(
        device: Arc<dyn audio::Device>,
        config: &SamplerConfig,
        events: EventSender,
    ) -> Result<LayerEngine, Box<dyn Error>> {
        let settings = Settings::from_config(config)?;
        let runtime = tokio::runtime::Handle::try_current()?;
        let mixer = AudioMixer::new(device.format());
        info!(device = %device, format = %device.format(), "Created layer engine.");

        Ok(LayerEngine {
            inner: Arc::new(Inner {
                state: Mutex::new(EngineState {
                    layers: Vec::new(),
                    counters: HashMap::new(),
                    transport: Transport::Idle,
                    active_layer: None,
                }),
                mixer,
                device,
                events,
                settings,
                runtime,
            }),
        })
    }

    /// Loads the requested file and registers it as a new layer.
    pub async fn add_layer(&self, request: LayerRequest) -> Result<Layer, LoadError> {
        self.load_layer(LayerId::new(), request).await
    }

    /// Starts loading the requested file and returns the ID the layer will have. The outcome
    /// arrives as a `LayerAdded` or `LayerLoadFailed` event.
    pub fn add_layer_in_background(&self, request: LayerRequest) -> LayerId {
        let id = LayerId::new();
        let engine = self.clone();
        self.inner.runtime.spawn(async move {
            let _ = engine.load_layer(id, request).await;
        });
        id
    }

    async fn load_layer(&self, id: LayerId, request: LayerRequest) -> Result<Layer, LoadError> {
        let loaded = loader::load_audio(
            request.path.clone(),
            self.inner.mixer.format(),
            self.inner.settings.load_timeout,
        )
        .await;
        match loaded {
            Ok(loaded) => Ok(self.register(id, request, loaded)),
            Err(e) => {
                warn!(layer = %id, path = ?request.path, err = %e, "Unable to load layer");
                self.inner.events.emit(EngineEvent::LayerLoadFailed {
                    id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Names and registers a decoded layer. Naming and registration share one critical
    /// section so concurrent loads of the same kind never collide.
    fn register(&self, id: LayerId, request: LayerRequest, loaded: LoadedAudio) -> Layer {
        let LoadedAudio { buffer, node } = loaded;
        let node = Arc::new(node);
        let waveform = buffer.waveform();

        let mut state = self.inner.state.lock();
        let counter = state.counters.entry(request.kind).or_insert(0);
        let display_name = format!("{} {}", request.kind.label(), *counter);
        *counter += 1;

        let layer = Layer {
            id,
            source_sample_id: request.sample_id,
            source_path: request.path,
            kind: request.kind,
            display_name,
            volume: 1.0,
            delay_factor: 0.0,
            is_muted: false,
            is_playing: false,
            duration: buffer.duration(),
        };

        self.inner.mixer.attach(node.clone());
        state.layers.push(LayerEntry {
            layer: layer.clone(),
            buffer: Arc::new(buffer),
            node,
            delay_factor: SharedFactor::new(0.0),
            loop_handle: None,
        });
        info!(layer = %id, name = %layer.display_name, "Registered layer.");

        // Sent under the lock so it always precedes the layer's first LayerScheduled.
        self.inner.events.emit(EngineEvent::LayerAdded {
            layer: layer.clone(),
            waveform,
        });

        // A layer added mid-mix joins it.
        if !state.is_idle() {
            if let Some(entry) = state.entry_mut(id) {
                self.start_loop(entry);
            }
        }
        layer
    }

    /// Removes a layer, stopping its loop and detaching its node. Removing the last layer stops
    /// global playback and recording. Returns false for unknown IDs.
    pub fn remove_layer(&self, id: LayerId) -> bool {
        let mixdown = {
            let mut state = self.inner.state.lock();
            let Some(index) = state.layers.iter().position(|entry| entry.layer.id == id) else {
                debug!(layer = %id, "Ignoring removal of unknown layer.");
                return false;
            };

            let mut entry = state.layers.remove(index);
            entry.stop();
            self.inner.mixer.detach(entry.node.id());
            if state.active_layer == Some(id) {
                state.active_layer = None;
                if state.is_idle() {
                    info!(layer = %id, "Removed the soloed layer, stopping device.");
                    self.inner.device.stop();
                }
            }
            info!(layer = %id, name = %entry.layer.display_name, "Removed layer.");

            if state.layers.is_empty() {
                self.stop_transport(&mut state)
            } else {
                None
            }
        };

        self.finish_mixdown(mixdown);
        true
    }

    /// Sets a layer's volume, clamped to [0,1]. Applied to the live node unless muted. NaN
    /// and unknown IDs are ignored and return false.
    pub fn set_volume(&self, id: LayerId, value: f32) -> bool {
        if value.is_nan() {
            warn!(layer = %id, "Ignoring NaN volume.");
            return false;
        }
        let mut state = self.inner.state.lock();
        let Some(entry) = state.entry_mut(id) else {
            return false;
        };
        entry.layer.volume = value.clamp(0.0, 1.0);
        if !entry.layer.is_muted {
            entry.node.set_gain(entry.layer.volume);
        }
        true
    }

    /// Sets a layer's delay factor, clamped to [0,1]. Takes effect at the next loop gap. NaN
    /// and unknown IDs are ignored and return false.
    pub fn set_delay_factor(&self, id: LayerId, value: f32) -> bool {
        if value.is_nan() {
            warn!(layer = %id, "Ignoring NaN delay factor.");
            return false;
        }
        let mut state = self.inner.state.lock();
        let Some(entry) = state.entry_mut(id) else {
            return false;
        };
        entry.layer.delay_factor = value.clamp(0.0, 1.0);
        entry.delay_factor.set(entry.layer.delay_factor);
        true
    }

    /// Toggles a layer's mute and returns the new mute state.
    pub fn toggle_mute(&self, id: LayerId) -> Option<bool> {
        let mut state = self.inner.state.lock();
        let entry = state.entry_mut(id)?;
        entry.layer.is_muted = !entry.layer.is_muted;
        entry.node.set_gain(entry.layer.audible_gain());
        debug!(layer = %id, muted = entry.layer.is_muted, "Toggled mute.");
        Some(entry.layer.is_muted)
    }

    /// Solo preview with toggle semantics: soloing the active layer stops it, soloing another
    /// layer stops the previous solo first. Stops global playback if it is running, and is
    /// rejected while recording. Returns whether the layer is now soloed.
    pub fn play_single(&self, id: LayerId) -> bool {
        let span = span!(Level::INFO, "play single");
        let _enter = span.enter();

        let mut state = self.inner.state.lock();
        if matches!(state.transport, Transport::Recording(_)) {
            warn!(layer = %id, "Cannot solo a layer while recording.");
            return false;
        }
        if state.entry(id).is_none() {
            return false;
        }
        if matches!(state.transport, Transport::PlayingAll) {
            // Only PlayingAll reaches here, so there's no mixdown to finish.
            let _ = self.stop_transport(&mut state);
        }

        if let Some(previous) = state.active_layer.take() {
            if let Some(entry) = state.entry_mut(previous) {
                entry.stop();
            }
            if previous == id {
                info!(layer = %id, "Stopped solo.");
                self.inner.device.stop();
                return false;
            }
        }

        if !self.start_device() {
            return false;
        }
        let Some(entry) = state.entry_mut(id) else {
            return false;
        };
        self.start_loop(entry);
        state.active_layer = Some(id);
        info!(layer = %id, "Started solo.");
        true
    }

    /// Plays every layer in its own loop and installs the visualization tap. No-op with no
    /// layers or while already playing or recording.
    pub fn play_all(&self) -> bool {
        let span = span!(Level::INFO, "play all");
        let _enter = span.enter();

        let mut state = self.inner.state.lock();
        if state.layers.is_empty() {
            info!("No layers to play.");
            return false;
        }
        if !state.is_idle() {
            warn!("Already playing or recording.");
            return false;
        }
        self.stop_solo(&mut state);

        if !self.start_device() {
            return false;
        }
        let events = self.inner.events.clone();
        let channels = self.inner.mixer.format().channels as usize;
        if let Err(e) = self.inner.mixer.install_tap(
            self.inner.settings.playback_tap_frames,
            Box::new(move |chunk: &[f32]| {
                events.emit(EngineEvent::OutputBufferChanged(first_channel(chunk, channels)))
            }),
        ) {
            error!(err = %e, "Unable to install visualization tap.");
            self.inner.device.stop();
            return false;
        }

        for entry in state.layers.iter_mut() {
            self.start_loop(entry);
        }
        state.transport = Transport::PlayingAll;
        info!(layers = state.layers.len(), "Playing all layers.");
        true
    }

    /// Stops every loop, removes the tap and stops the device. No-op while recording.
    pub fn stop_all(&self) {
        let mut state = self.inner.state.lock();
        if matches!(state.transport, Transport::Recording(_)) {
            info!("Ignoring stop while recording.");
            return;
        }
        // Only PlayingAll or Idle reach here, so there's no mixdown to finish.
        let _ = self.stop_transport(&mut state);
        info!("Stopped all layers.");
    }

    /// Plays every layer like `play_all` while writing the mix to a file in the temp
    /// directory. No-op with no layers or while already playing or recording.
    pub fn start_recording(&self) -> bool {
        let span = span!(Level::INFO, "start recording");
        let _enter = span.enter();

        let mut state = self.inner.state.lock();
        if state.layers.is_empty() {
            info!("No layers to record.");
            return false;
        }
        if !state.is_idle() {
            warn!("Already playing or recording.");
            return false;
        }
        self.stop_solo(&mut state);

        if !self.start_device() {
            return false;
        }
        let format = self.inner.mixer.format();
        let path = self
            .inner
            .settings
            .temp_dir
            .join(format!("{}.wav", uuid::Uuid::new_v4()));
        let mixdown = Mixdown::start(path.clone(), format);
        let Some(sender) = mixdown.sender() else {
            self.inner.device.stop();
            return false;
        };

        let events = self.inner.events.clone();
        let channels = format.channels as usize;
        if let Err(e) = self.inner.mixer.install_tap(
            self.inner.settings.recording_tap_frames,
            Box::new(move |chunk: &[f32]| {
                let _ = sender.send(chunk.to_vec());
                events.emit(EngineEvent::OutputBufferChanged(first_channel(chunk, channels)))
            }),
        ) {
            error!(err = %e, "Unable to install recording tap.");
            self.inner.device.stop();
            return false;
        }

        for entry in state.layers.iter_mut() {
            self.start_loop(entry);
        }
        state.transport = Transport::Recording(mixdown);
        info!(path = ?path, layers = state.layers.len(), "Recording mixdown.");
        true
    }

    /// Stops recording and finalizes the mixdown. Emits `ShareFile` and returns the path if a
    /// file was produced. Returns None if not recording.
    pub fn stop_recording(&self) -> Option<PathBuf> {
        let mixdown = {
            let mut state = self.inner.state.lock();
            if !matches!(state.transport, Transport::Recording(_)) {
                debug!("Not recording.");
                return None;
            }
            self.stop_transport(&mut state)
        };
        self.finish_mixdown(mixdown)
    }

    /// Returns snapshots of every layer in registration order.
    pub fn layers(&self) -> Vec<Layer> {
        self.inner
            .state
            .lock()
            .layers
            .iter()
            .map(|entry| entry.layer.clone())
            .collect()
    }

    /// Returns a snapshot of a layer.
    pub fn layer(&self, id: LayerId) -> Option<Layer> {
        self.inner.state.lock().entry(id).map(|entry| entry.layer.clone())
    }

    /// Returns the flat waveform view of a layer's buffer.
    pub fn waveform(&self, id: LayerId) -> Option<Arc<[f32]>> {
        self.inner
            .state
            .lock()
            .entry(id)
            .map(|entry| entry.buffer.waveform())
    }

    pub fn is_playing_all(&self) -> bool {
        matches!(self.inner.state.lock().transport, Transport::PlayingAll)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.inner.state.lock().transport, Transport::Recording(_))
    }

    /// The layer in solo preview, if any.
    pub fn active_layer_id(&self) -> Option<LayerId> {
        self.inner.state.lock().active_layer
    }

    pub fn layer_count(&self) -> usize {
        self.inner.state.lock().layers.len()
    }

    /// The engine's mix bus.
    pub fn mixer(&self) -> &AudioMixer {
        &self.inner.mixer
    }

    fn start_device(&self) -> bool {
        // Lets devices that run on the runtime clock find it from any calling thread.
        let _guard = self.inner.runtime.enter();
        match self.inner.device.start(self.inner.mixer.clone()) {
            Ok(()) => true,
            Err(e) => {
                error!(device = %self.inner.device, err = %e, "Unable to start output device.");
                false
            }
        }
    }

    /// Starts the loop task for one layer.
    fn start_loop(&self, entry: &mut LayerEntry) {
        if let Some(previous) = entry.loop_handle.take() {
            previous.cancel();
        }
        let cancel_handle = CancelHandle::new();
        entry.loop_handle = Some(cancel_handle.clone());
        entry.layer.is_playing = true;
        entry.node.set_gain(entry.layer.audible_gain());

        let id = entry.layer.id;
        let events = self.inner.events.clone();
        let gap = Gap::Scaled {
            max_gap: self.inner.settings.max_loop_gap,
            delay_factor: entry.delay_factor.clone(),
        };
        self.inner.runtime.spawn(schedule::run_loop(
            entry.node.clone(),
            gap,
            Repeat::Forever,
            cancel_handle,
            move |cycle| {
                debug!(layer = %id, cycle, "Scheduled layer.");
                events.emit(EngineEvent::LayerScheduled { id, cycle });
            },
        ));
    }

    fn stop_solo(&self, state: &mut EngineState) {
        if let Some(previous) = state.active_layer.take() {
            if let Some(entry) = state.entry_mut(previous) {
                entry.stop();
            }
        }
    }

    /// Stops every loop, removes the tap and stops the device. Returns the mixdown if one was
    /// running; it must be finished outside the lock.
    fn stop_transport(&self, state: &mut EngineState) -> Option<Mixdown> {
        for entry in state.layers.iter_mut() {
            entry.stop();
        }
        state.active_layer = None;
        self.inner.mixer.remove_tap();
        self.inner.device.stop();
        match std::mem::replace(&mut state.transport, Transport::Idle) {
            Transport::Recording(mixdown) => Some(mixdown),
            _ => None,
        }
    }

    fn finish_mixdown(&self, mixdown: Option<Mixdown>) -> Option<PathBuf> {
        let path = mixdown?.finish()?;
        info!(path = ?path, "Mixdown ready to share.");
        self.inner.events.emit(EngineEvent::ShareFile(path.clone()));
        Some(path)
    }

    #[cfg(test)]
    fn registry_node_ids(&self) -> Vec<u64> {
        self.inner
            .state
            .lock()
            .layers
            .iter()
            .map(|entry| entry.node.id())
            .collect()
    }

    #[cfg(test)]
    fn node_gain(&self, id: LayerId) -> Option<f32> {
        self.inner.state.lock().entry(id).map(|entry| entry.node.gain())
    }
}

/// The first channel of an interleaved chunk, for the visualizer.
fn first_channel(chunk: &[f32], channels: usize) -> Arc<[f32]> {
    chunk.iter().step_by(channels.max(1)).copied().collect()
}
