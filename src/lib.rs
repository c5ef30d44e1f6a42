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

//! A multi-track loop sampler engine. Catalog samples and microphone captures are decoded into
//! layers, each layer loops on a shared mix bus with its own volume, mute and delay, and the
//! mix can be recorded to a file.

pub mod audio;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod events;
pub mod loader;
pub mod playsync;
pub mod preview;
pub mod recorder;
pub mod sampler;
pub mod schedule;
pub mod util;

#[cfg(test)]
mod testutil;

pub use catalog::{CatalogSample, InstrumentKind};
pub use config::SamplerConfig;
pub use engine::{Layer, LayerEngine, LayerId};
pub use events::{EngineEvent, EventReceiver, EventSender};
pub use sampler::Sampler;
