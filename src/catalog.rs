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

//! The bundled sample catalog.

use std::fmt;
use std::path::{Path, PathBuf};

/// The instrument family a layer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    Piano,
    Guitar,
    Drum,
    Microphone,
}

impl InstrumentKind {
    /// The label used when naming layers of this kind.
    pub fn label(&self) -> &'static str {
        match self {
            InstrumentKind::Piano => "Piano",
            InstrumentKind::Guitar => "Guitar",
            InstrumentKind::Drum => "Drums",
            InstrumentKind::Microphone => "Microphone",
        }
    }

    /// Every kind, in display order.
    pub fn all() -> [InstrumentKind; 4] {
        [
            InstrumentKind::Piano,
            InstrumentKind::Guitar,
            InstrumentKind::Drum,
            InstrumentKind::Microphone,
        ]
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A bundled sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogSample {
    pub id: &'static str,
    pub title: &'static str,
    pub extension: &'static str,
    pub kind: InstrumentKind,
}

impl CatalogSample {
    /// Resolves the sample to a file in the resource directory.
    pub fn path(&self, resource_dir: &Path) -> PathBuf {
        resource_dir.join(format!("{}.{}", self.id, self.extension))
    }
}

const PIANO: &[CatalogSample] = &[
    sample("piano_1", "Sample 1", InstrumentKind::Piano),
    sample("piano_2", "Sample 2", InstrumentKind::Piano),
    sample("piano_3", "Sample 3", InstrumentKind::Piano),
];

const GUITAR: &[CatalogSample] = &[
    sample("guitar_1", "Sample 1", InstrumentKind::Guitar),
    sample("guitar_2", "Sample 2", InstrumentKind::Guitar),
];

const DRUM: &[CatalogSample] = &[
    sample("drum_1", "Sample 1", InstrumentKind::Drum),
    sample("drum_2", "Sample 2", InstrumentKind::Drum),
];

const fn sample(id: &'static str, title: &'static str, kind: InstrumentKind) -> CatalogSample {
    CatalogSample {
        id,
        title,
        extension: "wav",
        kind,
    }
}

/// Returns the bundled samples for an instrument family. Microphone layers have none.
pub fn samples(kind: InstrumentKind) -> &'static [CatalogSample] {
    match kind {
        InstrumentKind::Piano => PIANO,
        InstrumentKind::Guitar => GUITAR,
        InstrumentKind::Drum => DRUM,
        InstrumentKind::Microphone => &[],
    }
}

/// Finds a bundled sample by ID.
pub fn find(id: &str) -> Option<&'static CatalogSample> {
    [PIANO, GUITAR, DRUM]
        .into_iter()
        .flatten()
        .find(|sample| sample.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_contents() {
        assert_eq!(samples(InstrumentKind::Piano).len(), 3);
        assert_eq!(samples(InstrumentKind::Guitar).len(), 2);
        assert_eq!(samples(InstrumentKind::Drum).len(), 2);
        assert!(samples(InstrumentKind::Microphone).is_empty());
        for kind in InstrumentKind::all() {
            assert!(samples(kind).iter().all(|sample| sample.kind == kind));
        }
    }

    #[test]
    fn test_find_and_resolve() {
        let sample = find("guitar_2").unwrap();
        assert_eq!(sample.kind, InstrumentKind::Guitar);
        assert_eq!(
            sample.path(Path::new("/res")),
            PathBuf::from("/res/guitar_2.wav")
        );
        assert!(find("banjo_1").is_none());
    }

    #[test]
    fn test_labels() {
        assert_eq!(InstrumentKind::Drum.label(), "Drums");
        assert_eq!(InstrumentKind::Microphone.to_string(), "Microphone");
    }
}
