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
use std::path::PathBuf;

use serde::Deserialize;

/// A YAML representation of where files are read from and written to.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Resources {
    /// Directory holding the bundled catalog samples.
    resource_dir: Option<PathBuf>,

    /// Directory microphone captures are written to.
    documents_dir: Option<PathBuf>,

    /// Directory mixdowns are written to.
    temp_dir: Option<PathBuf>,
}

impl Resources {
    /// Creates a resources section with every directory set.
    pub fn new(resource_dir: PathBuf, documents_dir: PathBuf, temp_dir: PathBuf) -> Resources {
        Resources {
            resource_dir: Some(resource_dir),
            documents_dir: Some(documents_dir),
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the catalog directory (default: ./samples).
    pub fn resource_dir(&self) -> PathBuf {
        self.resource_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("samples"))
    }

    /// Returns the capture directory (default: ./recordings).
    pub fn documents_dir(&self) -> PathBuf {
        self.documents_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("recordings"))
    }

    /// Returns the mixdown directory (default: the system temp directory).
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
