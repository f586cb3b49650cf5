use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Mod options, shared across save games. Changes apply after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Make the foundation tiles of solar panels solid.
    #[serde(rename = "SolidSolarPanelsFoundation", default = "default_true")]
    pub solid_solar_panels_foundation: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Options {
    fn default() -> Self {
        Self {
            solid_solar_panels_foundation: true,
        }
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ShowLiquidOnAirflowTiles.Options[solidsolarpanelsfoundation={}]",
            self.solid_solar_panels_foundation
        )
    }
}

pub fn config_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir().or_else(dirs::data_dir)?;
    base.push("ShowLiquidOnAirflowTiles");
    base.push("config.json");
    Some(base)
}

impl Options {
    /// Load from `path`, falling back to defaults when the file is missing
    /// or unreadable.
    pub fn load_from(path: &Path) -> Self {
        let data = match fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) => {
                debug!("no options at {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str::<Options>(&data) {
            Ok(opts) => opts,
            Err(e) => {
                warn!("ignoring malformed options at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load from the shared config location.
    pub fn load() -> Self {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }
}
