//! Schedule files: the target list plus observatory parameters.
//!
//! ```yaml
//! mode: repeat
//! failure_policy: continue
//! observatory:
//!   latitude: 52.1
//!   longitude: 4.3
//!   elevation: 10
//!   timezone: "+02:00"
//!   dusk: "22:40"
//!   dawn: "04:50"
//! targets:
//!   - { name: M51, ra: 202.47, dec: 47.2, exposure: 10, total: 600, pause: 30 }
//!   - { name: M101, ra: "14:03:12", dec: "54:20:57", exposure: 10, total: 600 }
//! ```
//!
//! Target entries stay untyped until dispatch; a malformed entry is
//! rejected by the sequencer on its own and does not fail the whole file.

use crate::config::is_yaml;
use crate::error::{ScopeError, ScopeResult};
use crate::model::{FailurePolicy, SequenceMode, Target};
use crate::twilight::FixedTwilight;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub mode: SequenceMode,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    pub observatory: Observatory,
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// Site parameters. Only the twilight gate reads them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observatory {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    /// Metres above sea level.
    #[serde(default)]
    pub elevation: f64,
    /// UTC offset of the site, `"+HH:MM"`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Local clock time the window opens, `"HH:MM"`.
    pub dusk: String,
    /// Local clock time the window closes, `"HH:MM"`.
    pub dawn: String,
}

fn default_timezone() -> String {
    "+00:00".to_string()
}

impl Default for Observatory {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0.0,
            timezone: default_timezone(),
            dusk: "18:00".to_string(),
            dawn: "06:00".to_string(),
        }
    }
}

impl Observatory {
    pub fn twilight(&self) -> ScopeResult<FixedTwilight> {
        FixedTwilight::parse(&self.dusk, &self.dawn, &self.timezone)
    }
}

impl Schedule {
    /// Check everything except the target entries.
    pub fn validate(&self) -> ScopeResult<()> {
        let site = &self.observatory;
        if !(-90.0..=90.0).contains(&site.latitude) {
            return Err(ScopeError::config(
                "observatory latitude out of range",
                site.latitude,
            ));
        }
        if !(-180.0..=180.0).contains(&site.longitude) {
            return Err(ScopeError::config(
                "observatory longitude out of range",
                site.longitude,
            ));
        }
        site.twilight().map(|_| ())
    }
}

/// Load a schedule from JSON, or YAML when the extension is `.yaml`/`.yml`.
pub fn load_schedule_file(path: &Path) -> ScopeResult<Schedule> {
    let text = fs::read_to_string(path)
        .map_err(|err| ScopeError::io(format!("failed to read schedule {}", path.display()), err))?;
    let schedule: Schedule = if is_yaml(path) {
        serde_yml::from_str(&text)
            .map_err(|err| ScopeError::config(format!("invalid schedule {}", path.display()), err))?
    } else {
        serde_json::from_str(&text)
            .map_err(|err| ScopeError::config(format!("invalid schedule {}", path.display()), err))?
    };
    schedule.validate()?;
    Ok(schedule)
}
