use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use formation::{EntityGuid, FormationConfig, FormationShape, GroupGuid};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub(crate) const SIM_CONFIG_ENV_VAR: &str = "FORMATION_SIM_CONFIG";

#[derive(Debug, Error)]
pub(crate) enum SimConfigError {
    #[error("read sim config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse sim config '{path}'{}: {source}", at_path(.json_path))]
    Parse {
        path: PathBuf,
        json_path: String,
        #[source]
        source: serde_json::Error,
    },
}

fn at_path(json_path: &str) -> String {
    if json_path.is_empty() || json_path == "." {
        String::new()
    } else {
        format!(" at {json_path}")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct SimConfig {
    pub(crate) map_id: u32,
    pub(crate) tick_ms: u32,
    pub(crate) duration_ms: u32,
    /// World units per second.
    pub(crate) move_speed: f32,
    pub(crate) formation: FormationConfig,
    pub(crate) scenario: Vec<ScenarioStep>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            map_id: 0,
            tick_ms: 100,
            duration_ms: 30_000,
            move_speed: 4.0,
            formation: FormationConfig::default(),
            scenario: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct ScenarioStep {
    pub(crate) at_ms: u32,
    #[serde(flatten)]
    pub(crate) action: ScenarioAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub(crate) enum ScenarioAction {
    Kill { guid: EntityGuid },
    Respawn { guid: EntityGuid },
    Summon { guid: EntityGuid, near: EntityGuid },
    Despawn { guid: EntityGuid },
    CreateGroup { master: EntityGuid },
    AddMember { master: EntityGuid, member: EntityGuid },
    /// Without a shape the configured dynamic shape is used.
    SetFormation {
        master: EntityGuid,
        #[serde(default)]
        shape: Option<FormationShape>,
    },
    SwitchFormation { group: GroupGuid, shape: u32 },
    SetNewMaster { group: GroupGuid, candidate: EntityGuid },
    Mirror { group: GroupGuid, mirrored: bool },
    Compact { group: GroupGuid },
    Reset { group: GroupGuid },
    Disband { group: GroupGuid },
    Snapshot { group: GroupGuid },
}

/// Reads the sim config. A missing file yields the defaults.
pub(crate) fn load_sim_config(path: &Path) -> Result<SimConfig, SimConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "sim_config_missing_using_defaults");
            return Ok(SimConfig::default());
        }
        Err(source) => {
            return Err(SimConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_sim_config(path, &raw)
}

pub(crate) fn parse_sim_config(path: &Path, raw: &str) -> Result<SimConfig, SimConfigError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, SimConfig>(&mut deserializer).map_err(|error| {
        let json_path = error.path().to_string();
        SimConfigError::Parse {
            path: path.to_path_buf(),
            json_path,
            source: error.into_inner(),
        }
    })
}

/// `FORMATION_SIM_CONFIG` when set, otherwise `default_path`.
pub(crate) fn sim_config_path(default_path: &Path) -> PathBuf {
    std::env::var_os(SIM_CONFIG_ENV_VAR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| default_path.to_path_buf())
}
