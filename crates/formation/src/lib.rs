use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod config;
pub mod content;
pub mod engine;
pub mod geometry;
pub mod registry;
pub mod slot;
pub mod world;

#[cfg(test)]
mod test_world;

pub use config::FormationConfig;
pub use content::{
    load_content_tables, ContentErrorCode, ContentLoadError, ContentTables, FormationTemplate,
    GroupTemplate, SourceLocation, SpawnRecord, SpawnRegistry, SpawnTable, StaticGroup,
    TemplateCatalog,
};
pub use engine::{FollowRequest, FormationEngine, FormationPhase, FormationSnapshot, MasterMovement};
pub use geometry::{formation_offset, mirror_angle, FormationShape, SlotGeometry};
pub use registry::{
    FormationServices, Group, GroupRegistryError, GroupSnapshot, MapGroups, DYNAMIC_GROUP_NAME,
};
pub use slot::{Slot, SlotTable};
pub use world::{
    DefaultMovement, EntityAccess, EntityGuid, FormationWorld, GroupGuid, MapId, MemberKind,
    MovementExecutor, Position, RespawnAnchor, SlotOrdinal, WaypointProgress, MASTER_SLOT,
};

pub const ROOT_ENV_VAR: &str = "FORMATION_ROOT";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: PathBuf,
    pub content_dir: PathBuf,
    pub sim_config_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current executable path: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("current executable path has no parent directory: {0}")]
    ExeHasNoParent(PathBuf),
    #[error(
        "FORMATION_ROOT is set but does not point to a valid project root: {path}\n\
A valid root must contain Cargo.toml and either crates/ or assets/."
    )]
    InvalidEnvRoot { path: PathBuf },
    #[error(
        "Could not detect project root by walking upward from executable directory: {start_dir}\n\
Expected a directory containing Cargo.toml and either crates/ or assets/.\n\
Set {env_var} explicitly, for example:\n\
Bash/zsh: export {env_var}=\"/path/to/formation\""
    )]
    RootNotFound {
        start_dir: PathBuf,
        env_var: &'static str,
    },
}

pub fn resolve_app_paths() -> Result<AppPaths, StartupError> {
    let root = resolve_root()?;
    Ok(app_paths_for_root(root))
}

pub fn app_paths_for_root(root: PathBuf) -> AppPaths {
    let content_dir = root.join("assets").join("base");
    let sim_config_path = root.join("assets").join("sim.json");
    AppPaths {
        root,
        content_dir,
        sim_config_path,
    }
}

fn resolve_root() -> Result<PathBuf, StartupError> {
    match env::var(ROOT_ENV_VAR) {
        Ok(value) => {
            let normalized = normalize_path(&PathBuf::from(value));
            if is_repo_marker(&normalized) {
                Ok(normalized)
            } else {
                Err(StartupError::InvalidEnvRoot { path: normalized })
            }
        }
        Err(env::VarError::NotPresent) => {
            let exe = env::current_exe().map_err(StartupError::CurrentExe)?;
            let exe_dir = exe
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| StartupError::ExeHasNoParent(exe.clone()))?;

            exe_dir
                .ancestors()
                .find(|candidate| is_repo_marker(candidate))
                .map(normalize_path)
                .ok_or_else(|| StartupError::RootNotFound {
                    start_dir: normalize_path(&exe_dir),
                    env_var: ROOT_ENV_VAR,
                })
        }
        Err(source) => Err(StartupError::EnvVar {
            var: ROOT_ENV_VAR,
            source,
        }),
    }
}

fn is_repo_marker(path: &Path) -> bool {
    path.join("Cargo.toml").is_file()
        && (path.join("crates").is_dir() || path.join("assets").is_dir())
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
