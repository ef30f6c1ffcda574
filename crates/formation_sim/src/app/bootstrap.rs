use std::path::Path;
use std::sync::Arc;

use formation::{
    load_content_tables, resolve_app_paths, ContentLoadError, FormationServices, MapGroups, MapId,
    SpawnTable, StartupError, TemplateCatalog,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::sim_config::{load_sim_config, sim_config_path, SimConfig, SimConfigError};
use super::sim_world::SimWorld;

#[derive(Debug, Error)]
pub(crate) enum SimError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("content load failed: {0}")]
    Content(#[from] ContentLoadError),
    #[error(transparent)]
    Config(#[from] SimConfigError),
}

pub(crate) struct AppWiring {
    pub(crate) config: SimConfig,
    pub(crate) groups: MapGroups,
    pub(crate) world: SimWorld,
}

pub(crate) fn build_app() -> Result<AppWiring, SimError> {
    info!("=== Formation Sim Startup ===");
    let paths = resolve_app_paths()?;
    let config_path = sim_config_path(&paths.sim_config_path);
    info!(
        root = %paths.root.display(),
        content_dir = %paths.content_dir.display(),
        config = %config_path.display(),
        "sim_paths_resolved"
    );
    build_app_from(&paths.content_dir, &config_path)
}

pub(crate) fn build_app_from(content_dir: &Path, config_path: &Path) -> Result<AppWiring, SimError> {
    let config = load_sim_config(config_path)?;
    let tables = load_content_tables(content_dir)?;
    let mut spawns = SpawnTable::from_tables(&tables);
    let catalog = TemplateCatalog::load_all(&tables, &mut spawns);

    let map = MapId(config.map_id);
    let services = Arc::new(FormationServices::new(catalog, config.formation.clone()));
    let world = SimWorld::from_spawns(map, &spawns, config.move_speed);
    let groups = MapGroups::new(map, services);

    Ok(AppWiring {
        config,
        groups,
        world,
    })
}

pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::app::test_support::write_content;
    use formation::{ContentErrorCode, EntityGuid, GroupGuid};

    #[test]
    fn wiring_instantiates_static_groups_of_the_configured_map() {
        let temp = TempDir::new().expect("temp");
        let content_dir = temp.path().join("base");
        write_content(&content_dir);

        let app = build_app_from(&content_dir, &temp.path().join("sim.json")).expect("app");
        assert_eq!(app.config.map_id, 0);
        assert_eq!(app.groups.len(), 1);
        assert!(app
            .groups
            .get_group_for_entity(EntityGuid(3), MapId(0))
            .is_some_and(|group| group.guid() == GroupGuid(1)));
        assert!(app.world.entity(EntityGuid(10)).is_some());
    }

    #[test]
    fn broken_content_fails_startup() {
        let temp = TempDir::new().expect("temp");
        let content_dir = temp.path().join("base");
        std::fs::create_dir_all(&content_dir).expect("mkdir");
        std::fs::write(content_dir.join("bad.xml"), "<Tables><Oops/></Tables>").expect("write");

        let err = build_app_from(&content_dir, &temp.path().join("sim.json"))
            .err()
            .expect("err");
        match err {
            SimError::Content(content) => {
                assert_eq!(content.code, ContentErrorCode::UnknownRowType);
            }
            other => panic!("expected content error, got {other}"),
        }
    }
}
