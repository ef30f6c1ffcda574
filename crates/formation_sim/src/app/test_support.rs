use std::fs;
use std::path::Path;

use tempfile::TempDir;

use super::bootstrap::{build_app_from, AppWiring};
use super::sim_config::{ScenarioStep, SimConfig};

const CONTENT: &str = r#"<Tables>
    <FormationTemplate><id>1</id><shape>1</shape><spread>2</spread></FormationTemplate>
    <GroupTemplate><entry>1</entry><name>Road patrol</name><formation>1</formation></GroupTemplate>
    <GroupGuid><guid>1</guid><entry>1</entry></GroupGuid>
    <GroupMember><group>1</group><member>1</member><slot>0</slot></GroupMember>
    <GroupMember><group>1</group><member>2</member><slot>1</slot></GroupMember>
    <GroupMember><group>1</group><member>3</member><slot>2</slot></GroupMember>
    <CreatureSpawn><guid>1</guid><entry>1</entry><map>0</map><x>0</x><y>0</y><z>0</z><spawnDist>4</spawnDist><movement>Random</movement></CreatureSpawn>
    <CreatureSpawn><guid>2</guid><entry>1</entry><map>0</map><x>1</x><y>0</y><z>0</z></CreatureSpawn>
    <CreatureSpawn><guid>3</guid><entry>1</entry><map>0</map><x>2</x><y>0</y><z>0</z></CreatureSpawn>
    <CreatureSpawn><guid>10</guid><entry>2</entry><map>0</map><x>20</x><y>0</y><z>0</z><movement>Waypoint</movement></CreatureSpawn>
    <CreatureSpawn><guid>11</guid><entry>2</entry><map>0</map><x>21</x><y>0</y><z>0</z></CreatureSpawn>
    <CreatureSpawn><guid>12</guid><entry>2</entry><map>0</map><x>22</x><y>0</y><z>0</z></CreatureSpawn>
</Tables>"#;

/// Writes a small content set: one static single-file patrol (1, 2, 3)
/// and three loose creatures (10, 11, 12) on map 0.
pub(crate) fn write_content(dir: &Path) {
    fs::create_dir_all(dir).expect("mkdir");
    fs::write(dir.join("groups.xml"), CONTENT).expect("write");
}

pub(crate) fn test_app(scenario: Vec<ScenarioStep>) -> AppWiring {
    let temp = TempDir::new().expect("temp");
    let content_dir = temp.path().join("base");
    write_content(&content_dir);
    let mut app = build_app_from(&content_dir, &temp.path().join("sim.json")).expect("app");
    app.config = SimConfig {
        duration_ms: 12_000,
        scenario,
        ..app.config
    };
    app
}
