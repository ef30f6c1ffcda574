mod catalog;
mod spawns;
mod tables;

pub use catalog::{FormationTemplate, GroupTemplate, StaticGroup, TemplateCatalog};
pub use spawns::{SpawnRecord, SpawnRegistry, SpawnTable};
pub use tables::{
    load_content_tables, parse_tables_document, ContentErrorCode, ContentLoadError,
    ContentTables, CreatureLinkRow, CreatureSpawnRow, FormationSlotRow, FormationTemplateRow,
    GroupGuidRow, GroupMemberRow, GroupTemplateRow, PoolMemberRow, SourceLocation,
};
