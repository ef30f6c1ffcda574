use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use roxmltree::{Document, Node};
use tracing::info;

use crate::world::DefaultMovement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorCode {
    ReadDir,
    ReadFile,
    XmlMalformed,
    InvalidRoot,
    UnknownRowType,
    UnknownField,
    DuplicateField,
    MissingField,
    InvalidValue,
}

/// Fatal problem with the content store itself. Row-level semantic problems
/// are not errors; the catalog logs and skips them.
#[derive(Debug, Clone)]
pub struct ContentLoadError {
    pub code: ContentErrorCode,
    pub message: String,
    pub file_path: PathBuf,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for ContentLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (file={}, line={}, column={})",
                self.code,
                self.message,
                self.file_path.display(),
                loc.line,
                loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (file={})",
                self.code,
                self.message,
                self.file_path.display()
            ),
        }
    }
}

impl std::error::Error for ContentLoadError {}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupTemplateRow {
    pub entry: u32,
    pub name: String,
    pub formation: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormationTemplateRow {
    pub id: u32,
    /// Raw shape id; range is checked by the catalog.
    pub shape: u32,
    pub spread: f32,
    pub options: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormationSlotRow {
    pub formation: u32,
    pub slot: u32,
    pub angle: f32,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupGuidRow {
    pub guid: u32,
    pub entry: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupMemberRow {
    pub group: u32,
    pub member: u32,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatureSpawnRow {
    pub guid: u32,
    pub entry: u32,
    pub map: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub orientation: f32,
    pub spawn_dist: f32,
    pub movement: DefaultMovement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolMemberRow {
    pub pool: u32,
    pub guid: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatureLinkRow {
    pub guid: u32,
    pub master: u32,
}

/// Raw rows of every table, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentTables {
    pub group_templates: Vec<GroupTemplateRow>,
    pub formation_templates: Vec<FormationTemplateRow>,
    pub formation_slots: Vec<FormationSlotRow>,
    pub group_guids: Vec<GroupGuidRow>,
    pub group_members: Vec<GroupMemberRow>,
    pub creature_spawns: Vec<CreatureSpawnRow>,
    pub pool_members: Vec<PoolMemberRow>,
    pub creature_links: Vec<CreatureLinkRow>,
}

impl ContentTables {
    pub fn row_count(&self) -> usize {
        self.group_templates.len()
            + self.formation_templates.len()
            + self.formation_slots.len()
            + self.group_guids.len()
            + self.group_members.len()
            + self.creature_spawns.len()
            + self.pool_members.len()
            + self.creature_links.len()
    }
}

/// Reads every `*.xml` file under `content_dir`, in path order.
pub fn load_content_tables(content_dir: &Path) -> Result<ContentTables, ContentLoadError> {
    let files = collect_xml_files_sorted(content_dir).map_err(|error| ContentLoadError {
        code: ContentErrorCode::ReadDir,
        message: format!("failed to read content directory: {}", error.source),
        file_path: error.path,
        location: None,
    })?;

    let mut tables = ContentTables::default();
    for file in &files {
        let raw = fs::read_to_string(file).map_err(|source| ContentLoadError {
            code: ContentErrorCode::ReadFile,
            message: format!("failed to read XML file: {source}"),
            file_path: file.clone(),
            location: None,
        })?;
        parse_tables_document(file, &raw, &mut tables)?;
    }

    info!(
        content_dir = %content_dir.display(),
        file_count = files.len(),
        row_count = tables.row_count(),
        "content_tables_loaded"
    );
    Ok(tables)
}

pub fn parse_tables_document(
    file_path: &Path,
    raw: &str,
    tables: &mut ContentTables,
) -> Result<(), ContentLoadError> {
    let doc = Document::parse(raw).map_err(|error| ContentLoadError {
        code: ContentErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "Tables" {
        return Err(error_at_node(
            ContentErrorCode::InvalidRoot,
            "root element must be <Tables>".to_string(),
            file_path,
            &doc,
            root,
        ));
    }

    for row in root.children().filter(|node| node.is_element()) {
        let ctx = RowContext {
            file_path,
            doc: &doc,
            row,
        };
        match row.tag_name().name() {
            "GroupTemplate" => {
                let fields = ctx.fields(&["entry", "name", "formation"])?;
                tables.group_templates.push(GroupTemplateRow {
                    entry: ctx.required(&fields, "entry")?,
                    name: ctx.required_text(&fields, "name")?,
                    formation: ctx.optional(&fields, "formation")?,
                });
            }
            "FormationTemplate" => {
                let fields = ctx.fields(&["id", "shape", "spread", "options"])?;
                tables.formation_templates.push(FormationTemplateRow {
                    id: ctx.required(&fields, "id")?,
                    shape: ctx.required(&fields, "shape")?,
                    spread: ctx.required_finite(&fields, "spread")?,
                    options: ctx.optional(&fields, "options")?.unwrap_or(0),
                });
            }
            "FormationSlot" => {
                let fields = ctx.fields(&["formation", "slot", "angle", "distance"])?;
                tables.formation_slots.push(FormationSlotRow {
                    formation: ctx.required(&fields, "formation")?,
                    slot: ctx.required(&fields, "slot")?,
                    angle: ctx.required_finite(&fields, "angle")?,
                    distance: ctx.required_finite(&fields, "distance")?,
                });
            }
            "GroupGuid" => {
                let fields = ctx.fields(&["guid", "entry"])?;
                tables.group_guids.push(GroupGuidRow {
                    guid: ctx.required(&fields, "guid")?,
                    entry: ctx.required(&fields, "entry")?,
                });
            }
            "GroupMember" => {
                let fields = ctx.fields(&["group", "member", "slot"])?;
                tables.group_members.push(GroupMemberRow {
                    group: ctx.required(&fields, "group")?,
                    member: ctx.required(&fields, "member")?,
                    slot: ctx.required(&fields, "slot")?,
                });
            }
            "CreatureSpawn" => {
                let fields = ctx.fields(&[
                    "guid",
                    "entry",
                    "map",
                    "x",
                    "y",
                    "z",
                    "orientation",
                    "spawnDist",
                    "movement",
                ])?;
                let movement = match fields.get("movement") {
                    Some(node) => ctx.movement(*node)?,
                    None => DefaultMovement::Idle,
                };
                tables.creature_spawns.push(CreatureSpawnRow {
                    guid: ctx.required(&fields, "guid")?,
                    entry: ctx.required(&fields, "entry")?,
                    map: ctx.required(&fields, "map")?,
                    x: ctx.required_finite(&fields, "x")?,
                    y: ctx.required_finite(&fields, "y")?,
                    z: ctx.required_finite(&fields, "z")?,
                    orientation: ctx.optional(&fields, "orientation")?.unwrap_or(0.0),
                    spawn_dist: ctx.optional(&fields, "spawnDist")?.unwrap_or(0.0),
                    movement,
                });
            }
            "PoolMember" => {
                let fields = ctx.fields(&["pool", "guid"])?;
                tables.pool_members.push(PoolMemberRow {
                    pool: ctx.required(&fields, "pool")?,
                    guid: ctx.required(&fields, "guid")?,
                });
            }
            "CreatureLink" => {
                let fields = ctx.fields(&["guid", "master"])?;
                tables.creature_links.push(CreatureLinkRow {
                    guid: ctx.required(&fields, "guid")?,
                    master: ctx.required(&fields, "master")?,
                });
            }
            other => {
                return Err(error_at_node(
                    ContentErrorCode::UnknownRowType,
                    format!("unsupported row type <{other}>"),
                    file_path,
                    &doc,
                    row,
                ))
            }
        }
    }

    Ok(())
}

type RowFields<'a, 'input> = BTreeMap<String, Node<'a, 'input>>;

struct RowContext<'a, 'input> {
    file_path: &'a Path,
    doc: &'a Document<'input>,
    row: Node<'a, 'input>,
}

impl<'a, 'input> RowContext<'a, 'input> {
    fn row_name(&self) -> &str {
        self.row.tag_name().name()
    }

    fn fields(&self, allowed: &[&str]) -> Result<RowFields<'a, 'input>, ContentLoadError> {
        let mut fields = RowFields::new();
        for field in self.row.children().filter(|child| child.is_element()) {
            let field_name = field.tag_name().name().to_string();
            if !allowed.contains(&field_name.as_str()) {
                return Err(self.error(
                    ContentErrorCode::UnknownField,
                    format!("unknown field <{}> in <{}>", field_name, self.row_name()),
                    field,
                ));
            }
            if fields.contains_key(&field_name) {
                return Err(self.error(
                    ContentErrorCode::DuplicateField,
                    format!("duplicate field <{}> in <{}>", field_name, self.row_name()),
                    field,
                ));
            }
            fields.insert(field_name, field);
        }
        Ok(fields)
    }

    fn required_text(
        &self,
        fields: &RowFields<'a, 'input>,
        name: &str,
    ) -> Result<String, ContentLoadError> {
        let Some(node) = fields.get(name) else {
            return Err(self.error(
                ContentErrorCode::MissingField,
                format!("missing required field <{}> in <{}>", name, self.row_name()),
                self.row,
            ));
        };
        let value = node.text().map(str::trim).unwrap_or_default().to_string();
        if value.is_empty() {
            return Err(self.error(
                ContentErrorCode::MissingField,
                format!("field <{name}> must not be empty"),
                *node,
            ));
        }
        Ok(value)
    }

    fn required<T: FromStr>(
        &self,
        fields: &RowFields<'a, 'input>,
        name: &str,
    ) -> Result<T, ContentLoadError> {
        let value = self.required_text(fields, name)?;
        value.parse::<T>().map_err(|_| {
            let node = fields.get(name).copied().unwrap_or(self.row);
            self.error(
                ContentErrorCode::InvalidValue,
                format!("{name} '{value}' is not a valid value"),
                node,
            )
        })
    }

    fn optional<T: FromStr>(
        &self,
        fields: &RowFields<'a, 'input>,
        name: &str,
    ) -> Result<Option<T>, ContentLoadError> {
        if fields.contains_key(name) {
            self.required(fields, name).map(Some)
        } else {
            Ok(None)
        }
    }

    fn required_finite(
        &self,
        fields: &RowFields<'a, 'input>,
        name: &str,
    ) -> Result<f32, ContentLoadError> {
        let value: f32 = self.required(fields, name)?;
        if !value.is_finite() {
            let node = fields.get(name).copied().unwrap_or(self.row);
            return Err(self.error(
                ContentErrorCode::InvalidValue,
                format!("{name} must be finite"),
                node,
            ));
        }
        Ok(value)
    }

    fn movement(&self, node: Node<'a, 'input>) -> Result<DefaultMovement, ContentLoadError> {
        let value = node.text().map(str::trim).unwrap_or_default();
        match value {
            "Idle" => Ok(DefaultMovement::Idle),
            "Random" => Ok(DefaultMovement::Random),
            "Waypoint" => Ok(DefaultMovement::Waypoint),
            _ => Err(self.error(
                ContentErrorCode::InvalidValue,
                format!("invalid movement '{value}'; allowed values: Idle, Random, Waypoint"),
                node,
            )),
        }
    }

    fn error(
        &self,
        code: ContentErrorCode,
        message: String,
        node: Node<'_, '_>,
    ) -> ContentLoadError {
        error_at_node(code, message, self.file_path, self.doc, node)
    }
}

fn error_at_node(
    code: ContentErrorCode,
    message: String,
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> ContentLoadError {
    let pos = doc.text_pos_at(node.range().start);
    ContentLoadError {
        code,
        message,
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: pos.row as usize,
            column: pos.col as usize,
        }),
    }
}

struct ReadError {
    path: PathBuf,
    source: std::io::Error,
}

fn collect_xml_files_sorted(root: &Path) -> Result<Vec<PathBuf>, ReadError> {
    let mut files = Vec::<PathBuf>::new();
    collect_recursive(root, &mut files)?;
    files.sort_by_key(|path| normalize_rel_path(path.strip_prefix(root).unwrap_or(path)));
    Ok(files)
}

fn collect_recursive(current: &Path, files: &mut Vec<PathBuf>) -> Result<(), ReadError> {
    let entries = fs::read_dir(current).map_err(|source| ReadError {
        path: current.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ReadError {
            path: current.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, files)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write");
    }

    fn parse(raw: &str) -> Result<ContentTables, ContentLoadError> {
        let mut tables = ContentTables::default();
        parse_tables_document(Path::new("inline.xml"), raw, &mut tables)?;
        Ok(tables)
    }

    #[test]
    fn parses_every_row_type() {
        let tables = parse(
            r#"<Tables>
                <GroupTemplate><entry>1</entry><name>Patrol</name><formation>7</formation></GroupTemplate>
                <FormationTemplate><id>7</id><shape>1</shape><spread>2.5</spread></FormationTemplate>
                <FormationSlot><formation>7</formation><slot>1</slot><angle>3.14</angle><distance>2</distance></FormationSlot>
                <GroupGuid><guid>10</guid><entry>1</entry></GroupGuid>
                <GroupMember><group>10</group><member>100</member><slot>0</slot></GroupMember>
                <CreatureSpawn><guid>100</guid><entry>5</entry><map>0</map><x>1</x><y>2</y><z>3</z><movement>Waypoint</movement></CreatureSpawn>
                <PoolMember><pool>4</pool><guid>100</guid></PoolMember>
                <CreatureLink><guid>100</guid><master>101</master></CreatureLink>
            </Tables>"#,
        )
        .expect("parse");

        assert_eq!(
            tables.group_templates[0],
            GroupTemplateRow {
                entry: 1,
                name: "Patrol".to_string(),
                formation: Some(7),
            }
        );
        assert_eq!(tables.formation_templates[0].options, 0);
        assert_eq!(tables.formation_slots.len(), 1);
        assert_eq!(tables.group_guids[0].guid, 10);
        assert_eq!(tables.group_members[0].member, 100);
        assert_eq!(tables.creature_spawns[0].movement, DefaultMovement::Waypoint);
        assert_eq!(tables.creature_spawns[0].spawn_dist, 0.0);
        assert_eq!(tables.pool_members[0].pool, 4);
        assert_eq!(tables.creature_links[0].master, 101);
        assert_eq!(tables.row_count(), 8);
    }

    #[test]
    fn invalid_root_is_rejected() {
        let err = parse("<Defs/>").expect_err("err");
        assert_eq!(err.code, ContentErrorCode::InvalidRoot);
        assert!(err.location.is_some());
    }

    #[test]
    fn unknown_row_type_is_rejected() {
        let err = parse("<Tables><Creature/></Tables>").expect_err("err");
        assert_eq!(err.code, ContentErrorCode::UnknownRowType);
    }

    #[test]
    fn missing_and_duplicate_fields_are_reported() {
        let err = parse("<Tables><GroupGuid><guid>1</guid></GroupGuid></Tables>").expect_err("err");
        assert_eq!(err.code, ContentErrorCode::MissingField);
        assert!(err.message.contains("entry"));

        let err = parse(
            "<Tables><GroupGuid><guid>1</guid><guid>2</guid><entry>1</entry></GroupGuid></Tables>",
        )
        .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::DuplicateField);
    }

    #[test]
    fn unknown_field_and_bad_values_are_reported() {
        let err = parse("<Tables><GroupGuid><guid>1</guid><entry>1</entry><mood>x</mood></GroupGuid></Tables>")
            .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::UnknownField);

        let err = parse("<Tables><GroupGuid><guid>-1</guid><entry>1</entry></GroupGuid></Tables>")
            .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::InvalidValue);

        let err = parse(
            "<Tables><FormationTemplate><id>1</id><shape>1</shape><spread>NaN</spread></FormationTemplate></Tables>",
        )
        .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::InvalidValue);

        let err = parse(
            "<Tables><CreatureSpawn><guid>1</guid><entry>1</entry><map>0</map><x>0</x><y>0</y><z>0</z><movement>Fly</movement></CreatureSpawn></Tables>",
        )
        .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::InvalidValue);
    }

    #[test]
    fn malformed_xml_reports_location() {
        let err = parse("<Tables><GroupGuid></Tables>").expect_err("err");
        assert_eq!(err.code, ContentErrorCode::XmlMalformed);
        assert!(err.location.is_some());
    }

    #[test]
    fn directory_load_reads_files_in_path_order() {
        let temp = TempDir::new().expect("temp");
        write_file(
            &temp.path().join("b.xml"),
            "<Tables><GroupTemplate><entry>2</entry><name>B</name></GroupTemplate></Tables>",
        );
        write_file(
            &temp.path().join("a").join("a.xml"),
            "<Tables><GroupTemplate><entry>1</entry><name>A</name></GroupTemplate></Tables>",
        );
        write_file(&temp.path().join("notes.txt"), "ignored");

        let tables = load_content_tables(temp.path()).expect("load");
        let names = tables
            .group_templates
            .iter()
            .map(|row| row.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn missing_directory_is_a_read_error() {
        let temp = TempDir::new().expect("temp");
        let err = load_content_tables(&temp.path().join("absent")).expect_err("err");
        assert_eq!(err.code, ContentErrorCode::ReadDir);
    }
}
