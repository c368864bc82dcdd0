use std::collections::HashMap;
use std::fmt;

use geojson::Geometry;
use sapkey_parser::FieldKind;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure reported by the storage sink. The core treats every sink failure
/// as fatal and, during materialization, as a rollback trigger.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(ProjectId);
id_type!(CategoryId);
id_type!(FieldId);
id_type!(LookupValueId);
id_type!(RecordId);

/// One imported contribution: a geometry plus a property map, addressed by
/// the (category, device id, start time) natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub category: CategoryId,
    pub device_id: String,
    pub start_time: String,
    pub geometry: Geometry,
    pub properties: Map<String, Value>,
}

impl StoredRecord {
    /// Structural equality with a candidate record: geometry plus the full
    /// property set (same key count, same value per key).
    pub fn same_content(&self, geometry: &Geometry, properties: &Map<String, Value>) -> bool {
        self.geometry == *geometry
            && self.properties.len() == properties.len()
            && properties
                .iter()
                .all(|(key, value)| self.properties.get(key) == Some(value))
    }
}

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub category: CategoryId,
    pub device_id: String,
    pub start_time: String,
    pub geometry: Geometry,
    pub properties: Map<String, Value>,
}

/// The data sink the pipeline writes into. In production this boundary is
/// backed by the hosting platform's project/category/field model; here the
/// crate ships [`MemorySink`] for tests and dry runs.
pub trait ProjectSink {
    fn create_project(&mut self, name: &str, creator: &str) -> Result<ProjectId, SinkError>;

    /// Deletes a project and everything nested under it (categories, fields,
    /// lookup values, records).
    fn delete_project(&mut self, project: ProjectId) -> Result<(), SinkError>;

    fn create_category(&mut self, project: ProjectId, name: &str) -> Result<CategoryId, SinkError>;

    fn create_field(
        &mut self,
        category: CategoryId,
        name: &str,
        key: &str,
        kind: FieldKind,
        required: bool,
    ) -> Result<FieldId, SinkError>;

    fn create_lookup_value(
        &mut self,
        field: FieldId,
        value: &str,
        ordinal: i64,
    ) -> Result<LookupValueId, SinkError>;

    /// Natural-key lookup. Duplicate detection is semantic, not structural:
    /// there is no uniqueness constraint behind this, callers are expected
    /// to lookup-then-compare.
    fn find_record(
        &self,
        category: CategoryId,
        device_id: &str,
        start_time: &str,
    ) -> Result<Option<StoredRecord>, SinkError>;

    fn create_record(&mut self, record: NewRecord) -> Result<RecordId, SinkError>;

    fn update_record(
        &mut self,
        record: RecordId,
        geometry: Geometry,
        properties: Map<String, Value>,
    ) -> Result<(), SinkError>;
}

#[derive(Debug, Clone)]
struct ProjectRow {
    name: String,
    creator: String,
}

#[derive(Debug, Clone)]
struct CategoryRow {
    project: ProjectId,
    name: String,
}

#[derive(Debug, Clone)]
pub struct FieldRow {
    pub category: CategoryId,
    pub name: String,
    pub key: String,
    pub kind: FieldKind,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct LookupValueRow {
    pub field: FieldId,
    pub value: String,
    pub ordinal: i64,
}

/// In-memory sink implementation. Single-owner and synchronous, matching
/// the request-scoped execution model of the pipeline.
#[derive(Debug, Default)]
pub struct MemorySink {
    next_id: i64,
    projects: HashMap<ProjectId, ProjectRow>,
    categories: HashMap<CategoryId, CategoryRow>,
    fields: HashMap<FieldId, FieldRow>,
    lookup_values: HashMap<LookupValueId, LookupValueRow>,
    records: HashMap<RecordId, StoredRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    pub fn project_name(&self, project: ProjectId) -> Option<&str> {
        self.projects.get(&project).map(|row| row.name.as_str())
    }

    pub fn project_creator(&self, project: ProjectId) -> Option<&str> {
        self.projects.get(&project).map(|row| row.creator.as_str())
    }

    pub fn categories_of(&self, project: ProjectId) -> Vec<CategoryId> {
        let mut ids: Vec<CategoryId> = self
            .categories
            .iter()
            .filter(|(_, row)| row.project == project)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    pub fn category_name(&self, category: CategoryId) -> Option<&str> {
        self.categories.get(&category).map(|row| row.name.as_str())
    }

    pub fn fields_of(&self, category: CategoryId) -> Vec<(FieldId, FieldRow)> {
        let mut rows: Vec<(FieldId, FieldRow)> = self
            .fields
            .iter()
            .filter(|(_, row)| row.category == category)
            .map(|(id, row)| (*id, row.clone()))
            .collect();
        rows.sort_by_key(|(id, _)| id.0);
        rows
    }

    /// Lookup values of a field in ordinal order.
    pub fn lookup_values_of(&self, field: FieldId) -> Vec<LookupValueRow> {
        let mut rows: Vec<LookupValueRow> = self
            .lookup_values
            .values()
            .filter(|row| row.field == field)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.ordinal);
        rows
    }

    pub fn records_of(&self, category: CategoryId) -> Vec<StoredRecord> {
        let mut rows: Vec<StoredRecord> = self
            .records
            .values()
            .filter(|record| record.category == category)
            .cloned()
            .collect();
        rows.sort_by_key(|record| record.id.0);
        rows
    }

    pub fn record(&self, id: RecordId) -> Option<&StoredRecord> {
        self.records.get(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
            && self.categories.is_empty()
            && self.fields.is_empty()
            && self.lookup_values.is_empty()
            && self.records.is_empty()
    }
}

impl ProjectSink for MemorySink {
    fn create_project(&mut self, name: &str, creator: &str) -> Result<ProjectId, SinkError> {
        let id = ProjectId(self.next_id());
        self.projects.insert(
            id,
            ProjectRow {
                name: name.to_string(),
                creator: creator.to_string(),
            },
        );
        Ok(id)
    }

    fn delete_project(&mut self, project: ProjectId) -> Result<(), SinkError> {
        if self.projects.remove(&project).is_none() {
            return Err(SinkError(format!("no project with id {project}")));
        }

        let categories: Vec<CategoryId> = self
            .categories
            .iter()
            .filter(|(_, row)| row.project == project)
            .map(|(id, _)| *id)
            .collect();
        self.categories.retain(|_, row| row.project != project);

        let fields: Vec<FieldId> = self
            .fields
            .iter()
            .filter(|(_, row)| categories.contains(&row.category))
            .map(|(id, _)| *id)
            .collect();
        self.fields
            .retain(|_, row| !categories.contains(&row.category));
        self.lookup_values
            .retain(|_, row| !fields.contains(&row.field));
        self.records
            .retain(|_, record| !categories.contains(&record.category));

        Ok(())
    }

    fn create_category(&mut self, project: ProjectId, name: &str) -> Result<CategoryId, SinkError> {
        if !self.projects.contains_key(&project) {
            return Err(SinkError(format!("no project with id {project}")));
        }
        let id = CategoryId(self.next_id());
        self.categories.insert(
            id,
            CategoryRow {
                project,
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    fn create_field(
        &mut self,
        category: CategoryId,
        name: &str,
        key: &str,
        kind: FieldKind,
        required: bool,
    ) -> Result<FieldId, SinkError> {
        if !self.categories.contains_key(&category) {
            return Err(SinkError(format!("no category with id {category}")));
        }
        let id = FieldId(self.next_id());
        self.fields.insert(
            id,
            FieldRow {
                category,
                name: name.to_string(),
                key: key.to_string(),
                kind,
                required,
            },
        );
        Ok(id)
    }

    fn create_lookup_value(
        &mut self,
        field: FieldId,
        value: &str,
        ordinal: i64,
    ) -> Result<LookupValueId, SinkError> {
        if !self.fields.contains_key(&field) {
            return Err(SinkError(format!("no field with id {field}")));
        }
        let id = LookupValueId(self.next_id());
        self.lookup_values.insert(
            id,
            LookupValueRow {
                field,
                value: value.to_string(),
                ordinal,
            },
        );
        Ok(id)
    }

    fn find_record(
        &self,
        category: CategoryId,
        device_id: &str,
        start_time: &str,
    ) -> Result<Option<StoredRecord>, SinkError> {
        Ok(self
            .records
            .values()
            .find(|record| {
                record.category == category
                    && record.device_id == device_id
                    && record.start_time == start_time
            })
            .cloned())
    }

    fn create_record(&mut self, record: NewRecord) -> Result<RecordId, SinkError> {
        if !self.categories.contains_key(&record.category) {
            return Err(SinkError(format!(
                "no category with id {}",
                record.category
            )));
        }
        let id = RecordId(self.next_id());
        self.records.insert(
            id,
            StoredRecord {
                id,
                category: record.category,
                device_id: record.device_id,
                start_time: record.start_time,
                geometry: record.geometry,
                properties: record.properties,
            },
        );
        Ok(id)
    }

    fn update_record(
        &mut self,
        record: RecordId,
        geometry: Geometry,
        properties: Map<String, Value>,
    ) -> Result<(), SinkError> {
        let stored = self
            .records
            .get_mut(&record)
            .ok_or_else(|| SinkError(format!("no record with id {record}")))?;
        stored.geometry = geometry;
        stored.properties = properties;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojson::Value as GeoValue;

    fn point(lon: f64, lat: f64) -> Geometry {
        Geometry::new(GeoValue::Point(vec![lon, lat]))
    }

    #[test]
    fn delete_project_cascades() {
        let mut sink = MemorySink::new();
        let project = sink.create_project("P", "creator").expect("project");
        let category = sink.create_category(project, "C").expect("category");
        let field = sink
            .create_field(category, "F", "F", FieldKind::Lookup, true)
            .expect("field");
        sink.create_lookup_value(field, "a", 0).expect("lookup");
        sink.create_record(NewRecord {
            category,
            device_id: "1".into(),
            start_time: "t".into(),
            geometry: point(0.0, 0.0),
            properties: Map::new(),
        })
        .expect("record");

        sink.delete_project(project).expect("delete");
        assert!(sink.is_empty());
    }

    #[test]
    fn find_record_matches_natural_key_only() {
        let mut sink = MemorySink::new();
        let project = sink.create_project("P", "creator").expect("project");
        let category = sink.create_category(project, "C").expect("category");
        sink.create_record(NewRecord {
            category,
            device_id: "77".into(),
            start_time: "2016-01-21T14:32:01.000+01:00".into(),
            geometry: point(-0.06, 51.51),
            properties: Map::new(),
        })
        .expect("record");

        let hit = sink
            .find_record(category, "77", "2016-01-21T14:32:01.000+01:00")
            .expect("lookup");
        assert!(hit.is_some());

        let miss = sink
            .find_record(category, "78", "2016-01-21T14:32:01.000+01:00")
            .expect("lookup");
        assert!(miss.is_none());
    }

    #[test]
    fn same_content_compares_geometry_and_properties() {
        let mut properties = Map::new();
        properties.insert("a".to_string(), Value::from(1));
        let record = StoredRecord {
            id: RecordId(1),
            category: CategoryId(1),
            device_id: "1".into(),
            start_time: "t".into(),
            geometry: point(1.0, 2.0),
            properties: properties.clone(),
        };

        assert!(record.same_content(&point(1.0, 2.0), &properties));
        assert!(!record.same_content(&point(1.0, 2.1), &properties));

        let mut more = properties.clone();
        more.insert("b".to_string(), Value::from(2));
        assert!(!record.same_content(&point(1.0, 2.0), &more));
    }
}
