use geojson::Geometry;
use sapkey_core::materializer::{materialize, IMPLICIT_FIELDS};
use sapkey_core::sink::{
    CategoryId, FieldId, LookupValueId, MemorySink, NewRecord, ProjectId, ProjectSink, RecordId,
    SinkError, StoredRecord,
};
use sapkey_core::{load_project, ProjectRegistry, SapelliError};
use sapkey_parser::{parse_project, FieldKind};
use serde_json::{Map, Value};

fn fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../sapkey-parser/tests/data")
        .join(name);
    std::fs::read_to_string(path).expect("read fixture")
}

#[test]
fn materializes_horniman_schema() {
    let description = parse_project(&fixture("Horniman.xml")).expect("parse");
    let mut sink = MemorySink::new();

    let registered = materialize(&mut sink, &description, "carl").expect("materialize");

    assert_eq!(sink.project_count(), 1);
    assert_eq!(
        sink.project_name(registered.project_id),
        Some("Mapping Cultures (v1.1)")
    );
    assert_eq!(sink.project_creator(registered.project_id), Some("carl"));

    let categories = sink.categories_of(registered.project_id);
    assert_eq!(categories.len(), 1);
    assert_eq!(sink.category_name(categories[0]), Some("Horniman Gardens"));

    // Two implicit fields (no end time stored) plus the one declared field.
    let fields = sink.fields_of(categories[0]);
    assert_eq!(fields.len(), 3);
    let keys: Vec<&str> = fields.iter().map(|(_, row)| row.key.as_str()).collect();
    assert_eq!(keys, ["DeviceId", "StartTime", "Garden_Feature"]);
    assert_eq!(fields[0].1.kind, FieldKind::Numeric);
    assert_eq!(fields[1].1.kind, FieldKind::DateTime);
    assert_eq!(fields[2].1.kind, FieldKind::Lookup);

    let form = &registered.forms[0];
    assert_eq!(form.model_schema_number, 1);
    assert_eq!(form.locations, ["Position"]);

    let garden_feature = &form.fields[0];
    assert_eq!(garden_feature.items.len(), 14);
    let values = sink.lookup_values_of(garden_feature.field_id);
    assert_eq!(values.len(), 14);
    assert_eq!(values[0].value, "Red Flowers");
    assert_eq!(values[0].ordinal, 0);
    assert_eq!(values[13].value, "Dog Bin");
    assert_eq!(values[13].ordinal, 13);
}

#[test]
fn end_time_field_is_conditional() {
    let description = parse_project(&fixture("Complex.xml")).expect("parse");
    let mut sink = MemorySink::new();

    let registered = materialize(&mut sink, &description, "carl").expect("materialize");

    let survey = registered
        .form_by_sapelli_id("Survey")
        .expect("Survey form");
    let survey_keys: Vec<String> = sink
        .fields_of(survey.category_id)
        .into_iter()
        .map(|(_, row)| row.key)
        .collect();
    assert!(survey_keys.contains(&"EndTime".to_string()));

    let quick = registered.form_by_sapelli_id("Quick").expect("Quick form");
    let quick_keys: Vec<String> = sink
        .fields_of(quick.category_id)
        .into_iter()
        .map(|(_, row)| row.key)
        .collect();
    assert!(!quick_keys.contains(&"EndTime".to_string()));
}

#[test]
fn untyped_fields_are_not_materialized() {
    let description = parse_project(&fixture("Complex.xml")).expect("parse");
    let mut sink = MemorySink::new();

    let registered = materialize(&mut sink, &description, "carl").expect("materialize");
    let survey = registered
        .form_by_sapelli_id("Survey")
        .expect("Survey form");

    assert!(!survey.fields.iter().any(|field| field.sapelli_id == "Odd"));
    assert!(!sink
        .fields_of(survey.category_id)
        .iter()
        .any(|(_, row)| row.key == "Odd"));
}

#[test]
fn form_without_location_is_rejected() {
    let xml = r#"<Project name="NoLocation" id="2222" version="1.0">
        <Form id="NoLocForm">
            <Text id="Note" />
        </Form>
    </Project>"#;
    let description = parse_project(xml).expect("parse");
    let mut sink = MemorySink::new();

    let err = materialize(&mut sink, &description, "carl").expect_err("expected rejection");
    assert!(matches!(
        err,
        SapelliError::FormWithoutLocation { ref form } if form == "NoLocForm"
    ));
    assert!(sink.is_empty());
}

#[test]
fn implicit_field_table_shape() {
    assert_eq!(IMPLICIT_FIELDS.len(), 3);
    assert!(IMPLICIT_FIELDS
        .iter()
        .filter(|field| field.end_time_only)
        .all(|field| field.key == "EndTime"));
}

#[test]
fn failure_mid_population_rolls_back_everything() {
    let description = parse_project(&fixture("Horniman.xml")).expect("parse");
    let mut sink = FailingSink {
        inner: MemorySink::new(),
        lookups_until_failure: 5,
    };

    let err = materialize(&mut sink, &description, "carl").expect_err("expected sink failure");
    assert!(matches!(err, SapelliError::Sink(_)));
    assert!(sink.inner.is_empty());
}

#[test]
fn duplicate_project_upload_is_rejected_without_mutation() {
    let xml = fixture("Horniman.xml");
    let mut sink = MemorySink::new();
    let mut registry = ProjectRegistry::new();

    load_project(&mut sink, &mut registry, &xml, "carl").expect("first load");
    let err =
        load_project(&mut sink, &mut registry, &xml, "carl").expect_err("expected duplicate");

    assert!(matches!(err, SapelliError::DuplicateProject { sapelli_id: 1111, .. }));
    assert_eq!(sink.project_count(), 1);
}

#[test]
fn description_lists_form_triples() {
    let description = parse_project(&fixture("Complex.xml")).expect("parse");
    let mut sink = MemorySink::new();
    let registered = materialize(&mut sink, &description, "carl").expect("materialize");

    let info = registered.description();
    assert_eq!(info.name, "Mapping Cultures [Test] (v2.0)");
    assert_eq!(info.model_id, registered.model_id);
    assert_eq!(info.forms.len(), 2);
    assert_eq!(info.forms[0].sapelli_id, "Survey");
    assert_eq!(info.forms[0].model_schema_number, 1);
    assert_eq!(info.forms[0].category_id, registered.forms[0].category_id);
}

/// Delegates to a [`MemorySink`] but fails the nth lookup-value creation,
/// simulating a sink falling over mid-population.
struct FailingSink {
    inner: MemorySink,
    lookups_until_failure: usize,
}

impl ProjectSink for FailingSink {
    fn create_project(&mut self, name: &str, creator: &str) -> Result<ProjectId, SinkError> {
        self.inner.create_project(name, creator)
    }

    fn delete_project(&mut self, project: ProjectId) -> Result<(), SinkError> {
        self.inner.delete_project(project)
    }

    fn create_category(&mut self, project: ProjectId, name: &str) -> Result<CategoryId, SinkError> {
        self.inner.create_category(project, name)
    }

    fn create_field(
        &mut self,
        category: CategoryId,
        name: &str,
        key: &str,
        kind: FieldKind,
        required: bool,
    ) -> Result<FieldId, SinkError> {
        self.inner.create_field(category, name, key, kind, required)
    }

    fn create_lookup_value(
        &mut self,
        field: FieldId,
        value: &str,
        ordinal: i64,
    ) -> Result<LookupValueId, SinkError> {
        if self.lookups_until_failure == 0 {
            return Err(SinkError("simulated lookup-value failure".to_string()));
        }
        self.lookups_until_failure -= 1;
        self.inner.create_lookup_value(field, value, ordinal)
    }

    fn find_record(
        &self,
        category: CategoryId,
        device_id: &str,
        start_time: &str,
    ) -> Result<Option<StoredRecord>, SinkError> {
        self.inner.find_record(category, device_id, start_time)
    }

    fn create_record(&mut self, record: NewRecord) -> Result<RecordId, SinkError> {
        self.inner.create_record(record)
    }

    fn update_record(
        &mut self,
        record: RecordId,
        geometry: Geometry,
        properties: Map<String, Value>,
    ) -> Result<(), SinkError> {
        self.inner.update_record(record, geometry, properties)
    }
}
