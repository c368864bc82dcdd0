use std::collections::HashMap;
use std::io::Read;

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat};
use csv::StringRecord;
use geojson::{Geometry, Value as GeoValue};
use sapkey_parser::FieldKind;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::SapelliError;
use crate::identity;
use crate::registry::{RegisteredField, RegisteredForm, RegisteredProject};
use crate::sink::{CategoryId, NewRecord, ProjectSink};

/// Reserved CSV columns written by every Sapelli export.
const DEVICE_ID_COLUMN: &str = "DeviceID";
const START_TIME_COLUMN: &str = "StartTime";
const END_TIME_COLUMN: &str = "EndTime";

/// The five mutually exclusive outcomes of reconciling one row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: u64,
    pub created_joined_locations: u64,
    pub created_no_location: u64,
    pub updated: u64,
    pub ignored_duplicates: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timeframe {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReceipt {
    pub form: String,
    pub category_id: CategoryId,
    pub rows: u64,
    pub summary: ImportSummary,
    /// Best-effort range of the batch's StartTime values; `None` when no
    /// cell parsed as a timestamp.
    pub timeframe: Option<Timeframe>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocationTag {
    Plain,
    Joined,
    Missing,
}

/// Streams a Sapelli CSV export into the sink, reconciling each row against
/// already-stored records by (category, device id, start time) natural key.
///
/// Rows are written as they are processed: a failure on row N leaves rows
/// 1..N-1 in the sink. Concurrent imports of the same project are not
/// guarded against; the lookup-then-compare sequence assumes a single
/// caller at a time.
pub fn import_csv<S: ProjectSink, R: Read>(
    sink: &mut S,
    project: &RegisteredProject,
    reader: R,
    selected_form: Option<CategoryId>,
) -> Result<ImportReceipt, SapelliError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let header = csv_reader.headers()?.clone();
    let form = identity::resolve_form(project, &header, selected_form)?;
    let columns = ColumnMap::resolve(&header, form)?;

    let mut summary = ImportSummary::default();
    let mut rows = 0u64;
    let mut timeframe = TimeframeTracker::default();

    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        rows += 1;

        let (geometry, tag) = build_geometry(&record, &columns, line)?;
        let device_id = columns.cell(&record, columns.device_id);
        let start_time = columns.cell(&record, columns.start_time);
        timeframe.observe(start_time);

        let properties = build_properties(&record, form, &columns, line)?;

        match sink.find_record(form.category_id, device_id, start_time)? {
            None => {
                sink.create_record(NewRecord {
                    category: form.category_id,
                    device_id: device_id.to_string(),
                    start_time: start_time.to_string(),
                    geometry,
                    properties,
                })?;
                match tag {
                    LocationTag::Plain => summary.created += 1,
                    LocationTag::Joined => summary.created_joined_locations += 1,
                    LocationTag::Missing => summary.created_no_location += 1,
                }
            }
            Some(existing) => {
                if existing.same_content(&geometry, &properties) {
                    summary.ignored_duplicates += 1;
                } else {
                    sink.update_record(existing.id, geometry, properties)?;
                    summary.updated += 1;
                }
            }
        }
    }

    info!(
        form = %form.sapelli_id,
        rows,
        created = summary.created,
        joined = summary.created_joined_locations,
        no_location = summary.created_no_location,
        updated = summary.updated,
        ignored = summary.ignored_duplicates,
        "CSV import finished"
    );

    Ok(ImportReceipt {
        form: form.sapelli_id.clone(),
        category_id: form.category_id,
        rows,
        summary,
        timeframe: timeframe.finish(),
    })
}

/// Header column positions for everything the resolved form needs. Resolved
/// once up front so missing columns fail before any row is written.
struct ColumnMap {
    device_id: usize,
    start_time: usize,
    end_time: Option<usize>,
    /// One (longitude, latitude) index pair per declared location field.
    locations: Vec<(String, usize, usize)>,
    fields: Vec<usize>,
}

impl ColumnMap {
    fn resolve(header: &StringRecord, form: &RegisteredForm) -> Result<Self, SapelliError> {
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (index, name) in header.iter().enumerate() {
            positions.entry(name).or_insert(index);
        }

        let require = |column: &str| -> Result<usize, SapelliError> {
            positions
                .get(column)
                .copied()
                .ok_or_else(|| SapelliError::MissingColumn {
                    column: column.to_string(),
                })
        };

        let mut locations = Vec::with_capacity(form.locations.len());
        for location in &form.locations {
            let longitude = require(&format!("{location}.Longitude"))?;
            let latitude = require(&format!("{location}.Latitude"))?;
            locations.push((location.clone(), longitude, latitude));
        }

        let mut fields = Vec::with_capacity(form.fields.len());
        for field in &form.fields {
            fields.push(require(&field.sapelli_id)?);
        }

        Ok(Self {
            device_id: require(DEVICE_ID_COLUMN)?,
            start_time: require(START_TIME_COLUMN)?,
            end_time: if form.stores_end_time {
                positions.get(END_TIME_COLUMN).copied()
            } else {
                None
            },
            locations,
            fields,
        })
    }

    fn cell<'r>(&self, record: &'r StringRecord, index: usize) -> &'r str {
        record.get(index).unwrap_or("")
    }
}

/// Three-way location policy: zero valid coordinate pairs yields a dummy
/// `[0.0, 0.0]` point (the row is still imported, just flagged), exactly
/// one yields an ordinary point, more than one yields a joined multi-point.
fn build_geometry(
    record: &StringRecord,
    columns: &ColumnMap,
    line: u64,
) -> Result<(Geometry, LocationTag), SapelliError> {
    let mut pairs: Vec<Vec<f64>> = Vec::new();

    for (location, longitude_index, latitude_index) in &columns.locations {
        let longitude = columns.cell(record, *longitude_index);
        let latitude = columns.cell(record, *latitude_index);
        // A pair counts only if both coordinates are present.
        if longitude.trim().is_empty() || latitude.trim().is_empty() {
            continue;
        }
        let longitude = parse_coordinate(longitude, &format!("{location}.Longitude"), line)?;
        let latitude = parse_coordinate(latitude, &format!("{location}.Latitude"), line)?;
        pairs.push(vec![longitude, latitude]);
    }

    Ok(match pairs.len() {
        0 => (
            Geometry::new(GeoValue::Point(vec![0.0, 0.0])),
            LocationTag::Missing,
        ),
        1 => (
            Geometry::new(GeoValue::Point(pairs.remove(0))),
            LocationTag::Plain,
        ),
        _ => (Geometry::new(GeoValue::MultiPoint(pairs)), LocationTag::Joined),
    })
}

fn parse_coordinate(value: &str, column: &str, line: u64) -> Result<f64, SapelliError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| SapelliError::InvalidNumber {
            line,
            column: column.to_string(),
            value: value.to_string(),
        })
}

fn build_properties(
    record: &StringRecord,
    form: &RegisteredForm,
    columns: &ColumnMap,
    line: u64,
) -> Result<Map<String, Value>, SapelliError> {
    let mut properties = Map::new();

    // Reserved metadata properties are copied verbatim, keyed by the
    // implicit field keys.
    properties.insert(
        "DeviceId".to_string(),
        Value::String(columns.cell(record, columns.device_id).to_string()),
    );
    properties.insert(
        "StartTime".to_string(),
        Value::String(columns.cell(record, columns.start_time).to_string()),
    );
    if let Some(end_time_index) = columns.end_time {
        let end_time = columns.cell(record, end_time_index);
        if !end_time.is_empty() {
            properties.insert("EndTime".to_string(), Value::String(end_time.to_string()));
        }
    }

    for (field, index) in form.fields.iter().zip(&columns.fields) {
        let raw = columns.cell(record, *index);
        if let Some(value) = decode_field_value(field, raw, line)? {
            properties.insert(field.key.clone(), value);
        }
    }

    Ok(properties)
}

/// Per-field value translation. Returns `None` when the cell contributes no
/// property at all (empty non-boolean cells).
fn decode_field_value(
    field: &RegisteredField,
    raw: &str,
    line: u64,
) -> Result<Option<Value>, SapelliError> {
    if field.truefalse {
        // Boolean coercion happens before the lookup step: empty or "false"
        // is 0, anything else is 1, and that 0/1 is the item ordinal.
        let coerced = if raw.is_empty() || raw == "false" { 0 } else { 1 };
        return Ok(Some(match field.item_by_number(coerced) {
            Some(item) => Value::from(item.lookup_value_id.0),
            None => Value::from(coerced),
        }));
    }

    if raw.is_empty() {
        return Ok(None);
    }

    if field.kind == FieldKind::Lookup {
        let item = raw
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|number| field.item_by_number(number));
        return match item {
            Some(item) => Ok(Some(Value::from(item.lookup_value_id.0))),
            None => Err(SapelliError::UnknownLookupValue {
                line,
                field: field.sapelli_id.clone(),
                value: raw.to_string(),
            }),
        };
    }

    Ok(Some(Value::String(raw.to_string())))
}

#[derive(Default)]
struct TimeframeTracker {
    start: Option<DateTime<FixedOffset>>,
    end: Option<DateTime<FixedOffset>>,
}

impl TimeframeTracker {
    fn observe(&mut self, value: &str) {
        let Some(parsed) = parse_start_time(value) else {
            return;
        };
        if self.start.map_or(true, |start| parsed < start) {
            self.start = Some(parsed);
        }
        if self.end.map_or(true, |end| parsed > end) {
            self.end = Some(parsed);
        }
    }

    fn finish(self) -> Option<Timeframe> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(Timeframe {
                start: start.to_rfc3339_opts(SecondsFormat::Millis, true),
                end: end.to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
            _ => None,
        }
    }
}

fn parse_start_time(value: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed);
    }
    static FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];
    for format in FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed.and_utc().fixed_offset());
        }
    }
    None
}
