use std::fmt;

use serde::{Deserialize, Serialize};

/// Generic field type a Sapelli input maps onto, named after the target
/// platform's field classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Text,
    Numeric,
    DateTime,
    Lookup,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "TextField",
            FieldKind::Numeric => "NumericField",
            FieldKind::DateTime => "DateTimeField",
            FieldKind::Lookup => "LookupField",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One selectable value of a Lookup field. The position of the item in its
/// field's item list is the ordinal ("number") Sapelli writes into CSV
/// exports, so item order is part of the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescription {
    pub value: String,
    pub img: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescription {
    pub sapelli_id: String,
    pub caption: Option<String>,
    pub description: Option<String>,
    pub required: bool,
    /// Marks a boolean stored as a two-item lookup; CSV cells for these
    /// fields hold "false"/"true"-ish strings rather than item ordinals.
    pub truefalse: bool,
    /// `None` for inputs the mapper deliberately leaves untyped (the
    /// unresolved Button `column` values); the materializer skips those.
    pub geokey_type: Option<FieldKind>,
    pub items: Vec<ItemDescription>,
}

impl FieldDescription {
    /// Display name used when materializing the field.
    pub fn name(&self) -> &str {
        self.caption.as_deref().unwrap_or(&self.sapelli_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDescription {
    pub sapelli_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormDescription {
    pub sapelli_id: String,
    /// 1-based position of the form within the project; CSV exports carry it
    /// in their `modelSchemaNumber=` header token.
    pub model_schema_number: i32,
    pub stores_end_time: bool,
    pub locations: Vec<LocationDescription>,
    pub fields: Vec<FieldDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDescription {
    pub name: String,
    pub variant: Option<String>,
    pub version: String,
    pub sapelli_id: i64,
    /// Signed 32-bit content hash over the raw project definition document,
    /// widened to i64.
    pub fingerprint: i64,
    /// `((fingerprint & 0xffffffff) << 24) + sapelli_id`; uniquely addresses
    /// one build of a project and is what CSV exports carry in their
    /// `modelID=` token. Always non-negative.
    pub model_id: i64,
    pub forms: Vec<FormDescription>,
}

impl ProjectDescription {
    /// The name under which the project is materialized, e.g.
    /// `Mapping Cultures [Test] (v2.0)`.
    pub fn display_name(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{} {} (v{})", self.name, variant, self.version),
            None => format!("{} (v{})", self.name, self.version),
        }
    }
}
