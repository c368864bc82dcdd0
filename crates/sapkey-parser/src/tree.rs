use roxmltree::{Document, Node};

use crate::errors::ParserError;
use crate::mapper;
use crate::model::{FormDescription, LocationDescription, ProjectDescription};

/// Closed set of element tags the parser recognizes. Everything else maps to
/// `Unknown` and is skipped, so documents written by newer collector
/// versions still load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ElementKind {
    Form,
    Page,
    Location,
    Text,
    List,
    MultiList,
    Choice,
    Item,
    Orientation,
    Check,
    Button,
    Unknown,
}

pub(crate) fn classify(tag: &str) -> ElementKind {
    match tag {
        "Form" => ElementKind::Form,
        "Page" => ElementKind::Page,
        "Location" => ElementKind::Location,
        "Text" => ElementKind::Text,
        "List" => ElementKind::List,
        "MultiList" => ElementKind::MultiList,
        "Choice" => ElementKind::Choice,
        "Item" => ElementKind::Item,
        "Orientation" => ElementKind::Orientation,
        "Check" => ElementKind::Check,
        "Button" => ElementKind::Button,
        _ => ElementKind::Unknown,
    }
}

/// Parses a Sapelli project definition document into its transient
/// in-memory description. Pure function of the document text; the
/// fingerprint is a signed 32-bit content hash over the raw bytes.
pub fn parse_project(xml: &str) -> Result<ProjectDescription, ParserError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();

    let name = root
        .attribute("name")
        .ok_or(ParserError::MissingAttribute {
            element: "project root",
            attribute: "name",
        })?
        .to_string();

    let raw_id = root.attribute("id").ok_or(ParserError::MissingAttribute {
        element: "project root",
        attribute: "id",
    })?;
    let sapelli_id = raw_id
        .trim()
        .parse::<i64>()
        .map_err(|err| ParserError::InvalidAttribute {
            element: "project root",
            attribute: "id",
            value: raw_id.to_string(),
            message: err.to_string(),
        })?;

    let variant = root.attribute("variant").map(str::to_string);
    let version = root.attribute("version").unwrap_or("1.0").to_string();

    let mut forms = Vec::new();
    for child in root.children().filter(Node::is_element) {
        if classify(child.tag_name().name()) == ElementKind::Form {
            let schema_number = forms.len() as i32 + 1;
            forms.push(parse_form(child, schema_number)?);
        }
    }

    if forms.is_empty() {
        return Err(ParserError::NoForms);
    }

    let fingerprint = fingerprint(xml);

    Ok(ProjectDescription {
        name,
        variant,
        version,
        sapelli_id,
        fingerprint,
        // The fingerprint is masked to its unsigned 32-bit value before the
        // shift, so the model id is always non-negative and matches the
        // all-digits token CSV exports carry.
        model_id: ((fingerprint & 0xffff_ffff) << 24) + sapelli_id,
        forms,
    })
}

fn parse_form(node: Node<'_, '_>, schema_number: i32) -> Result<FormDescription, ParserError> {
    let sapelli_id = node
        .attribute("id")
        .ok_or(ParserError::MissingAttribute {
            element: "Form",
            attribute: "id",
        })?
        .to_string();

    let mut form = FormDescription {
        sapelli_id,
        model_schema_number: schema_number,
        stores_end_time: node.attribute("storeEndTime") == Some("true"),
        locations: Vec::new(),
        fields: Vec::new(),
    };

    collect_fields(node, &mut form)?;
    Ok(form)
}

/// Walks the children of a form (or page) element, flattening nested pages
/// into the parent form in document order.
fn collect_fields(node: Node<'_, '_>, form: &mut FormDescription) -> Result<(), ParserError> {
    for child in node.children().filter(Node::is_element) {
        if child.attribute("noColumn") == Some("true") {
            continue;
        }

        match classify(child.tag_name().name()) {
            ElementKind::Page => collect_fields(child, form)?,
            ElementKind::Location => {
                let sapelli_id = child
                    .attribute("id")
                    .ok_or(ParserError::MissingAttribute {
                        element: "Location",
                        attribute: "id",
                    })?
                    .to_string();
                form.locations.push(LocationDescription { sapelli_id });
            }
            kind @ (ElementKind::Text
            | ElementKind::List
            | ElementKind::MultiList
            | ElementKind::Choice
            | ElementKind::Orientation
            | ElementKind::Check
            | ElementKind::Button) => {
                form.fields.extend(mapper::map_element(kind, child)?);
            }
            // Nested forms, stray items and unrecognized tags produce nothing.
            ElementKind::Form | ElementKind::Item | ElementKind::Unknown => {}
        }
    }
    Ok(())
}

fn fingerprint(xml: &str) -> i64 {
    let hash = blake3::hash(xml.as_bytes());
    let bytes = hash.as_bytes();
    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64
}
