use roxmltree::Node;

use crate::errors::ParserError;
use crate::model::{FieldDescription, FieldKind, ItemDescription};
use crate::tree::ElementKind;

/// Content categories a <Text> input can declare; these four make the field
/// numeric, anything else stays text.
const NUMERIC_CONTENT: &[&str] = &["UnsignedInt", "SignedInt", "UnsignedFloat", "SignedFloat"];

const ORIENTATION_AXES: &[(&str, &str)] = &[
    ("Azimuth", "storeAzimuth"),
    ("Pitch", "storePitch"),
    ("Roll", "storeRoll"),
];

/// Maps one recognized element onto the fields it contributes. Most kinds
/// yield exactly one field; Orientation up to three, Button possibly none.
pub(crate) fn map_element(
    kind: ElementKind,
    node: Node<'_, '_>,
) -> Result<Vec<FieldDescription>, ParserError> {
    match kind {
        ElementKind::Text => Ok(vec![map_text(node)?]),
        ElementKind::Orientation => map_orientation(node),
        ElementKind::Check => Ok(vec![truefalse_field(base_field(node, "Check")?)]),
        ElementKind::Button => map_button(node),
        ElementKind::List => Ok(vec![map_lookup(node, "List", "Item")?]),
        ElementKind::MultiList => Ok(vec![map_lookup(node, "MultiList", "Item")?]),
        ElementKind::Choice => Ok(vec![map_lookup(node, "Choice", "Choice")?]),
        _ => Ok(Vec::new()),
    }
}

fn base_field(node: Node<'_, '_>, element: &'static str) -> Result<FieldDescription, ParserError> {
    let sapelli_id = node
        .attribute("id")
        .ok_or(ParserError::MissingAttribute {
            element,
            attribute: "id",
        })?
        .to_string();

    Ok(FieldDescription {
        sapelli_id,
        caption: node.attribute("caption").map(str::to_string),
        description: node.attribute("description").map(str::to_string),
        // Absence of the attribute means the input is mandatory.
        required: node.attribute("optional") != Some("true"),
        truefalse: false,
        geokey_type: None,
        items: Vec::new(),
    })
}

fn map_text(node: Node<'_, '_>) -> Result<FieldDescription, ParserError> {
    let mut field = base_field(node, "Text")?;
    let content = node.attribute("content").unwrap_or("");
    field.geokey_type = if NUMERIC_CONTENT.contains(&content) {
        Some(FieldKind::Numeric)
    } else {
        Some(FieldKind::Text)
    };
    Ok(field)
}

fn map_orientation(node: Node<'_, '_>) -> Result<Vec<FieldDescription>, ParserError> {
    let base = base_field(node, "Orientation")?;
    let mut fields = Vec::with_capacity(ORIENTATION_AXES.len());
    for (axis, store_attribute) in ORIENTATION_AXES {
        if node.attribute(*store_attribute) == Some("false") {
            continue;
        }
        let mut field = base.clone();
        field.sapelli_id = format!("{}.{}", base.sapelli_id, axis);
        field.caption = None;
        field.geokey_type = Some(FieldKind::Numeric);
        fields.push(field);
    }
    Ok(fields)
}

fn map_button(node: Node<'_, '_>) -> Result<Vec<FieldDescription>, ParserError> {
    match node.attribute("column").unwrap_or("none") {
        "none" => Ok(Vec::new()),
        "datetime" => {
            let mut field = base_field(node, "Button")?;
            field.geokey_type = Some(FieldKind::DateTime);
            Ok(vec![field])
        }
        "boolean" => Ok(vec![truefalse_field(base_field(node, "Button")?)]),
        // Unresolved column values yield a field with no type assigned; the
        // materializer warns and skips it.
        _ => Ok(vec![base_field(node, "Button")?]),
    }
}

fn truefalse_field(mut field: FieldDescription) -> FieldDescription {
    field.truefalse = true;
    field.geokey_type = Some(FieldKind::Lookup);
    field.items = vec![
        ItemDescription {
            value: "false".to_string(),
            img: None,
        },
        ItemDescription {
            value: "true".to_string(),
            img: None,
        },
    ];
    field
}

fn map_lookup(
    node: Node<'_, '_>,
    element: &'static str,
    child_tag: &str,
) -> Result<FieldDescription, ParserError> {
    let mut field = base_field(node, element)?;
    field.geokey_type = Some(FieldKind::Lookup);
    field.items = flatten_leaves(node, child_tag);
    Ok(field)
}

/// Depth-first, left-to-right collection of leaf items. A node is a leaf iff
/// it has no child element with the expected tag; internal nodes contribute
/// nothing. The resulting order is the ordinal encoding used in CSV exports.
fn flatten_leaves(node: Node<'_, '_>, child_tag: &str) -> Vec<ItemDescription> {
    let mut items = Vec::new();
    collect_leaves(node, child_tag, &mut items);
    items
}

fn collect_leaves(node: Node<'_, '_>, child_tag: &str, items: &mut Vec<ItemDescription>) {
    let children: Vec<Node<'_, '_>> = node
        .children()
        .filter(|child| child.is_element() && child.tag_name().name() == child_tag)
        .collect();

    if children.is_empty() {
        items.push(ItemDescription {
            value: node.attribute("value").unwrap_or_default().to_string(),
            img: node.attribute("img").map(str::to_string),
        });
        return;
    }

    for child in children {
        collect_leaves(child, child_tag, items);
    }
}
