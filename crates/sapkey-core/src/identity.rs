use csv::StringRecord;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SapelliError;
use crate::registry::{RegisteredForm, RegisteredProject};
use crate::sink::CategoryId;

static MODEL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^modelID=(\d+)").expect("model id pattern"));
static SCHEMA_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^modelSchemaNumber=(\d+)").expect("schema number pattern"));

/// Resolves which form an uploaded CSV belongs to, from the identity tokens
/// Sapelli writes into the export header and/or an explicit form selection.
///
/// Header identity wins when present and is cross-checked against both the
/// project's model id and any explicit selection; without header identity an
/// explicit selection is mandatory.
pub fn resolve_form<'p>(
    project: &'p RegisteredProject,
    header: &StringRecord,
    selected: Option<CategoryId>,
) -> Result<&'p RegisteredForm, SapelliError> {
    let model_id = extract(&MODEL_ID, header);
    let schema_number = extract(&SCHEMA_NUMBER, header);

    if let (Some(model_id), Some(schema_number)) = (model_id, schema_number) {
        if model_id != project.model_id {
            return Err(SapelliError::ModelIdMismatch {
                header: model_id,
                project: project.model_id,
            });
        }

        // A token outside i32 range cannot name any form; wrapping it would
        // let it alias a real schema number.
        let form = i32::try_from(schema_number)
            .ok()
            .and_then(|number| project.form_by_schema_number(number))
            .ok_or_else(|| SapelliError::UnknownSchemaNumber {
                schema_number,
                project: project.display_name.clone(),
            })?;

        if let Some(selected) = selected {
            if selected != form.category_id {
                return Err(SapelliError::FormSelectionConflict {
                    selected: selected.0,
                    header: form.category_id.0,
                });
            }
        }

        return Ok(form);
    }

    match selected {
        Some(category) => {
            project
                .form_by_category(category)
                .ok_or(SapelliError::UnknownForm {
                    category: category.0,
                    project: project.display_name.clone(),
                })
        }
        None => Err(SapelliError::NoFormIdentification),
    }
}

/// First header token matching the pattern, parsed as an integer. Malformed
/// or absent tokens are not fatal here; the caller falls back to the
/// explicit selection.
fn extract(pattern: &Regex, header: &StringRecord) -> Option<i64> {
    header
        .iter()
        .find_map(|cell| pattern.captures(cell.trim()))
        .and_then(|captures| captures.get(1))
        .and_then(|digits| digits.as_str().parse::<i64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegisteredForm;
    use crate::sink::ProjectId;

    fn project() -> RegisteredProject {
        RegisteredProject {
            project_id: ProjectId(1),
            name: "Mapping Cultures".into(),
            display_name: "Mapping Cultures (v1.1)".into(),
            sapelli_id: 1111,
            fingerprint: 42,
            model_id: (42 << 24) + 1111,
            forms: vec![
                form("Horniman Gardens", 1, 10),
                form("Second Form", 2, 20),
            ],
        }
    }

    fn form(id: &str, schema_number: i32, category: i64) -> RegisteredForm {
        RegisteredForm {
            sapelli_id: id.into(),
            model_schema_number: schema_number,
            category_id: CategoryId(category),
            stores_end_time: false,
            locations: vec!["Position".into()],
            fields: Vec::new(),
        }
    }

    fn header(cells: &[&str]) -> StringRecord {
        StringRecord::from(cells.to_vec())
    }

    #[test]
    fn header_identity_resolves_form() {
        let project = project();
        let model_id = project.model_id;
        let cells = [
            format!("modelID={model_id}"),
            "modelSchemaNumber=2".to_string(),
            "DeviceID".to_string(),
        ];
        let cells: Vec<&str> = cells.iter().map(String::as_str).collect();

        let resolved = resolve_form(&project, &header(&cells), None).expect("resolve");
        assert_eq!(resolved.sapelli_id, "Second Form");
    }

    #[test]
    fn model_id_mismatch_is_fatal() {
        let project = project();
        let err = resolve_form(
            &project,
            &header(&["modelID=999", "modelSchemaNumber=1"]),
            None,
        )
        .expect_err("expected mismatch");
        assert!(matches!(err, SapelliError::ModelIdMismatch { .. }));
    }

    #[test]
    fn unknown_schema_number_is_fatal() {
        let project = project();
        let model_id = project.model_id;
        let cells = [format!("modelID={model_id}"), "modelSchemaNumber=7".into()];
        let cells: Vec<&str> = cells.iter().map(String::as_str).collect();

        let err = resolve_form(&project, &header(&cells), None).expect_err("expected error");
        assert!(matches!(err, SapelliError::UnknownSchemaNumber { .. }));
    }

    #[test]
    fn schema_number_beyond_i32_range_is_unknown() {
        let project = project();
        let model_id = project.model_id;
        // 4294967297 wraps to 1 under a plain i32 cast, which would resolve
        // the first form.
        let cells = [
            format!("modelID={model_id}"),
            "modelSchemaNumber=4294967297".into(),
        ];
        let cells: Vec<&str> = cells.iter().map(String::as_str).collect();

        let err = resolve_form(&project, &header(&cells), None).expect_err("expected error");
        assert!(matches!(
            err,
            SapelliError::UnknownSchemaNumber {
                schema_number: 4294967297,
                ..
            }
        ));
    }

    #[test]
    fn explicit_selection_conflicting_with_header_is_fatal() {
        let project = project();
        let model_id = project.model_id;
        let cells = [format!("modelID={model_id}"), "modelSchemaNumber=1".into()];
        let cells: Vec<&str> = cells.iter().map(String::as_str).collect();

        let err = resolve_form(&project, &header(&cells), Some(CategoryId(20)))
            .expect_err("expected conflict");
        assert!(matches!(err, SapelliError::FormSelectionConflict { .. }));
    }

    #[test]
    fn malformed_tokens_fall_back_to_selection() {
        let project = project();
        let resolved = resolve_form(
            &project,
            &header(&["modelID=abc", "modelSchemaNumber="]),
            Some(CategoryId(10)),
        )
        .expect("resolve via selection");
        assert_eq!(resolved.sapelli_id, "Horniman Gardens");
    }

    #[test]
    fn missing_identity_without_selection_is_fatal() {
        let project = project();
        let err = resolve_form(&project, &header(&["DeviceID", "StartTime"]), None)
            .expect_err("expected error");
        assert!(matches!(err, SapelliError::NoFormIdentification));
    }

    #[test]
    fn selection_for_unknown_category_is_fatal() {
        let project = project();
        let err = resolve_form(&project, &header(&["DeviceID"]), Some(CategoryId(99)))
            .expect_err("expected error");
        assert!(matches!(err, SapelliError::UnknownForm { .. }));
    }
}
