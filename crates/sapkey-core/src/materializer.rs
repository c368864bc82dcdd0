use sapkey_parser::{FieldKind, FormDescription, ProjectDescription};
use tracing::{info, warn};

use crate::error::SapelliError;
use crate::registry::{RegisteredField, RegisteredForm, RegisteredItem, RegisteredProject};
use crate::sink::{ProjectId, ProjectSink};

/// Metadata fields every category gets in addition to the form's own
/// fields. Their keys name the stored properties; the CSV columns they
/// are filled from are spelled slightly differently (`DeviceID`).
#[derive(Debug, Clone, Copy)]
pub struct ImplicitField {
    pub name: &'static str,
    pub key: &'static str,
    pub kind: FieldKind,
    /// Only created for forms that record an end time.
    pub end_time_only: bool,
}

pub const IMPLICIT_FIELDS: &[ImplicitField] = &[
    ImplicitField {
        name: "Device Id",
        key: "DeviceId",
        kind: FieldKind::Numeric,
        end_time_only: false,
    },
    ImplicitField {
        name: "Start Time",
        key: "StartTime",
        kind: FieldKind::DateTime,
        end_time_only: false,
    },
    ImplicitField {
        name: "End Time",
        key: "EndTime",
        kind: FieldKind::DateTime,
        end_time_only: true,
    },
];

/// Creates the project/category/field/lookup-value graph for a parsed
/// project description. All-or-nothing: if anything fails after the project
/// record exists, the partially created project is deleted before the error
/// is returned.
pub fn materialize<S: ProjectSink>(
    sink: &mut S,
    description: &ProjectDescription,
    creator: &str,
) -> Result<RegisteredProject, SapelliError> {
    materialize_with(sink, description, creator, IMPLICIT_FIELDS)
}

pub fn materialize_with<S: ProjectSink>(
    sink: &mut S,
    description: &ProjectDescription,
    creator: &str,
    implicit_fields: &[ImplicitField],
) -> Result<RegisteredProject, SapelliError> {
    for form in &description.forms {
        if form.locations.is_empty() {
            return Err(SapelliError::FormWithoutLocation {
                form: form.sapelli_id.clone(),
            });
        }
    }

    let project_id = sink.create_project(&description.display_name(), creator)?;

    match populate(sink, project_id, description, implicit_fields) {
        Ok(forms) => {
            info!(
                project = %description.display_name(),
                forms = forms.len(),
                "materialized project"
            );
            Ok(RegisteredProject {
                project_id,
                name: description.name.clone(),
                display_name: description.display_name(),
                sapelli_id: description.sapelli_id,
                fingerprint: description.fingerprint,
                model_id: description.model_id,
                forms,
            })
        }
        Err(err) => {
            warn!(
                project = %description.display_name(),
                error = %err,
                "materialization failed, rolling back"
            );
            // Cascade delete of everything created so far; the original
            // failure is what callers need to see, so a rollback failure on
            // top of it is only logged.
            if let Err(delete_err) = sink.delete_project(project_id) {
                warn!(error = %delete_err, "rollback delete failed");
            }
            Err(err)
        }
    }
}

fn populate<S: ProjectSink>(
    sink: &mut S,
    project_id: ProjectId,
    description: &ProjectDescription,
    implicit_fields: &[ImplicitField],
) -> Result<Vec<RegisteredForm>, SapelliError> {
    let mut forms = Vec::with_capacity(description.forms.len());
    for form in &description.forms {
        forms.push(populate_form(sink, project_id, form, implicit_fields)?);
    }
    Ok(forms)
}

fn populate_form<S: ProjectSink>(
    sink: &mut S,
    project_id: ProjectId,
    form: &FormDescription,
    implicit_fields: &[ImplicitField],
) -> Result<RegisteredForm, SapelliError> {
    let category_id = sink.create_category(project_id, &form.sapelli_id)?;

    for implicit in implicit_fields {
        if implicit.end_time_only && !form.stores_end_time {
            continue;
        }
        sink.create_field(category_id, implicit.name, implicit.key, implicit.kind, false)?;
    }

    let mut fields = Vec::with_capacity(form.fields.len());
    for field in &form.fields {
        let Some(kind) = field.geokey_type else {
            // Unresolved mapping (Button with an unrecognized column value);
            // deliberately skipped rather than guessed at.
            warn!(
                form = %form.sapelli_id,
                field = %field.sapelli_id,
                "field has no type assigned, skipping"
            );
            continue;
        };

        let field_id = sink.create_field(
            category_id,
            field.name(),
            &field.sapelli_id,
            kind,
            field.required,
        )?;

        let mut items = Vec::with_capacity(field.items.len());
        for (index, item) in field.items.iter().enumerate() {
            let number = index as i64;
            let lookup_value_id = sink.create_lookup_value(field_id, &item.value, number)?;
            items.push(RegisteredItem {
                number,
                lookup_value_id,
                value: item.value.clone(),
            });
        }

        fields.push(RegisteredField {
            sapelli_id: field.sapelli_id.clone(),
            key: field.sapelli_id.clone(),
            field_id,
            kind,
            truefalse: field.truefalse,
            items,
        });
    }

    Ok(RegisteredForm {
        sapelli_id: form.sapelli_id.clone(),
        model_schema_number: form.model_schema_number,
        category_id,
        stores_end_time: form.stores_end_time,
        locations: form
            .locations
            .iter()
            .map(|location| location.sapelli_id.clone())
            .collect(),
        fields,
    })
}
