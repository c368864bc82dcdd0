use serde::Serialize;

use sapkey_parser::FieldKind;

use crate::sink::{CategoryId, FieldId, LookupValueId, ProjectId};

/// One materialized lookup value. `number` is the document-order ordinal
/// recorded by the type mapper; it is the wire encoding of the item in CSV
/// exports, so it is stored explicitly rather than re-derived.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredItem {
    pub number: i64,
    pub lookup_value_id: LookupValueId,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredField {
    pub sapelli_id: String,
    pub key: String,
    pub field_id: FieldId,
    pub kind: FieldKind,
    pub truefalse: bool,
    pub items: Vec<RegisteredItem>,
}

impl RegisteredField {
    pub fn item_by_number(&self, number: i64) -> Option<&RegisteredItem> {
        self.items.iter().find(|item| item.number == number)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredForm {
    pub sapelli_id: String,
    pub model_schema_number: i32,
    pub category_id: CategoryId,
    pub stores_end_time: bool,
    /// Sapelli ids of the form's location fields, in declaration order.
    pub locations: Vec<String>,
    pub fields: Vec<RegisteredField>,
}

/// The mapping between one Sapelli project build and what was created for it
/// in the sink. This is what the CSV reconciliation engine consumes.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredProject {
    pub project_id: ProjectId,
    pub name: String,
    pub display_name: String,
    pub sapelli_id: i64,
    pub fingerprint: i64,
    pub model_id: i64,
    pub forms: Vec<RegisteredForm>,
}

impl RegisteredProject {
    pub fn form_by_schema_number(&self, schema_number: i32) -> Option<&RegisteredForm> {
        self.forms
            .iter()
            .find(|form| form.model_schema_number == schema_number)
    }

    pub fn form_by_category(&self, category: CategoryId) -> Option<&RegisteredForm> {
        self.forms.iter().find(|form| form.category_id == category)
    }

    pub fn form_by_sapelli_id(&self, sapelli_id: &str) -> Option<&RegisteredForm> {
        self.forms.iter().find(|form| form.sapelli_id == sapelli_id)
    }

    /// Flat description for API consumers mapping their local form
    /// identifiers to the server's.
    pub fn description(&self) -> ProjectInfo {
        ProjectInfo {
            project_id: self.project_id,
            name: self.display_name.clone(),
            sapelli_id: self.sapelli_id,
            fingerprint: self.fingerprint,
            model_id: self.model_id,
            forms: self
                .forms
                .iter()
                .map(|form| FormInfo {
                    sapelli_id: form.sapelli_id.clone(),
                    model_schema_number: form.model_schema_number,
                    category_id: form.category_id,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FormInfo {
    pub sapelli_id: String,
    pub model_schema_number: i32,
    pub category_id: CategoryId,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    pub project_id: ProjectId,
    pub name: String,
    pub sapelli_id: i64,
    pub fingerprint: i64,
    pub model_id: i64,
    pub forms: Vec<FormInfo>,
}

/// Registered projects known to this deployment, addressable by the
/// (sapelli_id, fingerprint) natural project identity.
#[derive(Debug, Default)]
pub struct ProjectRegistry {
    projects: Vec<RegisteredProject>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, project: RegisteredProject) -> &RegisteredProject {
        self.projects.push(project);
        self.projects.last().expect("project just pushed")
    }

    pub fn find_by_sapelli_info(
        &self,
        sapelli_id: i64,
        fingerprint: i64,
    ) -> Option<&RegisteredProject> {
        self.projects
            .iter()
            .find(|project| project.sapelli_id == sapelli_id && project.fingerprint == fingerprint)
    }

    pub fn find_by_project_id(&self, project_id: ProjectId) -> Option<&RegisteredProject> {
        self.projects
            .iter()
            .find(|project| project.project_id == project_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProject> {
        self.projects.iter()
    }
}
