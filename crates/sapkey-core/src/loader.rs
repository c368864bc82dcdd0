use tracing::info;

use crate::error::SapelliError;
use crate::materializer;
use crate::registry::{ProjectRegistry, RegisteredProject};
use crate::sink::ProjectSink;

/// One-time project upload: parses a project definition document, rejects
/// duplicates by natural project identity, then materializes the schema.
/// ZIP extraction and fingerprint tooling live outside this boundary; the
/// caller hands over the PROJECT.xml text.
pub fn load_project<'r, S: ProjectSink>(
    sink: &mut S,
    registry: &'r mut ProjectRegistry,
    xml: &str,
    creator: &str,
) -> Result<&'r RegisteredProject, SapelliError> {
    let description = sapkey_parser::parse_project(xml)?;

    if registry
        .find_by_sapelli_info(description.sapelli_id, description.fingerprint)
        .is_some()
    {
        return Err(SapelliError::DuplicateProject {
            sapelli_id: description.sapelli_id,
            fingerprint: description.fingerprint,
        });
    }

    let registered = materializer::materialize(sink, &description, creator)?;
    info!(
        project = %registered.display_name,
        sapelli_id = registered.sapelli_id,
        model_id = registered.model_id,
        "registered project"
    );
    Ok(registry.register(registered))
}
