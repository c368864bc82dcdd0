pub mod error;
pub mod identity;
pub mod import;
pub mod loader;
pub mod materializer;
pub mod registry;
pub mod sink;

pub use error::{ErrorKind, SapelliError};
pub use import::{import_csv, ImportReceipt, ImportSummary};
pub use loader::load_project;
pub use registry::{ProjectInfo, ProjectRegistry, RegisteredForm, RegisteredProject};
pub use sink::{MemorySink, ProjectSink};
