pub mod errors;
pub mod model;
mod mapper;
mod tree;

pub use errors::ParserError;
pub use model::{
    FieldDescription, FieldKind, FormDescription, ItemDescription, LocationDescription,
    ProjectDescription,
};
pub use tree::parse_project;
