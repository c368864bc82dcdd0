use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("not a well-formed XML document: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("<{element}> element is missing required attribute '{attribute}'")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("<{element}> attribute '{attribute}' has invalid value '{value}': {message}")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
        message: String,
    },

    #[error("project definition does not contain any <Form> element")]
    NoForms,
}
