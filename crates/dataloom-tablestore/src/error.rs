use thiserror::Error;

/// Failures raised while parsing or projecting a [`crate::Dataset`].
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum TableError {
    #[error("input document was empty")]
    Empty,

    #[error("sheet {sheet:?} could not be parsed: {reason}")]
    SheetParse { sheet: String, reason: String },

    #[error("no delimiter yielded at least two columns on the first line")]
    NoDelimiterDetected,
}
