use std::num::ParseIntError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("<{element}> is missing its '{attribute}' attribute")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },
    #[error("Malformed xml at byte {position}: {message}")]
    MalformedXml { position: usize, message: String },
    #[error("Invalid hexadecimal value {value:?}")]
    Format {
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("Unable to open {path}")]
    FileAccess {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
