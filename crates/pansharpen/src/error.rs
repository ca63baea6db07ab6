use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Geometry error: {0}")]
    Geometry(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("XML error: {0}")]
    Xml(String),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    Geo(#[from] geo::Error),
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::InvalidNumber(err.to_string())
    }
}

impl From<std::num::ParseFloatError> for Error {
    fn from(err: std::num::ParseFloatError) -> Self {
        Error::InvalidNumber(err.to_string())
    }
}

impl From<xml::reader::Error> for Error {
    fn from(err: xml::reader::Error) -> Self {
        Error::Xml(format!("XML parse error: {err}"))
    }
}

impl From<xml::writer::Error> for Error {
    fn from(err: xml::writer::Error) -> Self {
        Error::Xml(format!("XML write error: {err}"))
    }
}

/// Errors of pansharpened bands read through the `geo::RasterBand` interface
impl From<Error> for geo::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Geo(err) => err,
            Error::IOError(err) => geo::Error::IOError(err),
            err => geo::Error::Runtime(err.to_string()),
        }
    }
}
