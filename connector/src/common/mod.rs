pub mod errors;

pub use errors::{ConnectorError, ErrorKind, HttpError};
