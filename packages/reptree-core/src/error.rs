use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed operation id: {0}")]
    Format(String),
    #[error("operation log has no parentless move to use as the root vertex")]
    MissingRoot,
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
}
