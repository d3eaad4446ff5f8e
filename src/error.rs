use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatorError {
    /// No row matched; for the feed selector this means there is nothing to poll.
    #[error("{0} not found")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0} already exists")]
    DuplicateKey(String),

    #[error("you must be logged in to perform this action")]
    NotLoggedIn,

    #[error("user {0} does not exist")]
    UnknownUser(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0}")]
    InvalidArguments(String),

    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GatorError {
    /// Maps an insert failure, turning a uniqueness violation into `DuplicateKey`.
    pub fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return GatorError::DuplicateKey(what.into());
            }
        }
        GatorError::Store(err)
    }
}

impl From<reqwest::Error> for GatorError {
    fn from(err: reqwest::Error) -> Self {
        GatorError::Network(err.to_string())
    }
}

impl From<quick_xml::Error> for GatorError {
    fn from(err: quick_xml::Error) -> Self {
        GatorError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatorError>;
