use thiserror::Error;

#[derive(Error, Debug)]
pub enum OdmError {
    /// Schema invariant violation: duplicate or reserved field names, more than
    /// one primary key, or a required value missing at persistence time.
    #[error("Field error: {0}")]
    FieldError(String),

    #[error("_mapper not available in {0}")]
    MapperNotAvailable(String),

    #[error("No manager registered for model '{0}'")]
    ManagerNotFound(String),

    #[error("Model '{0}' not found")]
    ModelNotFound(String),

    #[error("Model '{0}' already registered")]
    ModelExists(String),

    #[error("Abstract model '{0}' cannot be instantiated")]
    AbstractModel(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl OdmError {
    pub fn field(message: impl Into<String>) -> Self {
        Self::FieldError(message.into())
    }

    pub fn is_field_error(&self) -> bool {
        matches!(self, Self::FieldError(_))
    }
}

pub type Result<T> = std::result::Result<T, OdmError>;

impl<T> From<std::sync::PoisonError<T>> for OdmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for OdmError {
    fn from(err: serde_json::Error) -> Self {
        Self::TypeMismatch(err.to_string())
    }
}
