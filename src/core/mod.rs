pub mod error;
pub mod value;

pub use error::{OdmError, Result};
pub use value::{FromValue, Value, decode_bytes};
