pub mod error;
pub mod types;
pub mod validate;


pub use error::DomainError;
pub use types::*;
