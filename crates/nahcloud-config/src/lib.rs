mod raw;
mod loader;
pub mod error;
pub mod server;

pub use error::ConfigError;
pub use loader::{load, load_file};
pub use raw::{RawChaos, RawConfig, RawErrorRates, RawLatency};
pub use server::{ConfigOverrides, ServerConfig, StorageConfig, DEFAULT_ADDR, DEFAULT_SQLITE_PATH};
