pub mod config;
pub mod error;
pub mod types;

pub use config::IdxVaultConfig;
pub use error::{IdxError, IdxResult};
pub use types::{IndexLayout, Stage};
