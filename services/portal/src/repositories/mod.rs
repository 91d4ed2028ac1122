//! Repositories for the lookups the gates depend on

pub mod memory;
pub mod settings;
pub mod user;

pub use memory::{MemorySettings, MemoryUserDirectory};
pub use settings::{SettingsRepository, SettingsSource};
pub use user::{GrantStore, UserDirectory, UserRepository, hash_password, verify_password};
