//! Portal models

pub mod role;
pub mod session;
pub mod user;

// Re-export for convenience
pub use role::{Role, UnknownRole};
pub use session::{ErrorReport, FlashLevel, FlashMessage, SessionData};
pub use user::User;
