//! Client portal service
//!
//! Sessions, CSRF protection and the gate chain that decides, for each
//! request, whether it may reach its page: maintenance mode, rate limiting,
//! CSRF verification, authentication and role checks.

pub mod config;
pub mod csrf;
pub mod debug;
pub mod error;
pub mod flash;
pub mod gates;
pub mod logging;
pub mod models;
pub mod pages;
pub mod permissions;
pub mod principal;
pub mod repositories;
pub mod routes;
pub mod session;
pub mod settings;
pub mod state;
pub mod validation;
pub mod views;

pub use crate::config::PortalConfig;
pub use error::{PortalError, PortalResult};
pub use routes::create_router;
pub use state::{AppState, Collaborators, Infrastructure};
