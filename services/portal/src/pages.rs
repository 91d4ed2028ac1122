//! Page catalogue
//!
//! Every portal page is served from `/index.php?page=<name>`. A page's
//! [`Access`] level picks the gate chain that runs before its handler.

use axum::http::Uri;
use std::fmt;

use crate::gates::query_params;

/// Who may reach a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    /// Clients and every role ranked above them
    ClientArea,
    AdminOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Home,
    Login,
    Logout,
    Dashboard,
    Profile,
    Portfolio,
    Invoices,
    Tickets,
    Admin,
    Settings,
    DebugError,
    NotFound,
}

impl Page {
    pub fn from_name(name: &str) -> Self {
        match name {
            "" | "home" => Page::Home,
            "login" => Page::Login,
            "logout" => Page::Logout,
            "dashboard" => Page::Dashboard,
            "profile" => Page::Profile,
            "portfolio" => Page::Portfolio,
            "invoices" => Page::Invoices,
            "tickets" => Page::Tickets,
            "admin" => Page::Admin,
            "settings" => Page::Settings,
            "debug_error" => Page::DebugError,
            _ => Page::NotFound,
        }
    }

    /// Page addressed by the `page` query parameter; a missing parameter is home
    pub fn from_uri(uri: &Uri) -> Self {
        match query_params(uri).get("page") {
            Some(name) => Self::from_name(name.trim()),
            None => Page::Home,
        }
    }

    pub fn access(self) -> Access {
        match self {
            Page::Home | Page::Login | Page::Logout | Page::DebugError | Page::NotFound => {
                Access::Public
            }
            Page::Dashboard | Page::Profile => Access::Authenticated,
            Page::Portfolio | Page::Invoices | Page::Tickets => Access::ClientArea,
            Page::Admin | Page::Settings => Access::AdminOnly,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Page::Home => "home",
            Page::Login => "login",
            Page::Logout => "logout",
            Page::Dashboard => "dashboard",
            Page::Profile => "profile",
            Page::Portfolio => "portfolio",
            Page::Invoices => "invoices",
            Page::Tickets => "tickets",
            Page::Admin => "admin",
            Page::Settings => "settings",
            Page::DebugError => "debug_error",
            Page::NotFound => "not_found",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Page::Home => "Welcome",
            Page::Login => "Sign in",
            Page::Logout => "Sign out",
            Page::Dashboard => "Dashboard",
            Page::Profile => "Profile",
            Page::Portfolio => "Portfolio",
            Page::Invoices => "Invoices",
            Page::Tickets => "Support tickets",
            Page::Admin => "Administration",
            Page::Settings => "Settings",
            Page::DebugError => "Error details",
            Page::NotFound => "Page not found",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
