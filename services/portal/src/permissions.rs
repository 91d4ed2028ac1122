//! Static role → permission table
//!
//! Loaded once at startup from JSON shaped as
//! `{"client": ["invoices:view", ...], ...}`. The table is the fallback when
//! no explicit database grant exists; pairs it does not list are denied.

use anyhow::{Context, Result, bail};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::models::Role;

/// Table shipped with the portal
pub const DEFAULT_PERMISSIONS: &str = include_str!("../config/permissions.json");

#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    grants: HashMap<Role, HashSet<(String, String)>>,
}

impl PermissionTable {
    /// Parse a JSON table; unknown roles and malformed entries are rejected
    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, Vec<String>> =
            serde_json::from_str(raw).context("permission table is not valid JSON")?;

        let mut grants = HashMap::new();
        for (role_name, entries) in parsed {
            let role: Role = role_name.parse()?;
            let mut pairs = HashSet::new();
            for entry in entries {
                let Some((resource, action)) = entry.split_once(':') else {
                    bail!("permission {:?} for role {} is not resource:action", entry, role);
                };
                if resource.is_empty() || action.is_empty() {
                    bail!("permission {:?} for role {} has an empty part", entry, role);
                }
                pairs.insert((resource.to_string(), action.to_string()));
            }
            grants.insert(role, pairs);
        }

        Ok(Self { grants })
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(DEFAULT_PERMISSIONS)
    }

    /// Load from `path` when given, otherwise the built-in table
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let table = Self::from_json(&raw)?;
                info!("Loaded permission table from {}", path.display());
                Ok(table)
            }
            None => Self::builtin(),
        }
    }

    pub fn allows(&self, role: Role, resource: &str, action: &str) -> bool {
        self.grants.get(&role).is_some_and(|pairs| {
            pairs
                .iter()
                .any(|(r, a)| r == resource && a == action)
        })
    }
}
