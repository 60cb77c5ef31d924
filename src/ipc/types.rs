use std::path::PathBuf;

use serde::Deserialize;

use crate::store::Table;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Behavior switches chosen at `portal.open` time.
#[derive(Debug, Clone, Copy)]
pub struct PortalOptions {
    pub allow_duplicate_ids: bool,
}

impl Default for PortalOptions {
    fn default() -> Self {
        Self {
            allow_duplicate_ids: true,
        }
    }
}

/// `workspace` and `table` are always set together, by `portal.open` or a
/// bundle import. A failed save never reaches `table`: mutating handlers
/// persist the candidate table first and install it only on success.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub table: Option<Table>,
    pub options: PortalOptions,
}
