use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, PortalOptions, Request};
use crate::store;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "rowCount": state.table.as_ref().map(|t| t.rows.len()),
        }),
    )
}

fn handle_portal_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let allow_duplicate_ids = req
        .params
        .get("allowDuplicateIds")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if let Err(e) = std::fs::create_dir_all(&path) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": path.to_string_lossy() })),
        );
    }

    let sheet = store::sheet_path(&path);
    match store::load_table(&sheet) {
        Ok(table) => {
            tracing::info!(
                "portal opened: {} ({} rows)",
                path.to_string_lossy(),
                table.rows.len()
            );
            let row_count = table.rows.len();
            state.workspace = Some(path.clone());
            state.table = Some(table);
            state.options = PortalOptions {
                allow_duplicate_ids,
            };
            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "sheetPath": sheet.to_string_lossy(),
                    "rowCount": row_count
                }),
            )
        }
        // A present but unparseable sheet is fatal for this portal: the
        // previous state, if any, stays untouched.
        Err(e) => err(
            &req.id,
            "sheet_load_failed",
            format!("{e:#}"),
            Some(json!({ "path": sheet.to_string_lossy() })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "portal.open" => Some(handle_portal_open(state, req)),
        _ => None,
    }
}
