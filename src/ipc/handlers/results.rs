use crate::ipc::error::{err, ok, record_err};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, NewRecord, SubjectScores};
use crate::store::{self, Table};
use serde_json::json;
use std::path::PathBuf;

fn open_portal<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<(&'a PathBuf, &'a Table), serde_json::Value> {
    match (state.workspace.as_ref(), state.table.as_ref()) {
        (Some(workspace), Some(table)) => Ok((workspace, table)),
        _ => Err(err(
            &req.id,
            "no_portal",
            "open a portal workspace first",
            None,
        )),
    }
}

fn get_student_id(req: &Request) -> Result<String, serde_json::Value> {
    match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
        _ => Err(err(&req.id, "bad_params", "missing studentId", None)),
    }
}

fn parse_subject_scores(req: &Request) -> Result<SubjectScores, serde_json::Value> {
    let Some(value) = req.params.get("scores") else {
        return Err(err(&req.id, "bad_params", "missing scores", None));
    };
    serde_json::from_value(value.clone())
        .map_err(|e| err(&req.id, "bad_params", format!("invalid scores: {}", e), None))
}

fn row_object(table: &Table, row: &[String]) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    for (col, cell) in table.columns.iter().zip(row) {
        obj.insert(col.clone(), serde_json::Value::String(cell.clone()));
    }
    serde_json::Value::Object(obj)
}

fn handle_results_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(table) = state.table.as_ref() else {
        return err(&req.id, "no_portal", "open a portal workspace first", None);
    };
    let student_id = match get_student_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match records::find_by_id(table, &student_id) {
        Ok(Some((row_idx, row))) => ok(
            &req.id,
            json!({
                "rowIndex": row_idx,
                "record": row_object(table, row)
            }),
        ),
        Ok(None) => err(
            &req.id,
            "not_found",
            format!("no result found for student id '{}'", student_id.trim()),
            None,
        ),
        Err(e) => record_err(&req.id, e),
    }
}

fn handle_results_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (workspace, table) = match open_portal(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let student_name = match req.params.get("studentName").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentName", None),
    };
    let class = match req.params.get("class").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing class", None),
    };
    let scores = match parse_subject_scores(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let optional = |key: &str| {
        req.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .filter(|v| !v.trim().is_empty())
    };

    let record = NewRecord {
        student_id,
        student_name,
        class,
        arm: optional("arm"),
        gender: optional("gender"),
        date_of_birth: optional("dateOfBirth"),
        scores,
    };

    let next = match records::add_record(table, &record, state.options.allow_duplicate_ids) {
        Ok(v) => v,
        Err(e) => return record_err(&req.id, e),
    };
    let row_count = next.rows.len();

    let sheet = store::sheet_path(workspace);
    if let Err(e) = store::save_table(&sheet, &next) {
        tracing::warn!("sheet save failed: {e:#}");
        return err(
            &req.id,
            "sheet_save_failed",
            format!("{e:#}"),
            Some(json!({ "path": sheet.to_string_lossy() })),
        );
    }
    state.table = Some(next);

    let derived = record.scores.derived();
    ok(
        &req.id,
        json!({
            "studentId": record.student_id,
            "total": derived.total,
            "average": derived.average,
            "grade": derived.grade.letter(),
            "rowCount": row_count
        }),
    )
}

fn handle_results_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (workspace, table) = match open_portal(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match get_student_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let scores = match parse_subject_scores(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let next = match records::update_scores(table, &student_id, scores) {
        Ok(v) => v,
        Err(e) => return record_err(&req.id, e),
    };

    let sheet = store::sheet_path(workspace);
    if let Err(e) = store::save_table(&sheet, &next) {
        tracing::warn!("sheet save failed: {e:#}");
        return err(
            &req.id,
            "sheet_save_failed",
            format!("{e:#}"),
            Some(json!({ "path": sheet.to_string_lossy() })),
        );
    }
    state.table = Some(next);

    let derived = scores.derived();
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "total": derived.total,
            "average": derived.average,
            "grade": derived.grade.letter()
        }),
    )
}

fn handle_results_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (workspace, table) = match open_portal(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match get_student_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let (next, removed) = match records::delete_records(table, &student_id) {
        Ok(v) => v,
        Err(e) => return record_err(&req.id, e),
    };
    // Nothing matched: report distinctly and skip the sheet rewrite.
    if removed == 0 {
        return err(
            &req.id,
            "not_found",
            format!("no result found for student id '{}'", student_id.trim()),
            None,
        );
    }

    let sheet = store::sheet_path(workspace);
    if let Err(e) = store::save_table(&sheet, &next) {
        tracing::warn!("sheet save failed: {e:#}");
        return err(
            &req.id,
            "sheet_save_failed",
            format!("{e:#}"),
            Some(json!({ "path": sheet.to_string_lossy() })),
        );
    }
    let row_count = next.rows.len();
    state.table = Some(next);

    ok(&req.id, json!({ "removed": removed, "rowCount": row_count }))
}

fn handle_results_view_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(table) = state.table.as_ref() else {
        return err(&req.id, "no_portal", "open a portal workspace first", None);
    };
    ok(
        &req.id,
        json!({
            "columns": table.columns,
            "rows": table.rows,
            "rowCount": table.rows.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.check" => Some(handle_results_check(state, req)),
        "results.add" => Some(handle_results_add(state, req)),
        "results.update" => Some(handle_results_update(state, req)),
        "results.delete" => Some(handle_results_delete(state, req)),
        "results.viewAll" => Some(handle_results_view_all(state, req)),
        _ => None,
    }
}
