use std::path::PathBuf;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::analysis::{self, AnalysisOptions, CourseTypeSummary, StudentRecord};
use crate::grid::{self, RawGrid};
use crate::template;

/// Workbooks past this size are rejected before opening.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub options: AnalysisOptions,
}

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(id: &str, code: &str, message: impl Into<String>) -> serde_json::Value {
    json!({
        "id": id,
        "ok": false,
        "error": {
            "code": code,
            "message": message.into(),
        }
    })
}

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    match req.method.as_str() {
        "health" => ok(
            &req.id,
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "time": chrono::Utc::now().to_rfc3339(),
            }),
        ),
        "analyze" => handle_analyze(state, &req),
        "analyze.grid" => handle_analyze_grid(state, &req),
        "template.generate" => handle_template_generate(&req),
        "export.grid" => handle_export_grid(&req),
        _ => err(
            &req.id,
            "not_implemented",
            format!("unknown method: {}", req.method),
        ),
    }
}

/// Per-request override of the pairing flag; everything else in the
/// options is fixed at startup.
fn request_options(state: &AppState, params: &serde_json::Value) -> AnalysisOptions {
    let mut opts = state.options;
    if let Some(b) = params.get("projectAwarePairing").and_then(|v| v.as_bool()) {
        opts.project_aware_pairing = b;
    }
    opts
}

fn handle_analyze(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing params.path");
    };

    let size = match std::fs::metadata(&path) {
        Ok(m) => m.len(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "workbook not readable");
            return err(&req.id, "workbook_open_failed", format!("{e}"));
        }
    };
    if size > MAX_UPLOAD_BYTES {
        return err(
            &req.id,
            "file_too_large",
            format!("workbook is {size} bytes; limit is {MAX_UPLOAD_BYTES}"),
        );
    }

    let aux_sheet = req.params.get("courseDetailsSheet").and_then(|v| v.as_str());
    let grids = match grid::load_workbook(&path, aux_sheet) {
        Ok(g) => g,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "workbook open failed");
            return err(&req.id, "workbook_open_failed", format!("{e}"));
        }
    };

    let opts = request_options(state, &req.params);
    match analysis::run_analysis(&grids.primary, grids.course_details.as_ref(), &opts) {
        Ok(result) => {
            info!(path = %path.display(), sheet = %grids.sheet_name, "workbook analyzed");
            let mut v = match serde_json::to_value(&result) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "internal", format!("{e}")),
            };
            v["sheet"] = json!(grids.sheet_name);
            ok(&req.id, v)
        }
        Err(e) => err(&req.id, e.code(), e.message()),
    }
}

fn handle_analyze_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.rows");
    };
    let primary = RawGrid::from_json_rows(rows);
    let course_details = req
        .params
        .get("courseDetails")
        .and_then(|v| v.as_array())
        .map(|rows| RawGrid::from_json_rows(rows));

    let opts = request_options(state, &req.params);
    match analysis::run_analysis(&primary, course_details.as_ref(), &opts) {
        Ok(result) => match serde_json::to_value(&result) {
            Ok(v) => ok(&req.id, v),
            Err(e) => err(&req.id, "internal", format!("{e}")),
        },
        Err(e) => err(&req.id, e.code(), e.message()),
    }
}

fn handle_template_generate(req: &Request) -> serde_json::Value {
    let request: template::TemplateRequest = match serde_json::from_value(req.params.clone()) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "bad_params", format!("{e}")),
    };
    let generated = template::generate(&request);
    match serde_json::to_value(&generated) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "internal", format!("{e}")),
    }
}

fn handle_export_grid(req: &Request) -> serde_json::Value {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Params {
        students: Vec<StudentRecord>,
        #[serde(default)]
        course_types: Vec<CourseTypeSummary>,
    }
    let params: Params = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "bad_params", format!("{e}")),
    };
    let rows = template::export_students_grid(&params.students, &params.course_types);
    ok(&req.id, json!({ "rows": rows }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState {
            options: AnalysisOptions::default(),
        }
    }

    fn call(method: &str, params: serde_json::Value) -> serde_json::Value {
        handle_request(
            &mut state(),
            Request {
                id: "t1".to_string(),
                method: method.to_string(),
                params,
            },
        )
    }

    #[test]
    fn health_reports_version() {
        let resp = call("health", json!({}));
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(resp["result"]["version"], json!(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn unknown_method_is_not_implemented() {
        let resp = call("no.such.method", json!({}));
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("not_implemented"));
    }

    #[test]
    fn analyze_requires_a_path() {
        let resp = call("analyze", json!({}));
        assert_eq!(resp["error"]["code"], json!("bad_params"));
    }

    #[test]
    fn analyze_missing_file_fails_to_open() {
        let resp = call("analyze", json!({ "path": "/nonexistent/marks.xlsx" }));
        assert_eq!(resp["error"]["code"], json!("workbook_open_failed"));
    }

    #[test]
    fn analyze_grid_runs_the_pipeline() {
        let resp = call(
            "analyze.grid",
            json!({
                "rows": [
                    ["Course Code", "", "", "BCS101", ""],
                    ["S.N.", "USN", "NAME", "CIE", "SEE"],
                    [1, "1XX21CS001", "Alice", 45, 30]
                ]
            }),
        );
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(resp["result"]["students"][0]["percentage"], json!(75.0));
        assert_eq!(resp["result"]["students"][0]["grade"], json!("FCD"));
        assert_eq!(resp["result"]["classStats"]["passed"], json!(1));
    }

    #[test]
    fn analyze_grid_surfaces_pipeline_errors() {
        let resp = call("analyze.grid", json!({ "rows": [["no", "header", "here"]] }));
        assert_eq!(resp["error"]["code"], json!("header_not_found"));
        let resp = call("analyze.grid", json!({ "rows": [] }));
        assert_eq!(resp["error"]["code"], json!("no_worksheet"));
    }

    #[test]
    fn pairing_flag_can_be_disabled_per_request() {
        let rows = json!([
            ["Course Code", "", "", "BPRJ108"],
            ["S.N.", "USN", "NAME", "SEE"],
            [1, "1XX21CS001", "Alice", 45]
        ]);
        let aware = call("analyze.grid", json!({ "rows": rows.clone() }));
        assert_eq!(aware["ok"], json!(true));
        assert_eq!(
            aware["result"]["students"][0]["subjects"][0]["cie"],
            json!("N/A")
        );
        // index pairing finds no CIE/SEE pair at all
        let flat = call(
            "analyze.grid",
            json!({ "rows": rows, "projectAwarePairing": false }),
        );
        assert_eq!(
            flat["result"]["students"][0]["subjects"]
                .as_array()
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn template_generate_validates_params() {
        let resp = call("template.generate", json!({ "academicYear": "2024-25" }));
        assert_eq!(resp["error"]["code"], json!("bad_params"));
    }

    #[test]
    fn export_grid_returns_rows() {
        let resp = call(
            "export.grid",
            json!({
                "students": [{
                    "usn": "1XX21CS001", "name": "Alice",
                    "subjects": [{"cie": 45.0, "see": 30.0, "total": 75.0, "courseCode": "BCS101"}],
                    "totalMarks": 75.0, "percentage": 75.0,
                    "grade": "FCD", "result": "PASS"
                }]
            }),
        );
        assert_eq!(resp["ok"], json!(true));
        let rows = resp["result"]["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][3], json!("CIE"));
        assert_eq!(rows[1][2], json!("Alice"));
    }
}
