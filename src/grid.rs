use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use tracing::debug;

/// A single spreadsheet cell, normalized to the three shapes the analysis
/// pipeline cares about. Whitespace-only text collapses to `Empty` at
/// construction so emptiness checks stay uniform downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl Cell {
    pub fn text(s: impl Into<String>) -> Cell {
        let s: String = s.into();
        let t = s.trim();
        if t.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(t.to_string())
        }
    }

    pub fn from_data(d: &Data) -> Cell {
        match d {
            Data::String(s) => Cell::text(s.as_str()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::text(b.to_string()),
            Data::DateTime(dt) => Cell::text(dt.to_string()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::text(s.as_str()),
            Data::Empty | Data::Error(_) => Cell::Empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Display form: numbers that hold an integral value print without a
    /// decimal point so USNs and course codes typed as numbers survive.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => {
                if (n.floor() - n).abs() < f64::EPSILON {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
        }
    }

    /// Parse-with-default: anything that is not a clean number yields 0.
    /// This is the only numeric path in the engine; malformed cells are
    /// never surfaced as errors.
    pub fn as_number(&self) -> f64 {
        match self {
            Cell::Number(n) => *n,
            Cell::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            Cell::Empty => 0.0,
        }
    }
}

/// Rectangular grid of cells from one worksheet. Row/column indices are
/// 0-based everywhere; out-of-range reads act like empty cells, matching
/// how ragged spreadsheet rows behave.
#[derive(Debug, Clone, Default)]
pub struct RawGrid {
    rows: Vec<Vec<Cell>>,
}

impl RawGrid {
    pub fn new(rows: Vec<Vec<Cell>>) -> RawGrid {
        RawGrid { rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, r: usize) -> &[Cell] {
        self.rows.get(r).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn cell(&self, r: usize, c: usize) -> &Cell {
        self.rows
            .get(r)
            .and_then(|row| row.get(c))
            .unwrap_or(&EMPTY_CELL)
    }

    pub fn text(&self, r: usize, c: usize) -> String {
        self.cell(r, c).as_text()
    }

    pub fn number(&self, r: usize, c: usize) -> f64 {
        self.cell(r, c).as_number()
    }

    pub fn row_is_empty(&self, r: usize) -> bool {
        self.row(r).iter().all(Cell::is_empty)
    }

    /// The whole row joined with `|` and lower-cased, the form all the
    /// layout heuristics do their substring sniffing on.
    pub fn row_joined_lower(&self, r: usize) -> String {
        self.row(r)
            .iter()
            .map(Cell::as_text)
            .collect::<Vec<_>>()
            .join("|")
            .to_lowercase()
    }

    /// Build a grid from JSON rows (arrays of string/number/null), the
    /// shape `analyze.grid` and `template.generate` exchange with the UI.
    pub fn from_json_rows(rows: &[serde_json::Value]) -> RawGrid {
        let rows = rows
            .iter()
            .map(|row| {
                row.as_array()
                    .map(|cells| cells.iter().map(json_cell).collect())
                    .unwrap_or_default()
            })
            .collect();
        RawGrid { rows }
    }
}

fn json_cell(v: &serde_json::Value) -> Cell {
    match v {
        serde_json::Value::Number(n) => Cell::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Cell::text(s.as_str()),
        _ => Cell::Empty,
    }
}

/// Grids extracted from one workbook: the sheet holding student results
/// plus the optional "Course Details" sheet carrying course types.
pub struct WorkbookGrids {
    pub sheet_name: String,
    pub primary: RawGrid,
    pub course_details: Option<RawGrid>,
}

/// Read every sheet of the workbook and pick the relevant ones. The
/// primary sheet is the first one containing a student header row
/// (USN + NAME + CIE/SEE); if none qualifies, the first sheet is used
/// and the downstream locator reports the failure. The auxiliary sheet
/// is matched by `aux_sheet` when given, otherwise by a name containing
/// "course details".
pub fn load_workbook(path: &Path, aux_sheet: Option<&str>) -> anyhow::Result<WorkbookGrids> {
    let mut workbook = open_workbook_auto(path)?;
    let names = workbook.sheet_names().to_owned();

    let mut sheets: Vec<(String, RawGrid)> = Vec::new();
    for name in &names {
        let range = match workbook.worksheet_range(name) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let rows = range
            .rows()
            .map(|row| row.iter().map(Cell::from_data).collect())
            .collect();
        sheets.push((name.clone(), RawGrid::new(rows)));
    }

    let is_aux = |name: &str| match aux_sheet {
        Some(wanted) => name.eq_ignore_ascii_case(wanted),
        None => name.to_lowercase().contains("course details"),
    };
    let course_details = sheets
        .iter()
        .find(|(name, _)| is_aux(name))
        .map(|(_, g)| g.clone());

    let primary_idx = sheets
        .iter()
        .position(|(name, g)| !is_aux(name) && crate::layout::find_student_header(g).is_some())
        .unwrap_or(0);

    let (sheet_name, primary) = sheets
        .into_iter()
        .nth(primary_idx)
        .unwrap_or_else(|| (String::new(), RawGrid::default()));

    debug!(
        sheet = %sheet_name,
        rows = primary.row_count(),
        has_course_details = course_details.is_some(),
        "workbook loaded"
    );

    Ok(WorkbookGrids {
        sheet_name,
        primary,
        course_details,
    })
}
