use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::grid::RawGrid;

/// How many leading rows the metadata / course-info heuristics scan.
const SNIFF_ROWS: usize = 15;
/// How many rows below an inline course-info header may hold course rows.
const COURSE_SCAN_ROWS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourseType {
    Theory,
    Lab,
    Project,
    Unspecified,
}

impl CourseType {
    pub fn parse(s: &str) -> CourseType {
        match s.trim().to_lowercase().as_str() {
            "theory" => CourseType::Theory,
            "lab" => CourseType::Lab,
            "project" => CourseType::Project,
            _ => CourseType::Unspecified,
        }
    }

    pub fn is_project(self) -> bool {
        self == CourseType::Project
    }
}

#[derive(Debug, Clone)]
pub struct CourseInfo {
    pub code: String,
    pub name: String,
    pub course_type: CourseType,
}

/// Which detection strategy produced the course list. Uploaded sheets carry
/// a "Course Code"/"Course Name" header block; sheets generated by the
/// template builder carry a bare "Course Code" row with one code per
/// course. The pairing strategy downstream depends on which one fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseRowKind {
    InlineHeader,
    TemplateRow,
    NotFound,
}

#[derive(Debug, Clone, Default)]
pub struct SheetMeta {
    pub academic_year: String,
    pub branch: String,
    pub semester: String,
}

/// Typed layout descriptor: everything the locator inferred about the
/// sheet, handed to the pairing/extraction/analysis stages so the fragile
/// sniffing stays out of the arithmetic.
#[derive(Debug, Clone)]
pub struct SheetLayout {
    pub courses: Vec<CourseInfo>,
    pub course_row_kind: CourseRowKind,
    pub header_row: usize,
    pub headers: Vec<String>,
    pub meta: SheetMeta,
}

/// Scan the whole grid for the student data header row: the first row
/// whose joined content mentions USN, NAME and at least one of CIE/SEE.
pub fn find_student_header(grid: &RawGrid) -> Option<usize> {
    (0..grid.row_count()).find(|&r| {
        let joined = grid.row_joined_lower(r);
        joined.contains("usn")
            && joined.contains("name")
            && (joined.contains("cie") || joined.contains("see"))
    })
}

/// Locate the sheet layout. Fails with `HeaderNotFound` when no student
/// header row exists anywhere in the grid; every other detection degrades
/// gracefully (missing metadata stays empty, missing course rows leave
/// the course list empty for the pairer to synthesize names).
pub fn locate(
    grid: &RawGrid,
    course_types: &HashMap<String, CourseType>,
) -> Result<SheetLayout, crate::analysis::AnalysisError> {
    let meta = find_metadata(grid);

    let (mut courses, course_row_kind) = match find_inline_courses(grid) {
        Some(courses) => (courses, CourseRowKind::InlineHeader),
        None => match find_template_course_row(grid) {
            Some(courses) => (courses, CourseRowKind::TemplateRow),
            None => (Vec::new(), CourseRowKind::NotFound),
        },
    };

    for course in &mut courses {
        if let Some(&t) = course_types.get(&course.code) {
            course.course_type = t;
        }
    }

    let header_row =
        find_student_header(grid).ok_or(crate::analysis::AnalysisError::HeaderNotFound)?;
    let headers: Vec<String> = grid.row(header_row).iter().map(|c| c.as_text()).collect();

    debug!(
        header_row,
        courses = courses.len(),
        kind = ?course_row_kind,
        "sheet layout located"
    );

    Ok(SheetLayout {
        courses,
        course_row_kind,
        header_row,
        headers,
        meta,
    })
}

/// Metadata lines look like `Academic Year: 2024-25` in the first cell of
/// one of the leading rows. A line without a colon yields an empty value.
fn find_metadata(grid: &RawGrid) -> SheetMeta {
    let mut meta = SheetMeta::default();
    for r in 0..grid.row_count().min(SNIFF_ROWS) {
        let first = grid.text(r, 0);
        let lower = first.to_lowercase();
        let value = || {
            first
                .split_once(':')
                .map(|(_, v)| v.trim().to_string())
                .unwrap_or_default()
        };
        if lower.contains("academic year") && meta.academic_year.is_empty() {
            meta.academic_year = value();
        } else if lower.contains("branch") && meta.branch.is_empty() {
            meta.branch = value();
        } else if lower.contains("semester") && meta.semester.is_empty() {
            meta.semester = value();
        }
    }
    meta
}

fn looks_like_course_code(code: &str) -> bool {
    let lower = code.to_lowercase();
    if lower.contains("course") || lower.contains("indicator") || lower.contains("percentage") {
        return false;
    }
    code.len() > 3 && code.len() < 20
}

/// Uploaded-sheet variant: a header row mentioning both "course code" and
/// "course name", followed by one course per row (code in column 1, name
/// in column 2). Collection stops at the first row with an empty code
/// cell once at least one course has been found.
fn find_inline_courses(grid: &RawGrid) -> Option<Vec<CourseInfo>> {
    for r in 0..grid.row_count().min(SNIFF_ROWS) {
        let joined = grid.row_joined_lower(r);
        if !(joined.contains("course code") && joined.contains("course name")) {
            continue;
        }

        let mut courses = Vec::new();
        let end = (r + 1 + COURSE_SCAN_ROWS).min(grid.row_count());
        for j in (r + 1)..end {
            let code = grid.text(j, 1);
            if code.is_empty() {
                if !courses.is_empty() {
                    break;
                }
                continue;
            }
            if !looks_like_course_code(&code) {
                continue;
            }
            let name = grid.text(j, 2);
            courses.push(CourseInfo {
                name: if name.is_empty() { code.clone() } else { name },
                code,
                course_type: CourseType::Unspecified,
            });
        }

        debug!(row = r, count = courses.len(), "inline course header found");
        return Some(courses);
    }
    None
}

/// Template variant: column 0 is exactly "course code" and the codes sit
/// in columns 3 and up, one non-empty cell per course.
fn find_template_course_row(grid: &RawGrid) -> Option<Vec<CourseInfo>> {
    for r in 0..grid.row_count().min(SNIFF_ROWS) {
        if grid.text(r, 0).trim().to_lowercase() != "course code" {
            continue;
        }

        let courses: Vec<CourseInfo> = grid
            .row(r)
            .iter()
            .skip(3)
            .filter_map(|cell| {
                let code = cell.as_text();
                if code.is_empty() || code.to_lowercase().contains("course") {
                    None
                } else {
                    Some(CourseInfo {
                        name: code.clone(),
                        code,
                        course_type: CourseType::Unspecified,
                    })
                }
            })
            .collect();

        debug!(row = r, count = courses.len(), "template course row found");
        return Some(courses);
    }
    None
}

/// Build the course-code → course-type mapping from the auxiliary
/// "Course Details" sheet: its header row mentions "course code" and
/// "course type"; data rows carry the code in column 1 and the type in
/// column 4. A missing sheet means every course defaults to non-project.
pub fn course_type_lookup(aux: Option<&RawGrid>) -> HashMap<String, CourseType> {
    let mut map = HashMap::new();
    let Some(grid) = aux else {
        return map;
    };

    let header = (0..grid.row_count()).find(|&r| {
        let joined = grid.row_joined_lower(r);
        joined.contains("course code") && joined.contains("course type")
    });
    let Some(header) = header else {
        return map;
    };

    for r in (header + 1)..grid.row_count() {
        let code = grid.text(r, 1);
        if code.is_empty() {
            continue;
        }
        map.insert(code, CourseType::parse(&grid.text(r, 4)));
    }
    map
}
