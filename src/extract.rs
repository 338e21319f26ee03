use tracing::debug;

use crate::grid::RawGrid;

/// A student row located in the grid: identity plus the row index the
/// analysis engine reads marks from. Marks are not touched here.
#[derive(Debug, Clone)]
pub struct StudentShell {
    pub usn: String,
    pub name: String,
    pub row: usize,
}

/// Scan rows below the header for student records. A row qualifies when
/// its USN cell (column 1, aligned with the second header column) trims to
/// more than two characters and is not a stray repeat of the header or a
/// serial-number legend ("usn" / "s.n" substrings).
pub fn extract_students(grid: &RawGrid, data_start: usize) -> Vec<StudentShell> {
    let mut students = Vec::new();
    for r in data_start..grid.row_count() {
        if grid.row_is_empty(r) || grid.cell(r, 1).is_empty() {
            continue;
        }
        let usn = grid.text(r, 1).trim().to_string();
        let lower = usn.to_lowercase();
        if usn.len() <= 2 || lower.contains("usn") || lower.contains("s.n") {
            continue;
        }
        students.push(StudentShell {
            usn,
            name: grid.text(r, 2),
            row: r,
        });
    }
    debug!(count = students.len(), data_start, "students extracted");
    students
}
