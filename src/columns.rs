use tracing::debug;

use crate::layout::{CourseInfo, CourseRowKind};

/// Column positions for one subject. `cie_col` is `None` exactly when the
/// subject is SEE-only (project courses); otherwise it sits strictly left
/// of `see_col`.
#[derive(Debug, Clone)]
pub struct SubjectColumns {
    pub course_code: String,
    pub course_name: String,
    pub cie_col: Option<usize>,
    pub see_col: usize,
    pub is_project: bool,
}

/// Choose the pairing strategy from the course-detection path. Template
/// sheets are walked course-by-course in lockstep with the header columns
/// (project-aware); everything else falls back to plain index pairing.
/// Subject order always matches course detection order.
pub fn pair(
    headers: &[String],
    courses: &[CourseInfo],
    kind: CourseRowKind,
    project_aware: bool,
) -> Vec<SubjectColumns> {
    if kind == CourseRowKind::TemplateRow && project_aware {
        pair_sequential(headers, courses)
    } else {
        pair_by_index(headers, courses)
    }
}

/// Generic-upload pairing: collect the indices of headers that are exactly
/// "cie" or "see", then group them two at a time. The i-th pair belongs to
/// the i-th detected course, or to a synthetic "Subject N" when the course
/// list runs short. A trailing unpaired index is dropped.
pub fn pair_by_index(headers: &[String], courses: &[CourseInfo]) -> Vec<SubjectColumns> {
    let mark_cols: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| {
            let h = h.to_lowercase();
            h == "cie" || h == "see"
        })
        .map(|(i, _)| i)
        .collect();

    let subjects: Vec<SubjectColumns> = mark_cols
        .chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| {
            let (code, name) = match courses.get(i) {
                Some(c) => (c.code.clone(), c.name.clone()),
                None => {
                    let code = format!("Subject {}", i + 1);
                    (code.clone(), code)
                }
            };
            SubjectColumns {
                course_code: code,
                course_name: name,
                cie_col: Some(pair[0]),
                see_col: pair[1],
                is_project: false,
            }
        })
        .collect();

    debug!(
        mark_cols = mark_cols.len(),
        subjects = subjects.len(),
        "index pairing"
    );
    subjects
}

/// Template pairing: a running cursor starts at column 3 (after S.N., USN,
/// NAME) and advances by the columns each course consumes. A project-type
/// course, or a bare "see" at the cursor, consumes one SEE-only column;
/// anything else consumes a CIE/SEE pair, even when the header text is
/// malformed.
pub fn pair_sequential(headers: &[String], courses: &[CourseInfo]) -> Vec<SubjectColumns> {
    let header_at = |i: usize| {
        headers
            .get(i)
            .map(|h| h.to_lowercase())
            .unwrap_or_default()
    };

    let mut cursor = 3usize;
    let mut subjects = Vec::with_capacity(courses.len());
    for course in courses {
        if course.course_type.is_project() || header_at(cursor) == "see" {
            subjects.push(SubjectColumns {
                course_code: course.code.clone(),
                course_name: course.name.clone(),
                cie_col: None,
                see_col: cursor,
                is_project: true,
            });
            cursor += 1;
        } else {
            subjects.push(SubjectColumns {
                course_code: course.code.clone(),
                course_name: course.name.clone(),
                cie_col: Some(cursor),
                see_col: cursor + 1,
                is_project: false,
            });
            cursor += 2;
        }
    }

    debug!(subjects = subjects.len(), "sequential pairing");
    subjects
}
