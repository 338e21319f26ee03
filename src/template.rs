use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::analysis::{CourseTypeSummary, StudentRecord};
use crate::layout::CourseType;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateCourse {
    pub course_code: String,
    #[serde(default)]
    pub course_title: String,
    #[serde(default)]
    pub staff_incharge: String,
    #[serde(default)]
    pub course_type: String,
    #[serde(default, rename = "maxCIE")]
    pub max_cie: f64,
    #[serde(default, rename = "minCIE")]
    pub min_cie: f64,
    #[serde(default, rename = "maxSEE")]
    pub max_see: f64,
    #[serde(default, rename = "minSEE")]
    pub min_see: f64,
    #[serde(default)]
    pub total_max: f64,
    #[serde(default)]
    pub total_min: f64,
}

impl TemplateCourse {
    fn is_project(&self) -> bool {
        CourseType::parse(&self.course_type).is_project()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateStudent {
    pub usn: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRequest {
    #[serde(default)]
    pub academic_year: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub semester: String,
    pub courses: Vec<TemplateCourse>,
    #[serde(default)]
    pub students: Vec<TemplateStudent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateSheet {
    pub name: String,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedTemplate {
    pub sheets: Vec<TemplateSheet>,
}

const INSTRUCTION_ROW: &str = "Please enter the marks and upload this Excel file to the \
'Examination Result Analysis' software to analyze the results";

/// Build the blank marks-entry workbook as JSON grids: the "Result
/// Template" sheet the analyzer later reads back, plus "Course Details"
/// (which carries the course types the pairing step needs) and a plain
/// "Student List". Project courses occupy a single SEE column, so the
/// course-code row and the header row advance in lockstep.
pub fn generate(req: &TemplateRequest) -> GeneratedTemplate {
    let mut result_rows: Vec<Vec<Value>> = vec![
        vec![json!(INSTRUCTION_ROW)],
        vec![json!(format!("Academic Year: {}", req.academic_year))],
        vec![json!(format!("Branch: {}", req.branch))],
        vec![json!(format!("Semester: {}", req.semester))],
    ];

    let mut code_row = vec![json!("Course Code"), json!(""), json!("")];
    let mut header_row = vec![json!("S.N."), json!("USN"), json!("NAME")];
    for course in &req.courses {
        code_row.push(json!(course.course_code));
        if course.is_project() {
            header_row.push(json!("SEE"));
        } else {
            code_row.push(json!(""));
            header_row.push(json!("CIE"));
            header_row.push(json!("SEE"));
        }
    }
    let marks_width = header_row.len() - 3;
    result_rows.push(code_row);
    result_rows.push(header_row);

    for (idx, student) in req.students.iter().enumerate() {
        let mut row = vec![json!(idx + 1), json!(student.usn), json!(student.name)];
        row.extend(std::iter::repeat(json!("")).take(marks_width));
        result_rows.push(row);
    }

    let mut sheets = vec![TemplateSheet {
        name: "Result Template".to_string(),
        rows: result_rows,
    }];

    if !req.courses.is_empty() {
        let mut course_rows: Vec<Vec<Value>> = vec![
            vec![json!("Course Information")],
            vec![
                json!("S.No"),
                json!("Course Code"),
                json!("Course Title"),
                json!("Staff Incharge"),
                json!("Course Type"),
                json!("MAX CIE"),
                json!("MIN CIE"),
                json!("MAX SEE"),
                json!("MIN SEE"),
                json!("Total MAX"),
                json!("Total MIN"),
            ],
        ];
        for (idx, c) in req.courses.iter().enumerate() {
            course_rows.push(vec![
                json!(idx + 1),
                json!(c.course_code),
                json!(c.course_title),
                json!(c.staff_incharge),
                json!(c.course_type),
                json!(c.max_cie),
                json!(c.min_cie),
                json!(c.max_see),
                json!(c.min_see),
                json!(c.total_max),
                json!(c.total_min),
            ]);
        }
        sheets.push(TemplateSheet {
            name: "Course Details".to_string(),
            rows: course_rows,
        });
    }

    let mut student_rows: Vec<Vec<Value>> = vec![
        vec![json!("Student Information")],
        vec![json!("S.No"), json!("USN"), json!("Student Name")],
    ];
    for (idx, s) in req.students.iter().enumerate() {
        student_rows.push(vec![json!(idx + 1), json!(s.usn), json!(s.name)]);
    }
    sheets.push(TemplateSheet {
        name: "Student List".to_string(),
        rows: student_rows,
    });

    debug!(
        courses = req.courses.len(),
        students = req.students.len(),
        "template generated"
    );
    GeneratedTemplate { sheets }
}

/// Re-serialize finalized records into the student-wise results grid: one
/// flat header row, then S.N./USN/Name, per-subject CIE/SEE/Total (SEE and
/// Total only for SEE-only subjects), % Marks, Result and Grade. The
/// header keeps bare CIE/SEE labels so the grid feeds straight back into
/// index pairing.
pub fn export_students_grid(
    students: &[StudentRecord],
    course_types: &[CourseTypeSummary],
) -> Vec<Vec<Value>> {
    let subject_is_project = |idx: usize, code: &str, cie_absent: bool| {
        course_types
            .iter()
            .find(|ct| ct.course_code == code)
            .map(|ct| ct.is_project)
            .unwrap_or(cie_absent || course_types.get(idx).map_or(false, |ct| ct.is_project))
    };

    let mut header = vec![json!("S.N."), json!("USN"), json!("Name")];
    if let Some(first) = students.first() {
        for (idx, subj) in first.subjects.iter().enumerate() {
            if !subject_is_project(idx, &subj.course_code, subj.cie.is_none()) {
                header.push(json!("CIE"));
            }
            header.push(json!("SEE"));
            header.push(json!("Total"));
        }
    }
    header.push(json!("% Marks"));
    header.push(json!("Result"));
    header.push(json!("Grade"));

    let mut rows = vec![header];
    for (idx, s) in students.iter().enumerate() {
        let mut row = vec![json!(idx + 1), json!(s.usn), json!(s.name)];
        for (j, subj) in s.subjects.iter().enumerate() {
            if !subject_is_project(j, &subj.course_code, subj.cie.is_none()) {
                row.push(match subj.cie {
                    Some(c) => json!(c),
                    None => json!("N/A"),
                });
            }
            row.push(json!(subj.see));
            row.push(json!(subj.total));
        }
        row.push(json!(s.percentage));
        row.push(serde_json::to_value(s.result).unwrap_or(Value::Null));
        row.push(serde_json::to_value(s.grade).unwrap_or(Value::Null));
        rows.push(row);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisOptions, run_analysis};
    use crate::grid::RawGrid;

    fn request() -> TemplateRequest {
        serde_json::from_value(json!({
            "academicYear": "2024-25",
            "branch": "CSE",
            "semester": "3",
            "courses": [
                {"courseCode": "BCS101", "courseTitle": "Data Structures",
                 "staffIncharge": "Dr. X", "courseType": "Theory",
                 "maxCIE": 50, "minCIE": 20, "maxSEE": 50, "minSEE": 18,
                 "totalMax": 100, "totalMin": 40},
                {"courseCode": "BPRJ108", "courseTitle": "Mini Project",
                 "staffIncharge": "Dr. Y", "courseType": "Project",
                 "maxSEE": 100, "minSEE": 40, "totalMax": 100, "totalMin": 40}
            ],
            "students": [
                {"usn": "1XX21CS001", "name": "Alice"},
                {"usn": "1XX21CS002", "name": "Bob"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn result_sheet_layout() {
        let t = generate(&request());
        assert_eq!(t.sheets.len(), 3);
        let rows = &t.sheets[0].rows;
        assert_eq!(t.sheets[0].name, "Result Template");
        assert!(rows[0][0].as_str().unwrap().contains("upload this Excel file"));
        assert_eq!(rows[1][0], json!("Academic Year: 2024-25"));
        assert_eq!(rows[2][0], json!("Branch: CSE"));
        assert_eq!(rows[3][0], json!("Semester: 3"));
        // code row: theory course spans two columns, project course one
        assert_eq!(rows[4][0], json!("Course Code"));
        assert_eq!(rows[4][3], json!("BCS101"));
        assert_eq!(rows[4][5], json!("BPRJ108"));
        assert_eq!(
            rows[5],
            vec![
                json!("S.N."),
                json!("USN"),
                json!("NAME"),
                json!("CIE"),
                json!("SEE"),
                json!("SEE")
            ]
        );
        // one empty marks row per student
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[6][1], json!("1XX21CS001"));
        assert_eq!(rows[6].len(), 6);
    }

    #[test]
    fn course_details_carries_the_type_column() {
        let t = generate(&request());
        let rows = &t.sheets[1].rows;
        assert_eq!(t.sheets[1].name, "Course Details");
        assert_eq!(rows[1][4], json!("Course Type"));
        assert_eq!(rows[2][1], json!("BCS101"));
        assert_eq!(rows[3][4], json!("Project"));
    }

    #[test]
    fn student_list_sheet() {
        let t = generate(&request());
        let rows = &t.sheets[2].rows;
        assert_eq!(t.sheets[2].name, "Student List");
        assert_eq!(rows[2], vec![json!(1), json!("1XX21CS001"), json!("Alice")]);
    }

    #[test]
    fn no_courses_skips_the_details_sheet() {
        let mut req = request();
        req.courses.clear();
        let t = generate(&req);
        assert_eq!(t.sheets.len(), 2);
        assert_eq!(t.sheets[1].name, "Student List");
    }

    #[test]
    fn export_grid_round_trips_through_analysis() {
        let source = RawGrid::from_json_rows(&[
            json!(["Course Code", "", "", "BCS101", "", "BPH102", ""]),
            json!(["S.N.", "USN", "NAME", "CIE", "SEE", "CIE", "SEE"]),
            json!([1, "1XX21CS001", "Alice", 45, 30, 40, 35]),
            json!([2, "1XX21CS002", "Bob", 20, 10, 15, 12]),
        ]);
        let opts = AnalysisOptions::default();
        let first = run_analysis(&source, None, &opts).unwrap();

        let exported = export_students_grid(&first.students, &first.course_types);
        assert_eq!(exported[0][3], json!("CIE"));
        assert_eq!(exported[0][4], json!("SEE"));
        assert_eq!(exported[0][5], json!("Total"));
        let tail = exported[0].len() - 3;
        assert_eq!(exported[0][tail], json!("% Marks"));
        assert_eq!(exported[1][tail + 1], json!("PASS"));
        assert_eq!(exported[2][tail + 2], json!("F"));

        let rows: Vec<serde_json::Value> =
            exported.iter().cloned().map(Value::Array).collect();
        let grid = RawGrid::from_json_rows(&rows);
        let second = run_analysis(&grid, None, &opts).unwrap();
        assert_eq!(second.students.len(), 2);
        for (a, b) in first.students.iter().zip(&second.students) {
            assert_eq!(a.usn, b.usn);
            assert_eq!(a.percentage, b.percentage);
            assert_eq!(a.result, b.result);
            assert_eq!(a.grade, b.grade);
        }
    }

    #[test]
    fn export_marks_project_columns_see_only() {
        let students: Vec<StudentRecord> = serde_json::from_value(json!([{
            "usn": "1XX21CS001", "name": "Alice",
            "subjects": [{"cie": "N/A", "see": 45.0, "total": 45.0, "courseCode": "BPRJ108"}],
            "totalMarks": 45.0, "percentage": 45.0,
            "grade": "P", "result": "PASS"
        }]))
        .unwrap();
        let exported = export_students_grid(&students, &[]);
        assert_eq!(
            exported[0],
            vec![
                json!("S.N."),
                json!("USN"),
                json!("Name"),
                json!("SEE"),
                json!("Total"),
                json!("% Marks"),
                json!("Result"),
                json!("Grade")
            ]
        );
        assert_eq!(exported[1][3], json!(45.0));
    }
}
