use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::columns::{self, SubjectColumns};
use crate::extract;
use crate::grid::RawGrid;
use crate::layout::{self, CourseType};

/// Fatal pipeline failures. Everything else (malformed cells, missing
/// metadata, absent course rows) degrades to defaults and never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisError {
    NoWorksheet,
    HeaderNotFound,
    NoStudentData,
}

impl AnalysisError {
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::NoWorksheet => "no_worksheet",
            AnalysisError::HeaderNotFound => "header_not_found",
            AnalysisError::NoStudentData => "no_student_data",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AnalysisError::NoWorksheet => "no worksheet found in the uploaded file",
            AnalysisError::HeaderNotFound => "could not find the student data header row",
            AnalysisError::NoStudentData => "no valid student data found",
        }
    }
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for AnalysisError {}

/// Marks thresholds. One engine, one threshold set; the historical
/// simpler variants of this pipeline are superseded by these values.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Minimum CIE+SEE total to pass a regular subject.
    pub subject_pass_total: f64,
    /// SEE floor a regular subject must clear regardless of total.
    pub see_floor: f64,
    /// SEE needed to pass a project (SEE-only) subject.
    pub project_see_pass: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            subject_pass_total: 40.0,
            see_floor: 18.0,
            project_see_pass: 40.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisOptions {
    /// Walk template-originated headers course-by-course, honoring
    /// SEE-only project columns. Off forces plain CIE/SEE index pairing.
    pub project_aware_pairing: bool,
    pub thresholds: Thresholds,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        AnalysisOptions {
            project_aware_pairing: true,
            thresholds: Thresholds::default(),
        }
    }
}

/// Grade bands over the overall percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "FCD")]
    Fcd,
    #[serde(rename = "FC")]
    Fc,
    #[serde(rename = "SC")]
    Sc,
    P,
    F,
}

impl Grade {
    pub fn from_percentage(pct: f64) -> Grade {
        if pct >= 70.0 {
            Grade::Fcd
        } else if pct >= 60.0 {
            Grade::Fc
        } else if pct >= 50.0 {
            Grade::Sc
        } else if pct >= 40.0 {
            Grade::P
        } else {
            Grade::F
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
}

/// CIE serializes as a number, or the literal "N/A" for SEE-only
/// subjects; "N/A" (or any non-number) reads back as absent.
mod cie_na {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(n) => s.serialize_f64(*n),
            None => s.serialize_str("N/A"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let v = serde_json::Value::deserialize(d)?;
        Ok(v.as_f64())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMarks {
    #[serde(with = "cie_na")]
    pub cie: Option<f64>,
    pub see: f64,
    pub total: f64,
    pub course_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    #[serde(default)]
    pub sn: usize,
    pub usn: String,
    pub name: String,
    pub subjects: Vec<SubjectMarks>,
    pub total_marks: f64,
    #[serde(default)]
    pub average: f64,
    pub percentage: f64,
    pub grade: Grade,
    pub result: ResultStatus,
    #[serde(default)]
    pub rank: usize,
    #[serde(default)]
    pub rank_color: String,
    #[serde(default)]
    pub rank_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStat {
    pub subject: String,
    pub course_code: String,
    pub course_name: String,
    pub appeared: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_percent: f64,
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
    #[serde(rename = "maxCIE")]
    pub max_cie: f64,
    #[serde(rename = "minCIE")]
    pub min_cie: f64,
    #[serde(rename = "avgCIE")]
    pub avg_cie: f64,
    #[serde(rename = "maxSEE")]
    pub max_see: f64,
    #[serde(rename = "minSEE")]
    pub min_see: f64,
    #[serde(rename = "avgSEE")]
    pub avg_see: f64,
    pub fcd: usize,
    pub fc: usize,
    pub sc: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub total_students: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub overall_avg: f64,
    pub overall_high: f64,
    pub overall_low: f64,
    pub pass_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseTypeSummary {
    pub course_code: String,
    pub course_type: CourseType,
    pub is_project: bool,
}

/// The complete analysis output: the single contract exposed to the
/// rendering and export collaborators. Built once per run; read-only
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub class_stats: ClassStats,
    pub subject_stats: Vec<SubjectStat>,
    pub students: Vec<StudentRecord>,
    pub subject_names: Vec<String>,
    pub course_codes: Vec<String>,
    pub course_names: Vec<String>,
    pub course_types: Vec<CourseTypeSummary>,
    pub academic_year: String,
    pub branch: String,
    pub semester: String,
    pub headers: Vec<String>,
    pub total_students: usize,
    pub summary: Summary,
    pub analyzed_at: String,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Run the full pipeline over the primary grid plus the optional
/// "Course Details" grid. Pure apart from the timestamp; no I/O.
pub fn run_analysis(
    primary: &RawGrid,
    course_details: Option<&RawGrid>,
    opts: &AnalysisOptions,
) -> Result<AnalysisResult, AnalysisError> {
    if primary.row_count() == 0 {
        return Err(AnalysisError::NoWorksheet);
    }

    let types = layout::course_type_lookup(course_details);
    let sheet = layout::locate(primary, &types)?;
    let subjects = columns::pair(
        &sheet.headers,
        &sheet.courses,
        sheet.course_row_kind,
        opts.project_aware_pairing,
    );

    let shells = extract::extract_students(primary, sheet.header_row + 1);
    if shells.is_empty() {
        return Err(AnalysisError::NoStudentData);
    }

    let mut students: Vec<StudentRecord> = shells
        .iter()
        .enumerate()
        .map(|(i, shell)| score_student(primary, shell, i, &subjects, &opts.thresholds))
        .collect();
    assign_ranks(&mut students);

    let (subject_stats, all_marks) =
        subject_statistics(&students, &subjects, opts.thresholds.subject_pass_total);

    let total_students = students.len();
    let passed = students
        .iter()
        .filter(|s| s.result == ResultStatus::Pass)
        .count();
    let pass_percentage = round2(passed as f64 / total_students as f64 * 100.0);

    let overall_avg = if all_marks.is_empty() {
        0.0
    } else {
        round2(all_marks.iter().sum::<f64>() / all_marks.len() as f64)
    };
    let overall_high = all_marks.iter().copied().fold(0.0_f64, f64::max);
    let overall_low = if all_marks.is_empty() {
        0.0
    } else {
        all_marks.iter().copied().fold(f64::INFINITY, f64::min)
    };

    info!(
        students = total_students,
        subjects = subjects.len(),
        passed,
        "analysis complete"
    );

    Ok(AnalysisResult {
        class_stats: ClassStats {
            total_students,
            passed,
            failed: total_students - passed,
            pass_percentage,
        },
        subject_stats,
        subject_names: subjects.iter().map(|s| s.course_code.clone()).collect(),
        course_codes: sheet.courses.iter().map(|c| c.code.clone()).collect(),
        course_names: sheet.courses.iter().map(|c| c.name.clone()).collect(),
        course_types: subjects
            .iter()
            .map(|s| CourseTypeSummary {
                course_code: s.course_code.clone(),
                course_type: if s.is_project {
                    CourseType::Project
                } else {
                    sheet
                        .courses
                        .iter()
                        .find(|c| c.code == s.course_code)
                        .map(|c| c.course_type)
                        .unwrap_or(CourseType::Unspecified)
                },
                is_project: s.is_project,
            })
            .collect(),
        students,
        academic_year: sheet.meta.academic_year,
        branch: sheet.meta.branch,
        semester: sheet.meta.semester,
        headers: sheet.headers,
        total_students,
        summary: Summary {
            overall_avg,
            overall_high,
            overall_low,
            pass_percent: pass_percentage,
        },
        analyzed_at: chrono::Utc::now().to_rfc3339(),
    })
}

fn score_student(
    grid: &RawGrid,
    shell: &extract::StudentShell,
    index: usize,
    subjects: &[SubjectColumns],
    thresholds: &Thresholds,
) -> StudentRecord {
    let marks: Vec<SubjectMarks> = subjects
        .iter()
        .map(|sc| {
            let see = grid.number(shell.row, sc.see_col);
            match sc.cie_col {
                Some(c) => {
                    let cie = grid.number(shell.row, c);
                    SubjectMarks {
                        cie: Some(cie),
                        see,
                        total: cie + see,
                        course_code: sc.course_code.clone(),
                    }
                }
                None => SubjectMarks {
                    cie: None,
                    see,
                    total: see,
                    course_code: sc.course_code.clone(),
                },
            }
        })
        .collect();

    let total: f64 = marks.iter().map(|m| m.total).sum();
    let n = marks.len();
    let average = if n > 0 { round2(total / n as f64) } else { 0.0 };
    // Each subject's full-marks denominator is fixed at 100.
    let percentage = if n > 0 {
        round2(total / (n as f64 * 100.0) * 100.0)
    } else {
        0.0
    };

    let all_passed = subjects.iter().zip(&marks).all(|(sc, m)| {
        if sc.is_project {
            m.see >= thresholds.project_see_pass
        } else {
            m.total >= thresholds.subject_pass_total && m.see >= thresholds.see_floor
        }
    });

    debug!(usn = %shell.usn, total, percentage, all_passed, "student scored");

    StudentRecord {
        sn: index + 1,
        usn: shell.usn.clone(),
        name: shell.name.clone(),
        subjects: marks,
        total_marks: round2(total),
        average,
        percentage,
        // Grade and result are deliberately independent: the grade bands
        // read the aggregate percentage while the result gates on every
        // subject's own pass rule, so a "P"-grade student can still FAIL.
        grade: Grade::from_percentage(percentage),
        result: if all_passed {
            ResultStatus::Pass
        } else {
            ResultStatus::Fail
        },
        rank: 0,
        rank_color: String::new(),
        rank_label: String::new(),
    }
}

/// Dense rank by first match: stable-sort a copy of the percentages
/// descending, then each student's rank is one plus the position of the
/// first entry equal to their own. Exact ties therefore share the rank of
/// the earliest tied student, and the ordering below a tie keeps counting
/// occupied positions (1, 1, 3, ...). Percentages are already rounded to
/// two decimals, so equality here is exact.
fn assign_ranks(students: &mut [StudentRecord]) {
    let mut order: Vec<f64> = students.iter().map(|s| s.percentage).collect();
    order.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    for student in students.iter_mut() {
        let rank = order
            .iter()
            .position(|&p| p == student.percentage)
            .map(|p| p + 1)
            .unwrap_or(0);
        student.rank = rank;
        let (color, label) = match rank {
            1 => ("#FFD700", "🥇 1st".to_string()),
            2 => ("#C0C0C0", "🥈 2nd".to_string()),
            3 => ("#CD7F32", "🥉 3rd".to_string()),
            _ => ("transparent", rank.to_string()),
        };
        student.rank_color = color.to_string();
        student.rank_label = label;
    }
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn min_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn avg_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        round2(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Per-subject aggregates. Averages, minima and the pass count run over
/// the "valid" subset (total > 0, students who actually appeared with
/// marks); maxima run over the full arrays. The asymmetry is inherited
/// behavior and covered by tests; do not "fix" one side without the
/// other. Subjects where nobody has a non-zero total produce no row.
fn subject_statistics(
    students: &[StudentRecord],
    subjects: &[SubjectColumns],
    pass_total: f64,
) -> (Vec<SubjectStat>, Vec<f64>) {
    let mut stats = Vec::new();
    let mut all_marks: Vec<f64> = Vec::new();

    for (j, sc) in subjects.iter().enumerate() {
        let totals: Vec<f64> = students.iter().map(|s| s.subjects[j].total).collect();
        let sees: Vec<f64> = students.iter().map(|s| s.subjects[j].see).collect();
        let cies: Vec<f64> = if sc.is_project {
            Vec::new()
        } else {
            students
                .iter()
                .map(|s| s.subjects[j].cie.unwrap_or(0.0))
                .collect()
        };

        let valid_totals: Vec<f64> = totals.iter().copied().filter(|&m| m > 0.0).collect();
        if valid_totals.is_empty() {
            continue;
        }
        let valid_cies: Vec<f64> = cies.iter().copied().filter(|&m| m > 0.0).collect();
        let valid_sees: Vec<f64> = sees.iter().copied().filter(|&m| m > 0.0).collect();

        let passed = valid_totals.iter().filter(|&&m| m >= pass_total).count();
        let fcd = totals.iter().filter(|&&m| m >= 70.0).count();
        let fc = totals.iter().filter(|&&m| (60.0..70.0).contains(&m)).count();
        // Subject-level band floor is 40, not the student-level 50.
        let sc_band = totals.iter().filter(|&&m| (40.0..60.0).contains(&m)).count();

        stats.push(SubjectStat {
            subject: sc.course_code.clone(),
            course_code: sc.course_code.clone(),
            course_name: sc.course_name.clone(),
            appeared: students.len(),
            passed,
            failed: valid_totals.len() - passed,
            pass_percent: round2(passed as f64 / valid_totals.len() as f64 * 100.0),
            average: avg_of(&valid_totals),
            highest: max_of(&totals),
            lowest: min_of(&valid_totals),
            max_cie: if cies.is_empty() { 0.0 } else { max_of(&cies) },
            min_cie: if valid_cies.is_empty() {
                0.0
            } else {
                min_of(&valid_cies)
            },
            avg_cie: avg_of(&valid_cies),
            max_see: if sees.is_empty() { 0.0 } else { max_of(&sees) },
            min_see: if valid_sees.is_empty() {
                0.0
            } else {
                min_of(&valid_sees)
            },
            avg_see: avg_of(&valid_sees),
            fcd,
            fc,
            sc: sc_band,
        });

        all_marks.extend(valid_totals);
    }

    (stats, all_marks)
}
