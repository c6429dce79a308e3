use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::calc::Remarks;
use crate::engine;
use crate::error::{EngineError, EngineResult};
use crate::model::{AcademicRecord, SchoolProfile, Student, StudentStatus, SubjectGrade};

/// Records printed per page of the permanent record form.
pub const SF10_RECORDS_PER_PAGE: usize = 4;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sf10Record {
    #[serde(flatten)]
    pub record: AcademicRecord,
    pub section_name: Option<String>,
    pub grades: Vec<SubjectGrade>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sf10Page {
    pub page: usize,
    pub records: Vec<Sf10Record>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sf10Model {
    pub student: Student,
    pub full_name: String,
    pub school: Option<SchoolProfile>,
    pub record_count: usize,
    pub pages: Vec<Sf10Page>,
}

pub fn sf10_model(conn: &Connection, lrn: &str) -> EngineResult<Sf10Model> {
    let student = engine::get_student(conn, lrn)?;
    let school = engine::get_school(conn)?;

    let mut records = Vec::new();
    for record in engine::list_records(conn, lrn)? {
        let section_name = match record.section_id.as_deref() {
            Some(id) => conn
                .query_row("SELECT name FROM sections WHERE id = ?", [id], |r| {
                    r.get::<_, String>(0)
                })
                .optional()?,
            None => None,
        };
        let grades = engine::record_grades(conn, &record.id)?;
        records.push(Sf10Record {
            record,
            section_name,
            grades,
        });
    }

    let record_count = records.len();
    let mut pages = Vec::new();
    let mut rest = records.into_iter().peekable();
    while rest.peek().is_some() {
        pages.push(Sf10Page {
            page: pages.len() + 1,
            records: rest.by_ref().take(SF10_RECORDS_PER_PAGE).collect(),
        });
    }

    Ok(Sf10Model {
        full_name: student.full_name(),
        student,
        school,
        record_count,
        pages,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCount {
    pub grade_level: i64,
    pub records: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: StudentStatus,
    pub students: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemarksCounts {
    pub promoted: i64,
    pub passed: i64,
    pub failed: i64,
    pub retained: i64,
    pub pending: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemarksSummaryModel {
    pub school_year: String,
    pub remarks: RemarksCounts,
    pub passed_total: i64,
    pub failed_total: i64,
    pub enrollment_by_grade: Vec<GradeCount>,
    pub students_by_status: Vec<StatusCount>,
}

pub fn remarks_summary_model(
    conn: &Connection,
    school_year: Option<&str>,
) -> EngineResult<RemarksSummaryModel> {
    let school_year = match school_year.map(str::trim).filter(|s| !s.is_empty()) {
        Some(y) => y.to_string(),
        None => engine::current_year(conn)?
            .map(|y| y.year_label)
            .ok_or_else(|| {
                EngineError::validation("schoolYear", "no schoolYear given and no academic year is configured")
            })?,
    };

    let mut counts = RemarksCounts::default();
    let mut stmt = conn.prepare(
        "SELECT remarks, COUNT(*) FROM academic_records WHERE school_year = ? GROUP BY remarks",
    )?;
    let rows = stmt
        .query_map([&school_year], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (raw, n) in rows {
        match Remarks::from_stored(&raw).map_err(EngineError::Corrupt)? {
            Some(Remarks::Promoted) => counts.promoted += n,
            Some(Remarks::Passed) => counts.passed += n,
            Some(Remarks::Failed) => counts.failed += n,
            Some(Remarks::Retained) => counts.retained += n,
            None => counts.pending += n,
        }
    }

    let mut stmt = conn.prepare(
        "SELECT grade_level, COUNT(*) FROM academic_records
         WHERE school_year = ?
         GROUP BY grade_level
         ORDER BY grade_level",
    )?;
    let enrollment_by_grade = stmt
        .query_map([&school_year], |r| {
            Ok(GradeCount {
                grade_level: r.get(0)?,
                records: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM students GROUP BY status ORDER BY status")?;
    let students_by_status = stmt
        .query_map([], |r| {
            Ok(StatusCount {
                status: r.get(0)?,
                students: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RemarksSummaryModel {
        school_year,
        passed_total: counts.promoted + counts.passed,
        failed_total: counts.failed + counts.retained,
        remarks: counts,
        enrollment_by_grade,
        students_by_status,
    })
}
