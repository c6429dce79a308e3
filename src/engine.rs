use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::calc::{self, Rating, RecordSummary, Remarks};
use crate::config::{GradingPolicy, PlacementPolicy};
use crate::error::{EngineError, EngineResult};
use crate::model::{
    AcademicRecord, AcademicYear, Applicability, AreaKind, LearningArea, SchoolProfile, Section,
    SectionOccupancy, Sex, Student, StudentStatus, SubjectGrade,
};

pub fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

pub fn parse_iso_date(field: &str, raw: &str) -> EngineResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::validation(field, format!("{} must be a YYYY-MM-DD date", field)))
}

fn iso(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn stored_date(field: &str, raw: Option<&str>) -> EngineResult<Option<NaiveDate>> {
    match raw {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| EngineError::Corrupt(format!("{} holds a non-date value: {}", field, s))),
    }
}

fn non_empty(field: &str, value: &str) -> EngineResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(EngineError::validation(field, format!("{} must not be empty", field)));
    }
    Ok(v.to_string())
}

fn check_grade_level(field: &str, grade_level: i64) -> EngineResult<()> {
    if !(calc::FIRST_GRADE_LEVEL..=calc::FINAL_GRADE_LEVEL).contains(&grade_level) {
        return Err(EngineError::validation(
            field,
            format!(
                "{} must be in {}..={}",
                field,
                calc::FIRST_GRADE_LEVEL,
                calc::FINAL_GRADE_LEVEL
            ),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// School profile

pub fn get_school(conn: &Connection) -> EngineResult<Option<SchoolProfile>> {
    let sql = format!(
        "SELECT {} FROM school_profile WHERE id = 1",
        SchoolProfile::COLUMNS
    );
    Ok(conn.query_row(&sql, [], SchoolProfile::from_row).optional()?)
}

pub fn configure_school(conn: &Connection, profile: &SchoolProfile) -> EngineResult<SchoolProfile> {
    let school_id = non_empty("schoolId", &profile.school_id)?;
    let name = non_empty("name", &profile.name)?;
    conn.execute(
        "INSERT INTO school_profile(id, school_id, name, address, district, division, region, updated_at)
         VALUES(1, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           school_id = excluded.school_id,
           name = excluded.name,
           address = excluded.address,
           district = excluded.district,
           division = excluded.division,
           region = excluded.region,
           updated_at = excluded.updated_at",
        (
            &school_id,
            &name,
            profile.address.trim(),
            profile.district.trim(),
            profile.division.trim(),
            profile.region.trim(),
            now_ts(),
        ),
    )?;
    tracing::info!(school_id = %school_id, "school profile configured");
    get_school(conn)?.ok_or_else(|| EngineError::Corrupt("school profile vanished after write".into()))
}

// ---------------------------------------------------------------------------
// Academic years

pub fn list_years(conn: &Connection) -> EngineResult<Vec<AcademicYear>> {
    let sql = format!(
        "SELECT {} FROM academic_years ORDER BY start_date DESC",
        AcademicYear::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], AcademicYear::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn get_year(conn: &Connection, id: &str) -> EngineResult<AcademicYear> {
    let sql = format!("SELECT {} FROM academic_years WHERE id = ?", AcademicYear::COLUMNS);
    conn.query_row(&sql, [id], AcademicYear::from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("academic year", id))
}

/// The flagged year, or the most recently started one when none is flagged.
pub fn current_year(conn: &Connection) -> EngineResult<Option<AcademicYear>> {
    let sql = format!(
        "SELECT {} FROM academic_years ORDER BY is_current DESC, start_date DESC LIMIT 1",
        AcademicYear::COLUMNS
    );
    Ok(conn.query_row(&sql, [], AcademicYear::from_row).optional()?)
}

pub fn create_year(
    conn: &Connection,
    label: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    make_current: bool,
) -> EngineResult<AcademicYear> {
    let label = label.trim();
    if calc::parse_school_year(label).is_none() {
        return Err(EngineError::validation("yearLabel", "yearLabel must look like 2024-2025"));
    }
    if end_date <= start_date {
        return Err(EngineError::validation("endDate", "endDate must be after startDate"));
    }

    let tx = conn.unchecked_transaction()?;
    if make_current {
        tx.execute("UPDATE academic_years SET is_current = 0 WHERE is_current = 1", [])?;
    }
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO academic_years(id, year_label, start_date, end_date, is_current)
         VALUES(?, ?, ?, ?, ?)",
        (&id, label, iso(start_date), iso(end_date), make_current as i64),
    )
    .map_err(|e| EngineError::on_insert(e, "academic year"))?;
    let year = get_year(&tx, &id)?;
    tx.commit()?;
    Ok(year)
}

/// Flag one year as current, clearing every other flag in the same transaction.
pub fn set_current_year(conn: &Connection, id: &str) -> EngineResult<AcademicYear> {
    let tx = conn.unchecked_transaction()?;
    get_year(&tx, id)?;
    tx.execute(
        "UPDATE academic_years SET is_current = 0 WHERE is_current = 1 AND id <> ?",
        [id],
    )?;
    tx.execute("UPDATE academic_years SET is_current = 1 WHERE id = ?", [id])?;
    let year = get_year(&tx, id)?;
    tx.commit()?;
    tracing::info!(year = %year.year_label, "current academic year set");
    Ok(year)
}

// ---------------------------------------------------------------------------
// Students

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub lrn: String,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: String,
    pub name_extension: String,
    pub birthdate: NaiveDate,
    pub sex: Sex,
}

#[derive(Debug, Clone, Default)]
pub struct StudentPatch {
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub name_extension: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub sex: Option<Sex>,
}

pub fn validate_lrn(lrn: &str) -> EngineResult<()> {
    if lrn.len() != 12 || !lrn.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EngineError::validation("lrn", "lrn must be 12 digits"));
    }
    Ok(())
}

pub fn create_student(conn: &Connection, new: &NewStudent) -> EngineResult<Student> {
    let lrn = new.lrn.trim();
    validate_lrn(lrn)?;
    let last_name = non_empty("lastName", &new.last_name)?;
    let first_name = non_empty("firstName", &new.first_name)?;
    let ts = now_ts();
    conn.execute(
        "INSERT INTO students(lrn, last_name, first_name, middle_name, name_extension, birthdate, sex, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            lrn,
            &last_name,
            &first_name,
            new.middle_name.trim(),
            new.name_extension.trim(),
            iso(new.birthdate),
            new.sex,
            StudentStatus::Pending,
            &ts,
            &ts,
        ),
    )
    .map_err(|e| EngineError::on_insert(e, "student with this lrn"))?;
    get_student(conn, lrn)
}

pub fn get_student(conn: &Connection, lrn: &str) -> EngineResult<Student> {
    let sql = format!("SELECT {} FROM students WHERE lrn = ?", Student::COLUMNS);
    conn.query_row(&sql, [lrn], Student::from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("student", lrn))
}

pub fn list_students(conn: &Connection, status: Option<StudentStatus>) -> EngineResult<Vec<Student>> {
    let sql = format!(
        "SELECT {} FROM students WHERE (?1 IS NULL OR status = ?1) ORDER BY last_name, first_name, lrn",
        Student::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([status], Student::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_student(conn: &Connection, lrn: &str, patch: &StudentPatch) -> EngineResult<Student> {
    let current = get_student(conn, lrn)?;
    let last_name = match &patch.last_name {
        Some(v) => non_empty("lastName", v)?,
        None => current.last_name,
    };
    let first_name = match &patch.first_name {
        Some(v) => non_empty("firstName", v)?,
        None => current.first_name,
    };
    let middle_name = patch
        .middle_name
        .as_deref()
        .map(|s| s.trim().to_string())
        .unwrap_or(current.middle_name);
    let name_extension = patch
        .name_extension
        .as_deref()
        .map(|s| s.trim().to_string())
        .unwrap_or(current.name_extension);
    let birthdate = patch.birthdate.map(iso).unwrap_or(current.birthdate);
    let sex = patch.sex.unwrap_or(current.sex);

    conn.execute(
        "UPDATE students
         SET last_name = ?, first_name = ?, middle_name = ?, name_extension = ?, birthdate = ?, sex = ?, updated_at = ?
         WHERE lrn = ?",
        (
            &last_name,
            &first_name,
            &middle_name,
            &name_extension,
            &birthdate,
            sex,
            now_ts(),
            lrn,
        ),
    )?;
    get_student(conn, lrn)
}

/// Operator status change. GRADUATED is terminal and only reached through promotion.
pub fn set_student_status(
    conn: &Connection,
    lrn: &str,
    status: StudentStatus,
) -> EngineResult<Student> {
    if matches!(status, StudentStatus::Pending | StudentStatus::Graduated) {
        return Err(EngineError::validation(
            "status",
            "status must be one of: ENROLLED, TRANSFERRED, DROPPED",
        ));
    }
    let current = get_student(conn, lrn)?;
    if current.status == StudentStatus::Graduated {
        return Err(EngineError::StatusLocked(
            "a graduated student's status cannot change".into(),
        ));
    }
    conn.execute(
        "UPDATE students SET status = ?, updated_at = ? WHERE lrn = ?",
        (status, now_ts(), lrn),
    )?;
    tracing::info!(lrn, status = status.as_str(), "student status set");
    get_student(conn, lrn)
}

pub fn delete_student(conn: &Connection, lrn: &str) -> EngineResult<()> {
    let tx = conn.unchecked_transaction()?;
    get_student(&tx, lrn)?;
    // No ON DELETE CASCADE; children first.
    tx.execute(
        "DELETE FROM subject_grades
         WHERE record_id IN (SELECT id FROM academic_records WHERE student_lrn = ?)",
        [lrn],
    )?;
    tx.execute("DELETE FROM academic_records WHERE student_lrn = ?", [lrn])?;
    tx.execute("DELETE FROM students WHERE lrn = ?", [lrn])?;
    tx.commit()?;
    tracing::info!(lrn, "student deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Learning areas

#[derive(Debug, Clone)]
pub struct NewLearningArea {
    pub code: String,
    pub name: String,
    pub applicability: Applicability,
    pub kind: AreaKind,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AreaPatch {
    pub name: Option<String>,
    pub kind: Option<AreaKind>,
    pub sort_order: Option<i64>,
}

pub fn create_area(conn: &Connection, new: &NewLearningArea) -> EngineResult<LearningArea> {
    let code = non_empty("code", &new.code)?.to_ascii_uppercase();
    let name = non_empty("name", &new.name)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO learning_areas(id, code, name, applicable_grades, kind, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &code, &name, new.applicability, new.kind, new.sort_order),
    )
    .map_err(|e| EngineError::on_insert(e, "learning area with this code and applicability"))?;
    get_area(conn, &id)
}

pub fn get_area(conn: &Connection, id: &str) -> EngineResult<LearningArea> {
    let sql = format!("SELECT {} FROM learning_areas WHERE id = ?", LearningArea::COLUMNS);
    conn.query_row(&sql, [id], LearningArea::from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("learning area", id))
}

/// Areas offered for `grade_level` (grade-specific plus ALL), or every area.
pub fn list_areas(conn: &Connection, grade_level: Option<i64>) -> EngineResult<Vec<LearningArea>> {
    let sql = format!(
        "SELECT {} FROM learning_areas
         WHERE (?1 IS NULL OR applicable_grades = ?1 OR applicable_grades = 'ALL')
         ORDER BY sort_order, name",
        LearningArea::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([grade_level.map(|g| g.to_string())], LearningArea::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_area(conn: &Connection, id: &str, patch: &AreaPatch) -> EngineResult<LearningArea> {
    let current = get_area(conn, id)?;
    let name = match &patch.name {
        Some(v) => non_empty("name", v)?,
        None => current.name,
    };
    conn.execute(
        "UPDATE learning_areas SET name = ?, kind = ?, sort_order = ? WHERE id = ?",
        (
            &name,
            patch.kind.unwrap_or(current.kind),
            patch.sort_order.unwrap_or(current.sort_order),
            id,
        ),
    )?;
    get_area(conn, id)
}

pub fn delete_area(conn: &Connection, id: &str) -> EngineResult<()> {
    get_area(conn, id)?;
    let used: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subject_grades WHERE learning_area_id = ?",
        [id],
        |r| r.get(0),
    )?;
    if used > 0 {
        return Err(EngineError::InUse(format!(
            "learning area is graded on {} subject rows",
            used
        )));
    }
    conn.execute("DELETE FROM learning_areas WHERE id = ?", [id])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sections

pub fn create_section(
    conn: &Connection,
    grade_level: i64,
    name: &str,
    max_students: Option<i64>,
) -> EngineResult<Section> {
    check_grade_level("gradeLevel", grade_level)?;
    let name = non_empty("name", name)?;
    if let Some(cap) = max_students {
        if cap < 1 {
            return Err(EngineError::validation("maxStudents", "maxStudents must be at least 1"));
        }
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sections(id, grade_level, name, max_students) VALUES(?, ?, ?, ?)",
        (&id, grade_level, &name, max_students),
    )
    .map_err(|e| EngineError::on_insert(e, "section with this name for the grade level"))?;
    get_section(conn, &id)
}

pub fn get_section(conn: &Connection, id: &str) -> EngineResult<Section> {
    let sql = format!("SELECT {} FROM sections WHERE id = ?", Section::COLUMNS);
    conn.query_row(&sql, [id], Section::from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("section", id))
}

/// Distinct students placed in the section at its grade level, ignoring
/// records already promoted out of it.
fn enrollment_count(conn: &Connection, section: &Section) -> EngineResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(DISTINCT student_lrn) FROM academic_records
         WHERE section_id = ? AND grade_level = ? AND remarks <> 'PROMOTED'",
        (&section.id, section.grade_level),
        |r| r.get(0),
    )?)
}

pub fn section_occupancy(
    conn: &Connection,
    section: Section,
    placement: &PlacementPolicy,
) -> EngineResult<SectionOccupancy> {
    let enrolled = enrollment_count(conn, &section)?;
    Ok(SectionOccupancy::new(
        section,
        enrolled,
        placement.near_capacity_percent,
    ))
}

pub fn list_sections(
    conn: &Connection,
    grade_level: Option<i64>,
    placement: &PlacementPolicy,
) -> EngineResult<Vec<SectionOccupancy>> {
    let sql = format!(
        "SELECT {} FROM sections WHERE (?1 IS NULL OR grade_level = ?1) ORDER BY grade_level, name",
        Section::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let sections = stmt
        .query_map([grade_level], Section::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    sections
        .into_iter()
        .map(|s| section_occupancy(conn, s, placement))
        .collect()
}

pub fn delete_section(conn: &Connection, id: &str) -> EngineResult<()> {
    get_section(conn, id)?;
    let used: i64 = conn.query_row(
        "SELECT COUNT(*) FROM academic_records WHERE section_id = ?",
        [id],
        |r| r.get(0),
    )?;
    if used > 0 {
        return Err(EngineError::InUse(format!(
            "section holds {} academic records",
            used
        )));
    }
    conn.execute("DELETE FROM sections WHERE id = ?", [id])?;
    Ok(())
}

fn check_placement(
    conn: &Connection,
    section_id: &str,
    grade_level: i64,
    current_section: Option<&str>,
) -> EngineResult<()> {
    let section = get_section(conn, section_id)?;
    if section.grade_level != grade_level {
        return Err(EngineError::Placement(format!(
            "section {} is for grade {}, record is grade {}",
            section.name, section.grade_level, grade_level
        )));
    }
    if current_section == Some(section_id) {
        return Ok(());
    }
    if let Some(cap) = section.max_students {
        if enrollment_count(conn, &section)? >= cap {
            return Err(EngineError::Placement(format!(
                "section {} is full ({} students)",
                section.name, cap
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Academic records

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub lrn: String,
    pub grade_level: i64,
    pub school_year: Option<String>,
    pub section_id: Option<String>,
    pub adviser: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordAssignment {
    pub section_id: Option<Option<String>>,
    pub adviser: Option<Option<String>>,
}

pub fn get_record(conn: &Connection, id: &str) -> EngineResult<AcademicRecord> {
    let sql = format!("SELECT {} FROM academic_records WHERE id = ?", AcademicRecord::COLUMNS);
    conn.query_row(&sql, [id], AcademicRecord::from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("academic record", id))
}

fn find_record(
    conn: &Connection,
    lrn: &str,
    grade_level: i64,
    school_year: &str,
) -> EngineResult<Option<AcademicRecord>> {
    let sql = format!(
        "SELECT {} FROM academic_records WHERE student_lrn = ? AND grade_level = ? AND school_year = ?",
        AcademicRecord::COLUMNS
    );
    Ok(conn
        .query_row(&sql, (lrn, grade_level, school_year), AcademicRecord::from_row)
        .optional()?)
}

pub fn list_records(conn: &Connection, lrn: &str) -> EngineResult<Vec<AcademicRecord>> {
    get_student(conn, lrn)?;
    let sql = format!(
        "SELECT {} FROM academic_records WHERE student_lrn = ? ORDER BY school_year, grade_level",
        AcademicRecord::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([lrn], AcademicRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Create the (student, grade, year) record or return the one that already exists.
pub fn create_record(conn: &Connection, new: &NewRecord) -> EngineResult<(AcademicRecord, bool)> {
    let tx = conn.unchecked_transaction()?;
    let school_year = match new.school_year.as_deref().map(str::trim) {
        Some(y) if !y.is_empty() => y.to_string(),
        _ => current_year(&tx)?
            .map(|y| y.year_label)
            .ok_or_else(|| {
                EngineError::validation(
                    "schoolYear",
                    "no schoolYear given and no academic year is configured",
                )
            })?,
    };
    let out = create_record_in(
        &tx,
        new.lrn.trim(),
        new.grade_level,
        &school_year,
        new.section_id.as_deref(),
        new.adviser.as_deref(),
    )?;
    tx.commit()?;
    Ok(out)
}

fn create_record_in(
    conn: &Connection,
    lrn: &str,
    grade_level: i64,
    school_year: &str,
    section_id: Option<&str>,
    adviser: Option<&str>,
) -> EngineResult<(AcademicRecord, bool)> {
    get_student(conn, lrn)?;
    check_grade_level("gradeLevel", grade_level)?;
    if let Some(existing) = find_record(conn, lrn, grade_level, school_year)? {
        return Ok((existing, false));
    }
    if let Some(section_id) = section_id {
        check_placement(conn, section_id, grade_level, None)?;
    }

    let record_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    conn.execute(
        "INSERT INTO academic_records(id, student_lrn, grade_level, school_year, section_id, adviser, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (&record_id, lrn, grade_level, school_year, section_id, adviser, &ts, &ts),
    )?;

    let mut stmt = conn.prepare(
        "SELECT id FROM learning_areas
         WHERE kind = 'core' AND (applicable_grades = ? OR applicable_grades = 'ALL')
         ORDER BY sort_order, name",
    )?;
    let area_ids = stmt
        .query_map([grade_level.to_string()], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for area_id in &area_ids {
        conn.execute(
            "INSERT INTO subject_grades(id, record_id, learning_area_id, updated_at) VALUES(?, ?, ?, ?)",
            (Uuid::new_v4().to_string(), &record_id, area_id, &ts),
        )?;
    }

    let enrolled = conn.execute(
        "UPDATE students SET status = 'ENROLLED', updated_at = ? WHERE lrn = ? AND status = 'PENDING'",
        (&ts, lrn),
    )?;
    tracing::info!(
        lrn,
        grade_level,
        school_year,
        subjects = area_ids.len(),
        enrolled = enrolled > 0,
        "academic record created"
    );
    Ok((get_record(conn, &record_id)?, true))
}

pub fn assign_record(
    conn: &Connection,
    record_id: &str,
    assignment: &RecordAssignment,
) -> EngineResult<AcademicRecord> {
    let tx = conn.unchecked_transaction()?;
    let record = get_record(&tx, record_id)?;
    let section_id = match &assignment.section_id {
        Some(Some(id)) => {
            check_placement(&tx, id, record.grade_level, record.section_id.as_deref())?;
            Some(id.clone())
        }
        Some(None) => None,
        None => record.section_id.clone(),
    };
    let adviser = match &assignment.adviser {
        Some(v) => v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from),
        None => record.adviser.clone(),
    };
    tx.execute(
        "UPDATE academic_records SET section_id = ?, adviser = ?, updated_at = ? WHERE id = ?",
        (section_id, adviser, now_ts(), record_id),
    )?;
    let updated = get_record(&tx, record_id)?;
    tx.commit()?;
    Ok(updated)
}

pub fn record_grades(conn: &Connection, record_id: &str) -> EngineResult<Vec<SubjectGrade>> {
    let sql = format!(
        "SELECT {} FROM subject_grades g
         JOIN learning_areas a ON a.id = g.learning_area_id
         WHERE g.record_id = ?
         ORDER BY a.sort_order, a.name",
        SubjectGrade::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([record_id], SubjectGrade::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn record_summary(
    grade_level: i64,
    grades: &[SubjectGrade],
    policy: &GradingPolicy,
) -> RecordSummary {
    let effective: Vec<Option<Rating>> = grades.iter().map(|g| g.effective_rating).collect();
    calc::summarize_record(grade_level, &effective, policy)
}

/// Subjects still below passing or flagged for remedial.
pub fn remedial_subjects(
    conn: &Connection,
    record_id: &str,
    policy: &GradingPolicy,
) -> EngineResult<Vec<SubjectGrade>> {
    get_record(conn, record_id)?;
    Ok(record_grades(conn, record_id)?
        .into_iter()
        .filter(|g| {
            g.needs_remedial || g.final_rating.is_some_and(|f| f < policy.passing_grade)
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Derived-field cascade

pub fn recompute_record(
    conn: &Connection,
    record_id: &str,
    policy: &GradingPolicy,
) -> EngineResult<AcademicRecord> {
    let tx = conn.unchecked_transaction()?;
    let record = recompute_record_in(&tx, record_id, policy)?;
    tx.commit()?;
    Ok(record)
}

/// Refresh general average and remarks from the record's subject grades.
/// Locked remarks are left as the operator set them.
fn recompute_record_in(
    conn: &Connection,
    record_id: &str,
    policy: &GradingPolicy,
) -> EngineResult<AcademicRecord> {
    let record = get_record(conn, record_id)?;
    let grades = record_grades(conn, record_id)?;
    let summary = record_summary(record.grade_level, &grades, policy);
    let remarks = if record.remarks_locked {
        record.remarks
    } else {
        summary.remarks
    };
    conn.execute(
        "UPDATE academic_records SET general_average = ?, remarks = ?, updated_at = ? WHERE id = ?",
        (
            summary.general_average,
            remarks.map(Remarks::as_str).unwrap_or(""),
            now_ts(),
            record_id,
        ),
    )?;
    tracing::debug!(
        record_id,
        general_average = ?summary.general_average,
        failing = summary.failing_count,
        remarks = ?remarks,
        locked = record.remarks_locked,
        "record recomputed"
    );
    let updated = get_record(conn, record_id)?;
    if sync_graduation_in(conn, &updated)? {
        return get_record(conn, record_id);
    }
    Ok(updated)
}

fn graduates_student(record: &AcademicRecord) -> bool {
    record.grade_level >= calc::FINAL_GRADE_LEVEL && record.remarks == Some(Remarks::Promoted)
}

/// A PROMOTED final-grade record graduates its student. Graduation is
/// terminal, so the record's PROMOTED is locked in the same step and later
/// grade edits cannot turn it back. Returns whether anything was written.
fn sync_graduation_in(conn: &Connection, record: &AcademicRecord) -> EngineResult<bool> {
    if !graduates_student(record) {
        return Ok(false);
    }
    let locked = conn.execute(
        "UPDATE academic_records SET remarks_locked = 1 WHERE id = ? AND remarks_locked = 0",
        [&record.id],
    )?;
    let graduated = conn.execute(
        "UPDATE students SET status = 'GRADUATED', updated_at = ? WHERE lrn = ? AND status <> 'GRADUATED'",
        (now_ts(), &record.student_lrn),
    )?;
    if graduated > 0 {
        tracing::info!(lrn = %record.student_lrn, record_id = %record.id, "student graduated");
    }
    Ok(locked > 0 || graduated > 0)
}

/// Remarks of the record that graduated its student stay PROMOTED.
fn ensure_remarks_open_in(conn: &Connection, record: &AcademicRecord) -> EngineResult<()> {
    if !graduates_student(record) {
        return Ok(());
    }
    let student = get_student(conn, &record.student_lrn)?;
    if student.status == StudentStatus::Graduated {
        return Err(EngineError::StatusLocked(
            "remarks of the record that graduated this student cannot change".into(),
        ));
    }
    Ok(())
}

fn set_manual_remarks_in(
    conn: &Connection,
    record_id: &str,
    remarks: Remarks,
) -> EngineResult<AcademicRecord> {
    let current = get_record(conn, record_id)?;
    if remarks != Remarks::Promoted {
        ensure_remarks_open_in(conn, &current)?;
    }
    conn.execute(
        "UPDATE academic_records SET remarks = ?, remarks_locked = 1, updated_at = ? WHERE id = ?",
        (remarks.as_str(), now_ts(), record_id),
    )?;
    tracing::info!(record_id, remarks = remarks.as_str(), "remarks set by operator");
    let updated = get_record(conn, record_id)?;
    sync_graduation_in(conn, &updated)?;
    Ok(updated)
}

pub fn retain_record(conn: &Connection, record_id: &str) -> EngineResult<AcademicRecord> {
    let tx = conn.unchecked_transaction()?;
    let record = set_manual_remarks_in(&tx, record_id, Remarks::Retained)?;
    tx.commit()?;
    Ok(record)
}

/// Drop an operator decision and return the record to derived remarks.
pub fn clear_override(
    conn: &Connection,
    record_id: &str,
    policy: &GradingPolicy,
) -> EngineResult<AcademicRecord> {
    let tx = conn.unchecked_transaction()?;
    let current = get_record(&tx, record_id)?;
    ensure_remarks_open_in(&tx, &current)?;
    tx.execute(
        "UPDATE academic_records SET remarks_locked = 0 WHERE id = ?",
        [record_id],
    )?;
    let record = recompute_record_in(&tx, record_id, policy)?;
    tx.commit()?;
    Ok(record)
}

// ---------------------------------------------------------------------------
// Promotion

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PromotionOutcome {
    /// The record for the next grade and school year.
    Next {
        record: AcademicRecord,
        created: bool,
    },
    /// Final grade level: there is nothing to advance to.
    Final { graduated: bool },
}

/// Advance to grade + 1 in the following school year without touching remarks.
pub fn promote_transition(conn: &Connection, record_id: &str) -> EngineResult<PromotionOutcome> {
    let tx = conn.unchecked_transaction()?;
    let record = get_record(&tx, record_id)?;
    let outcome = promote_transition_in(&tx, &record)?;
    tx.commit()?;
    Ok(outcome)
}

/// Operator promotion: lock remarks to PROMOTED, then advance.
pub fn promote_record(
    conn: &Connection,
    record_id: &str,
) -> EngineResult<(AcademicRecord, PromotionOutcome)> {
    let tx = conn.unchecked_transaction()?;
    let record = set_manual_remarks_in(&tx, record_id, Remarks::Promoted)?;
    let outcome = promote_transition_in(&tx, &record)?;
    tx.commit()?;
    Ok((record, outcome))
}

fn promote_transition_in(
    conn: &Connection,
    record: &AcademicRecord,
) -> EngineResult<PromotionOutcome> {
    if record.grade_level >= calc::FINAL_GRADE_LEVEL {
        sync_graduation_in(conn, record)?;
        let student = get_student(conn, &record.student_lrn)?;
        return Ok(PromotionOutcome::Final {
            graduated: graduates_student(record) && student.status == StudentStatus::Graduated,
        });
    }

    let next_year = match calc::next_school_year(&record.school_year) {
        Some(y) => y,
        None => {
            tracing::warn!(
                school_year = %record.school_year,
                "school year label is not YYYY-YYYY; keeping it for the promoted record"
            );
            record.school_year.clone()
        }
    };
    let (next, created) = create_record_in(
        conn,
        &record.student_lrn,
        record.grade_level + 1,
        &next_year,
        None,
        None,
    )?;
    tracing::info!(
        lrn = %record.student_lrn,
        from_grade = record.grade_level,
        to_grade = next.grade_level,
        school_year = %next.school_year,
        created,
        "promotion transition"
    );
    Ok(PromotionOutcome::Next {
        record: next,
        created,
    })
}

// ---------------------------------------------------------------------------
// Subject grades

/// Requested changes. The outer `Option` means "field present in the patch",
/// the inner one distinguishes a value from an explicit clear.
#[derive(Debug, Clone, Default)]
pub struct GradePatch {
    pub quarters: [Option<Option<Rating>>; 4],
    pub remedial_mark: Option<Option<Rating>>,
    pub remedial_conducted_from: Option<Option<NaiveDate>>,
    pub remedial_conducted_to: Option<Option<NaiveDate>>,
    pub remarks: Option<String>,
}

pub fn get_subject_grade(conn: &Connection, id: &str) -> EngineResult<SubjectGrade> {
    let sql = format!(
        "SELECT {} FROM subject_grades g
         JOIN learning_areas a ON a.id = g.learning_area_id
         WHERE g.id = ?",
        SubjectGrade::COLUMNS
    );
    conn.query_row(&sql, [id], SubjectGrade::from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("subject grade", id))
}

/// Apply a patch, rederive the subject, then cascade to the owning record.
/// Validation runs on the merged state; a rejected patch writes nothing.
pub fn update_subject_grade(
    conn: &Connection,
    grade_id: &str,
    patch: &GradePatch,
    policy: &GradingPolicy,
) -> EngineResult<(SubjectGrade, AcademicRecord)> {
    let tx = conn.unchecked_transaction()?;
    let current = get_subject_grade(&tx, grade_id)?;

    let mut quarters = current.quarters;
    for (slot, change) in quarters.iter_mut().zip(patch.quarters.iter()) {
        if let Some(v) = change {
            *slot = *v;
        }
    }
    let remedial_mark = patch.remedial_mark.unwrap_or(current.remedial_mark);
    let from = match patch.remedial_conducted_from {
        Some(v) => v,
        None => stored_date("remedial_from", current.remedial_conducted_from.as_deref())?,
    };
    let to = match patch.remedial_conducted_to {
        Some(v) => v,
        None => stored_date("remedial_to", current.remedial_conducted_to.as_deref())?,
    };
    calc::validate_remedial_window(remedial_mark, from, to)?;

    let outcome = calc::evaluate_subject(&quarters, remedial_mark, current.needs_remedial, policy);
    let remarks = match outcome.remark {
        Some(r) => r.to_string(),
        None => patch
            .remarks
            .as_deref()
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| current.remarks.clone()),
    };

    tx.execute(
        "UPDATE subject_grades
         SET quarter_1 = ?, quarter_2 = ?, quarter_3 = ?, quarter_4 = ?,
             final_rating = ?, needs_remedial = ?,
             remedial_from = ?, remedial_to = ?, remedial_mark = ?,
             recomputed_final_grade = ?, remarks = ?, updated_at = ?
         WHERE id = ?",
        (
            quarters[0],
            quarters[1],
            quarters[2],
            quarters[3],
            outcome.final_rating,
            outcome.needs_remedial as i64,
            from.map(iso),
            to.map(iso),
            remedial_mark,
            outcome.recomputed_final_grade,
            &remarks,
            now_ts(),
            grade_id,
        ),
    )?;
    tracing::debug!(
        grade_id,
        final_rating = ?outcome.final_rating,
        recomputed = ?outcome.recomputed_final_grade,
        needs_remedial = outcome.needs_remedial,
        "subject grade recomputed"
    );

    let record = recompute_record_in(&tx, &current.record_id, policy)?;
    let updated = get_subject_grade(&tx, grade_id)?;
    tx.commit()?;
    Ok((updated, record))
}

/// Attach an extra learning area (typically an optional one) to a record.
pub fn add_subject_grade(
    conn: &Connection,
    record_id: &str,
    area_id: &str,
    policy: &GradingPolicy,
) -> EngineResult<(SubjectGrade, AcademicRecord)> {
    let tx = conn.unchecked_transaction()?;
    let record = get_record(&tx, record_id)?;
    let area = get_area(&tx, area_id)?;
    if !area.applicability.applies_to(record.grade_level) {
        return Err(EngineError::validation(
            "learningAreaId",
            format!(
                "{} is not offered for grade {}",
                area.code, record.grade_level
            ),
        ));
    }
    let grade_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO subject_grades(id, record_id, learning_area_id, updated_at) VALUES(?, ?, ?, ?)",
        (&grade_id, record_id, area_id, now_ts()),
    )
    .map_err(|e| EngineError::on_insert(e, "subject grade for this learning area"))?;
    let record = recompute_record_in(&tx, record_id, policy)?;
    let grade = get_subject_grade(&tx, &grade_id)?;
    tx.commit()?;
    Ok((grade, record))
}

pub fn delete_subject_grade(
    conn: &Connection,
    grade_id: &str,
    policy: &GradingPolicy,
) -> EngineResult<AcademicRecord> {
    let tx = conn.unchecked_transaction()?;
    let current = get_subject_grade(&tx, grade_id)?;
    tx.execute("DELETE FROM subject_grades WHERE id = ?", [grade_id])?;
    let record = recompute_record_in(&tx, &current.record_id, policy)?;
    tx.commit()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("schema");
        conn
    }

    fn r(points: f64) -> Rating {
        Rating::from_f64(points).expect("valid rating")
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn student(conn: &Connection, lrn: &str) -> Student {
        create_student(
            conn,
            &NewStudent {
                lrn: lrn.to_string(),
                last_name: "Dela Cruz".into(),
                first_name: "Juan".into(),
                middle_name: String::new(),
                name_extension: String::new(),
                birthdate: date("2011-05-04"),
                sex: Sex::M,
            },
        )
        .expect("create student")
    }

    fn area(conn: &Connection, code: &str, applicability: Applicability, kind: AreaKind) -> LearningArea {
        create_area(
            conn,
            &NewLearningArea {
                code: code.into(),
                name: code.into(),
                applicability,
                kind,
                sort_order: 0,
            },
        )
        .expect("create area")
    }

    fn record(conn: &Connection, lrn: &str, grade_level: i64, year: &str) -> AcademicRecord {
        create_record(
            conn,
            &NewRecord {
                lrn: lrn.into(),
                grade_level,
                school_year: Some(year.into()),
                section_id: None,
                adviser: None,
            },
        )
        .expect("create record")
        .0
    }

    fn set_quarters(conn: &Connection, grade_id: &str, q: [Option<f64>; 4]) -> (SubjectGrade, AcademicRecord) {
        let patch = GradePatch {
            quarters: q.map(|v| Some(v.map(r))),
            ..GradePatch::default()
        };
        update_subject_grade(conn, grade_id, &patch, &GradingPolicy::default()).expect("update grade")
    }

    /// Three core ALL-grade subjects graded with one whole-year score each.
    fn graded_record(conn: &Connection, lrn: &str, grade: i64, scores: [f64; 3]) -> AcademicRecord {
        for code in ["MATH", "SCI", "ENG"] {
            if list_areas(conn, None).expect("areas").iter().all(|a| a.code != code) {
                area(conn, code, Applicability::All, AreaKind::Core);
            }
        }
        student(conn, lrn);
        let rec = record(conn, lrn, grade, "2024-2025");
        let grades = record_grades(conn, &rec.id).expect("grades");
        assert_eq!(grades.len(), 3);
        let mut last = rec;
        for (g, s) in grades.iter().zip(scores) {
            last = set_quarters(conn, &g.id, [Some(s), Some(s), Some(s), Some(s)]).1;
        }
        last
    }

    #[test]
    fn record_creation_seeds_core_areas_and_enrolls() {
        let conn = conn();
        area(&conn, "MATH", Applicability::All, AreaKind::Core);
        area(&conn, "TLE7", Applicability::Grade(7), AreaKind::Core);
        area(&conn, "TLE8", Applicability::Grade(8), AreaKind::Core);
        area(&conn, "ARABIC", Applicability::All, AreaKind::Optional);
        let s = student(&conn, "100000000001");
        assert_eq!(s.status, StudentStatus::Pending);

        let rec = record(&conn, "100000000001", 7, "2024-2025");
        let codes: Vec<String> = record_grades(&conn, &rec.id)
            .expect("grades")
            .into_iter()
            .map(|g| g.area_code)
            .collect();
        assert_eq!(codes.len(), 2);
        assert!(codes.contains(&"MATH".to_string()));
        assert!(codes.contains(&"TLE7".to_string()));
        assert_eq!(rec.general_average, None);
        assert_eq!(rec.remarks, None);
        assert_eq!(
            get_student(&conn, "100000000001").expect("student").status,
            StudentStatus::Enrolled
        );
    }

    #[test]
    fn duplicate_record_returns_existing() {
        let conn = conn();
        student(&conn, "100000000002");
        let new = NewRecord {
            lrn: "100000000002".into(),
            grade_level: 8,
            school_year: Some("2024-2025".into()),
            section_id: None,
            adviser: None,
        };
        let (a, created_a) = create_record(&conn, &new).expect("first");
        let (b, created_b) = create_record(&conn, &new).expect("second");
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn record_defaults_to_current_school_year() {
        let conn = conn();
        student(&conn, "100000000003");
        let new = NewRecord {
            lrn: "100000000003".into(),
            grade_level: 7,
            school_year: None,
            section_id: None,
            adviser: None,
        };
        let e = create_record(&conn, &new).expect_err("no year configured");
        assert_eq!(e.code(), "validation_failed");

        create_year(&conn, "2025-2026", date("2025-06-16"), date("2026-04-15"), true).expect("year");
        let (rec, _) = create_record(&conn, &new).expect("record");
        assert_eq!(rec.school_year, "2025-2026");
    }

    #[test]
    fn quarter_edits_cascade_to_record() {
        let conn = conn();
        area(&conn, "MATH", Applicability::All, AreaKind::Core);
        student(&conn, "100000000004");
        let rec = record(&conn, "100000000004", 9, "2024-2025");
        let g = &record_grades(&conn, &rec.id).expect("grades")[0];

        let (grade, rec) = set_quarters(&conn, &g.id, [Some(80.0), Some(70.0), Some(90.0), Some(100.0)]);
        assert_eq!(grade.final_rating, Some(r(85.0)));
        assert!(!grade.needs_remedial);
        assert_eq!(grade.remarks, "Passed");
        assert_eq!(rec.general_average, Some(r(85.0)));
        assert_eq!(rec.remarks, Some(Remarks::Promoted));
    }

    #[test]
    fn remedial_mark_blends_without_touching_final_rating() {
        let conn = conn();
        area(&conn, "MATH", Applicability::All, AreaKind::Core);
        student(&conn, "100000000005");
        let rec = record(&conn, "100000000005", 9, "2024-2025");
        let g = &record_grades(&conn, &rec.id).expect("grades")[0];
        let (grade, _) = set_quarters(&conn, &g.id, [Some(60.0), Some(55.0), None, None]);
        assert_eq!(grade.final_rating, Some(r(57.5)));
        assert!(grade.needs_remedial);

        let patch = GradePatch {
            remedial_mark: Some(Some(r(80.0))),
            remedial_conducted_from: Some(Some(date("2025-06-02"))),
            remedial_conducted_to: Some(Some(date("2025-07-11"))),
            ..GradePatch::default()
        };
        let (grade, rec) =
            update_subject_grade(&conn, &g.id, &patch, &GradingPolicy::default()).expect("remedial");
        assert_eq!(grade.final_rating, Some(r(57.5)));
        assert_eq!(grade.recomputed_final_grade, Some(r(68.75)));
        assert_eq!(grade.effective_rating, Some(r(68.75)));
        assert_eq!(rec.general_average, Some(r(68.75)));
        assert_eq!(rec.remarks, Some(Remarks::Failed));
    }

    #[test]
    fn remedial_mark_without_window_is_rejected_and_not_applied() {
        let conn = conn();
        area(&conn, "MATH", Applicability::All, AreaKind::Core);
        student(&conn, "100000000006");
        let rec = record(&conn, "100000000006", 9, "2024-2025");
        let g = &record_grades(&conn, &rec.id).expect("grades")[0];
        set_quarters(&conn, &g.id, [Some(70.0), None, None, None]);

        let patch = GradePatch {
            quarters: [None, Some(Some(r(72.0))), None, None],
            remedial_mark: Some(Some(r(85.0))),
            remedial_conducted_from: Some(Some(date("2025-06-02"))),
            ..GradePatch::default()
        };
        let e = update_subject_grade(&conn, &g.id, &patch, &GradingPolicy::default())
            .expect_err("missing end date");
        assert_eq!(e.code(), "validation_failed");

        let after = get_subject_grade(&conn, &g.id).expect("grade");
        assert_eq!(after.quarters[1], None);
        assert_eq!(after.remedial_mark, None);
        assert_eq!(after.remedial_conducted_from, None);
    }

    #[test]
    fn all_passing_record_is_promoted() {
        let conn = conn();
        let rec = graded_record(&conn, "100000000007", 9, [90.0, 92.0, 88.0]);
        assert_eq!(rec.general_average, Some(r(90.0)));
        assert_eq!(rec.remarks, Some(Remarks::Promoted));
        assert!(!rec.remarks_locked);
    }

    #[test]
    fn one_failing_subject_passes_to_remedial() {
        let conn = conn();
        let rec = graded_record(&conn, "100000000008", 9, [90.0, 70.0, 88.0]);
        assert_eq!(rec.general_average, Some(r(82.67)));
        assert_eq!(rec.remarks, Some(Remarks::Passed));
        let remedial = remedial_subjects(&conn, &rec.id, &GradingPolicy::default()).expect("remedial");
        assert_eq!(remedial.len(), 1);
        assert_eq!(remedial[0].final_rating, Some(r(70.0)));
    }

    #[test]
    fn retained_remarks_survive_grade_changes_until_cleared() {
        let conn = conn();
        let rec = graded_record(&conn, "100000000009", 8, [90.0, 92.0, 88.0]);
        let rec = retain_record(&conn, &rec.id).expect("retain");
        assert_eq!(rec.remarks, Some(Remarks::Retained));
        assert!(rec.remarks_locked);

        let g = &record_grades(&conn, &rec.id).expect("grades")[0];
        let (_, rec) = set_quarters(&conn, &g.id, [Some(95.0), None, None, None]);
        assert_eq!(rec.remarks, Some(Remarks::Retained));
        assert_eq!(rec.general_average, Some(r(91.67)));

        let rec = clear_override(&conn, &rec.id, &GradingPolicy::default()).expect("clear");
        assert!(!rec.remarks_locked);
        assert_eq!(rec.remarks, Some(Remarks::Promoted));
    }

    #[test]
    fn derived_promoted_is_not_sticky() {
        let conn = conn();
        let rec = graded_record(&conn, "100000000010", 8, [90.0, 92.0, 88.0]);
        assert_eq!(rec.remarks, Some(Remarks::Promoted));
        let g = &record_grades(&conn, &rec.id).expect("grades")[0];
        let (_, rec) = set_quarters(&conn, &g.id, [Some(40.0), None, None, None]);
        assert_eq!(rec.remarks, Some(Remarks::Failed));
    }

    #[test]
    fn graduation_locks_final_grade_promotion() {
        let conn = conn();
        for code in ["MATH", "SCI", "ENG"] {
            area(&conn, code, Applicability::All, AreaKind::Core);
        }
        student(&conn, "100000000030");
        let rec = record(&conn, "100000000030", 10, "2024-2025");
        let grades = record_grades(&conn, &rec.id).expect("grades");

        let mut rec = rec;
        for g in &grades {
            rec = set_quarters(&conn, &g.id, [Some(80.0), None, None, None]).1;
        }
        assert_eq!(rec.remarks, Some(Remarks::Promoted));
        assert!(rec.remarks_locked);
        assert_eq!(
            get_student(&conn, "100000000030").expect("student").status,
            StudentStatus::Graduated
        );

        for g in &grades {
            rec = set_quarters(&conn, &g.id, [Some(80.0), Some(30.0), Some(30.0), Some(30.0)]).1;
        }
        assert_eq!(rec.remarks, Some(Remarks::Promoted));
        assert_eq!(rec.general_average, Some(r(42.5)));
        assert_eq!(
            get_student(&conn, "100000000030").expect("student").status,
            StudentStatus::Graduated
        );
        let outcome = promote_transition(&conn, &rec.id).expect("transition");
        assert_eq!(outcome, PromotionOutcome::Final { graduated: true });

        let e = retain_record(&conn, &rec.id).expect_err("retain graduated");
        assert_eq!(e.code(), "status_locked");
        let e = clear_override(&conn, &rec.id, &GradingPolicy::default()).expect_err("clear graduated");
        assert_eq!(e.code(), "status_locked");
        let rec = get_record(&conn, &rec.id).expect("record");
        assert_eq!(rec.remarks, Some(Remarks::Promoted));
        assert!(rec.remarks_locked);
    }

    #[test]
    fn promotion_transition_is_idempotent() {
        let conn = conn();
        let rec = graded_record(&conn, "100000000011", 7, [90.0, 92.0, 88.0]);
        let first = promote_transition(&conn, &rec.id).expect("first");
        let second = promote_transition(&conn, &rec.id).expect("second");
        let (PromotionOutcome::Next { record: a, created: ca }, PromotionOutcome::Next { record: b, created: cb }) =
            (first, second)
        else {
            panic!("expected next records");
        };
        assert!(ca);
        assert!(!cb);
        assert_eq!(a.id, b.id);
        assert_eq!(a.grade_level, 8);
        assert_eq!(a.school_year, "2025-2026");
        assert_eq!(a.section_id, None);
        assert_eq!(a.adviser, None);
        assert_eq!(list_records(&conn, "100000000011").expect("records").len(), 2);
    }

    #[test]
    fn unparseable_school_year_is_kept_on_promotion() {
        let conn = conn();
        student(&conn, "100000000012");
        let rec = record(&conn, "100000000012", 8, "SY2024");
        let PromotionOutcome::Next { record: next, .. } =
            promote_transition(&conn, &rec.id).expect("promote")
        else {
            panic!("expected next record");
        };
        assert_eq!(next.grade_level, 9);
        assert_eq!(next.school_year, "SY2024");
    }

    #[test]
    fn promoting_final_grade_graduates_student() {
        let conn = conn();
        let rec = graded_record(&conn, "100000000013", 10, [90.0, 92.0, 88.0]);
        assert_eq!(rec.remarks, Some(Remarks::Promoted));
        assert_eq!(
            get_student(&conn, "100000000013").expect("student").status,
            StudentStatus::Graduated
        );
        let (rec, outcome) = promote_record(&conn, &rec.id).expect("promote");
        assert!(rec.remarks_locked);
        assert_eq!(outcome, PromotionOutcome::Final { graduated: true });
        assert_eq!(list_records(&conn, "100000000013").expect("records").len(), 1);

        let e = set_student_status(&conn, "100000000013", StudentStatus::Dropped)
            .expect_err("terminal");
        assert_eq!(e.code(), "status_locked");
    }

    #[test]
    fn failing_final_grade_does_not_graduate() {
        let conn = conn();
        let rec = graded_record(&conn, "100000000014", 10, [50.0, 52.0, 58.0]);
        assert_eq!(rec.remarks, Some(Remarks::Failed));
        let outcome = promote_transition(&conn, &rec.id).expect("transition");
        assert_eq!(outcome, PromotionOutcome::Final { graduated: false });
        assert_eq!(
            get_student(&conn, "100000000014").expect("student").status,
            StudentStatus::Enrolled
        );
    }

    #[test]
    fn deleting_a_subject_recomputes_the_record() {
        let conn = conn();
        let rec = graded_record(&conn, "100000000015", 9, [90.0, 60.0, 88.0]);
        assert_eq!(rec.remarks, Some(Remarks::Passed));
        let low = record_grades(&conn, &rec.id)
            .expect("grades")
            .into_iter()
            .find(|g| g.final_rating == Some(r(60.0)))
            .expect("low grade");
        let rec = delete_subject_grade(&conn, &low.id, &GradingPolicy::default()).expect("delete");
        assert_eq!(rec.general_average, Some(r(89.0)));
        assert_eq!(rec.remarks, Some(Remarks::Promoted));
    }

    #[test]
    fn optional_area_added_explicitly_counts_as_failing_until_graded() {
        let conn = conn();
        let rec = graded_record(&conn, "100000000016", 9, [90.0, 92.0, 88.0]);
        let arabic = area(&conn, "ARABIC", Applicability::All, AreaKind::Optional);
        let (grade, rec) =
            add_subject_grade(&conn, &rec.id, &arabic.id, &GradingPolicy::default()).expect("add");
        assert_eq!(grade.final_rating, None);
        assert_eq!(rec.general_average, Some(r(90.0)));
        assert_eq!(rec.remarks, Some(Remarks::Passed));

        let e = add_subject_grade(&conn, &rec.id, &arabic.id, &GradingPolicy::default())
            .expect_err("duplicate");
        assert_eq!(e.code(), "conflict");
        let e = delete_area(&conn, &arabic.id).expect_err("in use");
        assert_eq!(e.code(), "in_use");
    }

    #[test]
    fn placement_checks_grade_and_capacity() {
        let conn = conn();
        let placement = PlacementPolicy::default();
        let rizal = create_section(&conn, 7, "Rizal", Some(1)).expect("section");
        let mabini = create_section(&conn, 8, "Mabini", None).expect("section");
        student(&conn, "100000000017");
        student(&conn, "100000000018");
        let a = record(&conn, "100000000017", 7, "2024-2025");
        let b = record(&conn, "100000000018", 7, "2024-2025");

        let into = |id: &str| RecordAssignment {
            section_id: Some(Some(id.to_string())),
            adviser: None,
        };
        let a = assign_record(&conn, &a.id, &into(&rizal.id)).expect("assign a");
        assert_eq!(a.section_id.as_deref(), Some(rizal.id.as_str()));
        assign_record(&conn, &a.id, &into(&rizal.id)).expect("reassign same section");

        let e = assign_record(&conn, &b.id, &into(&rizal.id)).expect_err("full");
        assert_eq!(e.code(), "placement_refused");
        let e = assign_record(&conn, &b.id, &into(&mabini.id)).expect_err("grade mismatch");
        assert_eq!(e.code(), "placement_refused");

        let occ = list_sections(&conn, Some(7), &placement).expect("sections");
        assert_eq!(occ.len(), 1);
        assert_eq!(occ[0].enrolled, 1);
        assert!(occ[0].is_full);
        let e = delete_section(&conn, &rizal.id).expect_err("in use");
        assert_eq!(e.code(), "in_use");
    }

    #[test]
    fn only_one_year_is_current() {
        let conn = conn();
        let a = create_year(&conn, "2024-2025", date("2024-06-03"), date("2025-04-11"), true).expect("a");
        let b = create_year(&conn, "2025-2026", date("2025-06-16"), date("2026-04-10"), false).expect("b");
        assert_eq!(current_year(&conn).expect("current").map(|y| y.id), Some(a.id.clone()));

        set_current_year(&conn, &b.id).expect("set current");
        let flagged: Vec<String> = list_years(&conn)
            .expect("years")
            .into_iter()
            .filter(|y| y.is_current)
            .map(|y| y.id)
            .collect();
        assert_eq!(flagged, vec![b.id.clone()]);

        let e = create_year(&conn, "2025-2026", date("2025-06-16"), date("2026-04-10"), false)
            .expect_err("duplicate label");
        assert_eq!(e.code(), "conflict");
        let e = create_year(&conn, "2026", date("2026-06-16"), date("2027-04-10"), false)
            .expect_err("bad label");
        assert_eq!(e.code(), "validation_failed");
    }

    #[test]
    fn current_year_falls_back_to_latest_start() {
        let conn = conn();
        create_year(&conn, "2023-2024", date("2023-06-05"), date("2024-04-12"), false).expect("a");
        create_year(&conn, "2024-2025", date("2024-06-03"), date("2025-04-11"), false).expect("b");
        let current = current_year(&conn).expect("current").expect("some year");
        assert_eq!(current.year_label, "2024-2025");
    }

    #[test]
    fn school_profile_is_explicit() {
        let conn = conn();
        assert_eq!(get_school(&conn).expect("get"), None);
        let profile = SchoolProfile {
            school_id: "305123".into(),
            name: "San Isidro National High School".into(),
            address: String::new(),
            district: "II".into(),
            division: "Nueva Ecija".into(),
            region: "III".into(),
        };
        configure_school(&conn, &profile).expect("configure");
        let renamed = SchoolProfile {
            name: "SINHS".into(),
            ..profile
        };
        let saved = configure_school(&conn, &renamed).expect("reconfigure");
        assert_eq!(saved, renamed);
    }

    #[test]
    fn deleting_student_removes_records_and_grades() {
        let conn = conn();
        let rec = graded_record(&conn, "100000000019", 7, [80.0, 81.0, 82.0]);
        delete_student(&conn, "100000000019").expect("delete");
        assert_eq!(get_record(&conn, &rec.id).expect_err("gone").code(), "not_found");
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM subject_grades", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 0);
    }

    #[test]
    fn corrupt_remarks_are_reported_not_panicked() {
        let conn = conn();
        student(&conn, "100000000020");
        let rec = record(&conn, "100000000020", 7, "2024-2025");
        conn.execute(
            "UPDATE academic_records SET remarks = 'Needs Remedial' WHERE id = ?",
            [&rec.id],
        )
        .expect("corrupt");
        let e = get_record(&conn, &rec.id).expect_err("corrupt");
        assert_eq!(e.code(), "corrupt_data");
    }
}
