use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "sfportal.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Create every table and index the engine needs. Safe to run on an existing workspace.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Exactly zero or one row; id is pinned so there is no "first row" guesswork.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_profile(
            id INTEGER PRIMARY KEY CHECK (id = 1),
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            address TEXT NOT NULL DEFAULT '',
            district TEXT NOT NULL DEFAULT '',
            division TEXT NOT NULL DEFAULT '',
            region TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            year_label TEXT NOT NULL UNIQUE,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_academic_years_single_current
         ON academic_years(is_current) WHERE is_current = 1",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            lrn TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            middle_name TEXT NOT NULL DEFAULT '',
            name_extension TEXT NOT NULL DEFAULT '',
            birthdate TEXT NOT NULL,
            sex TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_name ON students(last_name, first_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            grade_level INTEGER NOT NULL,
            name TEXT NOT NULL,
            max_students INTEGER,
            UNIQUE(grade_level, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS learning_areas(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            applicable_grades TEXT NOT NULL,
            kind TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            UNIQUE(code, applicable_grades)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_records(
            id TEXT PRIMARY KEY,
            student_lrn TEXT NOT NULL,
            grade_level INTEGER NOT NULL,
            school_year TEXT NOT NULL,
            section_id TEXT,
            adviser TEXT,
            general_average INTEGER,
            remarks TEXT NOT NULL DEFAULT '',
            remarks_locked INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_lrn) REFERENCES students(lrn),
            FOREIGN KEY(section_id) REFERENCES sections(id),
            UNIQUE(student_lrn, grade_level, school_year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_records_student_year
         ON academic_records(student_lrn, school_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_records_grade_year
         ON academic_records(grade_level, school_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_records_section
         ON academic_records(section_id)",
        [],
    )?;

    // Scores are hundredths of a point.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_grades(
            id TEXT PRIMARY KEY,
            record_id TEXT NOT NULL,
            learning_area_id TEXT NOT NULL,
            quarter_1 INTEGER,
            quarter_2 INTEGER,
            quarter_3 INTEGER,
            quarter_4 INTEGER,
            final_rating INTEGER,
            needs_remedial INTEGER NOT NULL DEFAULT 0,
            remedial_from TEXT,
            remedial_to TEXT,
            remedial_mark INTEGER,
            recomputed_final_grade INTEGER,
            remarks TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL,
            FOREIGN KEY(record_id) REFERENCES academic_records(id),
            FOREIGN KEY(learning_area_id) REFERENCES learning_areas(id),
            UNIQUE(record_id, learning_area_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_grades_record ON subject_grades(record_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_grades_area ON subject_grades(learning_area_id)",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(
            serde_json::from_str(&text)
                .with_context(|| format!("settings value for {} is not JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}
