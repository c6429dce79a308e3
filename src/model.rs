use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::Row;
use serde::{Serialize, Serializer};

use crate::calc::{self, Rating, Remarks};

macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty>::parse(s).ok_or_else(|| {
                    FromSqlError::Other(
                        format!("unknown {} value: {}", stringify!($ty), s).into(),
                    )
                })
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StudentStatus {
    Pending,
    Enrolled,
    Transferred,
    Dropped,
    Graduated,
}

impl StudentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Enrolled => "ENROLLED",
            Self::Transferred => "TRANSFERRED",
            Self::Dropped => "DROPPED",
            Self::Graduated => "GRADUATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "ENROLLED" => Some(Self::Enrolled),
            "TRANSFERRED" => Some(Self::Transferred),
            "DROPPED" => Some(Self::Dropped),
            "GRADUATED" => Some(Self::Graduated),
            _ => None,
        }
    }
}

text_enum_sql!(StudentStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sex {
    M,
    F,
}

impl Sex {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M => "M",
            Self::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "M" => Some(Self::M),
            "F" => Some(Self::F),
            _ => None,
        }
    }
}

text_enum_sql!(Sex);

/// Grade levels a learning area is offered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    Grade(i64),
    All,
}

impl Applicability {
    pub fn as_str(self) -> String {
        match self {
            Self::Grade(g) => g.to_string(),
            Self::All => "ALL".to_string(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("ALL") {
            return Some(Self::All);
        }
        let g: i64 = s.trim().parse().ok()?;
        (calc::FIRST_GRADE_LEVEL..=calc::FINAL_GRADE_LEVEL)
            .contains(&g)
            .then_some(Self::Grade(g))
    }

    pub fn applies_to(self, grade_level: i64) -> bool {
        match self {
            Self::Grade(g) => g == grade_level,
            Self::All => true,
        }
    }
}

impl Serialize for Applicability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl ToSql for Applicability {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Applicability {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Applicability::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown applicability: {}", s).into()))
    }
}

/// Core areas are seeded onto every new record; optional ones are added by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaKind {
    Core,
    Optional,
}

impl AreaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Optional => "optional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "core" => Some(Self::Core),
            "optional" => Some(Self::Optional),
            _ => None,
        }
    }
}

text_enum_sql!(AreaKind);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub lrn: String,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: String,
    pub name_extension: String,
    pub birthdate: String,
    pub sex: Sex,
    pub status: StudentStatus,
}

impl Student {
    pub const COLUMNS: &'static str =
        "lrn, last_name, first_name, middle_name, name_extension, birthdate, sex, status";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            lrn: row.get(0)?,
            last_name: row.get(1)?,
            first_name: row.get(2)?,
            middle_name: row.get(3)?,
            name_extension: row.get(4)?,
            birthdate: row.get(5)?,
            sex: row.get(6)?,
            status: row.get(7)?,
        })
    }

    pub fn full_name(&self) -> String {
        let mut name = [
            self.first_name.as_str(),
            self.middle_name.as_str(),
            self.last_name.as_str(),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
        if !self.name_extension.is_empty() {
            name.push(' ');
            name.push_str(&self.name_extension);
        }
        name
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningArea {
    pub id: String,
    pub code: String,
    pub name: String,
    pub applicability: Applicability,
    pub kind: AreaKind,
    pub sort_order: i64,
}

impl LearningArea {
    pub const COLUMNS: &'static str = "id, code, name, applicable_grades, kind, sort_order";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            applicability: row.get(3)?,
            kind: row.get(4)?,
            sort_order: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub grade_level: i64,
    pub name: String,
    pub max_students: Option<i64>,
}

impl Section {
    pub const COLUMNS: &'static str = "id, grade_level, name, max_students";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            grade_level: row.get(1)?,
            name: row.get(2)?,
            max_students: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionOccupancy {
    #[serde(flatten)]
    pub section: Section,
    pub enrolled: i64,
    pub available_slots: Option<i64>,
    pub is_full: bool,
    pub near_capacity: bool,
}

impl SectionOccupancy {
    pub fn new(section: Section, enrolled: i64, near_capacity_percent: i64) -> Self {
        let (available_slots, is_full, near_capacity) = match section.max_students {
            Some(cap) => (
                Some((cap - enrolled).max(0)),
                enrolled >= cap,
                enrolled * 100 >= cap * near_capacity_percent,
            ),
            None => (None, false, false),
        };
        Self {
            section,
            enrolled,
            available_slots,
            is_full,
            near_capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYear {
    pub id: String,
    pub year_label: String,
    pub start_date: String,
    pub end_date: String,
    pub is_current: bool,
}

impl AcademicYear {
    pub const COLUMNS: &'static str = "id, year_label, start_date, end_date, is_current";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let is_current: i64 = row.get(4)?;
        Ok(Self {
            id: row.get(0)?,
            year_label: row.get(1)?,
            start_date: row.get(2)?,
            end_date: row.get(3)?,
            is_current: is_current != 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolProfile {
    pub school_id: String,
    pub name: String,
    pub address: String,
    pub district: String,
    pub division: String,
    pub region: String,
}

impl SchoolProfile {
    pub const COLUMNS: &'static str = "school_id, name, address, district, division, region";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            school_id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            district: row.get(3)?,
            division: row.get(4)?,
            region: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicRecord {
    pub id: String,
    pub student_lrn: String,
    pub grade_level: i64,
    pub school_year: String,
    pub section_id: Option<String>,
    pub adviser: Option<String>,
    pub general_average: Option<Rating>,
    pub remarks: Option<Remarks>,
    pub remarks_locked: bool,
}

impl AcademicRecord {
    pub const COLUMNS: &'static str = "id, student_lrn, grade_level, school_year, section_id, adviser, general_average, remarks, remarks_locked";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let remarks_raw: String = row.get(7)?;
        let remarks = Remarks::from_stored(&remarks_raw)
            .map_err(|m| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, m.into()))?;
        let locked: i64 = row.get(8)?;
        Ok(Self {
            id: row.get(0)?,
            student_lrn: row.get(1)?,
            grade_level: row.get(2)?,
            school_year: row.get(3)?,
            section_id: row.get(4)?,
            adviser: row.get(5)?,
            general_average: row.get(6)?,
            remarks,
            remarks_locked: locked != 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGrade {
    pub id: String,
    pub record_id: String,
    pub learning_area_id: String,
    pub area_code: String,
    pub area_name: String,
    pub quarters: [Option<Rating>; 4],
    pub final_rating: Option<Rating>,
    pub needs_remedial: bool,
    pub remedial_conducted_from: Option<String>,
    pub remedial_conducted_to: Option<String>,
    pub remedial_mark: Option<Rating>,
    pub recomputed_final_grade: Option<Rating>,
    pub effective_rating: Option<Rating>,
    pub remarks: String,
}

impl SubjectGrade {
    /// Columns for `subject_grades g JOIN learning_areas a`.
    pub const COLUMNS: &'static str = "g.id, g.record_id, g.learning_area_id, a.code, a.name,
        g.quarter_1, g.quarter_2, g.quarter_3, g.quarter_4, g.final_rating, g.needs_remedial,
        g.remedial_from, g.remedial_to, g.remedial_mark, g.recomputed_final_grade, g.remarks";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let final_rating: Option<Rating> = row.get(9)?;
        let needs_remedial: i64 = row.get(10)?;
        let recomputed: Option<Rating> = row.get(14)?;
        Ok(Self {
            id: row.get(0)?,
            record_id: row.get(1)?,
            learning_area_id: row.get(2)?,
            area_code: row.get(3)?,
            area_name: row.get(4)?,
            quarters: [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?],
            final_rating,
            needs_remedial: needs_remedial != 0,
            remedial_conducted_from: row.get(11)?,
            remedial_conducted_to: row.get(12)?,
            remedial_mark: row.get(13)?,
            recomputed_final_grade: recomputed,
            effective_rating: calc::effective_rating(final_rating, recomputed),
            remarks: row.get(15)?,
        })
    }
}
