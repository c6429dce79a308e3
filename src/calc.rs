use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::config::GradingPolicy;
use crate::error::{EngineError, EngineResult};

/// First grade level that can hold an academic record.
pub const FIRST_GRADE_LEVEL: i64 = 7;
/// Highest grade level; records here have no promotion target.
pub const FINAL_GRADE_LEVEL: i64 = 10;
/// Last grade of the primary band, where every subject must be passed.
pub const PRIMARY_LAST_GRADE: i64 = 3;

const MAX_HUNDREDTHS: u32 = 10_000;

/// A score on the 100-point scale held as hundredths of a point.
///
/// Every aggregate in the engine is a mean of these values, computed on
/// integers and rounded half-up, so results never drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rating(u32);

impl Rating {
    pub const fn whole(points: u32) -> Rating {
        Rating(points * 100)
    }

    pub fn from_hundredths(h: i64) -> Option<Rating> {
        if (0..=MAX_HUNDREDTHS as i64).contains(&h) {
            Some(Rating(h as u32))
        } else {
            None
        }
    }

    /// Accepts values in [0, 100] with at most two decimals.
    pub fn from_f64(value: f64) -> Option<Rating> {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return None;
        }
        let scaled = value * 100.0;
        let rounded = scaled.round();
        if (scaled - rounded).abs() > 1e-6 {
            return None;
        }
        Some(Rating(rounded as u32))
    }

    pub fn hundredths(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Rating {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Rating {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Rating::from_f64(raw).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "{} is not a score within 0..=100 with at most two decimals",
                raw
            ))
        })
    }
}

impl ToSql for Rating {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.0)))
    }
}

impl FromSql for Rating {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let h = value.as_i64()?;
        Rating::from_hundredths(h).ok_or(FromSqlError::OutOfRange(h))
    }
}

/// Parse a caller-supplied score for `field`, rejecting anything off the scale.
pub fn parse_score(field: &str, value: &serde_json::Value) -> EngineResult<Rating> {
    value
        .as_f64()
        .and_then(Rating::from_f64)
        .ok_or_else(|| EngineError::range(field, value.clone()))
}

/// Mean of the given ratings rounded half-up to hundredths; `None` when empty.
pub fn mean_rating<I>(ratings: I) -> Option<Rating>
where
    I: IntoIterator<Item = Rating>,
{
    let (sum, n) = ratings
        .into_iter()
        .fold((0u64, 0u64), |(s, n), r| (s + u64::from(r.0), n + 1));
    if n == 0 {
        return None;
    }
    Some(Rating(((2 * sum + n) / (2 * n)) as u32))
}

/// Final rating of a subject: the mean of whichever quarters are present.
pub fn final_rating(quarters: &[Option<Rating>; 4]) -> Option<Rating> {
    mean_rating(quarters.iter().flatten().copied())
}

/// Blend of the original final rating and a remedial mark.
pub fn recomputed_final_grade(
    final_rating: Option<Rating>,
    remedial_mark: Option<Rating>,
) -> Option<Rating> {
    match (final_rating, remedial_mark) {
        (Some(f), Some(m)) => mean_rating([f, m]),
        _ => None,
    }
}

/// Rating used by every downstream aggregate.
pub fn effective_rating(final_rating: Option<Rating>, recomputed: Option<Rating>) -> Option<Rating> {
    final_rating.map(|f| recomputed.unwrap_or(f))
}

/// The flag follows the final rating, except that a recomputed grade keeps it
/// raised once set. An undetermined rating leaves it untouched.
pub fn needs_remedial(
    previous: bool,
    final_rating: Option<Rating>,
    recomputed: Option<Rating>,
    policy: &GradingPolicy,
) -> bool {
    match final_rating {
        Some(f) if f < policy.passing_grade => true,
        Some(_) if recomputed.is_none() => false,
        _ => previous,
    }
}

pub fn subject_remark(effective: Option<Rating>, policy: &GradingPolicy) -> Option<&'static str> {
    effective.map(|r| {
        if r >= policy.passing_grade {
            "Passed"
        } else {
            "Failed"
        }
    })
}

pub fn validate_remedial_window(
    remedial_mark: Option<Rating>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> EngineResult<()> {
    if remedial_mark.is_some() && (from.is_none() || to.is_none()) {
        let field = if from.is_none() {
            "remedialConductedFrom"
        } else {
            "remedialConductedTo"
        };
        return Err(EngineError::validation(
            field,
            "remedial dates must be provided if a remedial mark is entered",
        ));
    }
    if let (Some(from), Some(to)) = (from, to) {
        if to < from {
            return Err(EngineError::validation(
                "remedialConductedTo",
                "remedial window must not end before it starts",
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectOutcome {
    pub final_rating: Option<Rating>,
    pub recomputed_final_grade: Option<Rating>,
    pub needs_remedial: bool,
    pub remark: Option<&'static str>,
}

impl SubjectOutcome {
    pub fn effective_rating(&self) -> Option<Rating> {
        effective_rating(self.final_rating, self.recomputed_final_grade)
    }
}

/// Derive every computed field of one subject grade from its inputs.
pub fn evaluate_subject(
    quarters: &[Option<Rating>; 4],
    remedial_mark: Option<Rating>,
    previous_needs_remedial: bool,
    policy: &GradingPolicy,
) -> SubjectOutcome {
    let final_rating = final_rating(quarters);
    let recomputed = recomputed_final_grade(final_rating, remedial_mark);
    SubjectOutcome {
        final_rating,
        recomputed_final_grade: recomputed,
        needs_remedial: needs_remedial(previous_needs_remedial, final_rating, recomputed, policy),
        remark: subject_remark(effective_rating(final_rating, recomputed), policy),
    }
}

/// General average over subjects with a determined rating.
pub fn general_average(effective: &[Option<Rating>]) -> Option<Rating> {
    mean_rating(effective.iter().flatten().copied())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Remarks {
    Passed,
    Failed,
    Promoted,
    Retained,
}

impl Remarks {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Promoted => "PROMOTED",
            Self::Retained => "RETAINED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PASSED" => Some(Self::Passed),
            "FAILED" => Some(Self::Failed),
            "PROMOTED" => Some(Self::Promoted),
            "RETAINED" => Some(Self::Retained),
            _ => None,
        }
    }

    /// Stored form: empty string while pending.
    pub fn from_stored(s: &str) -> Result<Option<Self>, String> {
        if s.is_empty() {
            return Ok(None);
        }
        Self::parse(s)
            .map(Some)
            .ok_or_else(|| format!("unknown remarks value: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub general_average: Option<Rating>,
    pub failing_count: usize,
    pub critical_failure: bool,
    pub remarks: Option<Remarks>,
}

/// Grade-level policy for one record.
///
/// Grades up to 3 are promoted only with no failing subject. From grade 4 on,
/// one or two failing subjects without a critical failure yield PASSED
/// (remedial track), never PROMOTED. Undetermined subjects count as failing.
pub fn summarize_record(
    grade_level: i64,
    effective: &[Option<Rating>],
    policy: &GradingPolicy,
) -> RecordSummary {
    let general_average = general_average(effective);
    let failing_count = effective
        .iter()
        .filter(|r| r.map_or(true, |r| r < policy.passing_grade))
        .count();
    let critical_failure = effective
        .iter()
        .flatten()
        .any(|r| *r < policy.critical_grade);

    let remarks = general_average.map(|avg| {
        if grade_level <= PRIMARY_LAST_GRADE {
            if failing_count == 0 {
                Remarks::Promoted
            } else {
                Remarks::Retained
            }
        } else if avg >= policy.passing_grade && failing_count == 0 {
            Remarks::Promoted
        } else if avg >= policy.passing_grade
            && failing_count <= policy.max_remedial_subjects
            && !critical_failure
        {
            Remarks::Passed
        } else {
            Remarks::Failed
        }
    });

    RecordSummary {
        general_average,
        failing_count,
        critical_failure,
        remarks,
    }
}

pub fn classify(
    grade_level: i64,
    effective: &[Option<Rating>],
    policy: &GradingPolicy,
) -> Option<Remarks> {
    summarize_record(grade_level, effective, policy).remarks
}

/// Split a `YYYY-YYYY` label into its two years.
pub fn parse_school_year(label: &str) -> Option<(u32, u32)> {
    let (start, end) = label.trim().split_once('-')?;
    let year = |s: &str| -> Option<u32> {
        if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
            s.parse().ok()
        } else {
            None
        }
    };
    Some((year(start)?, year(end)?))
}

/// Label of the following school year, or `None` when `label` is not `YYYY-YYYY`.
pub fn next_school_year(label: &str) -> Option<String> {
    let (start, end) = parse_school_year(label)?;
    if end >= 9999 || start >= 9999 {
        return None;
    }
    Some(format!("{}-{}", start + 1, end + 1))
}
