use anyhow::Context;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::calc::Rating;
use crate::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    Grading,
    Placement,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Grading, SetupSection::Placement];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "placement" => Some(Self::Placement),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Placement => "placement",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Placement => "setup.placement",
        }
    }
}

/// Thresholds the classifier and remedial rule evaluate against.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingPolicy {
    pub passing_grade: Rating,
    pub critical_grade: Rating,
    pub max_remedial_subjects: usize,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            passing_grade: Rating::whole(75),
            critical_grade: Rating::whole(60),
            max_remedial_subjects: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementPolicy {
    pub default_section_capacity: i64,
    pub near_capacity_percent: i64,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self {
            default_section_capacity: 45,
            near_capacity_percent: 90,
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "passingGrade": 75,
            "criticalGrade": 60,
            "maxRemedialSubjects": 2
        }),
        SetupSection::Placement => json!({
            "defaultSectionCapacity": 45,
            "nearCapacityPercent": 90
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_grade_points(v: &Value, key: &str, min: f64) -> Result<Value, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if n < min || Rating::from_f64(n).is_none() {
        return Err(format!(
            "{} must be in {}..=100 with at most two decimals",
            key, min
        ));
    }
    Ok(v.clone())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "passingGrade" => {
                    obj.insert(k.clone(), parse_grade_points(v, k, 50.0)?);
                }
                "criticalGrade" => {
                    obj.insert(k.clone(), parse_grade_points(v, k, 0.0)?);
                }
                "maxRemedialSubjects" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 10)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Placement => match k.as_str() {
                "defaultSectionCapacity" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 200)?));
                }
                "nearCapacityPercent" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 50, 100)?));
                }
                _ => return Err(format!("unknown placement field: {}", k)),
            },
        }
    }

    if section == SetupSection::Grading {
        let passing = obj.get("passingGrade").and_then(|v| v.as_f64());
        let critical = obj.get("criticalGrade").and_then(|v| v.as_f64());
        if let (Some(p), Some(c)) = (passing, critical) {
            if c >= p {
                return Err("criticalGrade must be below passingGrade".into());
            }
        }
    }
    Ok(())
}

/// Saved values merged over defaults. Malformed historical values are skipped.
pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            let mut candidate = current.clone();
            if merge_section_patch(section, &mut candidate, saved_obj).is_ok() {
                current = candidate;
            } else {
                tracing::warn!(section = section.name(), "ignoring malformed saved setup section");
            }
        }
    }
    Ok(current)
}

/// Validate `patch` against the stored section and persist the merged result.
pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    tracing::info!(section = section.name(), "setup section updated");
    Ok(Ok(current))
}

pub fn load_grading_policy(conn: &Connection) -> anyhow::Result<GradingPolicy> {
    let raw = load_section(conn, SetupSection::Grading)?;
    serde_json::from_value(raw).context("grading setup does not form a policy")
}

pub fn load_placement_policy(conn: &Connection) -> anyhow::Result<PlacementPolicy> {
    let raw = load_section(conn, SetupSection::Placement)?;
    serde_json::from_value(raw).context("placement setup does not form a policy")
}
