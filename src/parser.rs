//! Activity file decoding. Uploads are JSON activity summaries as exported
//! by watch vendors; track geometry is carried along untouched.

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::models::{WorkoutData, WorkoutType};

const START_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

#[derive(Debug, Deserialize)]
struct ActivityFile {
    name: Option<String>,
    #[serde(rename = "type")]
    activity_type: Option<String>,
    #[serde(rename = "startTimeLocal")]
    start_time: String,
    /// Meters.
    distance: Option<f64>,
    /// Seconds.
    duration: Option<f64>,
    #[serde(rename = "repetitionCount")]
    repetitions: Option<i64>,
    /// Kilograms.
    weight: Option<f64>,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    creator: Option<String>,
    track: Option<serde_json::Value>,
}

/// Result of decoding one uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedActivity {
    pub name: String,
    /// Type declared by the file, if it maps onto a known one.
    pub workout_type: Option<WorkoutType>,
    pub date: NaiveDateTime,
    pub data: WorkoutData,
}

fn parse_start_time(raw: &str) -> Result<NaiveDateTime> {
    START_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
        .ok_or_else(|| anyhow!("unrecognised start time {:?}", raw))
}

fn non_negative(field: &str, value: Option<f64>) -> Result<f64> {
    match value {
        None => Ok(0.0),
        Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
        Some(v) => Err(anyhow!("invalid {}: {}", field, v)),
    }
}

pub fn parse_activity(filename: &str, content: &[u8]) -> Result<ParsedActivity> {
    let path = Path::new(filename);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if extension != "json" {
        bail!("{}: unsupported file format {:?}", filename, extension);
    }
    if content.is_empty() {
        bail!("{}: file is empty", filename);
    }

    let file: ActivityFile = serde_json::from_slice(content)
        .with_context(|| format!("{}: not a valid activity file", filename))?;

    let date = parse_start_time(&file.start_time).with_context(|| filename.to_string())?;
    let duration = non_negative("duration", file.duration).with_context(|| filename.to_string())?;
    let distance = non_negative("distance", file.distance).with_context(|| filename.to_string())?;
    let weight = non_negative("weight", file.weight).with_context(|| filename.to_string())?;
    let duration = Duration::try_from_secs_f64(duration)
        .map_err(|e| anyhow!("{}: invalid duration: {}", filename, e))?;

    let name = file
        .name
        .filter(|n| !n.trim().is_empty())
        .or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| filename.to_string());

    Ok(ParsedActivity {
        name,
        workout_type: file
            .activity_type
            .and_then(|t| t.parse().ok())
            .filter(|t| *t != WorkoutType::AutoDetect),
        date,
        data: WorkoutData {
            creator: file.creator.unwrap_or_else(|| "json-import".to_string()),
            total_distance: distance,
            total_duration: duration,
            total_repetitions: file.repetitions.unwrap_or(0).max(0),
            total_weight: weight,
            country_code: file.country_code,
            track: file.track,
        },
    })
}
