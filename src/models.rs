use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::units::UnitSystem;

/// Creator tag for workouts entered through the manual form.
pub const WEB_INTERFACE_CREATOR: &str = "web-interface";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkoutType {
    /// Upload hint only: take the type from the file.
    #[default]
    #[serde(rename = "auto")]
    AutoDetect,
    Running,
    Cycling,
    Walking,
    Hiking,
    Swimming,
    Rowing,
    PushUps,
    WeightLifting,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown workout type: {0:?}")]
pub struct UnknownWorkoutType(pub String);

impl WorkoutType {
    /// Concrete types, in menu order.
    pub fn all() -> &'static [WorkoutType] {
        &[
            WorkoutType::Running,
            WorkoutType::Cycling,
            WorkoutType::Walking,
            WorkoutType::Hiking,
            WorkoutType::Swimming,
            WorkoutType::Rowing,
            WorkoutType::PushUps,
            WorkoutType::WeightLifting,
            WorkoutType::Other,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkoutType::AutoDetect => "auto",
            WorkoutType::Running => "running",
            WorkoutType::Cycling => "cycling",
            WorkoutType::Walking => "walking",
            WorkoutType::Hiking => "hiking",
            WorkoutType::Swimming => "swimming",
            WorkoutType::Rowing => "rowing",
            WorkoutType::PushUps => "push-ups",
            WorkoutType::WeightLifting => "weight-lifting",
            WorkoutType::Other => "other",
        }
    }

    /// Lenient parse for upload hints: anything unrecognised means "detect".
    pub fn from_hint(hint: &str) -> WorkoutType {
        hint.parse().unwrap_or_default()
    }

    /// The declared type, unless it asks for detection; then whatever the
    /// file declared, or `Other`.
    pub fn or_detected(self, detected: Option<WorkoutType>) -> WorkoutType {
        match self {
            WorkoutType::AutoDetect => detected
                .filter(|t| *t != WorkoutType::AutoDetect)
                .unwrap_or(WorkoutType::Other),
            declared => declared,
        }
    }

    pub fn is_distance(&self) -> bool {
        matches!(
            self,
            WorkoutType::Running
                | WorkoutType::Cycling
                | WorkoutType::Walking
                | WorkoutType::Hiking
                | WorkoutType::Swimming
                | WorkoutType::Rowing
        )
    }

    pub fn is_repetition(&self) -> bool {
        matches!(self, WorkoutType::PushUps | WorkoutType::WeightLifting)
    }

    pub fn is_weight(&self) -> bool {
        matches!(self, WorkoutType::WeightLifting)
    }
}

impl fmt::Display for WorkoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkoutType {
    type Err = UnknownWorkoutType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        if normalized.is_empty() || normalized == "auto" {
            return Ok(WorkoutType::AutoDetect);
        }

        WorkoutType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| UnknownWorkoutType(s.to_string()))
    }
}

/// Measured totals of a workout, always in canonical units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkoutData {
    pub creator: String,
    /// Meters.
    pub total_distance: f64,
    pub total_duration: Duration,
    pub total_repetitions: i64,
    /// Kilograms.
    pub total_weight: f64,
    pub country_code: Option<String>,
    /// Track points as produced by the file parser; not interpreted here.
    pub track: Option<serde_json::Value>,
}

impl WorkoutData {
    /// Meters per second, or zero when no time was recorded.
    pub fn average_speed(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total_distance / secs
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workout {
    pub id: Option<i64>,
    pub user_id: i64,
    pub name: String,
    pub notes: String,
    pub date: Option<NaiveDateTime>,
    pub workout_type: WorkoutType,
    pub data: Option<WorkoutData>,
    /// Original upload, kept so the workout can be re-ingested.
    pub filename: Option<String>,
    pub content: Option<Vec<u8>>,
    pub dirty: bool,
    pub equipment: Vec<Equipment>,
}

impl Workout {
    pub fn new(user_id: i64) -> Self {
        Workout {
            user_id,
            ..Default::default()
        }
    }

    /// The nested data record, allocated on first access.
    pub fn data_mut(&mut self) -> &mut WorkoutData {
        self.data.get_or_insert_with(WorkoutData::default)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.user_id <= 0 {
            return Err("workout has no owner".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("workout name is required".to_string());
        }
        if self.date.is_none() {
            return Err("workout date is required".to_string());
        }
        if self.workout_type == WorkoutType::AutoDetect {
            return Err("workout type is required".to_string());
        }

        let Some(data) = &self.data else {
            return Err("workout has no data".to_string());
        };
        if !data.total_distance.is_finite() || data.total_distance < 0.0 {
            return Err(format!("invalid distance: {}", data.total_distance));
        }
        if !data.total_weight.is_finite() || data.total_weight < 0.0 {
            return Err(format!("invalid weight: {}", data.total_weight));
        }
        if data.total_repetitions < 0 {
            return Err(format!("invalid repetitions: {}", data.total_repetitions));
        }

        Ok(())
    }
}

/// Aggregated workouts of one type, optionally within one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutTotals {
    /// `YYYY-MM` for monthly totals.
    pub period: Option<String>,
    #[serde(rename = "type")]
    pub workout_type: WorkoutType,
    pub count: i64,
    /// Meters.
    pub distance: f64,
    /// Seconds.
    pub duration: f64,
}

impl WorkoutTotals {
    pub fn empty(workout_type: WorkoutType) -> Self {
        WorkoutTotals {
            period: None,
            workout_type,
            count: 0,
            distance: 0.0,
            duration: 0.0,
        }
    }

    /// Meters per second over the whole period.
    pub fn average_speed(&self) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        self.distance / self.duration
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Equipment {
    pub id: Option<i64>,
    pub user_id: i64,
    pub name: String,
    pub description: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Language code, or `browser` to follow the request headers.
    pub language: String,
    pub preferred_units: UnitSystem,
    pub totals_show: WorkoutType,
    pub prefer_full_date: bool,
    pub socials_disabled: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            language: crate::i18n::BROWSER_LANGUAGE.to_string(),
            preferred_units: UnitSystem::Browser,
            totals_show: WorkoutType::Running,
            prefer_full_date: false,
            socials_disabled: false,
        }
    }
}

impl Profile {
    /// Unchecked HTML checkboxes are not submitted, so booleans are cleared
    /// before a form is bound onto the profile.
    pub fn reset_bools(&mut self) {
        self.prefer_full_date = false;
        self.socials_disabled = false;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub active: bool,
    pub admin: bool,
    #[serde(skip)]
    pub password_hash: String,
    pub profile: Profile,
}

impl User {
    pub fn units(&self) -> UnitSystem {
        self.profile.preferred_units
    }
}
