//! Manually entered workouts: binding of the add/edit form and the merge of
//! its fields into a stored workout.

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use std::time::Duration;
use tracing::warn;

use crate::models::{UnknownWorkoutType, Workout, WorkoutType};

/// `<input type="datetime-local">` value format.
pub const HTML_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M";
/// `<input type="time" step="1">` value format, read as a duration.
pub const HTML_DURATION_FORMAT: &str = "%H:%M:%S";
/// The same input without a seconds step.
const HTML_SHORT_DURATION_FORMAT: &str = "%H:%M";

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("invalid value for {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error(transparent)]
    UnknownType(#[from] UnknownWorkoutType),
}

/// Form input for a manual workout. Every field is optional; absent fields
/// never touch the workout they are applied to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManualWorkout {
    pub name: Option<String>,
    pub date: Option<String>,
    pub duration: Option<String>,
    /// Kilometers.
    pub distance: Option<f64>,
    pub repetitions: Option<i64>,
    /// Kilograms.
    pub weight: Option<f64>,
    pub notes: Option<String>,
    pub workout_type: Option<WorkoutType>,
}

/// Overwrites `dst` only when `src` carries a value.
pub fn set_if_some<T>(dst: &mut T, src: Option<T>) {
    if let Some(v) = src {
        *dst = v;
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, BindError> {
    value.trim().parse().map_err(|_| BindError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_number_or_zero<T>(field: &'static str, value: &str) -> Result<T, BindError>
where
    T: std::str::FromStr + Default,
{
    if value.trim().is_empty() {
        return Ok(T::default());
    }
    parse_number(field, value)
}

impl ManualWorkout {
    /// Binds urlencoded form pairs. A submitted key is present even when its
    /// value is empty: text binds as `""` and numbers as zero. An empty
    /// `type` is the one exception and stays absent. Unknown keys are
    /// ignored.
    pub fn from_form_pairs(pairs: &[(String, String)]) -> Result<Self, BindError> {
        let mut m = ManualWorkout::default();

        for (key, value) in pairs {
            match key.as_str() {
                "name" => m.name = Some(value.clone()),
                "date" => m.date = Some(value.clone()),
                "duration" => m.duration = Some(value.clone()),
                "notes" => m.notes = Some(value.clone()),
                "distance" => m.distance = Some(parse_number_or_zero("distance", value)?),
                "repetitions" => m.repetitions = Some(parse_number_or_zero("repetitions", value)?),
                "weight" => m.weight = Some(parse_number_or_zero("weight", value)?),
                "type" if value.trim().is_empty() => {}
                "type" => m.workout_type = Some(value.parse()?),
                _ => {}
            }
        }

        Ok(m)
    }

    pub fn to_date(&self) -> Option<NaiveDateTime> {
        let raw = self.date.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }

        match NaiveDateTime::parse_from_str(raw, HTML_DATE_FORMAT) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!("Ignoring malformed workout date {:?}: {}", raw, e);
                None
            }
        }
    }

    /// Kilometers from the form, meters for storage.
    pub fn to_distance(&self) -> Option<f64> {
        self.distance.map(|km| km * 1000.0)
    }

    pub fn to_duration(&self) -> Option<Duration> {
        let raw = self.duration.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }

        let parsed = NaiveTime::parse_from_str(raw, HTML_DURATION_FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(raw, HTML_SHORT_DURATION_FORMAT));
        match parsed {
            Ok(t) => Some(Duration::from_secs(u64::from(t.num_seconds_from_midnight()))),
            Err(e) => {
                warn!("Ignoring malformed workout duration {:?}: {}", raw, e);
                None
            }
        }
    }

    /// Applies the supplied fields to `w`. Everything is parsed before the
    /// first assignment.
    pub fn update(&self, w: &mut Workout) {
        let date = self.to_date();
        let distance = self.to_distance();
        let duration = self.to_duration();

        set_if_some(&mut w.name, self.name.clone());
        set_if_some(&mut w.notes, self.notes.clone());
        set_if_some(&mut w.date, date.map(Some));
        set_if_some(&mut w.workout_type, self.workout_type);

        let data = w.data_mut();
        set_if_some(&mut data.total_distance, distance);
        set_if_some(&mut data.total_duration, duration);
        set_if_some(&mut data.total_repetitions, self.repetitions);
        set_if_some(&mut data.total_weight, self.weight);
    }
}

/// Collects the repeated `equipment` keys of a workout form.
pub fn equipment_ids_from_form_pairs(pairs: &[(String, String)]) -> Result<Vec<i64>, BindError> {
    pairs
        .iter()
        .filter(|(k, v)| k == "equipment" && !v.is_empty())
        .map(|(_, v)| parse_number("equipment", v))
        .collect()
}
