//! Conversions from canonical stored values (meters, seconds, kilograms)
//! into display text for the user's unit system.
//!
//! Every function here is total: malformed or out-of-range input produces a
//! placeholder instead of an error, so the render path never fails on data.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::i18n::parse_accept_language;

pub const METERS_PER_KILOMETER: f64 = 1000.0;
pub const METERS_PER_MILE: f64 = 1609.344;
pub const POUNDS_PER_KILOGRAM: f64 = 2.204_622_621_8;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Regions whose browsers default to imperial units.
const IMPERIAL_REGIONS: &[&str] = &["US", "LR", "MM"];

const DEFAULT_ICON: &str = "fa-question";

lazy_static! {
    static ref ICONS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("running", "fa-person-running");
        m.insert("cycling", "fa-bicycle");
        m.insert("walking", "fa-person-walking");
        m.insert("hiking", "fa-person-hiking");
        m.insert("swimming", "fa-person-swimming");
        m.insert("rowing", "fa-water");
        m.insert("push-ups", "fa-child-reaching");
        m.insert("weight-lifting", "fa-dumbbell");
        m.insert("other", "fa-heart-pulse");
        m.insert("distance", "fa-road");
        m.insert("duration", "fa-stopwatch");
        m.insert("speed", "fa-gauge");
        m.insert("tempo", "fa-gauge-simple");
        m.insert("repetitions", "fa-repeat");
        m.insert("weight", "fa-weight-hanging");
        m.insert("date", "fa-calendar");
        m.insert("notes", "fa-note-sticky");
        m.insert("equipment", "fa-toolbox");
        m.insert("creator", "fa-gear");
        m.insert("location", "fa-location-dot");
        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    /// Inherit from the browser's declared language.
    #[default]
    Browser,
    Metric,
    Imperial,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown unit system: {0:?}")]
pub struct UnknownUnitSystem(pub String);

impl UnitSystem {
    pub fn all() -> &'static [UnitSystem] {
        &[UnitSystem::Browser, UnitSystem::Metric, UnitSystem::Imperial]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitSystem::Browser => "browser",
            UnitSystem::Metric => "metric",
            UnitSystem::Imperial => "imperial",
        }
    }

    /// Replaces the `Browser` sentinel with a concrete system.
    pub fn resolve(self, accept_language: Option<&str>) -> UnitSystem {
        match self {
            UnitSystem::Browser => {
                units_from_browser_language(accept_language.unwrap_or_default())
            }
            other => other,
        }
    }

    fn meters_per_unit(&self) -> f64 {
        match self {
            UnitSystem::Imperial => METERS_PER_MILE,
            _ => METERS_PER_KILOMETER,
        }
    }

    pub fn distance_unit(&self) -> &'static str {
        match self {
            UnitSystem::Imperial => "mi",
            _ => "km",
        }
    }

    pub fn speed_unit(&self) -> &'static str {
        match self {
            UnitSystem::Imperial => "mph",
            _ => "km/h",
        }
    }

    pub fn tempo_unit(&self) -> &'static str {
        match self {
            UnitSystem::Imperial => "min/mi",
            _ => "min/km",
        }
    }

    pub fn weight_unit(&self) -> &'static str {
        match self {
            UnitSystem::Imperial => "lbs",
            _ => "kg",
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitSystem {
    type Err = UnknownUnitSystem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "browser" => Ok(UnitSystem::Browser),
            "metric" => Ok(UnitSystem::Metric),
            "imperial" => Ok(UnitSystem::Imperial),
            _ => Err(UnknownUnitSystem(s.to_string())),
        }
    }
}

/// A labeled value rendered as an icon, a caption and its text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecoratedAttribute {
    pub icon: String,
    pub name: String,
    pub value: String,
}

pub fn build_decorated_attribute(
    icon: impl Into<String>,
    name: impl Into<String>,
    value: impl Into<String>,
) -> DecoratedAttribute {
    DecoratedAttribute {
        icon: icon.into(),
        name: name.into(),
        value: value.into(),
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

pub fn to_kilometer(meters: f64) -> f64 {
    finite_or_zero(meters) / METERS_PER_KILOMETER
}

pub fn human_distance(meters: f64, units: UnitSystem) -> String {
    let value = finite_or_zero(meters) / units.meters_per_unit();
    format!("{:.2} {}", value, units.distance_unit())
}

pub fn human_distance_km(meters: f64) -> String {
    human_distance(meters, UnitSystem::Metric)
}

/// Average speed in meters per second to the unit system's hourly rate.
pub fn human_speed(meters_per_second: f64, units: UnitSystem) -> String {
    let value = finite_or_zero(meters_per_second) * SECONDS_PER_HOUR / units.meters_per_unit();
    format!("{:.2} {}", value, units.speed_unit())
}

pub fn human_speed_kph(meters_per_second: f64) -> String {
    human_speed(meters_per_second, UnitSystem::Metric)
}

/// Pace as `M:SS` per distance unit. A stationary or invalid speed has no
/// pace and renders as `-`.
pub fn human_tempo(meters_per_second: f64, units: UnitSystem) -> String {
    if !meters_per_second.is_finite() || meters_per_second <= 0.0 {
        return format!("- {}", units.tempo_unit());
    }

    let seconds_per_unit = units.meters_per_unit() / meters_per_second;
    if !seconds_per_unit.is_finite() {
        return format!("- {}", units.tempo_unit());
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total = seconds_per_unit.trunc() as u64;

    format!("{}:{:02} {}", total / 60, total % 60, units.tempo_unit())
}

pub fn human_tempo_km(meters_per_second: f64) -> String {
    human_tempo(meters_per_second, UnitSystem::Metric)
}

pub fn human_weight(kilograms: f64, units: UnitSystem) -> String {
    let kg = finite_or_zero(kilograms);
    let value = match units {
        UnitSystem::Imperial => kg * POUNDS_PER_KILOGRAM,
        _ => kg,
    };
    format!("{:.1} {}", value, units.weight_unit())
}

/// Clock-style duration: `H:MM:SS`, or `M:SS` below one hour.
pub fn human_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

pub fn numeric_duration(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

/// Unit suffix for a named quantity, or an empty string for unknown ones.
pub fn local_unit(units: UnitSystem, quantity: &str) -> &'static str {
    match quantity {
        "distance" => units.distance_unit(),
        "speed" => units.speed_unit(),
        "tempo" => units.tempo_unit(),
        "weight" => units.weight_unit(),
        _ => "",
    }
}

/// Maps a two-letter ISO 3166 code onto its regional indicator flag.
/// Anything else yields an empty string.
pub fn country_code_to_flag(code: &str) -> String {
    let code = code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return String::new();
    }

    code.to_ascii_uppercase()
        .chars()
        .filter_map(|c| char::from_u32(0x1F1E6 + (c as u32 - 'A' as u32)))
        .collect()
}

pub fn bool_to_html(b: bool) -> &'static str {
    if b {
        r#"<i class="text-green-500 fas fa-check"></i>"#
    } else {
        r#"<i class="text-rose-500 fas fa-times"></i>"#
    }
}

pub fn bool_to_checkbox(b: bool) -> &'static str {
    if b {
        "checked"
    } else {
        ""
    }
}

pub fn icon_for(name: &str) -> &'static str {
    ICONS
        .get(name.trim().to_ascii_lowercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_ICON)
}

/// Picks a unit system from an `Accept-Language` value. Only the tag with
/// the highest quality is considered; its region decides, and tags without
/// a region are metric.
pub fn units_from_browser_language(accept_language: &str) -> UnitSystem {
    let tags = parse_accept_language(accept_language);
    let preferred = tags.first().map(String::as_str).unwrap_or_default();

    let region = preferred
        .split(['-', '_'])
        .skip(1)
        .find(|sub| sub.len() == 2 && sub.chars().all(|c| c.is_ascii_alphabetic()));

    match region {
        Some(r) if IMPERIAL_REGIONS.contains(&r.to_ascii_uppercase().as_str()) => {
            UnitSystem::Imperial
        }
        _ => UnitSystem::Metric,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_duration_counts_seconds() {
        assert_eq!(numeric_duration(Duration::from_secs(1)), 1.0);
        assert_eq!(numeric_duration(Duration::from_secs(3600)), 3600.0);
    }

    #[test]
    fn country_code_to_flag_maps_regional_indicators() {
        assert_eq!(country_code_to_flag("UA"), "🇺🇦");
        assert_eq!(country_code_to_flag("BE"), "🇧🇪");
        assert_eq!(country_code_to_flag("be"), "🇧🇪");
    }

    #[test]
    fn country_code_to_flag_rejects_invalid_codes() {
        assert_eq!(country_code_to_flag(""), "");
        assert_eq!(country_code_to_flag("BEL"), "");
        assert_eq!(country_code_to_flag("1A"), "");
        assert_eq!(country_code_to_flag("ÄB"), "");
    }

    #[test]
    fn human_distance_metric() {
        assert_eq!(human_distance_km(1.23), "0.00 km");
        assert_eq!(human_distance(1234.0, UnitSystem::Metric), "1.23 km");
        assert_eq!(human_distance(1234567.0, UnitSystem::Metric), "1234.57 km");
    }

    #[test]
    fn human_distance_imperial() {
        assert_eq!(human_distance(1609.344, UnitSystem::Imperial), "1.00 mi");
        assert_eq!(human_distance(42195.0, UnitSystem::Imperial), "26.22 mi");
    }

    #[test]
    fn human_distance_survives_nan() {
        assert_eq!(human_distance(f64::NAN, UnitSystem::Metric), "0.00 km");
    }

    #[test]
    fn human_speed_kph() {
        assert_eq!(super::human_speed_kph(1.23), "4.43 km/h");
        assert_eq!(super::human_speed_kph(2.78), "10.01 km/h");
        assert_eq!(super::human_speed_kph(4.99), "17.96 km/h");
    }

    #[test]
    fn human_speed_mph() {
        assert_eq!(human_speed(4.4704, UnitSystem::Imperial), "10.00 mph");
    }

    #[test]
    fn human_tempo_km() {
        assert_eq!(super::human_tempo_km(1.23), "13:33 min/km");
        assert_eq!(super::human_tempo_km(2.78), "5:59 min/km");
        assert_eq!(super::human_tempo_km(4.99), "3:20 min/km");
        assert_eq!(super::human_tempo_km(3.32), "5:01 min/km");
    }

    #[test]
    fn human_tempo_without_speed() {
        assert_eq!(human_tempo(0.0, UnitSystem::Metric), "- min/km");
        assert_eq!(human_tempo(-1.0, UnitSystem::Imperial), "- min/mi");
        assert_eq!(human_tempo(f64::INFINITY, UnitSystem::Metric), "- min/km");
    }

    #[test]
    fn human_tempo_imperial() {
        // 536.448 s per mile
        assert_eq!(human_tempo(3.0, UnitSystem::Imperial), "8:56 min/mi");
    }

    #[test]
    fn human_duration_clock() {
        assert_eq!(human_duration(Duration::from_secs(59)), "0:59");
        assert_eq!(human_duration(Duration::from_secs(5400)), "1:30:00");
        assert_eq!(human_duration(Duration::from_secs(3723)), "1:02:03");
    }

    #[test]
    fn human_weight_per_system() {
        assert_eq!(human_weight(100.0, UnitSystem::Metric), "100.0 kg");
        assert_eq!(human_weight(100.0, UnitSystem::Imperial), "220.5 lbs");
    }

    #[test]
    fn bool_to_html_glyphs() {
        assert_eq!(bool_to_html(true), "<i class=\"text-green-500 fas fa-check\"></i>");
        assert_eq!(bool_to_html(false), "<i class=\"text-rose-500 fas fa-times\"></i>");
    }

    #[test]
    fn bool_to_checkbox_attribute() {
        assert_eq!(bool_to_checkbox(true), "checked");
        assert_eq!(bool_to_checkbox(false), "");
    }

    #[test]
    fn build_decorated_attribute_keeps_fields() {
        let r = build_decorated_attribute("the-icon", "the-name", "the-value");

        assert_eq!(r.icon, "the-icon");
        assert_eq!(r.name, "the-name");
        assert_eq!(r.value, "the-value");
    }

    #[test]
    fn icon_for_falls_back() {
        assert_eq!(icon_for("Running"), "fa-person-running");
        assert_eq!(icon_for("something-else"), DEFAULT_ICON);
    }

    #[test]
    fn units_from_browser_language_table() {
        assert_eq!(units_from_browser_language("en-US,en;q=0.9"), UnitSystem::Imperial);
        assert_eq!(units_from_browser_language("my-MM"), UnitSystem::Imperial);
        assert_eq!(units_from_browser_language("en-GB,en;q=0.9"), UnitSystem::Metric);
        assert_eq!(units_from_browser_language("nl"), UnitSystem::Metric);
        assert_eq!(units_from_browser_language(""), UnitSystem::Metric);
        assert_eq!(units_from_browser_language("zh-Hant-US"), UnitSystem::Imperial);
    }

    #[test]
    fn browser_units_follow_quality_order() {
        assert_eq!(units_from_browser_language("en;q=0.1, en-US;q=0.9"), UnitSystem::Imperial);
        assert_eq!(units_from_browser_language("en-US;q=0.2, de-DE"), UnitSystem::Metric);
        assert_eq!(units_from_browser_language("en-US;q=0, en-GB"), UnitSystem::Metric);
    }

    #[test]
    fn browser_sentinel_resolves() {
        assert_eq!(UnitSystem::Browser.resolve(Some("en-US")), UnitSystem::Imperial);
        assert_eq!(UnitSystem::Browser.resolve(None), UnitSystem::Metric);
        assert_eq!(UnitSystem::Metric.resolve(Some("en-US")), UnitSystem::Metric);
    }

    #[test]
    fn local_unit_suffixes() {
        assert_eq!(local_unit(UnitSystem::Imperial, "distance"), "mi");
        assert_eq!(local_unit(UnitSystem::Metric, "speed"), "km/h");
        assert_eq!(local_unit(UnitSystem::Metric, "nope"), "");
    }
}
