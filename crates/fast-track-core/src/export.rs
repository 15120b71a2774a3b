//! Session export (JSON, CSV) and JSON import.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::model::{validate_target_duration, Session};
use crate::timefmt::{iso_millis, to_iso};

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportEnvelope<'a> {
    #[serde(flatten)]
    session: &'a Session,
    #[serde(with = "iso_millis")]
    exported_at: DateTime<Utc>,
    version: &'static str,
}

/// Pretty JSON with `exportedAt` and `version` alongside the session fields.
pub fn export_json(session: &Session, exported_at: DateTime<Utc>) -> Result<String, CoreError> {
    let named;
    let session = if session.name.trim().is_empty() {
        named = Session {
            name: "Unnamed Session".to_string(),
            ..session.clone()
        };
        &named
    } else {
        session
    };
    let envelope = ExportEnvelope {
        session,
        exported_at,
        version: EXPORT_VERSION,
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// `fasting-session-2024-03-01.json`
pub fn export_file_name(format: ExportFormat, date: NaiveDate) -> String {
    format!(
        "fasting-session-{}.{}",
        date.format("%Y-%m-%d"),
        format.extension()
    )
}

/// Three labeled sections for spreadsheet use: check-ins, body metrics, journal.
pub fn export_csv(session: &Session) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("=== CHECK-IN DATA ===".into());
    lines.push(
        "Timestamp,Energy,Hunger,Mental Clarity,Mood,Physical Comfort,Sleep Quality,Water Intake,Electrolytes"
            .into(),
    );
    for entry in &session.entries {
        lines.push(
            [
                to_iso(&entry.timestamp),
                entry.energy.to_string(),
                entry.hunger.to_string(),
                entry.mental_clarity.to_string(),
                entry.mood.to_string(),
                entry.physical_comfort.to_string(),
                blank_if_zero(entry.sleep_quality.map(f64::from)),
                blank_if_zero(entry.water_intake.map(f64::from)),
                if entry.electrolytes.unwrap_or(false) {
                    "Yes".into()
                } else {
                    "No".into()
                },
            ]
            .join(","),
        );
    }

    lines.push(String::new());
    lines.push("=== BODY METRICS ===".into());
    lines.push("Timestamp,Weight (kg),Body Fat (%)".into());
    for metric in &session.body_metrics {
        lines.push(
            [
                to_iso(&metric.timestamp),
                blank_if_zero(metric.weight),
                blank_if_zero(metric.body_fat_percentage),
            ]
            .join(","),
        );
    }

    lines.push(String::new());
    lines.push("=== JOURNAL ENTRIES ===".into());
    lines.push("Timestamp,Content,Tags".into());
    for note in &session.notes {
        lines.push(
            [
                to_iso(&note.timestamp),
                format!("\"{}\"", note.content.replace('"', "\"\"")),
                note.tags.join("; "),
            ]
            .join(","),
        );
    }

    lines.join("\n")
}

// Absent and zero values both export as an empty cell.
fn blank_if_zero(value: Option<f64>) -> String {
    match value {
        Some(v) if v != 0.0 && v.is_finite() => v.to_string(),
        _ => String::new(),
    }
}

/// Parse an exported JSON file back into a session.
///
/// `id`, `startTime` and `targetDuration` must be present and non-empty
/// (a zero target counts as missing); collections default to empty.
pub fn import_json(text: &str) -> Result<Session, CoreError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| CoreError::Import(err.to_string()))?;
    if !value.is_object() {
        return Err(CoreError::InvalidSessionData);
    }
    let required = ["id", "startTime", "targetDuration"];
    if !required.iter().all(|field| is_truthy(value.get(*field))) {
        return Err(CoreError::InvalidSessionData);
    }
    let session: Session =
        serde_json::from_value(value).map_err(|err| CoreError::Import(err.to_string()))?;
    validate_target_duration(session.target_duration)?;
    Ok(session)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BodyMetricInput, CheckinInput};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn sample() -> Session {
        let mut session = Session::new("Anna", at(8), 72.0);
        session
            .add_checkin(
                CheckinInput {
                    energy: 7,
                    hunger: 3,
                    mental_clarity: 8,
                    mood: 6,
                    physical_comfort: 7,
                    sleep_quality: None,
                    water_intake: Some(4),
                    electrolytes: Some(true),
                },
                at(9),
            )
            .unwrap();
        session
            .add_body_metric(
                BodyMetricInput {
                    weight: Some(81.5),
                    body_fat_percentage: None,
                },
                at(9),
            )
            .unwrap();
        session.add_note("said \"hi\", felt fine", vec!["day1".into(), "mood".into()], at(10));
        session
    }

    #[test_timeout::timeout]
    fn json_export_carries_envelope_fields() {
        let session = sample();
        let text = export_json(&session, at(12)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["exportedAt"], "2024-03-01T12:00:00.000Z");
        assert_eq!(value["version"], "1.0");
        assert_eq!(value["name"], "Anna");
        assert_eq!(value["entries"][0]["timestamp"], "2024-03-01T09:00:00.000Z");
    }

    #[test_timeout::timeout]
    fn unnamed_sessions_get_a_placeholder_name() {
        let mut session = sample();
        session.name = "  ".into();
        let value: Value = serde_json::from_str(&export_json(&session, at(12)).unwrap()).unwrap();
        assert_eq!(value["name"], "Unnamed Session");
    }

    #[test_timeout::timeout]
    fn json_round_trip_preserves_entries() {
        let mut session = sample();
        session.end_fast(at(11));
        let imported = import_json(&export_json(&session, at(12)).unwrap()).unwrap();
        assert_eq!(imported, session);
    }

    #[test_timeout::timeout]
    fn import_requires_core_fields() {
        assert!(matches!(import_json("not json"), Err(CoreError::Import(_))));
        assert!(matches!(import_json("[]"), Err(CoreError::InvalidSessionData)));
        assert!(matches!(
            import_json(r#"{"id":"a-b-1","startTime":"2024-03-01T08:00:00.000Z"}"#),
            Err(CoreError::InvalidSessionData)
        ));
        assert!(matches!(
            import_json(r#"{"id":"a-b-1","startTime":"2024-03-01T08:00:00.000Z","targetDuration":0}"#),
            Err(CoreError::InvalidSessionData)
        ));
        assert!(matches!(
            import_json(r#"{"id":"","startTime":"2024-03-01T08:00:00.000Z","targetDuration":72}"#),
            Err(CoreError::InvalidSessionData)
        ));
        assert!(matches!(
            import_json(r#"{"id":"a-b-1","startTime":"2024-03-01T08:00:00.000Z","targetDuration":1e300}"#),
            Err(CoreError::InvalidTargetDuration(_))
        ));
    }

    #[test_timeout::timeout]
    fn import_defaults_missing_collections() {
        let session = import_json(
            r#"{"id":"calm-wolf-7","startTime":"2024-03-01T08:00:00.000Z","targetDuration":48,"isActive":true}"#,
        )
        .unwrap();
        assert!(session.entries.is_empty());
        assert!(session.body_metrics.is_empty());
        assert!(session.notes.is_empty());
        assert!(session.end_time.is_none());
    }

    #[test_timeout::timeout]
    fn csv_has_three_sections() {
        let session = sample();
        let csv = export_csv(&session);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "=== CHECK-IN DATA ===");
        assert_eq!(lines[2], "2024-03-01T09:00:00.000Z,7,3,8,6,7,,4,Yes");
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "=== BODY METRICS ===");
        assert_eq!(lines[6], "2024-03-01T09:00:00.000Z,81.5,");
        assert_eq!(lines[8], "=== JOURNAL ENTRIES ===");
        assert_eq!(
            lines[10],
            "2024-03-01T10:00:00.000Z,\"said \"\"hi\"\", felt fine\",day1; mood"
        );
    }

    #[test_timeout::timeout]
    fn file_names_use_the_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            export_file_name(ExportFormat::Csv, date),
            "fasting-session-2024-03-01.csv"
        );
    }
}
