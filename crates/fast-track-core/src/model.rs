use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{generate_edit_token, generate_entry_id, generate_session_id};
use crate::progress::Progress;
use crate::timefmt::iso_millis;

/// One fasting attempt and everything logged against it.
///
/// An active session never carries an `end_time`; [`Session::end_fast`] flips
/// both fields together. Sub-collections are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(with = "iso_millis")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "iso_millis::option")]
    pub end_time: Option<DateTime<Utc>>,
    /// Hours.
    pub target_duration: f64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub entries: Vec<CheckinEntry>,
    #[serde(default)]
    pub body_metrics: Vec<BodyMetric>,
    #[serde(default)]
    pub notes: Vec<JournalEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Bumped on every local mutation; lets a refresh tell an older remote
    /// copy from a newer one.
    #[serde(default)]
    pub revision: u64,
}

fn default_true() -> bool {
    true
}

/// One year. Longer targets are rejected wherever a session is created or
/// accepted from outside.
pub const MAX_TARGET_HOURS: f64 = 8_760.0;

pub fn validate_target_duration(hours: f64) -> Result<(), CoreError> {
    if hours.is_finite() && hours > 0.0 && hours <= MAX_TARGET_HOURS {
        Ok(())
    } else {
        Err(CoreError::InvalidTargetDuration(hours))
    }
}

impl Session {
    pub fn new(name: impl Into<String>, start_time: DateTime<Utc>, target_duration: f64) -> Self {
        Self {
            id: generate_session_id(),
            name: name.into(),
            start_time,
            end_time: None,
            target_duration,
            is_active: true,
            entries: Vec::new(),
            body_metrics: Vec::new(),
            notes: Vec::new(),
            edit_token: Some(generate_edit_token()),
            email: None,
            revision: 0,
        }
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email.filter(|e| !e.trim().is_empty());
        self
    }

    pub fn add_checkin(
        &mut self,
        input: CheckinInput,
        now: DateTime<Utc>,
    ) -> Result<CheckinEntry, CoreError> {
        input.validate()?;
        let entry = CheckinEntry {
            id: generate_entry_id(now),
            timestamp: now,
            energy: input.energy,
            hunger: input.hunger,
            mental_clarity: input.mental_clarity,
            mood: input.mood,
            physical_comfort: input.physical_comfort,
            sleep_quality: input.sleep_quality,
            water_intake: input.water_intake,
            electrolytes: input.electrolytes,
        };
        self.entries.push(entry.clone());
        self.touch();
        Ok(entry)
    }

    pub fn add_body_metric(
        &mut self,
        input: BodyMetricInput,
        now: DateTime<Utc>,
    ) -> Result<BodyMetric, CoreError> {
        input.validate()?;
        let metric = BodyMetric {
            id: generate_entry_id(now),
            timestamp: now,
            weight: input.weight,
            body_fat_percentage: input.body_fat_percentage,
        };
        self.body_metrics.push(metric.clone());
        self.touch();
        Ok(metric)
    }

    pub fn add_note(
        &mut self,
        content: impl Into<String>,
        tags: Vec<String>,
        now: DateTime<Utc>,
    ) -> JournalEntry {
        let mut unique: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            let tag = tag.trim().to_string();
            if !tag.is_empty() && !unique.contains(&tag) {
                unique.push(tag);
            }
        }
        let note = JournalEntry {
            id: generate_entry_id(now),
            timestamp: now,
            content: content.into(),
            tags: unique,
        };
        self.notes.push(note.clone());
        self.touch();
        note
    }

    /// End the fast. Returns `false` (and changes nothing) if it already ended.
    pub fn end_fast(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_active && self.end_time.is_some() {
            return false;
        }
        self.is_active = false;
        self.end_time = Some(now);
        self.touch();
        true
    }

    pub fn set_edit_token(&mut self, token: String) {
        self.edit_token = Some(token);
        self.touch();
    }

    /// When the target duration is reached, counted from the start time.
    /// `None` when the target is not a usable number of hours.
    pub fn target_end(&self) -> Option<DateTime<Utc>> {
        if !self.target_duration.is_finite() || self.target_duration < 0.0 {
            return None;
        }
        let millis = (self.target_duration * 3_600_000.0).round() as i64;
        self.start_time
            .checked_add_signed(Duration::try_milliseconds(millis)?)
    }

    /// Elapsed progress; frozen at `end_time` once the fast has ended.
    pub fn progress(&self, now: DateTime<Utc>) -> Progress {
        let until = self.end_time.unwrap_or(now);
        Progress::at(Some(self.start_time), self.target_duration, until)
    }

    pub fn link(&self, link_type: LinkType, now: DateTime<Utc>) -> SessionLink {
        SessionLink {
            id: self.id.clone(),
            name: self.name.clone(),
            link_type,
            edit_token: match link_type {
                LinkType::Editable => self.edit_token.clone(),
                LinkType::Readonly => None,
            },
            last_accessed: now,
            start_time: self.start_time,
            target_duration: self.target_duration,
            is_active: self.is_active,
        }
    }

    fn touch(&mut self) {
        self.revision = self.revision.saturating_add(1);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinEntry {
    pub id: String,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub energy: u8,
    pub hunger: u8,
    pub mental_clarity: u8,
    pub mood: u8,
    pub physical_comfort: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_intake: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub electrolytes: Option<bool>,
}

/// User-supplied half of a check-in; id and timestamp are assigned on add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinInput {
    pub energy: u8,
    pub hunger: u8,
    pub mental_clarity: u8,
    pub mood: u8,
    pub physical_comfort: u8,
    #[serde(default)]
    pub sleep_quality: Option<u8>,
    #[serde(default)]
    pub water_intake: Option<u32>,
    #[serde(default)]
    pub electrolytes: Option<bool>,
}

impl CheckinInput {
    /// The five mandatory ratings, with every optional field left empty.
    pub fn ratings(energy: u8, hunger: u8, mental_clarity: u8, mood: u8, physical_comfort: u8) -> Self {
        Self {
            energy,
            hunger,
            mental_clarity,
            mood,
            physical_comfort,
            sleep_quality: None,
            water_intake: None,
            electrolytes: None,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let ratings = [
            ("energy", self.energy),
            ("hunger", self.hunger),
            ("mentalClarity", self.mental_clarity),
            ("mood", self.mood),
            ("physicalComfort", self.physical_comfort),
        ];
        for (field, value) in ratings {
            check_rating(field, value)?;
        }
        if let Some(sleep) = self.sleep_quality {
            check_rating("sleepQuality", sleep)?;
        }
        Ok(())
    }
}

fn check_rating(field: &'static str, value: u8) -> Result<(), CoreError> {
    if (1..=10).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::RatingOutOfRange { field, value })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyMetric {
    pub id: String,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    /// Kilograms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_fat_percentage: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyMetricInput {
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub body_fat_percentage: Option<f64>,
}

impl BodyMetricInput {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.weight.is_none() && self.body_fat_percentage.is_none() {
            return Err(CoreError::EmptyBodyMetric);
        }
        if let Some(weight) = self.weight {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(CoreError::InvalidBodyMetric("weight must be positive"));
            }
        }
        if let Some(fat) = self.body_fat_percentage {
            if !fat.is_finite() || !(0.0..=100.0).contains(&fat) {
                return Err(CoreError::InvalidBodyMetric(
                    "body fat must be between 0 and 100 percent",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Editable,
    Readonly,
}

/// Locally remembered pointer to a session this client has visited.
/// Denormalized for display; never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLink {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_token: Option<String>,
    #[serde(with = "iso_millis")]
    pub last_accessed: DateTime<Utc>,
    #[serde(with = "iso_millis")]
    pub start_time: DateTime<Utc>,
    pub target_duration: f64,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::is_valid_session_id;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn checkin() -> CheckinInput {
        CheckinInput {
            energy: 7,
            hunger: 3,
            mental_clarity: 8,
            mood: 6,
            physical_comfort: 7,
            sleep_quality: None,
            water_intake: None,
            electrolytes: None,
        }
    }

    #[test_timeout::timeout]
    fn new_session_is_active_with_token() {
        let session = Session::new("Test", at(8), 72.0);
        assert!(is_valid_session_id(&session.id));
        assert!(session.is_active);
        assert!(session.end_time.is_none());
        assert!(session.entries.is_empty());
        assert_eq!(session.edit_token.as_deref().map(str::len), Some(4));
    }

    #[test_timeout::timeout]
    fn wire_shape_is_camel_case_with_null_end_time() {
        let mut session = Session::new("Test", at(8), 72.0);
        session.id = "calm-wolf-7".into();
        session.edit_token = Some("4821".into());
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["id"], "calm-wolf-7");
        assert_eq!(value["startTime"], "2024-03-01T08:00:00.000Z");
        assert_eq!(value["endTime"], serde_json::Value::Null);
        assert_eq!(value["targetDuration"], 72.0);
        assert_eq!(value["isActive"], true);
        assert_eq!(value["entries"], json!([]));
        assert_eq!(value["bodyMetrics"], json!([]));
        assert_eq!(value["notes"], json!([]));
        assert_eq!(value["editToken"], "4821");
        assert!(value.get("email").is_none());
    }

    #[test_timeout::timeout]
    fn reads_browser_written_records() {
        let raw = json!({
            "id": "fast-eagle-42",
            "name": "Anna",
            "startTime": "2024-03-01T08:00:00.000Z",
            "endTime": null,
            "targetDuration": 72,
            "isActive": true,
            "entries": [{
                "id": "1709280000000-abc123def",
                "timestamp": "2024-03-01T09:00:00.000Z",
                "energy": 7, "hunger": 3, "mentalClarity": 8, "mood": 6, "physicalComfort": 7,
                "electrolytes": true
            }],
            "bodyMetrics": [{ "id": "m1", "timestamp": "2024-03-01T09:00:00.000Z", "weight": 81.5 }],
            "notes": [{ "id": "n1", "timestamp": "2024-03-01T10:00:00.000Z", "content": "ok", "tags": ["day1"] }]
        });
        let session: Session = serde_json::from_value(raw).unwrap();
        assert_eq!(session.target_duration, 72.0);
        assert_eq!(session.entries[0].timestamp, at(9));
        assert_eq!(session.entries[0].electrolytes, Some(true));
        assert_eq!(session.body_metrics[0].weight, Some(81.5));
        assert_eq!(session.notes[0].tags, vec!["day1".to_string()]);
        assert_eq!(session.revision, 0);
        assert!(session.edit_token.is_none());
    }

    #[test_timeout::timeout]
    fn checkin_gets_id_and_timestamp() {
        let mut session = Session::new("Test", at(8), 72.0);
        let entry = session.add_checkin(checkin(), at(9)).unwrap();
        assert_eq!(session.entries.len(), 1);
        assert_eq!(entry.timestamp, at(9));
        assert!(entry.id.starts_with(&at(9).timestamp_millis().to_string()));
        assert_eq!(session.revision, 1);
    }

    #[test_timeout::timeout]
    fn rejects_out_of_range_ratings() {
        let mut session = Session::new("Test", at(8), 72.0);
        let mut input = checkin();
        input.hunger = 0;
        let err = session.add_checkin(input, at(9)).unwrap_err();
        assert!(matches!(err, CoreError::RatingOutOfRange { field: "hunger", value: 0 }));

        let mut input = checkin();
        input.sleep_quality = Some(11);
        assert!(session.add_checkin(input, at(9)).is_err());
        assert!(session.entries.is_empty());
        assert_eq!(session.revision, 0);
    }

    #[test_timeout::timeout]
    fn body_metric_needs_a_value() {
        let mut session = Session::new("Test", at(8), 72.0);
        assert!(matches!(
            session.add_body_metric(BodyMetricInput::default(), at(9)),
            Err(CoreError::EmptyBodyMetric)
        ));
        let metric = session
            .add_body_metric(
                BodyMetricInput {
                    weight: None,
                    body_fat_percentage: Some(21.5),
                },
                at(9),
            )
            .unwrap();
        assert_eq!(metric.body_fat_percentage, Some(21.5));
        assert!(session
            .add_body_metric(
                BodyMetricInput {
                    weight: Some(80.0),
                    body_fat_percentage: Some(120.0),
                },
                at(9),
            )
            .is_err());
    }

    #[test_timeout::timeout]
    fn note_tags_behave_as_a_set() {
        let mut session = Session::new("Test", at(8), 72.0);
        let note = session.add_note(
            "headache eased",
            vec!["day2".into(), " day2 ".into(), "".into(), "mood".into()],
            at(10),
        );
        assert_eq!(note.tags, vec!["day2".to_string(), "mood".to_string()]);
    }

    #[test_timeout::timeout]
    fn ending_twice_keeps_first_end_time() {
        let mut session = Session::new("Test", at(8), 72.0);
        assert!(session.end_fast(at(20)));
        assert!(!session.end_fast(at(22)));
        assert!(!session.is_active);
        assert_eq!(session.end_time, Some(at(20)));
        assert_eq!(session.revision, 1);
    }

    #[test_timeout::timeout]
    fn editable_links_carry_the_token() {
        let session = Session::new("Test", at(8), 36.0);
        let editable = session.link(LinkType::Editable, at(9));
        let readonly = session.link(LinkType::Readonly, at(9));
        assert_eq!(editable.edit_token, session.edit_token);
        assert!(readonly.edit_token.is_none());
        let value = serde_json::to_value(&readonly).unwrap();
        assert_eq!(value["type"], "readonly");
        assert_eq!(session.target_end(), Some(at(8) + Duration::hours(36)));
    }

    #[test_timeout::timeout]
    fn huge_targets_have_no_end_and_fail_validation() {
        let mut session = Session::new("Big", at(8), 1e300);
        assert_eq!(session.target_end(), None);
        session.target_duration = f64::NAN;
        assert_eq!(session.target_end(), None);
        session.target_duration = 1e12;
        assert_eq!(session.target_end(), None);

        assert!(validate_target_duration(72.0).is_ok());
        assert!(validate_target_duration(MAX_TARGET_HOURS).is_ok());
        for bad in [0.0, -1.0, 1e300, MAX_TARGET_HOURS + 1.0, f64::INFINITY, f64::NAN] {
            assert!(matches!(
                validate_target_duration(bad),
                Err(CoreError::InvalidTargetDuration(_))
            ));
        }
    }
}
