//! `keyslot-types` – shared records, submissions and errors.
//!
//! Everything that crosses a crate boundary in the relay lives here: the
//! queued [`EventRecord`], the validated [`Submission`] variants that produce
//! it, the wholesale [`RewardConfig`] blob, the broker [`ConnectionState`],
//! and the workspace-wide [`KeyslotError`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Global error type spanning request validation, broker transport failures,
/// and configuration problems.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyslotError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Broker protocol error: {0}")]
    Protocol(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// EventRecord
// ─────────────────────────────────────────────────────────────────────────────

/// One queued client submission, color or reward, tagged with its team.
///
/// `team` and `color` are always present; the optional fields are only
/// populated for reward submissions.  Records are never mutated once queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub team: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
}

impl EventRecord {
    /// Build a bare color record with a fresh id and receive time.
    pub fn color(team: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
            team: team.into(),
            color: color.into(),
            timestamp: None,
            level: None,
            game_number: None,
            destination: None,
            gate: None,
        }
    }

}

// ─────────────────────────────────────────────────────────────────────────────
// Submissions
// ─────────────────────────────────────────────────────────────────────────────

/// A color-feedback submission: `{"team": .., "color": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColorEvent {
    pub team: String,
    pub color: String,
}

/// A reward submission from a game station.
///
/// `timestamp`, `level` and `gameNumber` accept either strings or numbers
/// since frontends send both; they are normalised to strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RewardEvent {
    #[serde(rename = "teamName")]
    pub team: String,
    pub reward: String,
    #[serde(deserialize_with = "text_or_number")]
    pub timestamp: String,
    #[serde(deserialize_with = "text_or_number")]
    pub level: String,
    #[serde(rename = "gameNumber", deserialize_with = "text_or_number")]
    pub game_number: String,
    #[serde(default)]
    pub gate: Option<String>,
}

/// Validated inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Color(ColorEvent),
    Reward(RewardEvent),
}

impl ColorEvent {
    /// Validate a raw JSON payload into a [`ColorEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`KeyslotError::Validation`] naming the missing, ill-typed or
    /// blank field.
    pub fn from_payload(payload: &Value) -> Result<Self, KeyslotError> {
        let event = Self::deserialize(payload).map_err(invalid_body)?;
        not_blank("color", &event.color)?;
        not_blank("team", &event.team)?;
        Ok(event)
    }
}

impl RewardEvent {
    /// Validate a raw JSON payload into a [`RewardEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`KeyslotError::Validation`] naming the missing, ill-typed or
    /// blank field.
    pub fn from_payload(payload: &Value) -> Result<Self, KeyslotError> {
        let event = Self::deserialize(payload).map_err(invalid_body)?;
        not_blank("teamName", &event.team)?;
        not_blank("reward", &event.reward)?;
        not_blank("timestamp", &event.timestamp)?;
        not_blank("level", &event.level)?;
        not_blank("gameNumber", &event.game_number)?;
        Ok(event)
    }
}

impl Submission {
    /// Team tag of the submission.
    pub fn team(&self) -> &str {
        match self {
            Submission::Color(c) => &c.team,
            Submission::Reward(r) => &r.team,
        }
    }

    /// Color/reward code of the submission.
    pub fn color(&self) -> &str {
        match self {
            Submission::Color(c) => &c.color,
            Submission::Reward(r) => &r.reward,
        }
    }

    /// Turn the submission into a queue record.
    ///
    /// `destination` is only attached to reward records; color records never
    /// carry optional fields.
    pub fn into_record(self, destination: Option<String>) -> EventRecord {
        match self {
            Submission::Color(c) => EventRecord::color(c.team, c.color),
            Submission::Reward(r) => EventRecord {
                timestamp: Some(r.timestamp),
                level: Some(r.level),
                game_number: Some(r.game_number),
                destination,
                gate: r.gate,
                ..EventRecord::color(r.team, r.reward)
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Number(serde_json::Number),
}

fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match TextOrNumber::deserialize(deserializer)? {
        TextOrNumber::Text(s) => s,
        TextOrNumber::Number(n) => n.to_string(),
    })
}

fn invalid_body(e: serde_json::Error) -> KeyslotError {
    KeyslotError::Validation(format!("invalid request body: {e}"))
}

fn not_blank(key: &str, value: &str) -> Result<(), KeyslotError> {
    if value.trim().is_empty() {
        return Err(KeyslotError::Validation(format!("missing '{key}' in request body")));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Reward configuration
// ─────────────────────────────────────────────────────────────────────────────

/// One `{colorName, destination}` pair of a [`RewardConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardMapping {
    pub color_name: String,
    pub destination: String,
}

/// The current reward-to-destination configuration.  Always replaced
/// wholesale, never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardConfig {
    pub rewards: Vec<RewardMapping>,
}

impl RewardConfig {
    /// Parse a configuration submission.
    ///
    /// # Errors
    ///
    /// Returns [`KeyslotError::Validation`] when the payload does not have the
    /// `{"rewards": [{"colorName": .., "destination": ..}, ..]}` shape.
    pub fn from_payload(payload: &Value) -> Result<Self, KeyslotError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| KeyslotError::Validation(format!("invalid reward configuration: {e}")))
    }

    /// Derived colorName → destination view.  Later entries overwrite earlier
    /// ones with the same color name.
    pub fn destination_map(&self) -> BTreeMap<String, String> {
        self.rewards
            .iter()
            .map(|m| (m.color_name.clone(), m.destination.clone()))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Broker connection state
// ─────────────────────────────────────────────────────────────────────────────

/// Connectivity of the broker publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn color_event_requires_color_and_team() {
        let ok = ColorEvent::from_payload(&json!({"color": "red", "team": "alpha"})).unwrap();
        assert_eq!(ok.color, "red");
        assert_eq!(ok.team, "alpha");

        let err = ColorEvent::from_payload(&json!({"team": "alpha"})).unwrap_err();
        assert!(matches!(&err, KeyslotError::Validation(m) if m.contains("color")));

        let err = ColorEvent::from_payload(&json!({"color": "red"})).unwrap_err();
        assert!(err.to_string().contains("team"));
    }

    #[test]
    fn color_event_rejects_non_object_payload() {
        let err = ColorEvent::from_payload(&json!(["red"])).unwrap_err();
        assert!(matches!(err, KeyslotError::Validation(_)));
    }

    #[test]
    fn color_event_rejects_blank_and_non_string_fields() {
        let err = ColorEvent::from_payload(&json!({"color": "  ", "team": "alpha"})).unwrap_err();
        assert_eq!(err, KeyslotError::Validation("missing 'color' in request body".into()));
        assert!(ColorEvent::from_payload(&json!({"color": 7, "team": "alpha"})).is_err());
    }

    #[test]
    fn reward_event_accepts_numbers_for_scalar_fields() {
        let payload = json!({
            "teamName": "alpha",
            "reward": "blue",
            "timestamp": "2025-03-01T10:00:00Z",
            "level": 3,
            "gameNumber": "12",
            "gate": "north"
        });
        let ev = RewardEvent::from_payload(&payload).unwrap();
        assert_eq!(ev.team, "alpha");
        assert_eq!(ev.reward, "blue");
        assert_eq!(ev.level, "3");
        assert_eq!(ev.game_number, "12");
        assert_eq!(ev.gate.as_deref(), Some("north"));
    }

    #[test]
    fn reward_event_rejects_non_scalar_level_and_allows_null_gate() {
        let mut payload = json!({
            "teamName": "alpha",
            "reward": "blue",
            "timestamp": 17,
            "level": [3],
            "gameNumber": 4,
            "gate": null
        });
        assert!(RewardEvent::from_payload(&payload).is_err());

        payload["level"] = json!(2.5);
        let ev = RewardEvent::from_payload(&payload).unwrap();
        assert_eq!(ev.level, "2.5");
        assert_eq!(ev.timestamp, "17");
        assert!(ev.gate.is_none());
    }

    #[test]
    fn reward_event_reports_missing_field() {
        let payload = json!({
            "teamName": "alpha",
            "reward": "blue",
            "timestamp": 1,
            "level": 3
        });
        let err = RewardEvent::from_payload(&payload).unwrap_err();
        assert!(err.to_string().contains("gameNumber"));
    }

    #[test]
    fn reward_submission_maps_fields_onto_record() {
        let sub = Submission::Reward(RewardEvent {
            team: "beta".into(),
            reward: "green".into(),
            timestamp: "t0".into(),
            level: "1".into(),
            game_number: "2".into(),
            gate: None,
        });
        let record = sub.into_record(Some("gateA".into()));
        assert_eq!(record.team, "beta");
        assert_eq!(record.color, "green");
        assert_eq!(record.destination.as_deref(), Some("gateA"));
        assert_eq!(record.level.as_deref(), Some("1"));
    }

    #[test]
    fn color_submission_ignores_destination() {
        let sub = Submission::Color(ColorEvent { team: "a".into(), color: "red".into() });
        let record = sub.into_record(Some("gateA".into()));
        assert!(record.destination.is_none());
        assert!(record.timestamp.is_none() && record.level.is_none());
    }

    #[test]
    fn record_json_uses_camel_case_and_skips_empty_fields() {
        let record = EventRecord::color("alpha", "red");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["team"], "alpha");
        assert!(json.get("receivedAt").is_some());
        assert!(json.get("gameNumber").is_none());
    }

    #[test]
    fn reward_config_last_duplicate_wins() {
        let cfg = RewardConfig::from_payload(&json!({
            "rewards": [
                {"colorName": "red", "destination": "gateA"},
                {"colorName": "red", "destination": "gateB"}
            ]
        }))
        .unwrap();
        let map = cfg.destination_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("red").map(String::as_str), Some("gateB"));
    }

    #[test]
    fn reward_config_rejects_wrong_shape() {
        let err = RewardConfig::from_payload(&json!({"rewards": "red"})).unwrap_err();
        assert!(matches!(err, KeyslotError::Validation(_)));
    }

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
