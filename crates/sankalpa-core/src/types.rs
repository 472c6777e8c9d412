//! ============================================================================
//! Core Types for Sankalpa
//! ============================================================================
//! Data structures shared by the extraction client, the request boundary and
//! the voice-log session. Serialized as JSON on the request boundary.
//! ============================================================================

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// User-facing messages surfaced by the request boundary and the session.
pub mod messages {
    pub const VOICE_INPUT_REQUIRED: &str = "voice input required";
    pub const VOICE_INPUT_EMPTY: &str = "voice input empty";
    pub const NO_HABITS_TO_CONFIRM: &str = "no habits provided for confirmed save";
    pub const HABIT_NAME_REQUIRED: &str = "every habit needs a name";
    pub const COULD_NOT_PARSE: &str = "could not parse habits from input";
    pub const PROCESS_FAILED: &str = "failed to process voice input";
    pub const SAVE_FAILED: &str = "failed to save logs";
    pub const ID_REQUIRED: &str = "id required";
    pub const QUANTITY_REQUIRED: &str = "quantity required and must be a number";
    pub const LOG_NOT_FOUND: &str = "log not found";
    pub const UPDATE_FAILED: &str = "failed to update log";
    pub const SUMMARY_FAILED: &str = "failed to load habit summary";
    pub const MIC_DENIED: &str = "microphone access denied";
    pub const CAPTURE_FAILED: &str = "voice recognition failed, try again";
    pub const TRANSPORT_FAILED: &str = "could not save, try again";
    pub const LOGGED: &str = "logged";
}

/// Habit extracted from an utterance, not yet persisted.
/// Example: "I did yoga for 30 minutes"
/// -> { habit_name: "yoga", quantity: 30, unit: "minutes", confidence: 1.0 }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitCandidate {
    /// Raw name as spoken
    #[serde(alias = "name", default)]
    pub habit_name: String,
    #[serde(default, deserialize_with = "lenient_quantity")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_unit")]
    pub unit: Option<String>,
    /// Missing or non-numeric confidence counts as fully trusted
    #[serde(default = "full_confidence", deserialize_with = "lenient_confidence")]
    pub confidence: f64,
}

impl HabitCandidate {
    pub fn new(habit_name: impl Into<String>, quantity: Option<f64>, unit: Option<&str>) -> Self {
        Self {
            habit_name: habit_name.into(),
            quantity,
            unit: unit.map(str::to_string),
            confidence: full_confidence(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// True when the name survives trimming
    pub fn has_name(&self) -> bool {
        !self.habit_name.trim().is_empty()
    }

    /// Label used when asking the user to confirm a batch
    pub fn display_label(&self) -> String {
        match (self.quantity, self.unit.as_deref()) {
            (Some(q), Some(unit)) => {
                format!("{} ({} {})", self.habit_name, format_quantity(q), unit)
            }
            (Some(q), None) => format!("{} ({})", self.habit_name, format_quantity(q)),
            _ => self.habit_name.clone(),
        }
    }
}

fn full_confidence() -> f64 {
    1.0
}

/// Render whole numbers without a trailing ".0"
pub fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 && quantity.abs() < 1e15 {
        format!("{}", quantity as i64)
    } else {
        format!("{}", quantity)
    }
}

/// Numbers pass through, numeric strings are parsed, anything else is null.
pub fn coerce_quantity(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|q| q.is_finite()),
        _ => None,
    }
}

/// Scalars become trimmed strings; blank strings and everything else are null.
pub fn coerce_unit(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn lenient_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(coerce_quantity))
}

fn lenient_unit<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(coerce_unit))
}

fn lenient_confidence<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_f64)
        .unwrap_or_else(full_confidence))
}

// ============================================================================
// Request Boundary Types
// ============================================================================

/// Body of a parse-habits request.
/// `confirmed = true` carries the batch the user already approved and skips extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseHabitsRequest {
    #[serde(default)]
    pub voice_input: String,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub habits: Option<Vec<HabitCandidate>>,
}

impl ParseHabitsRequest {
    pub fn extract(voice_input: impl Into<String>) -> Self {
        Self {
            voice_input: voice_input.into(),
            confirmed: false,
            habits: None,
        }
    }

    pub fn confirmed(voice_input: impl Into<String>, habits: Vec<HabitCandidate>) -> Self {
        Self {
            voice_input: voice_input.into(),
            confirmed: true,
            habits: Some(habits),
        }
    }
}

/// Outcome of a successful parse-habits request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParseHabitsResponse {
    /// Batch persisted; rows in insertion order
    Saved { logs: Vec<SavedLog> },
    /// At least one candidate fell under the confidence threshold
    RequiresConfirmation { habits: Vec<HabitCandidate> },
}

/// Projection of a freshly inserted row returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedLog {
    pub id: String,
    pub habit_name: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub is_complete: bool,
}

/// Body of a progressive-completion update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateHabitLogRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_quantity")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_unit")]
    pub unit: Option<String>,
}

/// Error returned by the request boundary.
/// Display text is the user-facing message; internal detail is logged, never carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("could not parse habits from input")]
    Unprocessable,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),

    /// The request never got an answer (network down, server unreachable)
    #[error("could not save, try again")]
    Unavailable,
}

impl ApiError {
    /// HTTP status the embedding server should answer with
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Unauthorized => 401,
            ApiError::BadRequest(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Unprocessable => 422,
            ApiError::Internal(_) => 500,
            ApiError::Unavailable => 503,
        }
    }
}
