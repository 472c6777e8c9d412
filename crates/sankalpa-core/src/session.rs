//! ============================================================================
//! Logging Session - Client-side interaction state machine
//! ============================================================================
//! Drives one capture -> (confirm) -> save -> progressive completion cycle:
//!
//!   idle -> capturing -> extracting -> confirming -> extracting -> completing
//!                                  \-> completing / success / failed
//!
//! Every phase-specific datum lives inside its variant so a half-finished
//! cycle can't leak into the next. The success callback fires once per
//! cycle, only after the follow-up queue is exhausted.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info, warn};

use crate::types::{
    coerce_quantity, messages, ApiError, HabitCandidate, ParseHabitsRequest, ParseHabitsResponse,
    SavedLog, UpdateHabitLogRequest,
};

/// The two request operations the session needs from the server
#[async_trait]
pub trait HabitApi: Send + Sync {
    async fn parse_habits(
        &self,
        request: ParseHabitsRequest,
    ) -> Result<ParseHabitsResponse, ApiError>;

    async fn update_habit_log(&self, request: UpdateHabitLogRequest) -> Result<(), ApiError>;
}

/// Observable phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Capturing,
    Extracting,
    Confirming,
    Completing,
    Success,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Capturing => "capturing",
            Phase::Extracting => "extracting",
            Phase::Confirming => "confirming",
            Phase::Completing => "completing",
            Phase::Success => "success",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why the capture mechanism gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    PermissionDenied,
    Other(String),
}

/// Event rejected in the current phase. State is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: Phase },

    #[error("a value is required")]
    EmptyValue,
}

/// Saved entry still waiting for a quantity
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub id: String,
    pub habit_name: String,
    pub unit: Option<String>,
}

impl From<&SavedLog> for PendingEntry {
    fn from(log: &SavedLog) -> Self {
        Self {
            id: log.id.clone(),
            habit_name: log.habit_name.clone(),
            unit: log.unit.clone(),
        }
    }
}

#[derive(Debug)]
enum SessionState {
    Idle,
    Capturing,
    Extracting { utterance: String },
    Confirming { utterance: String, candidates: Vec<HabitCandidate> },
    Completing { queue: VecDeque<PendingEntry> },
    Success,
    Failed,
}

impl SessionState {
    fn phase(&self) -> Phase {
        match self {
            SessionState::Idle => Phase::Idle,
            SessionState::Capturing => Phase::Capturing,
            SessionState::Extracting { .. } => Phase::Extracting,
            SessionState::Confirming { .. } => Phase::Confirming,
            SessionState::Completing { .. } => Phase::Completing,
            SessionState::Success => Phase::Success,
            SessionState::Failed => Phase::Failed,
        }
    }
}

type SuccessHook = Box<dyn FnMut() + Send>;

/// One user's logging session against a `HabitApi`
pub struct LoggingSession<A: HabitApi> {
    api: A,
    state: SessionState,
    message: Option<String>,
    on_success: Option<SuccessHook>,
    completed_cycles: usize,
}

impl<A: HabitApi> LoggingSession<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            state: SessionState::Idle,
            message: None,
            on_success: None,
            completed_cycles: 0,
        }
    }

    /// Register the hook fired when a cycle reaches success (e.g. refresh a dashboard)
    pub fn on_success(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Latest user-facing message
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Capture control is disabled from capture start until the cycle ends
    pub fn is_busy(&self) -> bool {
        !self.can_start()
    }

    pub fn utterance(&self) -> Option<&str> {
        match &self.state {
            SessionState::Extracting { utterance }
            | SessionState::Confirming { utterance, .. } => Some(utterance),
            _ => None,
        }
    }

    /// Candidates awaiting a confirm/discard decision
    pub fn pending_candidates(&self) -> Option<&[HabitCandidate]> {
        match &self.state {
            SessionState::Confirming { candidates, .. } => Some(candidates),
            _ => None,
        }
    }

    /// Entry the follow-up prompt is currently asking about
    pub fn current_prompt(&self) -> Option<&PendingEntry> {
        match &self.state {
            SessionState::Completing { queue } => queue.front(),
            _ => None,
        }
    }

    pub fn remaining_prompts(&self) -> usize {
        match &self.state {
            SessionState::Completing { queue } => queue.len(),
            _ => 0,
        }
    }

    /// Number of cycles that reached success
    pub fn completed_cycles(&self) -> usize {
        self.completed_cycles
    }

    fn reject(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            action,
            phase: self.phase(),
        }
    }

    fn can_start(&self) -> bool {
        matches!(self.state, SessionState::Idle | SessionState::Success | SessionState::Failed)
    }

    /// Start voice capture; clears any previous message
    pub fn begin_capture(&mut self) -> Result<(), SessionError> {
        if !self.can_start() {
            return Err(self.reject("start capture"));
        }
        debug!("Capture started");
        self.state = SessionState::Capturing;
        self.message = None;
        Ok(())
    }

    pub fn capture_failed(&mut self, error: CaptureError) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Capturing) {
            return Err(self.reject("fail capture"));
        }
        let message = match error {
            CaptureError::PermissionDenied => messages::MIC_DENIED.to_string(),
            CaptureError::Other(detail) => {
                warn!("Voice capture failed: {}", detail);
                messages::CAPTURE_FAILED.to_string()
            }
        };
        self.fail(message);
        Ok(())
    }

    /// Final transcript from the capture mechanism
    pub async fn finish_capture(&mut self, transcript: &str) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Capturing) {
            return Err(self.reject("finish capture"));
        }
        self.start_extraction(transcript).await;
        Ok(())
    }

    /// Typed utterance, for when voice capture is unavailable
    pub async fn submit_text(&mut self, text: &str) -> Result<(), SessionError> {
        if !self.can_start() {
            return Err(self.reject("submit text"));
        }
        self.message = None;
        self.start_extraction(text).await;
        Ok(())
    }

    async fn start_extraction(&mut self, transcript: &str) {
        let utterance = transcript.trim();
        if utterance.is_empty() {
            self.fail(messages::VOICE_INPUT_EMPTY.to_string());
            return;
        }

        self.state = SessionState::Extracting {
            utterance: utterance.to_string(),
        };
        let result = self.api.parse_habits(ParseHabitsRequest::extract(utterance)).await;
        self.handle_parse_result(utterance.to_string(), result);
    }

    /// Resubmit the pending batch unchanged with `confirmed = true`
    pub async fn confirm(&mut self) -> Result<(), SessionError> {
        let (utterance, candidates) = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Confirming { utterance, candidates } => (utterance, candidates),
            other => {
                self.state = other;
                return Err(self.reject("confirm"));
            }
        };

        info!("Confirming {} habits", candidates.len());
        self.state = SessionState::Extracting {
            utterance: utterance.clone(),
        };
        let result = self
            .api
            .parse_habits(ParseHabitsRequest::confirmed(utterance.clone(), candidates))
            .await;
        self.handle_parse_result(utterance, result);
        Ok(())
    }

    /// Drop the pending batch without saving anything
    pub fn discard(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Confirming { .. }) {
            return Err(self.reject("discard"));
        }
        debug!("Pending habits discarded");
        self.state = SessionState::Idle;
        self.message = None;
        Ok(())
    }

    fn handle_parse_result(
        &mut self,
        utterance: String,
        result: Result<ParseHabitsResponse, ApiError>,
    ) {
        match result {
            Ok(ParseHabitsResponse::RequiresConfirmation { habits }) => {
                info!("{} habits need confirmation", habits.len());
                self.state = SessionState::Confirming {
                    utterance,
                    candidates: habits,
                };
            }
            Ok(ParseHabitsResponse::Saved { logs }) => self.enter_completion(&logs),
            Err(e) => {
                warn!("Parse habits failed ({}): {}", e.status(), e);
                self.fail(e.to_string());
            }
        }
    }

    fn enter_completion(&mut self, logs: &[SavedLog]) {
        let queue: VecDeque<PendingEntry> = logs
            .iter()
            .filter(|log| !log.is_complete)
            .map(PendingEntry::from)
            .collect();

        if queue.is_empty() {
            self.succeed();
        } else {
            info!("{} saved habits need a quantity", queue.len());
            self.state = SessionState::Completing { queue };
        }
    }

    /// Answer the current follow-up prompt. The prompt advances whether or not
    /// the update succeeds; a blank value is rejected without advancing.
    pub async fn submit_value(
        &mut self,
        value: &str,
        unit: Option<&str>,
    ) -> Result<(), SessionError> {
        let Some(head) = self.current_prompt().cloned() else {
            return Err(self.reject("submit a value"));
        };
        let value = value.trim();
        if value.is_empty() {
            return Err(SessionError::EmptyValue);
        }

        let quantity = coerce_quantity(&serde_json::Value::String(value.to_string()));
        let unit = unit
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or(head.unit.clone());

        let request = UpdateHabitLogRequest {
            id: head.id.clone(),
            quantity,
            unit,
        };
        if let Err(e) = self.api.update_habit_log(request).await {
            warn!("Could not complete {} ({}): {}", head.habit_name, e.status(), e);
        }

        self.advance();
        Ok(())
    }

    /// Leave the current entry incomplete and move on
    pub fn skip(&mut self) -> Result<(), SessionError> {
        if self.current_prompt().is_none() {
            return Err(self.reject("skip"));
        }
        self.advance();
        Ok(())
    }

    fn advance(&mut self) {
        let exhausted = match &mut self.state {
            SessionState::Completing { queue } => {
                queue.pop_front();
                queue.is_empty()
            }
            _ => false,
        };
        if exhausted {
            self.succeed();
        }
    }

    fn succeed(&mut self) {
        self.state = SessionState::Success;
        self.message = Some(messages::LOGGED.to_string());
        self.completed_cycles += 1;
        info!("Logging cycle complete");
        if let Some(hook) = self.on_success.as_mut() {
            hook();
        }
    }

    fn fail(&mut self, message: String) {
        self.state = SessionState::Failed;
        self.message = Some(message);
    }
}
