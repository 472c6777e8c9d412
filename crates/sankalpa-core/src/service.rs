//! ============================================================================
//! Habit Service - Request handling boundary
//! ============================================================================
//! Entry points the embedding server routes to:
//! - parse_habits: utterance -> extraction -> confidence gate -> save
//! - update_habit_log: progressive completion of one incomplete entry
//! - habit_summary: dashboard rollups for the caller
//!
//! Authentication is checked before anything else. Unexpected failures are
//! logged in full and surfaced only as the generic user-facing message.
//! ============================================================================

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::confidence_gate::ConfidenceGate;
use crate::db::{CompletionOutcome, HabitStore};
use crate::extraction::HabitExtractor;
use crate::identity::Principal;
use crate::session::HabitApi;
use crate::summary::{get_habit_summary_at, HabitSummary};
use crate::types::{
    messages, ApiError, HabitCandidate, ParseHabitsRequest, ParseHabitsResponse,
    UpdateHabitLogRequest,
};

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Request boundary over a store and an extractor
pub struct HabitService {
    store: Arc<dyn HabitStore>,
    extractor: Arc<dyn HabitExtractor>,
    gate: ConfidenceGate,
    clock: Clock,
}

impl HabitService {
    pub fn new(store: Arc<dyn HabitStore>, extractor: Arc<dyn HabitExtractor>) -> Self {
        Self {
            store,
            extractor,
            gate: ConfidenceGate::new(),
            clock: Arc::new(|| Utc::now().date_naive()),
        }
    }

    pub fn with_gate(mut self, gate: ConfidenceGate) -> Self {
        self.gate = gate;
        self
    }

    /// Override "today" (entries are stamped with it, summaries anchor on it)
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    /// Parse an utterance into habits and save them, or hand back a batch for confirmation.
    /// With `confirmed = true` the supplied batch is saved as-is without extraction or gating.
    pub async fn parse_habits(
        &self,
        principal: Option<&Principal>,
        request: ParseHabitsRequest,
    ) -> Result<ParseHabitsResponse, ApiError> {
        let principal = principal.ok_or(ApiError::Unauthorized)?;

        let voice_input = request.voice_input.trim();
        if voice_input.is_empty() {
            return Err(ApiError::BadRequest(messages::VOICE_INPUT_REQUIRED.into()));
        }

        if request.confirmed {
            let habits = request.habits.unwrap_or_default();
            if habits.is_empty() {
                return Err(ApiError::BadRequest(messages::NO_HABITS_TO_CONFIRM.into()));
            }
            if !habits.iter().all(HabitCandidate::has_name) {
                return Err(ApiError::BadRequest(messages::HABIT_NAME_REQUIRED.into()));
            }
            info!("Saving {} confirmed habits", habits.len());
            return self.save(principal, &habits, voice_input);
        }

        let habits = match self.extractor.extract(voice_input).await {
            Ok(habits) => habits,
            Err(e) => {
                error!("Habit extraction failed: {:#}", e);
                return Err(ApiError::Internal(messages::PROCESS_FAILED.into()));
            }
        };

        if habits.is_empty() {
            info!("No habits found in utterance");
            return Err(ApiError::Unprocessable);
        }

        if self.gate.needs_confirmation(&habits) {
            info!("Holding {} habits for confirmation", habits.len());
            return Ok(ParseHabitsResponse::RequiresConfirmation { habits });
        }

        self.save(principal, &habits, voice_input)
    }

    fn save(
        &self,
        principal: &Principal,
        habits: &[HabitCandidate],
        voice_input: &str,
    ) -> Result<ParseHabitsResponse, ApiError> {
        match self
            .store
            .save_candidates(&principal.user_key(), habits, voice_input, self.today())
        {
            Ok(entries) => Ok(ParseHabitsResponse::Saved {
                logs: entries.iter().map(|e| e.to_saved()).collect(),
            }),
            Err(e) => {
                error!("Failed to save habit logs: {:#}", e);
                Err(ApiError::Internal(messages::SAVE_FAILED.into()))
            }
        }
    }

    /// Fill in quantity/unit on one of the caller's incomplete entries
    pub fn update_habit_log(
        &self,
        principal: Option<&Principal>,
        request: UpdateHabitLogRequest,
    ) -> Result<(), ApiError> {
        let principal = principal.ok_or(ApiError::Unauthorized)?;

        let id = request.id.trim();
        if id.is_empty() {
            return Err(ApiError::BadRequest(messages::ID_REQUIRED.into()));
        }
        let quantity = request
            .quantity
            .filter(|q| q.is_finite())
            .ok_or_else(|| ApiError::BadRequest(messages::QUANTITY_REQUIRED.into()))?;

        match self
            .store
            .complete_entry(id, &principal.user_key(), quantity, request.unit.as_deref())
        {
            Ok(CompletionOutcome::Updated) => {
                info!("Completed habit log {}", id);
                Ok(())
            }
            Ok(CompletionOutcome::NotFound) => {
                warn!("Habit log {} not found for caller", id);
                Err(ApiError::NotFound(messages::LOG_NOT_FOUND.into()))
            }
            Err(e) => {
                error!("Failed to update habit log {}: {:#}", id, e);
                Err(ApiError::Internal(messages::UPDATE_FAILED.into()))
            }
        }
    }

    /// Dashboard summary for the caller
    pub fn habit_summary(&self, principal: Option<&Principal>) -> Result<HabitSummary, ApiError> {
        let principal = principal.ok_or(ApiError::Unauthorized)?;

        get_habit_summary_at(self.store.as_ref(), &principal.user_key(), self.today()).map_err(|e| {
            error!("Failed to load habit summary: {:#}", e);
            ApiError::Internal(messages::SUMMARY_FAILED.into())
        })
    }
}

/// In-process client: the service as seen by one (possibly anonymous) caller
#[derive(Clone)]
pub struct HabitClient {
    service: Arc<HabitService>,
    principal: Option<Principal>,
}

impl HabitClient {
    pub fn new(service: Arc<HabitService>, principal: Option<Principal>) -> Self {
        Self { service, principal }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn habit_summary(&self) -> Result<HabitSummary, ApiError> {
        self.service.habit_summary(self.principal.as_ref())
    }
}

#[async_trait]
impl HabitApi for HabitClient {
    async fn parse_habits(
        &self,
        request: ParseHabitsRequest,
    ) -> Result<ParseHabitsResponse, ApiError> {
        self.service.parse_habits(self.principal.as_ref(), request).await
    }

    async fn update_habit_log(&self, request: UpdateHabitLogRequest) -> Result<(), ApiError> {
        self.service.update_habit_log(self.principal.as_ref(), request)
    }
}
