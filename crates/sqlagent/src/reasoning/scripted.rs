use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{CompletionRequest, ReasoningService};
use crate::error::ServiceError;
use crate::models::Stage;

type Reply = Result<String, ServiceError>;

/// Reasoning backend that replays canned replies per stage and records every request.
///
/// Queued replies are consumed first; once a stage's queue is empty the stage's standing
/// reply (if any) answers every further call.
#[derive(Debug, Default)]
pub struct ScriptedService {
    queued: Mutex<BTreeMap<Stage, VecDeque<Reply>>>,
    standing: Mutex<BTreeMap<Stage, Reply>>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_reply(self, stage: Stage, reply: impl Into<String>) -> Self {
        self.push(stage, Ok(reply.into()));
        self
    }

    #[must_use]
    pub fn with_error(self, stage: Stage, error: ServiceError) -> Self {
        self.push(stage, Err(error));
        self
    }

    #[must_use]
    pub fn respond_always(self, stage: Stage, reply: impl Into<String>) -> Self {
        lock(&self.standing).insert(stage, Ok(reply.into()));
        self
    }

    #[must_use]
    pub fn fail_always(self, stage: Stage, error: ServiceError) -> Self {
        lock(&self.standing).insert(stage, Err(error));
        self
    }

    pub fn push(&self, stage: Stage, reply: Reply) {
        lock(&self.queued).entry(stage).or_default().push_back(reply);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<CompletionRequest> {
        lock(&self.calls).clone()
    }

    #[must_use]
    pub fn calls_for(&self, stage: Stage) -> Vec<CompletionRequest> {
        lock(&self.calls)
            .iter()
            .filter(|request| request.stage == stage)
            .cloned()
            .collect()
    }
}

impl ReasoningService for ScriptedService {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        lock(&self.calls).push(request.clone());

        if let Some(reply) = lock(&self.queued)
            .get_mut(&request.stage)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }

        lock(&self.standing)
            .get(&request.stage)
            .cloned()
            .unwrap_or_else(|| {
                Err(ServiceError::MalformedResponse(format!(
                    "no scripted reply for stage {}",
                    request.stage
                )))
            })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::ScriptedService;
    use crate::error::ServiceError;
    use crate::models::Stage;
    use crate::reasoning::{CompletionRequest, ReasoningService};

    fn request(stage: Stage) -> CompletionRequest {
        CompletionRequest {
            stage,
            instruction: "i".to_string(),
            input: "q".to_string(),
            temperature: 0.2,
        }
    }

    #[test]
    fn queued_replies_come_before_the_standing_reply() {
        let service = ScriptedService::new()
            .with_reply(Stage::Refiner, "first")
            .respond_always(Stage::Refiner, "always");

        let replies = (0..3)
            .map(|_| service.complete(&request(Stage::Refiner)))
            .collect::<Vec<_>>();
        assert_eq!(
            replies,
            vec![
                Ok("first".to_string()),
                Ok("always".to_string()),
                Ok("always".to_string())
            ]
        );
        assert_eq!(service.calls_for(Stage::Refiner).len(), 3);
        assert!(service.calls_for(Stage::Selector).is_empty());
    }

    #[test]
    fn unscripted_stage_reports_a_malformed_response() {
        let service = ScriptedService::new().with_error(Stage::Selector, ServiceError::Timeout(10));
        assert_eq!(
            service.complete(&request(Stage::Selector)),
            Err(ServiceError::Timeout(10))
        );
        assert!(matches!(
            service.complete(&request(Stage::Selector)),
            Err(ServiceError::MalformedResponse(_))
        ));
    }
}
