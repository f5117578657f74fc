//! Step sequencer - one model call per advance
//!
//! `advance` takes a state, asks the model for exactly one reply using the
//! instruction for the current step, and returns a new state. The input is
//! never touched, so any error simply leaves the caller holding the state it
//! already had.

use crate::caller::ModelCaller;
use espcraft_core::prompts;
use espcraft_core::{
    interpret_yes_no, transition, ComponentRequest, ConversationState, Error, Result,
    ReturnRequest, Step, ValidationReport,
};
use serde::Serialize;
use std::time::Duration;

/// What a step produced, decoded from the model reply
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
    /// Collection acknowledged. `None` when the reply carried no readable JSON.
    Collected { request: Option<ComponentRequest> },
    /// The user's answer to the manual review question
    ReviewDecision { manual_review: bool },
    /// Validation sent the conversation back to collection
    ReturnToCollection { request: ReturnRequest },
    /// Validation finished
    Validated { report: ValidationReport },
}

/// Result of one successful advance
#[derive(Debug, Clone)]
pub struct Advance {
    /// State after the model reply was appended
    pub state: ConversationState,
    /// Step the model was answering
    pub answered: Step,
    pub output: StepOutput,
}

impl Advance {
    /// Step the conversation is now in
    pub fn next_step(&self) -> Step {
        self.state.step()
    }

    /// The reply the model just gave
    pub fn reply(&self) -> &str {
        self.state.last_turn().map(|t| t.text()).unwrap_or_default()
    }
}

pub struct Sequencer<C> {
    caller: C,
    call_timeout: Duration,
}

impl<C: ModelCaller> Sequencer<C> {
    pub fn new(caller: C, call_timeout: Duration) -> Self {
        Self { caller, call_timeout }
    }

    pub fn caller(&self) -> &C {
        &self.caller
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Run the current step once.
    ///
    /// Fails with `ConversationFinished` from `Done`, with `Timeout` when the
    /// model does not answer within the call timeout, and with the caller's
    /// error otherwise. `state` is unchanged in every failure case.
    pub async fn advance(&self, state: &ConversationState) -> Result<Advance> {
        let step = state.step();
        let Some(instruction) = prompts::instruction_for(state) else {
            return Err(Error::conversation_finished()
                .with_operation("sequencer::advance")
                .with_context("turns", state.turns().len().to_string()));
        };

        tracing::info!(step = %step, turns = state.turns().len(), "advancing");

        let call = self.caller.call(state.turns(), &instruction);
        let reply = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(reply) => reply.map_err(|e| e.with_context("step", step.as_str()))?,
            Err(_) => {
                tracing::warn!(step = %step, timeout = ?self.call_timeout, "model call timed out");
                return Err(Error::timeout(self.call_timeout)
                    .with_operation("sequencer::advance")
                    .with_context("step", step.as_str()));
            }
        };

        let text = reply.text().to_string();
        let next = state.with_turn(reply);

        let (next, output) = match step {
            Step::Collect => {
                let request = match ComponentRequest::from_reply(&text) {
                    Ok(request) => {
                        if !request.is_complete() {
                            tracing::info!(
                                components = request.component_list.len(),
                                protocol = %request.protocol,
                                "component request incomplete"
                            );
                        }
                        Some(request)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "collection reply carried no request");
                        None
                    }
                };
                (next, StepOutput::Collected { request })
            }
            Step::AskReview => {
                let manual_review = interpret_yes_no(&text);
                (
                    next.with_manual_review(manual_review),
                    StepOutput::ReviewDecision { manual_review },
                )
            }
            Step::Validate => match ReturnRequest::parse(&text) {
                Some(request) => (
                    next.with_return_to_collection(true),
                    StepOutput::ReturnToCollection { request },
                ),
                None => {
                    let report = ValidationReport::from_reply(&text).unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "validation reply unreadable, treating as incompatible");
                        ValidationReport::incompatible(state.manual_review_requested())
                    });
                    (
                        next.with_return_to_collection(false),
                        StepOutput::Validated { report },
                    )
                }
            },
            // handled by instruction_for above
            Step::Done => return Err(Error::conversation_finished().with_operation("sequencer::advance")),
        };

        let next_step = transition(step, &text);
        tracing::info!(from = %step, to = %next_step, "step finished");

        Ok(Advance {
            state: next.with_step(next_step),
            answered: step,
            output,
        })
    }
}
