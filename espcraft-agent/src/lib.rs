//! # espcraft agent
//!
//! Drives an ESP32 compatibility conversation one model reply at a time:
//! 1. The user names components and a bus (`####`-delimited)
//! 2. The model acknowledges, then asks whether to review by hand
//! 3. The model validates every component against the bus
//! 4. "modify" or "different protocol" loops back to step 1, anything else ends it
//!
//! The [`Sequencer`] owns the step logic and never mutates its input. The
//! [`Agent`] adds sessions on top through a [`SessionStore`].

mod agent;
mod caller;
mod sequencer;
mod store;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentConfig};
pub use caller::{ModelCaller, ProviderCaller};
pub use sequencer::{Advance, Sequencer, StepOutput};
pub use store::{SessionSlot, SessionStore};
