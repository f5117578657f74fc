//! Scripted model caller for tests
//!
//! Replies are queued up front and handed out in order, so a whole
//! conversation can be driven without a network.

use crate::caller::ModelCaller;
use espcraft_core::{Error, Result, Turn};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One call as the caller saw it
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub turns: Vec<Turn>,
    pub instruction: String,
}

pub struct ScriptedCaller {
    replies: Mutex<VecDeque<Result<String>>>,
    delay: Option<Duration>,
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedCaller {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a failure behind whatever is already scripted
    pub fn then_fail(self, error: Error) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(reply.into()));
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

impl ModelCaller for ScriptedCaller {
    async fn call(&self, turns: &[Turn], instruction: &str) -> Result<Turn> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.calls.lock().unwrap().push(RecordedCall {
            turns: turns.to_vec(),
            instruction: instruction.to_string(),
        });

        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(Turn::assistant(text)),
            Some(Err(e)) => Err(e),
            None => Err(Error::provider_failed("no scripted reply left")),
        }
    }
}
