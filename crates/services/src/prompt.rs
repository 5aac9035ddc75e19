use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tracing::info;

/// Blocking user interaction for destructive or interactive operations.
pub trait UserPrompt: Send + Sync {
    /// Ask a yes/no question.
    fn confirm(&self, message: &str) -> bool;

    /// Tell the user something; no answer expected.
    fn alert(&self, message: &str);
}

/// Says yes to everything and logs alerts.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl UserPrompt for AutoConfirm {
    fn confirm(&self, message: &str) -> bool {
        info!(%message, "auto-confirmed");
        true
    }

    fn alert(&self, message: &str) {
        info!(%message, "alert");
    }
}

/// Replays queued answers and records every message shown.
///
/// When the queue runs dry, `confirm` answers with the fallback.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<bool>>,
    fallback: bool,
    shown: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    #[must_use]
    pub fn always(answer: bool) -> Self {
        Self {
            fallback: answer,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn answers(answers: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            fallback,
            shown: Mutex::new(Vec::new()),
        }
    }

    /// Every confirmation question and alert shown so far, in order.
    #[must_use]
    pub fn shown(&self) -> Vec<String> {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, message: &str) {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_owned());
    }
}

impl UserPrompt for ScriptedPrompt {
    fn confirm(&self, message: &str) -> bool {
        self.record(message);
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback)
    }

    fn alert(&self, message: &str) {
        self.record(message);
    }
}
