use serde::{Deserialize, Serialize};

use crate::runtime::storage::{Transaction, WriteIntent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerTrigger {
    #[default]
    OnEnabled,
    OnExecuting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerState {
    #[default]
    Dormant,
    Active,
    Closed,
}

/// A task timer, exposed as a variable. Scheduling the expiry belongs to an
/// external timer service; the task only moves the state.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerVariable {
    pub trigger: TimerTrigger,
    /// Opaque duration or expiry expression, e.g. `PT5M`.
    pub duration: String,
    state: TimerState,
}

impl TimerVariable {
    pub fn new(trigger: TimerTrigger, duration: impl Into<String>) -> Self {
        Self {
            trigger,
            duration: duration.into(),
            state: TimerState::Dormant,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn activate(&mut self) {
        self.state = TimerState::Active;
    }

    pub fn close(&mut self, tx: &mut Transaction, task: &str) {
        if self.state != TimerState::Closed {
            self.state = TimerState::Closed;
            tx.record(WriteIntent::TimerClosed { task: task.to_string() });
        }
    }

    pub fn reset(&mut self) {
        self.state = TimerState::Dormant;
    }
}
