//! Process lifecycle states.
//!
//! State transitions:
//! ```text
//!                      _(reenter)_
//!                      |         |
//! CREATED---play--->RUNNING---finish--->STOPPED
//!                    |    ^                ^
//!                 wait    resume     abort | (from any non-terminal)
//!                    v    |                |
//!                    WAITING---------------+
//!
//! any non-terminal---unhandled failure--->FAILED
//! ```
//!
//! STOPPED and FAILED are terminal. The active state is a tagged variant
//! holding only state-specific payload; it is replaced, never mutated in
//! place, on every transition.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bundle::StateRecord;
use crate::factory::ProcessFactory;
use crate::types::Result;
use crate::wait::WaitOn;

/// Label of a lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StateLabel {
    Created,
    Running,
    Waiting,
    Stopped,
    Failed,
}

impl StateLabel {
    /// Check if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, StateLabel::Stopped | StateLabel::Failed)
    }

    /// Check if transition is valid.
    ///
    /// Abort can force STOPPED from any non-terminal state, and failure
    /// capture can force FAILED from any non-terminal state.
    pub fn can_transition_to(self, to: StateLabel) -> bool {
        match (self, to) {
            (StateLabel::Created, StateLabel::Running) => true,
            (StateLabel::Running, StateLabel::Waiting) => true,
            (StateLabel::Running, StateLabel::Stopped) => true,
            (StateLabel::Waiting, StateLabel::Running) => true,
            // Abort before the first run
            (StateLabel::Created, StateLabel::Stopped) => true,
            (StateLabel::Waiting, StateLabel::Stopped) => true,
            (from, StateLabel::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for StateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StateLabel::Created => "created",
            StateLabel::Running => "running",
            StateLabel::Waiting => "waiting",
            StateLabel::Stopped => "stopped",
            StateLabel::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// How a RUNNING state entered execution: the first run, or a resumption
/// carrying the continuation step recorded by the wait descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "step", rename_all = "lowercase")]
pub enum RunEntry {
    Start,
    Resume(Option<String>),
}

/// The active behavior variant of a process.
#[derive(Debug)]
pub enum State {
    Created,
    Running {
        entry: RunEntry,
    },
    Waiting {
        on: Box<dyn WaitOn>,
        resume_step: Option<String>,
    },
    Stopped {
        aborted: bool,
        abort_msg: Option<String>,
    },
    Failed {
        message: String,
    },
}

impl State {
    pub fn label(&self) -> StateLabel {
        match self {
            State::Created => StateLabel::Created,
            State::Running { .. } => StateLabel::Running,
            State::Waiting { .. } => StateLabel::Waiting,
            State::Stopped { .. } => StateLabel::Stopped,
            State::Failed { .. } => StateLabel::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.label().is_terminal()
    }

    /// Serialize the state-specific payload.
    pub fn save(&self) -> StateRecord {
        match self {
            State::Created => StateRecord::Created,
            State::Running { entry } => StateRecord::Running {
                entry: entry.clone(),
            },
            State::Waiting { on, resume_step } => StateRecord::Waiting {
                wait_on: on.save(),
                resume_step: resume_step.clone(),
            },
            State::Stopped { aborted, abort_msg } => StateRecord::Stopped {
                aborted: *aborted,
                abort_msg: abort_msg.clone(),
            },
            State::Failed { message } => StateRecord::Failed {
                message: message.clone(),
            },
        }
    }

    /// Reconstruct the matching state variant from a checkpoint record,
    /// dispatching wait-on reconstruction by kind through the factory.
    pub fn restore(record: StateRecord, factory: &ProcessFactory) -> Result<Self> {
        Ok(match record {
            StateRecord::Created => State::Created,
            StateRecord::Running { entry } => State::Running { entry },
            StateRecord::Waiting {
                wait_on,
                resume_step,
            } => State::Waiting {
                on: factory.restore_wait_on(&wait_on)?,
                resume_step,
            },
            StateRecord::Stopped { aborted, abort_msg } => State::Stopped { aborted, abort_msg },
            StateRecord::Failed { message } => State::Failed { message },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::SignalWaitOn;

    #[test]
    fn terminal_classification() {
        assert!(!StateLabel::Created.is_terminal());
        assert!(!StateLabel::Running.is_terminal());
        assert!(!StateLabel::Waiting.is_terminal());
        assert!(StateLabel::Stopped.is_terminal());
        assert!(StateLabel::Failed.is_terminal());
    }

    #[test]
    fn transition_table() {
        assert!(StateLabel::Created.can_transition_to(StateLabel::Running));
        assert!(StateLabel::Running.can_transition_to(StateLabel::Waiting));
        assert!(StateLabel::Running.can_transition_to(StateLabel::Stopped));
        assert!(StateLabel::Waiting.can_transition_to(StateLabel::Running));
        assert!(StateLabel::Waiting.can_transition_to(StateLabel::Stopped));
        assert!(StateLabel::Created.can_transition_to(StateLabel::Stopped));
        assert!(StateLabel::Running.can_transition_to(StateLabel::Failed));

        assert!(!StateLabel::Created.can_transition_to(StateLabel::Waiting));
        assert!(!StateLabel::Stopped.can_transition_to(StateLabel::Running));
        assert!(!StateLabel::Stopped.can_transition_to(StateLabel::Failed));
        assert!(!StateLabel::Failed.can_transition_to(StateLabel::Stopped));
    }

    #[test]
    fn save_restore_waiting_state() {
        let factory = ProcessFactory::new();
        let state = State::Waiting {
            on: Box::new(SignalWaitOn::new("w-1")),
            resume_step: Some("after_wait".to_string()),
        };

        let record = state.save();
        let restored = State::restore(record, &factory).unwrap();
        match restored {
            State::Waiting { on, resume_step } => {
                assert_eq!(on.id(), "w-1");
                assert!(!on.is_ready());
                assert_eq!(resume_step.as_deref(), Some("after_wait"));
            }
            other => panic!("expected waiting, got {:?}", other.label()),
        }
    }

    #[test]
    fn save_restore_stopped_state() {
        let factory = ProcessFactory::new();
        let state = State::Stopped {
            aborted: true,
            abort_msg: Some("user requested".to_string()),
        };
        let restored = State::restore(state.save(), &factory).unwrap();
        match restored {
            State::Stopped { aborted, abort_msg } => {
                assert!(aborted);
                assert_eq!(abort_msg.as_deref(), Some("user requested"));
            }
            other => panic!("expected stopped, got {:?}", other.label()),
        }
    }
}
