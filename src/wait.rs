//! Awaited conditions ("wait-ons").
//!
//! A waiting process holds an opaque condition handle. The core never polls:
//! the external subsystem that owns the condition resolves it, which runs
//! any attached readiness callbacks. Callbacks must only enqueue work on the
//! event loop, never touch process state directly.

use serde_json::json;
use std::any::Any;
use std::fmt;

use crate::bundle::WaitOnRecord;
use crate::types::{Error, Result};

/// Callback attached to a condition, invoked once when it becomes ready.
pub type ReadyCallback = Box<dyn FnOnce()>;

/// An opaque awaitable condition.
///
/// Conditions are persistable: `save` captures enough to reconstruct the
/// condition through a restorer registered for its `kind`.
pub trait WaitOn: fmt::Debug {
    /// Stable identity of the condition, reported on `on_wait` and in
    /// wait messages.
    fn id(&self) -> &str;

    /// Whether the condition has been resolved.
    fn is_ready(&self) -> bool;

    /// Attach a callback fired when the condition resolves. If the
    /// condition is already ready the callback is invoked immediately.
    fn when_ready(&mut self, callback: ReadyCallback);

    /// Serialize the condition for checkpointing.
    fn save(&self) -> WaitOnRecord;

    /// Downcast support for the external subsystem that resolves the
    /// condition.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Kind tag of [`SignalWaitOn`] records.
pub const SIGNAL_KIND: &str = "signal";

/// An externally-resolved one-shot condition.
///
/// Whoever holds access to it calls [`SignalWaitOn::set`] exactly once;
/// attached callbacks fire at that point. A timeout is just a signal that
/// some external timer sets on expiry.
pub struct SignalWaitOn {
    id: String,
    ready: bool,
    callbacks: Vec<ReadyCallback>,
}

impl SignalWaitOn {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ready: false,
            callbacks: Vec::new(),
        }
    }

    /// Reconstruct from a checkpoint record.
    pub fn restore(record: &WaitOnRecord) -> Result<Self> {
        if record.kind != SIGNAL_KIND {
            return Err(Error::internal(format!(
                "cannot restore wait-on of kind '{}' as signal",
                record.kind
            )));
        }
        let ready = record
            .data
            .get("ready")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(Self {
            id: record.id.clone(),
            ready,
            callbacks: Vec::new(),
        })
    }

    /// Resolve the condition, firing all attached callbacks.
    pub fn set(&mut self) {
        if self.ready {
            return;
        }
        self.ready = true;
        for callback in self.callbacks.drain(..) {
            callback();
        }
    }
}

impl fmt::Debug for SignalWaitOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalWaitOn")
            .field("id", &self.id)
            .field("ready", &self.ready)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl WaitOn for SignalWaitOn {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn when_ready(&mut self, callback: ReadyCallback) {
        if self.ready {
            callback();
        } else {
            self.callbacks.push(callback);
        }
    }

    fn save(&self) -> WaitOnRecord {
        WaitOnRecord {
            kind: SIGNAL_KIND.to_string(),
            id: self.id.clone(),
            data: json!({ "ready": self.ready }),
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn set_fires_attached_callbacks() {
        let fired = Rc::new(Cell::new(0));
        let mut signal = SignalWaitOn::new("w-1");
        assert!(!signal.is_ready());

        let f = fired.clone();
        signal.when_ready(Box::new(move || f.set(f.get() + 1)));
        assert_eq!(fired.get(), 0);

        signal.set();
        assert!(signal.is_ready());
        assert_eq!(fired.get(), 1);

        // A second set is a no-op.
        signal.set();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn ready_signal_fires_callback_immediately() {
        let fired = Rc::new(Cell::new(false));
        let mut signal = SignalWaitOn::new("w-1");
        signal.set();

        let f = fired.clone();
        signal.when_ready(Box::new(move || f.set(true)));
        assert!(fired.get());
    }

    #[test]
    fn save_restore_preserves_identity_and_readiness() {
        let mut signal = SignalWaitOn::new("w-42");
        signal.set();

        let record = signal.save();
        assert_eq!(record.kind, SIGNAL_KIND);

        let restored = SignalWaitOn::restore(&record).unwrap();
        assert_eq!(restored.id(), "w-42");
        assert!(restored.is_ready());
    }

    #[test]
    fn restore_rejects_foreign_kind() {
        let record = WaitOnRecord {
            kind: "timer".to_string(),
            id: "t-1".to_string(),
            data: serde_json::Value::Null,
        };
        assert!(SignalWaitOn::restore(&record).is_err());
    }
}
