//! Lifecycle event listeners.
//!
//! Listeners receive lifecycle notifications scheduled through the event
//! loop, never inline from the hook that produced them. A process drops all
//! listener references once it terminates.

use serde_json::Value;
use std::rc::Rc;

use crate::process::{Process, ProcessRef};
use crate::types::ListenerId;

/// The capability set of lifecycle callbacks a listener may implement.
///
/// All methods default to no-ops; implement only the events of interest.
pub trait ProcessListener {
    fn on_process_start(&self, process: &Process) {
        let _ = process;
    }
    fn on_process_run(&self, process: &Process) {
        let _ = process;
    }
    fn on_process_wait(&self, process: &Process) {
        let _ = process;
    }
    fn on_process_resume(&self, process: &Process) {
        let _ = process;
    }
    fn on_process_abort(&self, process: &Process) {
        let _ = process;
    }
    fn on_process_finish(&self, process: &Process) {
        let _ = process;
    }
    fn on_process_stop(&self, process: &Process) {
        let _ = process;
    }
    fn on_process_fail(&self, process: &Process) {
        let _ = process;
    }
    fn on_process_terminate(&self, process: &Process) {
        let _ = process;
    }
    fn on_output_emitted(&self, process: &Process, port: &str, value: &Value, dynamic: bool) {
        let _ = (process, port, value, dynamic);
    }
}

/// Listener registry owned by a process.
///
/// Listeners are added and removed by id. Broadcasts snapshot the current
/// set, so removal never races a scheduled notification.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<(ListenerId, Rc<dyn ProcessListener>)>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Rc<dyn ProcessListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.push((id.clone(), listener));
        id
    }

    pub fn remove(&mut self, id: &ListenerId) {
        self.listeners.retain(|(lid, _)| lid != id);
    }

    /// Drop every listener reference. Called on termination.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Snapshot the current listener set for a scheduled broadcast.
    pub fn snapshot(&self) -> Vec<Rc<dyn ProcessListener>> {
        self.listeners.iter().map(|(_, l)| l.clone()).collect()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Scoped listener registration: removes the listener when dropped.
#[derive(Debug)]
pub struct ListenScope {
    process: ProcessRef,
    id: ListenerId,
}

impl ListenScope {
    pub fn new(process: &ProcessRef, listener: Rc<dyn ProcessListener>) -> Self {
        let id = process.borrow_mut().add_listener(listener);
        Self {
            process: process.clone(),
            id,
        }
    }
}

impl Drop for ListenScope {
    fn drop(&mut self) {
        self.process.borrow_mut().remove_listener(&self.id);
    }
}
