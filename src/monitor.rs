//! Registry of live processes on an event loop.
//!
//! The monitor tracks every non-terminated process by pid, answers
//! membership queries and supports bulk abort for shutdown. Processes
//! deregister themselves when they terminate; entries are held weakly so
//! the monitor never extends a process's lifetime.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Weak;

use crate::process::{Process, ProcessRef};
use crate::sched::Completion;
use crate::types::{ProcessId, Result};

#[derive(Default)]
pub struct ProcessMonitor {
    entries: RefCell<HashMap<ProcessId, Weak<RefCell<Process>>>>,
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, pid: ProcessId, process: Weak<RefCell<Process>>) {
        self.entries.borrow_mut().insert(pid, process);
    }

    pub(crate) fn deregister(&self, pid: &ProcessId) {
        self.entries.borrow_mut().remove(pid);
    }

    /// Number of live (non-terminated) processes.
    pub fn count(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_monitoring(&self, pid: &ProcessId) -> bool {
        self.entries.borrow().contains_key(pid)
    }

    pub fn pids(&self) -> Vec<ProcessId> {
        self.entries.borrow().keys().cloned().collect()
    }

    pub fn get(&self, pid: &ProcessId) -> Option<ProcessRef> {
        self.entries.borrow().get(pid).and_then(Weak::upgrade)
    }

    /// Request an abort of every live process, for orderly shutdown.
    /// Returns one completion handle per abort scheduled.
    pub fn abort_all(&self, msg: Option<&str>) -> Result<Vec<Completion>> {
        let live: Vec<ProcessRef> = self
            .entries
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect();

        let mut completions = Vec::with_capacity(live.len());
        for process in live {
            let mut process = process.borrow_mut();
            if process.has_terminated() {
                continue;
            }
            completions.push(process.abort(msg.map(str::to_string))?);
        }
        Ok(completions)
    }
}

impl fmt::Debug for ProcessMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessMonitor")
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Registration bookkeeping only; lifecycle-driven deregistration is
    // covered by the loop integration tests.

    #[test]
    fn register_and_deregister() {
        let monitor = ProcessMonitor::new();
        let pid = ProcessId::new();

        monitor.register(pid.clone(), Weak::new());
        assert_eq!(monitor.count(), 1);
        assert!(monitor.is_monitoring(&pid));
        assert_eq!(monitor.pids(), vec![pid.clone()]);
        // The backing process is gone; the entry yields no handle.
        assert!(monitor.get(&pid).is_none());

        monitor.deregister(&pid);
        assert_eq!(monitor.count(), 0);
        assert!(!monitor.is_monitoring(&pid));
    }

    #[test]
    fn empty_monitor() {
        let monitor = ProcessMonitor::new();
        assert_eq!(monitor.count(), 0);
        assert!(monitor.pids().is_empty());
        assert!(!monitor.is_monitoring(&ProcessId::new()));
        assert!(monitor.abort_all(None).unwrap().is_empty());
    }
}
