//! Cooperative single-threaded event loop.
//!
//! The loop owns every process inserted into it and is the only execution
//! context in which process state may change. All lifecycle work runs as
//! queued tasks; readiness callbacks and listener notifications only ever
//! enqueue more tasks. Cross-thread interaction goes through [`LoopRemote`],
//! a cloneable handle that posts control messages onto a channel the loop
//! drains between tasks.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

use crate::bundle::ProcessRecord;
use crate::factory::ProcessFactory;
use crate::monitor::ProcessMonitor;
use crate::process::{Outcome, Process, ProcessLogic, ProcessRef};
use crate::spec::PortMap;
use crate::state::{RunEntry, State, StateLabel};
use crate::types::{Error, ProcessId, Result, SchedulerConfig};

pub(crate) type Task = Box<dyn FnOnce() -> Result<()>>;

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ACTIVE_LOOP: Cell<Option<u64>> = const { Cell::new(None) };
}

/// A broadcast lifecycle message.
///
/// Topics follow `process.<pid>.<event>`; the body always carries the pid
/// under `uuid` plus event-specific fields (`awaiting` on wait, `msg` on
/// abort).
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub body: Value,
    pub timestamp: DateTime<Utc>,
}

/// State shared between the loop and the closures it schedules.
pub(crate) struct LoopShared {
    id: u64,
    queue: RefCell<VecDeque<Task>>,
    // Reentrant record of which process each running task belongs to.
    stack: RefCell<Vec<ProcessId>>,
    subscribers: RefCell<Vec<(Option<String>, mpsc::UnboundedSender<Message>)>>,
    pub(crate) monitor: ProcessMonitor,
}

impl LoopShared {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed),
            queue: RefCell::new(VecDeque::new()),
            stack: RefCell::new(Vec::new()),
            subscribers: RefCell::new(Vec::new()),
            monitor: ProcessMonitor::new(),
        })
    }

    pub(crate) fn call_soon(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
    }

    /// Fan a message out to matching subscribers, dropping any whose
    /// receiver has gone away.
    pub(crate) fn send_message(&self, topic: String, body: Value) {
        let message = Message {
            topic,
            body,
            timestamp: Utc::now(),
        };
        self.subscribers.borrow_mut().retain(|(prefix, tx)| {
            let matches = prefix
                .as_ref()
                .map_or(true, |p| message.topic.starts_with(p.as_str()));
            if matches {
                tx.send(message.clone()).is_ok()
            } else {
                !tx.is_closed()
            }
        });
    }

    /// Mutating process operations must not run inside a foreign loop's
    /// execution context.
    pub(crate) fn check_context(&self) {
        if let Some(active) = ACTIVE_LOOP.with(Cell::get) {
            assert_eq!(
                active, self.id,
                "process operation invoked from a foreign loop context"
            );
        }
    }

    fn current_process(&self) -> Option<ProcessId> {
        self.stack.borrow().last().cloned()
    }
}

/// Pushes a pid onto the loop's process stack; popped on drop so failure
/// paths unwind the stack correctly.
struct StackGuard {
    shared: Rc<LoopShared>,
}

impl StackGuard {
    fn push(shared: &Rc<LoopShared>, pid: ProcessId) -> Self {
        shared.stack.borrow_mut().push(pid);
        Self {
            shared: shared.clone(),
        }
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        self.shared.stack.borrow_mut().pop();
    }
}

/// Marks the current thread as executing inside a loop for the duration
/// of one task.
struct ActiveGuard {
    prev: Option<u64>,
}

impl ActiveGuard {
    fn enter(id: u64) -> Self {
        let prev = ACTIVE_LOOP.with(|cell| cell.replace(Some(id)));
        Self { prev }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let prev = self.prev;
        ACTIVE_LOOP.with(|cell| cell.set(prev));
    }
}

/// Resolution of a requested abort: `true` if the process was aborted,
/// `false` if it had already terminated (or was never known).
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<bool>,
}

impl Completion {
    pub(crate) fn new(rx: oneshot::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Block until the request has been processed. Call from a thread that
    /// is not driving the loop, or after the loop has run the request.
    pub fn wait(self) -> Result<bool> {
        self.rx
            .blocking_recv()
            .map_err(|_| Error::internal("abort request was dropped before completion"))
    }

    pub async fn done(self) -> Result<bool> {
        self.rx
            .await
            .map_err(|_| Error::internal("abort request was dropped before completion"))
    }

    /// Non-blocking check; `None` while the request is still pending.
    pub fn try_done(&mut self) -> Option<bool> {
        self.rx.try_recv().ok()
    }
}

enum RemoteMsg {
    Abort {
        pid: ProcessId,
        msg: Option<String>,
        done: oneshot::Sender<bool>,
    },
}

/// Cloneable, `Send` handle for interacting with a loop from other threads.
#[derive(Debug, Clone)]
pub struct LoopRemote {
    tx: mpsc::UnboundedSender<RemoteMsg>,
}

impl LoopRemote {
    /// Request an abort of a process owned by the loop. Safe from any
    /// thread; the abort itself runs inside the loop.
    pub fn abort(&self, pid: &ProcessId, msg: Option<String>) -> Completion {
        let (done, rx) = oneshot::channel();
        // A send failure means the loop is gone; the completion then
        // resolves as an error.
        let _ = self.tx.send(RemoteMsg::Abort {
            pid: pid.clone(),
            msg,
            done,
        });
        Completion::new(rx)
    }
}

/// The event loop: owns processes, a task queue and the process registry.
pub struct EventLoop {
    shared: Rc<LoopShared>,
    factory: ProcessFactory,
    processes: HashMap<ProcessId, ProcessRef>,
    remote_tx: mpsc::UnboundedSender<RemoteMsg>,
    remote_rx: mpsc::UnboundedReceiver<RemoteMsg>,
    config: SchedulerConfig,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        Self {
            shared: LoopShared::new(),
            factory: ProcessFactory::new(),
            processes: HashMap::new(),
            remote_tx,
            remote_rx,
            config,
        }
    }

    /// Register a process type on the loop's factory.
    pub fn register<L>(&mut self, name: impl Into<String>) -> Result<()>
    where
        L: ProcessLogic + Default + 'static,
    {
        self.factory.register::<L>(name)
    }

    pub fn factory(&self) -> &ProcessFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut ProcessFactory {
        &mut self.factory
    }

    pub fn monitor(&self) -> &ProcessMonitor {
        &self.shared.monitor
    }

    /// Handle for cross-thread control requests.
    pub fn remote(&self) -> LoopRemote {
        LoopRemote {
            tx: self.remote_tx.clone(),
        }
    }

    /// Subscribe to broadcast messages, optionally filtered by topic
    /// prefix (e.g. `process.<pid>.`).
    pub fn subscribe(&self, prefix: Option<&str>) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .subscribers
            .borrow_mut()
            .push((prefix.map(str::to_string), tx));
        rx
    }

    /// Pid of the process whose task is currently executing, if any.
    pub fn current_process(&self) -> Option<ProcessId> {
        self.shared.current_process()
    }

    /// Create a process of a registered type and insert it.
    pub fn spawn(&mut self, name: &str, inputs: Option<PortMap>) -> Result<ProcessRef> {
        let process = self.factory.create(name, inputs, None)?;
        self.insert(process)
    }

    /// Reconstruct a process from a checkpoint record and insert it.
    /// The active state is rebuilt here, in loop context.
    pub fn restore(&mut self, record: ProcessRecord) -> Result<ProcessRef> {
        let process = Process::load_instance_state(record, &self.factory)?;
        self.insert(process)
    }

    /// Insert a detached process, establishing its initial or restored
    /// state and scheduling its first step.
    pub fn insert(&mut self, process: Process) -> Result<ProcessRef> {
        let pid = process.pid().clone();
        if self.processes.contains_key(&pid) {
            return Err(Error::validation(format!(
                "process {} is already inserted",
                pid
            )));
        }

        let process = Rc::new(RefCell::new(process));
        {
            let mut p = process.borrow_mut();
            p.attach(self.shared.clone(), Rc::downgrade(&process));
            if let Some(record) = p.take_staged_state() {
                let state = State::restore(record, &self.factory)?;
                p.set_restored_state(state);
            } else if p.state_label().is_none() {
                p.set_restored_state(State::Created);
            }
            if !p.has_terminated() {
                self.shared
                    .monitor
                    .register(pid.clone(), Rc::downgrade(&process));
                p.request_step();
            }
            tracing::info!(pid = %pid, state = ?p.state_label(), "process inserted");
        }
        self.processes.insert(pid, process.clone());
        Ok(process)
    }

    pub fn get(&self, pid: &ProcessId) -> Option<ProcessRef> {
        self.processes.get(pid).cloned()
    }

    /// Detach a process from the loop. It stops receiving steps; a
    /// non-terminated process can be checkpointed and inserted elsewhere.
    pub fn remove(&mut self, pid: &ProcessId) -> Option<ProcessRef> {
        let process = self.processes.remove(pid)?;
        self.shared.monitor.deregister(pid);
        Some(process)
    }

    /// Drain remote control traffic, then run up to `max_tasks_per_tick`
    /// queued tasks. Returns how many tasks ran. A task error stops the
    /// tick and propagates (hook contract violations surface here).
    pub fn tick(&mut self) -> Result<usize> {
        self.drain_remote();
        let mut executed = 0;
        while executed < self.config.max_tasks_per_tick {
            let task = self.shared.queue.borrow_mut().pop_front();
            let Some(task) = task else { break };

            let _active = ActiveGuard::enter(self.shared.id);
            let started = Instant::now();
            task()?;
            let elapsed = started.elapsed();
            if elapsed >= self.config.slow_task_warn {
                tracing::warn!(loop_id = self.shared.id, ?elapsed, "slow loop task");
            }
            executed += 1;
        }
        Ok(executed)
    }

    /// Run until the task queue is empty and no remote traffic is pending.
    pub fn run_until_idle(&mut self) -> Result<()> {
        loop {
            let executed = self.tick()?;
            if executed == 0 && self.shared.queue.borrow().is_empty() {
                return Ok(());
            }
        }
    }

    /// Run until the predicate holds, blocking on remote control traffic
    /// when the queue drains. Intended for driving a loop whose processes
    /// are resumed or aborted from other threads.
    pub fn run_until(&mut self, mut pred: impl FnMut() -> bool) -> Result<()> {
        loop {
            self.tick()?;
            if pred() {
                return Ok(());
            }
            if self.shared.queue.borrow().is_empty() {
                match self.remote_rx.blocking_recv() {
                    Some(msg) => self.enqueue_remote(msg),
                    None => return Err(Error::internal("remote channel closed")),
                }
            }
        }
    }

    fn drain_remote(&mut self) {
        while let Ok(msg) = self.remote_rx.try_recv() {
            self.enqueue_remote(msg);
        }
    }

    fn enqueue_remote(&mut self, msg: RemoteMsg) {
        match msg {
            RemoteMsg::Abort { pid, msg, done } => match self.processes.get(&pid) {
                Some(process) => {
                    let process = process.clone();
                    let shared = self.shared.clone();
                    self.shared.call_soon(Box::new(move || {
                        let aborted = do_abort(&process, &shared, msg)?;
                        let _ = done.send(aborted);
                        Ok(())
                    }));
                }
                None => {
                    let _ = done.send(false);
                }
            },
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.shared.id)
            .field("processes", &self.processes.len())
            .field("queued", &self.shared.queue.borrow().len())
            .finish()
    }
}

/// One state-machine step of a process, run as a loop task.
pub(crate) fn step_task(weak: Weak<RefCell<Process>>) -> Result<()> {
    let Some(process) = weak.upgrade() else {
        return Ok(());
    };
    let (shared, pid) = {
        let p = process.borrow();
        p.clear_step_flag();
        match p.shared.clone() {
            Some(shared) => (shared, p.pid().clone()),
            None => return Ok(()),
        }
    };

    let _guard = StackGuard::push(&shared, pid);
    let mut p = process.borrow_mut();
    if p.has_terminated() || !p.is_playing() {
        return Ok(());
    }

    match p.state_label() {
        None => Ok(()),
        Some(StateLabel::Created) => {
            let result = p.transition(State::Running {
                entry: RunEntry::Start,
            });
            capture(&mut p, result)?;
            p.request_step();
            Ok(())
        }
        Some(StateLabel::Running) => {
            let Some(entry) = p.run_entry() else {
                return Ok(());
            };
            match p.execute_run(entry) {
                Ok(Outcome::Finished) => {
                    let result = p.transition(State::Stopped {
                        aborted: false,
                        abort_msg: None,
                    });
                    capture(&mut p, result)
                }
                Ok(Outcome::Wait(descriptor)) => {
                    let result = p.transition(State::Waiting {
                        on: descriptor.on,
                        resume_step: descriptor.resume_step,
                    });
                    capture(&mut p, result)?;
                    if p.state_label() == Some(StateLabel::Waiting) {
                        let result = p.poll_waiting();
                        capture(&mut p, result)?;
                    }
                    Ok(())
                }
                Err(err) if err.is_hook_contract() => Err(err),
                Err(err) => p.fail_with(err.to_string()),
            }
        }
        Some(StateLabel::Waiting) => {
            let result = p.poll_waiting();
            capture(&mut p, result)
        }
        Some(StateLabel::Stopped) | Some(StateLabel::Failed) => Ok(()),
    }
}

/// Redirect an execution error into FAILED; hook contract violations stay
/// fatal and propagate out of the loop run.
fn capture(process: &mut Process, result: Result<()>) -> Result<()> {
    match result {
        Err(err) if !err.is_hook_contract() => process.fail_with(err.to_string()),
        other => other,
    }
}

/// Abort task body. Returns `false` without touching the process if it has
/// already terminated.
pub(crate) fn do_abort(
    process: &ProcessRef,
    shared: &Rc<LoopShared>,
    msg: Option<String>,
) -> Result<bool> {
    let pid = process.borrow().pid().clone();
    let _guard = StackGuard::push(shared, pid.clone());
    let mut p = process.borrow_mut();
    if p.has_terminated() {
        return Ok(false);
    }
    tracing::info!(pid = %pid, msg = msg.as_deref().unwrap_or(""), "aborting process");
    let result = p.transition(State::Stopped {
        aborted: true,
        abort_msg: msg,
    });
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_hook_contract() => Err(err),
        Err(err) => {
            p.fail_with(err.to_string())?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn tasks_run_in_fifo_order() {
        let mut event_loop = EventLoop::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            event_loop.shared.call_soon(Box::new(move || {
                order.borrow_mut().push(i);
                Ok(())
            }));
        }
        event_loop.run_until_idle().unwrap();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn tick_respects_task_budget() {
        let config = SchedulerConfig {
            max_tasks_per_tick: 2,
            ..SchedulerConfig::default()
        };
        let mut event_loop = EventLoop::with_config(config);
        for _ in 0..5 {
            event_loop.shared.call_soon(Box::new(|| Ok(())));
        }
        assert_eq!(event_loop.tick().unwrap(), 2);
        assert_eq!(event_loop.tick().unwrap(), 2);
        assert_eq!(event_loop.tick().unwrap(), 1);
        assert_eq!(event_loop.tick().unwrap(), 0);
    }

    #[test]
    fn task_error_stops_the_tick() {
        let mut event_loop = EventLoop::new();
        event_loop
            .shared
            .call_soon(Box::new(|| Err(Error::internal("boom"))));
        event_loop.shared.call_soon(Box::new(|| Ok(())));

        assert!(event_loop.tick().is_err());
        // The failing task was consumed; the rest of the queue survives.
        assert_eq!(event_loop.tick().unwrap(), 1);
    }

    #[test]
    fn subscribers_filter_by_topic_prefix() {
        let event_loop = EventLoop::new();
        let mut all = event_loop.subscribe(None);
        let mut scoped = event_loop.subscribe(Some("process.a."));

        event_loop
            .shared
            .send_message("process.a.start".to_string(), json!({}));
        event_loop
            .shared
            .send_message("process.b.start".to_string(), json!({}));

        assert_eq!(all.try_recv().unwrap().topic, "process.a.start");
        assert_eq!(all.try_recv().unwrap().topic, "process.b.start");
        assert_eq!(scoped.try_recv().unwrap().topic, "process.a.start");
        assert!(scoped.try_recv().is_err());
    }

    #[test]
    fn remote_abort_of_unknown_pid_resolves_false() {
        let mut event_loop = EventLoop::new();
        let remote = event_loop.remote();
        let completion = remote.abort(&ProcessId::new(), None);

        event_loop.run_until_idle().unwrap();
        assert!(!completion.wait().unwrap());
    }

    #[test]
    fn loop_ids_are_distinct() {
        let a = EventLoop::new();
        let b = EventLoop::new();
        assert_ne!(a.shared.id, b.shared.id);
    }
}
