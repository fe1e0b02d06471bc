//! The process aggregate: a resumable, persistable unit of work.
//!
//! A process composes identity, inputs/outputs, the active lifecycle state,
//! listener broadcasting and the checkpoint/restore contract. Business logic
//! is supplied through [`ProcessLogic`]; every lifecycle hook has a base
//! behavior that broadcasts the event, and a driver verifies the base was
//! invoked exactly once per hook call.
//!
//! All mutation happens on the owning event loop's execution context. The
//! one cross-context operation is `abort`, which only enqueues a request.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::bundle::{ProcessRecord, StateRecord, BUNDLE_VERSION};
use crate::factory::ProcessFactory;
use crate::listener::{ListenerRegistry, ProcessListener};
use crate::sched::{Completion, LoopShared};
use crate::spec::{PortMap, ProcessSpec};
use crate::state::{RunEntry, State, StateLabel};
use crate::types::{Error, ListenerId, ProcessId, Result};
use crate::wait::WaitOn;

/// Shared handle to a process owned by an event loop.
pub type ProcessRef = Rc<RefCell<Process>>;

/// What a running step produced: normal completion, or a request to
/// suspend until an awaited condition resolves.
#[derive(Debug)]
pub enum Outcome {
    Finished,
    Wait(WaitDescriptor),
}

impl Outcome {
    /// Request suspension on a condition, optionally naming the step to
    /// resume with once it resolves.
    pub fn wait(on: impl WaitOn + 'static, resume_step: Option<&str>) -> Self {
        Outcome::Wait(WaitDescriptor {
            on: Box::new(on),
            resume_step: resume_step.map(str::to_string),
        })
    }
}

/// An awaited condition plus the continuation to invoke on resumption.
#[derive(Debug)]
pub struct WaitDescriptor {
    pub on: Box<dyn WaitOn>,
    pub resume_step: Option<String>,
}

/// Business logic of a process type.
///
/// `run` performs the unit of work; hooks observe lifecycle transitions.
/// Every hook override must invoke its base behavior on the context exactly
/// once (the default bodies do). Omitting the base call is a fatal
/// programmer error detected by the hook driver.
pub trait ProcessLogic: 'static {
    /// Declare input and output ports. Called once at registration.
    fn define(spec: &mut ProcessSpec) -> Result<()>
    where
        Self: Sized,
    {
        let _ = spec;
        Ok(())
    }

    /// Execute the process's unit of work.
    fn run(&mut self, ctx: &mut ProcessContext<'_>) -> Result<Outcome>;

    /// Continue after an awaited condition resolved. `step` is the
    /// continuation name recorded in the wait descriptor, if any.
    fn resume(&mut self, step: Option<&str>, ctx: &mut ProcessContext<'_>) -> Result<Outcome> {
        let _ = step;
        self.run(ctx)
    }

    fn on_create(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.base_on_create()
    }

    fn on_start(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.base_on_start()
    }

    fn on_run(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.base_on_run()
    }

    fn on_wait(&mut self, ctx: &mut HookContext<'_>, awaiting: &str) -> Result<()> {
        ctx.base_on_wait(awaiting)
    }

    fn on_resume(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.base_on_resume()
    }

    fn on_finish(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.base_on_finish()
    }

    fn on_abort(&mut self, ctx: &mut HookContext<'_>, msg: Option<&str>) -> Result<()> {
        ctx.base_on_abort(msg)
    }

    fn on_stop(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.base_on_stop()
    }

    fn on_fail(&mut self, ctx: &mut HookContext<'_>, message: &str) -> Result<()> {
        let _ = message;
        ctx.base_on_fail()
    }

    fn on_terminate(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.base_on_terminate()
    }
}

/// Lifecycle events broadcast to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleEvent {
    Start,
    Run,
    Wait,
    Resume,
    Abort,
    Finish,
    Stop,
    Fail,
    Terminate,
}

impl LifecycleEvent {
    fn dispatch(self, listener: &dyn ProcessListener, process: &Process) {
        match self {
            LifecycleEvent::Start => listener.on_process_start(process),
            LifecycleEvent::Run => listener.on_process_run(process),
            LifecycleEvent::Wait => listener.on_process_wait(process),
            LifecycleEvent::Resume => listener.on_process_resume(process),
            LifecycleEvent::Abort => listener.on_process_abort(process),
            LifecycleEvent::Finish => listener.on_process_finish(process),
            LifecycleEvent::Stop => listener.on_process_stop(process),
            LifecycleEvent::Fail => listener.on_process_fail(process),
            LifecycleEvent::Terminate => listener.on_process_terminate(process),
        }
    }
}

/// Lifecycle hook invocations, carrying event-specific payload.
#[derive(Debug, Clone)]
pub(crate) enum Hook {
    Create,
    Start,
    Run,
    Wait(String),
    Resume,
    Finish,
    Abort(Option<String>),
    Stop,
    Fail(String),
    Terminate,
}

impl Hook {
    fn name(&self) -> &'static str {
        match self {
            Hook::Create => "on_create",
            Hook::Start => "on_start",
            Hook::Run => "on_run",
            Hook::Wait(_) => "on_wait",
            Hook::Resume => "on_resume",
            Hook::Finish => "on_finish",
            Hook::Abort(_) => "on_abort",
            Hook::Stop => "on_stop",
            Hook::Fail(_) => "on_fail",
            Hook::Terminate => "on_terminate",
        }
    }
}

/// A resumable, persistable unit of work with a formal lifecycle.
pub struct Process {
    pid: ProcessId,
    class_name: String,
    creation_time: DateTime<Utc>,
    spec: Arc<ProcessSpec>,
    // Taken out while logic code runs so contexts can borrow the process.
    logic: Option<Box<dyn ProcessLogic>>,
    raw_inputs: Option<PortMap>,
    parsed_inputs: PortMap,
    outputs: PortMap,
    finished: bool,
    terminated: bool,
    paused: bool,
    state: Option<State>,
    staged_state: Option<StateRecord>,
    listeners: ListenerRegistry,
    hook_called: bool,
    // Dedups step scheduling; shared with wait-on readiness callbacks.
    step_flag: Rc<Cell<bool>>,
    pub(crate) shared: Option<Rc<LoopShared>>,
    pub(crate) self_weak: Weak<RefCell<Process>>,
}

impl Process {
    /// Construct a fresh process, validating inputs against the spec.
    ///
    /// Fails before the process ever becomes active if the supplied inputs
    /// do not satisfy the declared input ports.
    pub fn new(
        class_name: impl Into<String>,
        spec: Arc<ProcessSpec>,
        logic: Box<dyn ProcessLogic>,
        inputs: Option<PortMap>,
        pid: Option<ProcessId>,
    ) -> Result<Self> {
        if !spec.is_sealed() {
            return Err(Error::internal(
                "process spec must be sealed before constructing a process",
            ));
        }
        spec.validate(inputs.as_ref())?;
        let parsed_inputs = spec.parse_inputs(inputs.as_ref());

        let mut process = Self {
            pid: pid.unwrap_or_default(),
            class_name: class_name.into(),
            creation_time: Utc::now(),
            spec,
            logic: Some(logic),
            raw_inputs: inputs,
            parsed_inputs,
            outputs: PortMap::new(),
            finished: false,
            terminated: false,
            paused: false,
            state: None,
            staged_state: None,
            listeners: ListenerRegistry::new(),
            hook_called: false,
            step_flag: Rc::new(Cell::new(false)),
            shared: None,
            self_weak: Weak::new(),
        };
        process.call_hook(Hook::Create)?;
        Ok(process)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn pid(&self) -> &ProcessId {
        &self.pid
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// The exact input mapping supplied by the caller, if any.
    pub fn raw_inputs(&self) -> Option<&PortMap> {
        self.raw_inputs.as_ref()
    }

    /// Raw inputs merged with spec-provided defaults.
    pub fn inputs(&self) -> &PortMap {
        &self.parsed_inputs
    }

    /// Outputs emitted so far. Grows during RUNNING, frozen once terminal.
    pub fn outputs(&self) -> &PortMap {
        &self.outputs
    }

    /// Label of the active state, if one has been established.
    pub fn state_label(&self) -> Option<StateLabel> {
        self.state.as_ref().map(|s| s.label())
    }

    /// Completed its work normally with all required outputs present.
    pub fn has_finished(&self) -> bool {
        self.finished
    }

    /// Reached STOPPED or FAILED.
    pub fn has_terminated(&self) -> bool {
        self.terminated
    }

    pub fn has_failed(&self) -> bool {
        matches!(self.state, Some(State::Failed { .. }))
    }

    pub fn has_aborted(&self) -> bool {
        matches!(self.state, Some(State::Stopped { aborted: true, .. }))
    }

    pub fn get_abort_msg(&self) -> Option<&str> {
        match &self.state {
            Some(State::Stopped {
                aborted: true,
                abort_msg,
            }) => abort_msg.as_deref(),
            _ => None,
        }
    }

    pub fn get_failure_msg(&self) -> Option<&str> {
        match &self.state {
            Some(State::Failed { message }) => Some(message),
            _ => None,
        }
    }

    /// Identity of the awaited condition, if suspended.
    pub fn get_waiting_on(&self) -> Option<&str> {
        match &self.state {
            Some(State::Waiting { on, .. }) => Some(on.id()),
            _ => None,
        }
    }

    /// Give the external subsystem that resolves the awaited condition
    /// access to it. Returns None unless the process is WAITING.
    pub fn with_waiting_on<R>(&mut self, f: impl FnOnce(&mut dyn WaitOn) -> R) -> Option<R> {
        match &mut self.state {
            Some(State::Waiting { on, .. }) => Some(f(on.as_mut())),
            _ => None,
        }
    }

    pub fn is_playing(&self) -> bool {
        !self.paused
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    pub fn add_listener(&mut self, listener: Rc<dyn ProcessListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&mut self, id: &ListenerId) {
        self.listeners.remove(id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    /// Resume scheduling. Idempotent: a playing or terminated process is
    /// untouched. Re-enters the current state, re-firing its entry hooks.
    pub fn play(&mut self) -> Result<()> {
        if !self.paused || self.terminated {
            return Ok(());
        }
        self.check_context();
        self.paused = false;
        tracing::info!(pid = %self.pid, "playing");

        if let Some(label) = self.state_label() {
            self.fire_reentry_hooks(label)?;
            if !label.is_terminal() {
                match label {
                    StateLabel::Waiting => self.poll_waiting()?,
                    _ => self.request_step(),
                }
            }
        }
        Ok(())
    }

    /// Withhold further scheduling. Idempotent, and a no-op once
    /// terminated. Never mutates state: a WAITING process stays WAITING
    /// and its resume is deferred to `play`.
    pub fn pause(&mut self) {
        if self.paused || self.terminated {
            return;
        }
        self.check_context();
        self.paused = true;
        tracing::info!(pid = %self.pid, "paused");
    }

    /// Request an abort. Returns a completion handle resolving to `true`
    /// if the process was aborted, `false` if it had already terminated.
    ///
    /// The abort itself runs as a scheduled task on the owning loop; this
    /// call only enqueues it.
    pub fn abort(&mut self, msg: Option<String>) -> Result<Completion> {
        let shared = self
            .shared
            .clone()
            .ok_or_else(|| Error::internal("process is not inserted into a loop"))?;
        tracing::info!(pid = %self.pid, "abort requested");

        let (tx, rx) = tokio::sync::oneshot::channel();
        let weak = self.self_weak.clone();
        shared.clone().call_soon(Box::new(move || {
            let aborted = match weak.upgrade() {
                Some(rc) => crate::sched::do_abort(&rc, &shared, msg)?,
                None => false,
            };
            let _ = tx.send(aborted);
            Ok(())
        }));
        Ok(Completion::new(rx))
    }

    // ------------------------------------------------------------------
    // Checkpoint / restore
    // ------------------------------------------------------------------

    /// Capture the process into a typed checkpoint record.
    pub fn save_instance_state(&self) -> ProcessRecord {
        let state = match &self.state {
            Some(state) => Some(state.save()),
            None => self.staged_state.clone(),
        };
        ProcessRecord {
            version: BUNDLE_VERSION,
            creation_time: self.creation_time,
            class_name: self.class_name.clone(),
            pid: self.pid.clone(),
            state,
            finished: self.finished,
            terminated: self.terminated,
            inputs: self.raw_inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }

    /// Reconstruct a process from a checkpoint record.
    ///
    /// Immutable fields are restored now; parsed inputs are re-derived from
    /// the raw inputs (defaults re-filled, never trusting a stale copy);
    /// the active state is staged and only reconstructed once the process
    /// is inserted into a loop.
    pub fn load_instance_state(record: ProcessRecord, factory: &ProcessFactory) -> Result<Self> {
        if record.version != BUNDLE_VERSION {
            return Err(Error::validation(format!(
                "unsupported checkpoint version {} (expected {})",
                record.version, BUNDLE_VERSION
            )));
        }
        let ty = factory.get(&record.class_name)?;
        let spec = ty.spec().clone();
        spec.validate(record.inputs.as_ref())?;
        let parsed_inputs = spec.parse_inputs(record.inputs.as_ref());

        Ok(Self {
            pid: record.pid,
            class_name: record.class_name,
            creation_time: record.creation_time,
            spec,
            logic: Some(ty.build_logic()),
            raw_inputs: record.inputs,
            parsed_inputs,
            outputs: record.outputs,
            finished: record.finished,
            terminated: record.terminated,
            paused: false,
            state: None,
            staged_state: record.state,
            listeners: ListenerRegistry::new(),
            hook_called: false,
            step_flag: Rc::new(Cell::new(false)),
            shared: None,
            self_weak: Weak::new(),
        })
    }

    // ------------------------------------------------------------------
    // Loop attachment (crate-internal)
    // ------------------------------------------------------------------

    pub(crate) fn attach(&mut self, shared: Rc<LoopShared>, weak: Weak<RefCell<Process>>) {
        self.shared = Some(shared);
        self.self_weak = weak;
    }

    pub(crate) fn take_staged_state(&mut self) -> Option<StateRecord> {
        self.staged_state.take()
    }

    /// Install a state without firing entry hooks (initial CREATED, or a
    /// state reconstructed from a checkpoint).
    pub(crate) fn set_restored_state(&mut self, state: State) {
        self.state = Some(state);
    }

    pub(crate) fn clear_step_flag(&self) {
        self.step_flag.set(false);
    }

    // ------------------------------------------------------------------
    // State machine (crate-internal, loop context only)
    // ------------------------------------------------------------------

    /// Replace the active state, firing the entry hook sequence for the
    /// target and the terminate sequence when the target is terminal.
    pub(crate) fn transition(&mut self, new_state: State) -> Result<()> {
        let previous = self.state_label();
        let label = new_state.label();
        if let Some(prev) = previous {
            if !prev.can_transition_to(label) {
                return Err(Error::state_transition(format!(
                    "pid {}: cannot transition from {} to {}",
                    self.pid, prev, label
                )));
            }
            tracing::debug!(pid = %self.pid, from = %prev, to = %label, "transition");
        }

        // The old state is replaced, never mutated in place.
        self.state = Some(new_state);
        self.fire_entry_hooks(label, previous)?;
        if label.is_terminal() {
            self.terminate()?;
        }
        Ok(())
    }

    /// Capture an execution failure into FAILED. Bypasses the transition
    /// table: any not-yet-terminated state may fail.
    pub(crate) fn fail_with(&mut self, message: String) -> Result<()> {
        if self.terminated {
            return Err(Error::state_transition(format!(
                "pid {}: cannot fail after termination",
                self.pid
            )));
        }
        tracing::warn!(pid = %self.pid, %message, "execution failed");
        self.state = Some(State::Failed { message });
        self.fire_entry_hooks(StateLabel::Failed, None)?;
        self.terminate()
    }

    fn fire_entry_hooks(&mut self, label: StateLabel, previous: Option<StateLabel>) -> Result<()> {
        match label {
            StateLabel::Created => Ok(()),
            StateLabel::Running => {
                match previous {
                    Some(StateLabel::Waiting) => self.call_hook(Hook::Resume)?,
                    Some(StateLabel::Created) => self.call_hook(Hook::Start)?,
                    _ => {}
                }
                self.call_hook(Hook::Run)
            }
            StateLabel::Waiting => {
                let awaiting = self.get_waiting_on().unwrap_or_default().to_string();
                self.call_hook(Hook::Wait(awaiting))
            }
            StateLabel::Stopped => {
                let (aborted, msg) = match &self.state {
                    Some(State::Stopped { aborted, abort_msg }) => (*aborted, abort_msg.clone()),
                    _ => (false, None),
                };
                if aborted {
                    self.call_hook(Hook::Abort(msg))?;
                } else {
                    self.call_hook(Hook::Finish)?;
                }
                self.call_hook(Hook::Stop)
            }
            StateLabel::Failed => {
                let message = self.get_failure_msg().unwrap_or_default().to_string();
                self.call_hook(Hook::Fail(message))
            }
        }
    }

    /// Entry hooks re-fired when `play` re-enters the current state.
    fn fire_reentry_hooks(&mut self, label: StateLabel) -> Result<()> {
        match label {
            StateLabel::Running => self.call_hook(Hook::Run),
            StateLabel::Waiting => {
                let awaiting = self.get_waiting_on().unwrap_or_default().to_string();
                self.call_hook(Hook::Wait(awaiting))
            }
            _ => Ok(()),
        }
    }

    fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.call_hook(Hook::Terminate)?;
        if let Some(shared) = &self.shared {
            shared.monitor.deregister(&self.pid);
        }
        // No further events can fire; drop listener references.
        self.listeners.clear();
        tracing::info!(pid = %self.pid, state = ?self.state_label(), "terminated");
        Ok(())
    }

    /// Schedule a state-machine step on the owning loop. Deduplicated via
    /// the shared step flag; a no-op while paused or after termination.
    pub(crate) fn request_step(&mut self) {
        if self.terminated || self.paused || self.step_flag.get() {
            return;
        }
        let Some(shared) = self.shared.clone() else {
            return;
        };
        self.step_flag.set(true);
        let weak = self.self_weak.clone();
        shared.call_soon(Box::new(move || crate::sched::step_task(weak)));
    }

    /// While WAITING: resume if the condition is ready, otherwise attach a
    /// readiness callback that schedules a step. Driven entirely by the
    /// external readiness notification; the core never polls on a timer.
    pub(crate) fn poll_waiting(&mut self) -> Result<()> {
        let ready = matches!(&self.state, Some(State::Waiting { on, .. }) if on.is_ready());
        if ready {
            let resume_step = match &self.state {
                Some(State::Waiting { resume_step, .. }) => resume_step.clone(),
                _ => None,
            };
            self.transition(State::Running {
                entry: RunEntry::Resume(resume_step),
            })?;
            self.request_step();
            return Ok(());
        }

        let (Some(shared), flag, weak) = (
            self.shared.clone(),
            self.step_flag.clone(),
            self.self_weak.clone(),
        ) else {
            return Ok(());
        };
        if let Some(State::Waiting { on, .. }) = &mut self.state {
            on.when_ready(Box::new(move || {
                // Runs while the condition owner may hold a process borrow:
                // only enqueue, never touch the process here.
                if !flag.get() {
                    flag.set(true);
                    shared.call_soon(Box::new(move || crate::sched::step_task(weak)));
                }
            }));
        }
        Ok(())
    }

    /// Execute the logic's run or resume step.
    pub(crate) fn execute_run(&mut self, entry: RunEntry) -> Result<Outcome> {
        let mut logic = self
            .logic
            .take()
            .ok_or_else(|| Error::internal("process logic missing"))?;
        let result = {
            let mut ctx = ProcessContext { process: self };
            match entry {
                RunEntry::Start => logic.run(&mut ctx),
                RunEntry::Resume(step) => logic.resume(step.as_deref(), &mut ctx),
            }
        };
        self.logic = Some(logic);
        result
    }

    pub(crate) fn run_entry(&self) -> Option<RunEntry> {
        match &self.state {
            Some(State::Running { entry }) => Some(entry.clone()),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Hook driver
    // ------------------------------------------------------------------

    /// Invoke a lifecycle hook and assert its base behavior ran exactly
    /// once. A violation is a defect in the process implementation and is
    /// fatal: the error propagates instead of being captured into FAILED.
    pub(crate) fn call_hook(&mut self, hook: Hook) -> Result<()> {
        self.hook_called = false;
        let mut logic = self
            .logic
            .take()
            .ok_or_else(|| Error::internal("process logic missing"))?;
        let result = {
            let mut ctx = HookContext { process: self };
            match &hook {
                Hook::Create => logic.on_create(&mut ctx),
                Hook::Start => logic.on_start(&mut ctx),
                Hook::Run => logic.on_run(&mut ctx),
                Hook::Wait(awaiting) => logic.on_wait(&mut ctx, awaiting),
                Hook::Resume => logic.on_resume(&mut ctx),
                Hook::Finish => logic.on_finish(&mut ctx),
                Hook::Abort(msg) => logic.on_abort(&mut ctx, msg.as_deref()),
                Hook::Stop => logic.on_stop(&mut ctx),
                Hook::Fail(message) => logic.on_fail(&mut ctx, message),
                Hook::Terminate => logic.on_terminate(&mut ctx),
            }
        };
        self.logic = Some(logic);
        result?;
        if !self.hook_called {
            return Err(Error::hook_contract(format!(
                "pid {}: {} did not invoke its base behavior",
                self.pid,
                hook.name()
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event broadcasting (scheduled, never inline)
    // ------------------------------------------------------------------

    fn fire_event(&mut self, event: LifecycleEvent) {
        let Some(shared) = &self.shared else {
            return;
        };
        if self.listeners.is_empty() {
            return;
        }
        let listeners = self.listeners.snapshot();
        let weak = self.self_weak.clone();
        shared.call_soon(Box::new(move || {
            if let Some(rc) = weak.upgrade() {
                let process = rc.borrow();
                for listener in &listeners {
                    event.dispatch(listener.as_ref(), &process);
                }
            }
            Ok(())
        }));
    }

    fn fire_output_event(&mut self, port: String, value: Value, dynamic: bool) {
        let Some(shared) = &self.shared else {
            return;
        };
        if self.listeners.is_empty() {
            return;
        }
        let listeners = self.listeners.snapshot();
        let weak = self.self_weak.clone();
        shared.call_soon(Box::new(move || {
            if let Some(rc) = weak.upgrade() {
                let process = rc.borrow();
                for listener in &listeners {
                    listener.on_output_emitted(&process, &port, &value, dynamic);
                }
            }
            Ok(())
        }));
    }

    fn send_message(&self, event: &str, extra: Option<Value>) {
        let Some(shared) = &self.shared else {
            return;
        };
        let mut body = json!({ "uuid": self.pid.as_str() });
        if let Some(Value::Object(fields)) = extra {
            for (k, v) in fields {
                body[k] = v;
            }
        }
        shared.send_message(format!("process.{}.{}", self.pid, event), body);
    }

    fn check_context(&self) {
        if let Some(shared) = &self.shared {
            shared.check_context();
        }
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("class_name", &self.class_name)
            .field("state", &self.state_label())
            .field("finished", &self.finished)
            .field("terminated", &self.terminated)
            .field("paused", &self.paused)
            .finish()
    }
}

/// Borrowed view of the process handed to `run`/`resume`.
#[derive(Debug)]
pub struct ProcessContext<'a> {
    process: &'a mut Process,
}

impl ProcessContext<'_> {
    pub fn pid(&self) -> &ProcessId {
        self.process.pid()
    }

    /// Parsed inputs (defaults filled).
    pub fn inputs(&self) -> &PortMap {
        self.process.inputs()
    }

    pub fn outputs(&self) -> &PortMap {
        self.process.outputs()
    }

    /// Emit a value on an output port.
    ///
    /// Validated synchronously against the declared (or dynamic) port;
    /// failure surfaces at this call site and fails the running step.
    pub fn out(&mut self, port: impl Into<String>, value: Value) -> Result<()> {
        let port = port.into();
        let dynamic = self.process.spec.resolve_output(&port, &value)?;
        self.process.outputs.insert(port.clone(), value.clone());
        tracing::debug!(pid = %self.process.pid, %port, "output emitted");
        self.process.fire_output_event(port, value, dynamic);
        Ok(())
    }
}

/// Borrowed view of the process handed to lifecycle hooks.
///
/// The `base_*` methods are the hooks' base behavior: they broadcast the
/// event, emit the parallel message, and mark the call-confirmed sentinel
/// the driver asserts on.
#[derive(Debug)]
pub struct HookContext<'a> {
    process: &'a mut Process,
}

impl HookContext<'_> {
    pub fn pid(&self) -> &ProcessId {
        self.process.pid()
    }

    pub fn inputs(&self) -> &PortMap {
        self.process.inputs()
    }

    pub fn outputs(&self) -> &PortMap {
        self.process.outputs()
    }

    pub fn state_label(&self) -> Option<StateLabel> {
        self.process.state_label()
    }

    pub fn base_on_create(&mut self) -> Result<()> {
        // No broadcast: nothing can have registered as a listener yet.
        self.process.hook_called = true;
        Ok(())
    }

    pub fn base_on_start(&mut self) -> Result<()> {
        self.process.fire_event(LifecycleEvent::Start);
        self.process.send_message("start", None);
        self.process.hook_called = true;
        Ok(())
    }

    pub fn base_on_run(&mut self) -> Result<()> {
        self.process.fire_event(LifecycleEvent::Run);
        self.process.send_message("run", None);
        self.process.hook_called = true;
        Ok(())
    }

    pub fn base_on_wait(&mut self, awaiting: &str) -> Result<()> {
        self.process.fire_event(LifecycleEvent::Wait);
        self.process
            .send_message("wait", Some(json!({ "awaiting": awaiting })));
        self.process.hook_called = true;
        Ok(())
    }

    pub fn base_on_resume(&mut self) -> Result<()> {
        self.process.fire_event(LifecycleEvent::Resume);
        self.process.send_message("resume", None);
        self.process.hook_called = true;
        Ok(())
    }

    /// Checks that every required output was emitted and validates, then
    /// marks the process finished. A check failure redirects the process
    /// to FAILED instead of completing.
    pub fn base_on_finish(&mut self) -> Result<()> {
        self.process
            .spec
            .validate_outputs(&self.process.outputs)
            .map_err(|err| {
                Error::missing_output(format!(
                    "process {} cannot finish: {}",
                    self.process.class_name, err
                ))
            })?;
        self.process.finished = true;
        self.process.fire_event(LifecycleEvent::Finish);
        self.process.send_message("finish", None);
        self.process.hook_called = true;
        Ok(())
    }

    pub fn base_on_abort(&mut self, msg: Option<&str>) -> Result<()> {
        self.process.fire_event(LifecycleEvent::Abort);
        self.process
            .send_message("abort", Some(json!({ "msg": msg })));
        self.process.hook_called = true;
        Ok(())
    }

    pub fn base_on_stop(&mut self) -> Result<()> {
        self.process.fire_event(LifecycleEvent::Stop);
        self.process.send_message("stop", None);
        self.process.hook_called = true;
        Ok(())
    }

    pub fn base_on_fail(&mut self) -> Result<()> {
        self.process.fire_event(LifecycleEvent::Fail);
        self.process.send_message("fail", None);
        self.process.hook_called = true;
        Ok(())
    }

    pub fn base_on_terminate(&mut self) -> Result<()> {
        self.process.fire_event(LifecycleEvent::Terminate);
        self.process.send_message("terminate", None);
        self.process.hook_called = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{PortSpec, ValueType};
    use serde_json::json;

    #[derive(Default)]
    struct Noop;

    impl ProcessLogic for Noop {
        fn define(spec: &mut ProcessSpec) -> Result<()> {
            spec.input("x", PortSpec::required().of_type(ValueType::Integer))
        }

        fn run(&mut self, _ctx: &mut ProcessContext<'_>) -> Result<Outcome> {
            Ok(Outcome::Finished)
        }
    }

    fn sealed_spec() -> Arc<ProcessSpec> {
        let mut spec = ProcessSpec::new();
        Noop::define(&mut spec).unwrap();
        spec.seal();
        Arc::new(spec)
    }

    #[test]
    fn construction_validates_inputs() {
        // Scenario A: required input not supplied.
        let result = Process::new("noop", sealed_spec(), Box::new(Noop), None, None);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn construction_succeeds_with_valid_inputs() {
        let mut inputs = PortMap::new();
        inputs.insert("x".to_string(), json!(1));
        let process =
            Process::new("noop", sealed_spec(), Box::new(Noop), Some(inputs), None).unwrap();
        assert_eq!(process.inputs().get("x"), Some(&json!(1)));
        assert!(process.state_label().is_none());
        assert!(!process.has_terminated());
        assert!(process.is_playing());
    }

    #[test]
    fn explicit_pid_is_kept() {
        let pid = ProcessId::from_string("pid-7".to_string()).unwrap();
        let mut inputs = PortMap::new();
        inputs.insert("x".to_string(), json!(1));
        let process = Process::new(
            "noop",
            sealed_spec(),
            Box::new(Noop),
            Some(inputs),
            Some(pid.clone()),
        )
        .unwrap();
        assert_eq!(process.pid(), &pid);
    }

    #[test]
    fn unsealed_spec_is_rejected() {
        let mut spec = ProcessSpec::new();
        Noop::define(&mut spec).unwrap();
        let result = Process::new("noop", Arc::new(spec), Box::new(Noop), None, None);
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[test]
    fn failure_capture_fires_the_fail_hook_once() {
        struct FailObserver {
            seen: Rc<RefCell<Vec<String>>>,
        }
        impl ProcessLogic for FailObserver {
            fn run(&mut self, _ctx: &mut ProcessContext<'_>) -> Result<Outcome> {
                Ok(Outcome::Finished)
            }
            fn on_fail(&mut self, ctx: &mut HookContext<'_>, message: &str) -> Result<()> {
                self.seen.borrow_mut().push(message.to_string());
                ctx.base_on_fail()
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut spec = ProcessSpec::new();
        spec.seal();
        let mut process = Process::new(
            "observer",
            Arc::new(spec),
            Box::new(FailObserver { seen: seen.clone() }),
            None,
            None,
        )
        .unwrap();

        process.fail_with("boom".to_string()).unwrap();
        assert_eq!(process.state_label(), Some(StateLabel::Failed));
        assert!(process.has_terminated());
        assert_eq!(process.get_failure_msg(), Some("boom"));
        assert_eq!(*seen.borrow(), vec!["boom".to_string()]);
    }

    #[test]
    fn create_hook_contract_is_enforced_at_construction() {
        #[derive(Default)]
        struct BadCreate;
        impl ProcessLogic for BadCreate {
            fn run(&mut self, _ctx: &mut ProcessContext<'_>) -> Result<Outcome> {
                Ok(Outcome::Finished)
            }
            fn on_create(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
                Ok(()) // forgets the base call
            }
        }

        let mut spec = ProcessSpec::new();
        spec.seal();
        let result = Process::new("bad", Arc::new(spec), Box::new(BadCreate), None, None);
        assert!(matches!(result, Err(Error::HookContract(_))));
    }

    #[test]
    fn detached_process_saves_and_reloads() {
        let mut factory = ProcessFactory::new();
        factory.register::<Noop>("noop").unwrap();

        let mut inputs = PortMap::new();
        inputs.insert("x".to_string(), json!(9));
        let process = factory.create("noop", Some(inputs), None).unwrap();

        let record = process.save_instance_state();
        assert_eq!(record.class_name, "noop");
        assert!(record.state.is_none());

        let restored = Process::load_instance_state(record, &factory).unwrap();
        assert_eq!(restored.pid(), process.pid());
        assert_eq!(restored.creation_time(), process.creation_time());
        assert_eq!(restored.inputs(), process.inputs());
    }
}
