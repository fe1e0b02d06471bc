//! Registry of concrete process types and wait-on restorers.
//!
//! Checkpoints carry a class name; the factory maps it back to the concrete
//! logic type and its sealed spec so a restored process behaves like the
//! original. Wait-ons are reconstructed the same way, dispatched by kind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::bundle::WaitOnRecord;
use crate::process::{Process, ProcessLogic};
use crate::spec::{PortMap, ProcessSpec};
use crate::types::{Error, ProcessId, Result};
use crate::wait::{SignalWaitOn, WaitOn, SIGNAL_KIND};

type LogicBuilder = Box<dyn Fn() -> Box<dyn ProcessLogic>>;
type WaitOnRestorer = Box<dyn Fn(&WaitOnRecord) -> Result<Box<dyn WaitOn>>>;

/// A registered process type: its sealed spec and logic constructor.
pub struct ProcessType {
    spec: Arc<ProcessSpec>,
    build: LogicBuilder,
}

impl ProcessType {
    pub fn spec(&self) -> &Arc<ProcessSpec> {
        &self.spec
    }

    pub fn build_logic(&self) -> Box<dyn ProcessLogic> {
        (self.build)()
    }
}

impl fmt::Debug for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessType").field("spec", &self.spec).finish()
    }
}

/// Class-name keyed registry backing checkpoint reconstruction.
pub struct ProcessFactory {
    types: HashMap<String, ProcessType>,
    wait_ons: HashMap<String, WaitOnRestorer>,
}

impl ProcessFactory {
    /// Create a factory with the built-in `signal` wait-on restorer.
    pub fn new() -> Self {
        let mut wait_ons: HashMap<String, WaitOnRestorer> = HashMap::new();
        wait_ons.insert(
            SIGNAL_KIND.to_string(),
            Box::new(|record| {
                Ok(Box::new(SignalWaitOn::restore(record)?) as Box<dyn WaitOn>)
            }),
        );
        Self {
            types: HashMap::new(),
            wait_ons,
        }
    }

    /// Register a process type under a class name. Builds the type's spec
    /// via `ProcessLogic::define` and seals it.
    pub fn register<L>(&mut self, name: impl Into<String>) -> Result<()>
    where
        L: ProcessLogic + Default + 'static,
    {
        let name = name.into();
        if self.types.contains_key(&name) {
            return Err(Error::validation(format!(
                "process type already registered: {}",
                name
            )));
        }

        let mut spec = ProcessSpec::new();
        L::define(&mut spec)?;
        spec.seal();

        self.types.insert(
            name,
            ProcessType {
                spec: Arc::new(spec),
                build: Box::new(|| Box::new(L::default())),
            },
        );
        Ok(())
    }

    /// Register a restorer for a wait-on kind.
    pub fn register_wait_on(
        &mut self,
        kind: impl Into<String>,
        restore: impl Fn(&WaitOnRecord) -> Result<Box<dyn WaitOn>> + 'static,
    ) {
        self.wait_ons.insert(kind.into(), Box::new(restore));
    }

    /// Look up a registered process type.
    pub fn get(&self, name: &str) -> Result<&ProcessType> {
        self.types
            .get(name)
            .ok_or_else(|| Error::not_found(format!("unknown process type: {}", name)))
    }

    /// Construct a fresh process of a registered type, validating inputs.
    pub fn create(
        &self,
        name: &str,
        inputs: Option<PortMap>,
        pid: Option<ProcessId>,
    ) -> Result<Process> {
        let ty = self.get(name)?;
        Process::new(name, ty.spec.clone(), ty.build_logic(), inputs, pid)
    }

    /// Reconstruct a wait-on from its checkpoint record.
    pub fn restore_wait_on(&self, record: &WaitOnRecord) -> Result<Box<dyn WaitOn>> {
        let restore = self.wait_ons.get(&record.kind).ok_or_else(|| {
            Error::not_found(format!("unknown wait-on kind: {}", record.kind))
        })?;
        restore(record)
    }
}

impl Default for ProcessFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessFactory")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .field("wait_ons", &self.wait_ons.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_signal_restorer() {
        let factory = ProcessFactory::new();
        let record = WaitOnRecord {
            kind: SIGNAL_KIND.to_string(),
            id: "w-9".to_string(),
            data: json!({"ready": true}),
        };
        let wait_on = factory.restore_wait_on(&record).unwrap();
        assert_eq!(wait_on.id(), "w-9");
        assert!(wait_on.is_ready());
    }

    #[test]
    fn unknown_wait_on_kind_fails() {
        let factory = ProcessFactory::new();
        let record = WaitOnRecord {
            kind: "nonexistent".to_string(),
            id: "x".to_string(),
            data: serde_json::Value::Null,
        };
        assert!(factory.restore_wait_on(&record).is_err());
    }

    #[test]
    fn unknown_process_type_fails() {
        let factory = ProcessFactory::new();
        assert!(factory.get("nope").is_err());
        assert!(factory.create("nope", None, None).is_err());
    }
}
