//! Port specification for process inputs and outputs.
//!
//! A `ProcessSpec` declares the input and output ports of a process type:
//! which ports exist, whether they are required, their default values and
//! accepted value types, plus an optional dynamic (catch-all) output port.
//! Specs are built once per process type and sealed before use.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::{Error, Result};

/// Mapping of port name to value, used for inputs and outputs.
pub type PortMap = BTreeMap<String, Value>;

/// Classification of JSON value kinds accepted by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl ValueType {
    /// Check whether a value matches this type. `Float` accepts any number.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ValueType::Bool => value.is_boolean(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Float => value.is_number(),
            ValueType::String => value.is_string(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
        }
    }
}

/// Specification of a single input or output port.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSpec {
    pub required: bool,
    pub default: Option<Value>,
    pub valid_type: Option<ValueType>,
}

impl PortSpec {
    /// A port that must be supplied (or emitted) with no default.
    pub fn required() -> Self {
        Self {
            required: true,
            default: None,
            valid_type: None,
        }
    }

    /// A port that may be omitted.
    pub fn optional() -> Self {
        Self {
            required: false,
            default: None,
            valid_type: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn of_type(mut self, valid_type: ValueType) -> Self {
        self.valid_type = Some(valid_type);
        self
    }

    /// Validate a value (or its absence) against this port.
    pub fn validate(&self, name: &str, value: Option<&Value>) -> Result<()> {
        match value {
            None => {
                if self.required && self.default.is_none() {
                    return Err(Error::missing_output(format!(
                        "no value for required port '{}'",
                        name
                    )));
                }
            }
            Some(v) => {
                if let Some(t) = self.valid_type {
                    if !t.matches(v) {
                        return Err(Error::validation(format!(
                            "port '{}' expects {}, got {}",
                            name,
                            t.name(),
                            kind_of(v)
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declared input/output ports of a process type.
///
/// Built by `ProcessLogic::define` during registration and sealed afterwards;
/// declaration on a sealed spec is an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSpec {
    inputs: BTreeMap<String, PortSpec>,
    outputs: BTreeMap<String, PortSpec>,
    dynamic_output: Option<PortSpec>,
    #[serde(skip)]
    sealed: bool,
}

impl ProcessSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an input port.
    pub fn input(&mut self, name: impl Into<String>, port: PortSpec) -> Result<()> {
        self.check_mutable()?;
        self.inputs.insert(name.into(), port);
        Ok(())
    }

    /// Declare an output port.
    pub fn output(&mut self, name: impl Into<String>, port: PortSpec) -> Result<()> {
        self.check_mutable()?;
        self.outputs.insert(name.into(), port);
        Ok(())
    }

    /// Declare a dynamic (catch-all) output port accepting undeclared names.
    pub fn dynamic_output(&mut self, port: PortSpec) -> Result<()> {
        self.check_mutable()?;
        self.dynamic_output = Some(port);
        Ok(())
    }

    /// Prevent any further port declarations.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn inputs(&self) -> &BTreeMap<String, PortSpec> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<String, PortSpec> {
        &self.outputs
    }

    pub fn get_input(&self, name: &str) -> Option<&PortSpec> {
        self.inputs.get(name)
    }

    pub fn get_output(&self, name: &str) -> Option<&PortSpec> {
        self.outputs.get(name)
    }

    pub fn has_dynamic_output(&self) -> bool {
        self.dynamic_output.is_some()
    }

    /// Validate supplied inputs against the declared input ports.
    ///
    /// Rejects undeclared input names, missing required inputs without
    /// defaults, and type mismatches on supplied values.
    pub fn validate(&self, inputs: Option<&PortMap>) -> Result<()> {
        if let Some(ins) = inputs {
            for name in ins.keys() {
                if !self.inputs.contains_key(name) {
                    return Err(Error::validation(format!(
                        "unknown input port '{}'",
                        name
                    )));
                }
            }
        }

        for (name, port) in &self.inputs {
            let supplied = inputs.and_then(|ins| ins.get(name));
            match supplied {
                None => {
                    if port.required && port.default.is_none() {
                        return Err(Error::validation(format!(
                            "no value supplied for required input port '{}'",
                            name
                        )));
                    }
                }
                Some(v) => {
                    if let Some(t) = port.valid_type {
                        if !t.matches(v) {
                            return Err(Error::validation(format!(
                                "input port '{}' expects {}, got {}",
                                name,
                                t.name(),
                                kind_of(v)
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Take the supplied inputs and fill in defaults for any declared input
    /// port that was not supplied.
    ///
    /// Precondition: `validate` has passed for the same inputs.
    pub fn parse_inputs(&self, inputs: Option<&PortMap>) -> PortMap {
        let mut parsed = inputs.cloned().unwrap_or_default();
        for (name, port) in &self.inputs {
            if !parsed.contains_key(name) {
                if let Some(default) = &port.default {
                    parsed.insert(name.clone(), default.clone());
                }
            }
        }
        parsed
    }

    /// Resolve the port an output emission lands on.
    ///
    /// Returns whether the port is the dynamic catch-all, and checks the
    /// value type against the resolved port. Emitting on an undeclared name
    /// with no dynamic port declared is an invalid-output error.
    pub fn resolve_output(&self, name: &str, value: &Value) -> Result<bool> {
        let (port, dynamic) = match self.outputs.get(name) {
            Some(port) => (port, false),
            None => match &self.dynamic_output {
                Some(port) => (port, true),
                None => {
                    return Err(Error::invalid_output(format!(
                        "output on unknown port '{}' and no dynamic output port declared",
                        name
                    )))
                }
            },
        };

        if let Some(t) = port.valid_type {
            if !t.matches(value) {
                return Err(Error::invalid_output(format!(
                    "output '{}' has wrong type: expected {}, got {}",
                    name,
                    t.name(),
                    kind_of(value)
                )));
            }
        }
        Ok(dynamic)
    }

    /// Check that every required output port has been filled with a valid
    /// value, called when a process finishes normally.
    pub fn validate_outputs(&self, outputs: &PortMap) -> Result<()> {
        for (name, port) in &self.outputs {
            port.validate(name, outputs.get(name))?;
        }
        Ok(())
    }

    fn check_mutable(&self) -> Result<()> {
        if self.sealed {
            return Err(Error::internal("process spec is sealed"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_with_required_x() -> ProcessSpec {
        let mut spec = ProcessSpec::new();
        spec.input("x", PortSpec::required().of_type(ValueType::Integer))
            .unwrap();
        spec.seal();
        spec
    }

    #[test]
    fn missing_required_input_fails() {
        let spec = spec_with_required_x();
        assert!(spec.validate(None).is_err());
        assert!(spec.validate(Some(&PortMap::new())).is_err());
    }

    #[test]
    fn supplied_required_input_passes() {
        let spec = spec_with_required_x();
        let mut ins = PortMap::new();
        ins.insert("x".to_string(), json!(5));
        assert!(spec.validate(Some(&ins)).is_ok());
    }

    #[test]
    fn input_type_mismatch_fails() {
        let spec = spec_with_required_x();
        let mut ins = PortMap::new();
        ins.insert("x".to_string(), json!("five"));
        let err = spec.validate(Some(&ins)).unwrap_err();
        assert!(err.to_string().contains("expects integer"));
    }

    #[test]
    fn unknown_input_port_fails() {
        let spec = spec_with_required_x();
        let mut ins = PortMap::new();
        ins.insert("x".to_string(), json!(1));
        ins.insert("z".to_string(), json!(2));
        assert!(spec.validate(Some(&ins)).is_err());
    }

    #[test]
    fn defaults_are_filled() {
        let mut spec = ProcessSpec::new();
        spec.input("n", PortSpec::optional().with_default(json!(3)))
            .unwrap();
        spec.seal();

        assert!(spec.validate(None).is_ok());
        let parsed = spec.parse_inputs(None);
        assert_eq!(parsed.get("n"), Some(&json!(3)));
    }

    #[test]
    fn default_satisfies_required() {
        let mut spec = ProcessSpec::new();
        spec.input("n", PortSpec::required().with_default(json!(7)))
            .unwrap();
        spec.seal();
        assert!(spec.validate(None).is_ok());
        assert_eq!(spec.parse_inputs(None).get("n"), Some(&json!(7)));
    }

    #[test]
    fn sealed_spec_rejects_declarations() {
        let mut spec = spec_with_required_x();
        assert!(spec.input("y", PortSpec::optional()).is_err());
        assert!(spec.output("y", PortSpec::optional()).is_err());
        assert!(spec.dynamic_output(PortSpec::optional()).is_err());
    }

    #[test]
    fn resolve_output_declared_and_dynamic() {
        let mut spec = ProcessSpec::new();
        spec.output("y", PortSpec::required().of_type(ValueType::Integer))
            .unwrap();
        spec.seal();

        assert_eq!(spec.resolve_output("y", &json!(1)).unwrap(), false);
        assert!(spec.resolve_output("y", &json!("no")).is_err());
        assert!(spec.resolve_output("other", &json!(1)).is_err());

        let mut spec = ProcessSpec::new();
        spec.dynamic_output(PortSpec::optional()).unwrap();
        spec.seal();
        assert_eq!(spec.resolve_output("anything", &json!(1)).unwrap(), true);
    }

    #[test]
    fn validate_outputs_requires_required_ports() {
        let mut spec = ProcessSpec::new();
        spec.output("y", PortSpec::required()).unwrap();
        spec.seal();

        assert!(spec.validate_outputs(&PortMap::new()).is_err());

        let mut outs = PortMap::new();
        outs.insert("y".to_string(), json!(42));
        assert!(spec.validate_outputs(&outs).is_ok());
    }
}
