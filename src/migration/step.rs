// src/migration/step.rs

//! Data steps and resumable progress
//!
//! A migration's data phase is an ordered list of [`DataStep`]s. Each step
//! is either a tool call, a custom function, or a conditional wrapping
//! another step. Steps return a [`StepValue`]; a [`StepValue::Continue`]
//! result means the step did part of its work and wants to be called again
//! with the progress it reported.

use super::MigrationContext;
use super::tools::{
    ConfigCall, ConfigTextCall, ModuleCall, PermissionCall, ToolCall,
};
use super::delta::SchemaDelta;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Progress reported by a step that is not finished yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Progress {
    /// Last processed key in a keyed scan
    Cursor { position: i64 },
}

/// Result of executing one step
#[derive(Debug, Clone, PartialEq)]
pub enum StepValue {
    /// Finished, nothing to report
    Unit,
    /// Finished with a boolean answer (used by query steps such as `exists`)
    Bool(bool),
    /// Not finished; call again with this progress
    Continue(Progress),
}

impl StepValue {
    /// Truthiness used when a step serves as a condition
    pub fn is_truthy(&self) -> bool {
        match self {
            StepValue::Unit => false,
            StepValue::Bool(value) => *value,
            StepValue::Continue(_) => true,
        }
    }
}

/// Signature of a custom step function
pub type CustomFn = dyn Fn(&MigrationContext<'_>, &[serde_json::Value], Option<&Progress>) -> Result<StepValue>
    + Send
    + Sync;

/// Arbitrary function run as a data step; never reversed
#[derive(Clone)]
pub struct CustomStep {
    pub name: String,
    pub args: Vec<serde_json::Value>,
    pub func: Arc<CustomFn>,
}

impl fmt::Debug for CustomStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomStep")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Condition guarding an `If` step
#[derive(Debug, Clone)]
pub enum Condition {
    Literal(bool),
    /// Run the step and test the truthiness of its result
    Step(Box<DataStep>),
}

impl Condition {
    pub fn step(step: impl Into<DataStep>) -> Self {
        Condition::Step(Box::new(step.into()))
    }
}

impl From<bool> for Condition {
    fn from(value: bool) -> Self {
        Condition::Literal(value)
    }
}

/// One unit of data migration work
#[derive(Debug, Clone)]
pub enum DataStep {
    Tool(ToolCall),
    Custom(CustomStep),
    If {
        condition: Condition,
        step: Box<DataStep>,
    },
}

impl DataStep {
    /// Custom step without extra arguments
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&MigrationContext<'_>, &[serde_json::Value], Option<&Progress>) -> Result<StepValue>
            + Send
            + Sync
            + 'static,
    {
        Self::custom_with_args(name, Vec::new(), func)
    }

    pub fn custom_with_args<F>(name: impl Into<String>, args: Vec<serde_json::Value>, func: F) -> Self
    where
        F: Fn(&MigrationContext<'_>, &[serde_json::Value], Option<&Progress>) -> Result<StepValue>
            + Send
            + Sync
            + 'static,
    {
        DataStep::Custom(CustomStep {
            name: name.into(),
            args,
            func: Arc::new(func),
        })
    }

    /// Run `step` only when `condition` holds
    pub fn when(condition: impl Into<Condition>, step: impl Into<DataStep>) -> Self {
        DataStep::If {
            condition: condition.into(),
            step: Box::new(step.into()),
        }
    }

    /// The step undoing this one, for use in a reverted update list
    ///
    /// Custom steps and conditionals have no inverse.
    pub fn reversed(&self) -> Option<DataStep> {
        match self {
            DataStep::Tool(call) => call.reversed().map(DataStep::Tool),
            DataStep::Custom(_) | DataStep::If { .. } => None,
        }
    }
}

impl From<ToolCall> for DataStep {
    fn from(call: ToolCall) -> Self {
        DataStep::Tool(call)
    }
}

impl From<SchemaDelta> for DataStep {
    fn from(delta: SchemaDelta) -> Self {
        DataStep::Tool(ToolCall::Schema(delta))
    }
}

impl From<ConfigCall> for DataStep {
    fn from(call: ConfigCall) -> Self {
        DataStep::Tool(ToolCall::Config(call))
    }
}

impl From<ConfigTextCall> for DataStep {
    fn from(call: ConfigTextCall) -> Self {
        DataStep::Tool(ToolCall::ConfigText(call))
    }
}

impl From<ModuleCall> for DataStep {
    fn from(call: ModuleCall) -> Self {
        DataStep::Tool(ToolCall::Module(call))
    }
}

impl From<PermissionCall> for DataStep {
    fn from(call: PermissionCall) -> Self {
        DataStep::Tool(ToolCall::Permission(call))
    }
}

/// Phase a checkpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Schema,
    Data,
    RevertData,
    RevertSchema,
}

/// Persisted position inside a phase's step list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub phase: Phase,
    /// Index of the next step to run
    pub step: usize,
    /// Progress of that step if it ran partially
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<Progress>,
    /// Seconds spent in this phase so far
    #[serde(default)]
    pub total_time: f64,
}

impl Checkpoint {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            step: 0,
            last: None,
            total_time: 0.0,
        }
    }
}
