// src/migration/executor.rs

//! Data-step executor
//!
//! Runs one step of a phase per call. A step that reports partial progress
//! keeps the checkpoint on the same index; anything else advances it. When a
//! step fails, its own writes are rolled back and the steps before it are
//! undone through their reversed tool calls before the error is returned.

use super::MigrationContext;
use super::step::{Checkpoint, Condition, DataStep, Phase, Progress, StepValue};
use super::tools::ToolRegistry;
use crate::error::{Error, Result};
use tracing::{debug, warn};

/// What is left of a phase after one call
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Every step has run
    Completed,
    /// More calls are needed; persist this checkpoint
    InProgress(Checkpoint),
}

/// Executes data steps against the registered tools
#[derive(Debug, Clone, Copy)]
pub struct StepExecutor<'a> {
    tools: &'a ToolRegistry,
}

impl<'a> StepExecutor<'a> {
    pub fn new(tools: &'a ToolRegistry) -> Self {
        Self { tools }
    }

    /// Run the next step of `steps`
    ///
    /// A checkpoint recorded for a different phase is ignored and the phase
    /// starts from its first step.
    pub fn process(
        &self,
        ctx: &MigrationContext<'_>,
        steps: &[DataStep],
        checkpoint: Option<&Checkpoint>,
        phase: Phase,
    ) -> Result<StepOutcome> {
        let mut next = match checkpoint {
            Some(checkpoint) if checkpoint.phase == phase => checkpoint.clone(),
            _ => Checkpoint::new(phase),
        };
        let index = next.step;
        let Some(step) = steps.get(index) else {
            return Ok(StepOutcome::Completed);
        };

        debug!("Running {:?} step {} of {}", phase, index + 1, steps.len());
        match self.run_isolated(ctx, step, next.last.as_ref()) {
            Ok(Some(StepValue::Continue(progress))) => {
                next.last = Some(progress);
                Ok(StepOutcome::InProgress(next))
            }
            Ok(_) if index + 1 >= steps.len() => Ok(StepOutcome::Completed),
            Ok(_) => {
                next.step = index + 1;
                next.last = None;
                Ok(StepOutcome::InProgress(next))
            }
            Err(e) => {
                warn!(
                    "{:?} step {} failed ({}), undoing {} earlier step(s)",
                    phase,
                    index + 1,
                    e,
                    index
                );
                self.undo(ctx, &steps[..index]);
                Err(e)
            }
        }
    }

    /// Run one step, forward or reversed
    ///
    /// Returns `None` when the step did nothing: a conditional whose
    /// condition is false, or a step with no reverse.
    pub fn run_step(
        &self,
        ctx: &MigrationContext<'_>,
        step: &DataStep,
        last: Option<&Progress>,
        reverse: bool,
    ) -> Result<Option<StepValue>> {
        match step {
            DataStep::If { condition, step } => {
                if reverse {
                    return Ok(None);
                }
                let holds = match condition {
                    Condition::Literal(value) => *value,
                    Condition::Step(condition) => self
                        .run_step(ctx, condition, None, false)?
                        .is_some_and(|value| value.is_truthy()),
                };
                if !holds {
                    debug!("Condition not met, skipping {:?}", step);
                    return Ok(None);
                }
                self.run_step(ctx, step, last, false)
            }
            DataStep::Custom(custom) => {
                if reverse {
                    return Ok(None);
                }
                debug!("Running custom step {}", custom.name);
                (custom.func)(ctx, &custom.args, last).map(Some)
            }
            DataStep::Tool(call) => {
                if !self.tools.contains(call.tool_name()) {
                    return Err(Error::UndefinedTool {
                        tool: call.tool_name().to_string(),
                        step: format!("{step:?}"),
                    });
                }
                if !reverse {
                    return self.tools.call(ctx.conn, call).map(Some);
                }
                match call.reversed() {
                    Some(reversed) => self.tools.call(ctx.conn, &reversed).map(Some),
                    None => {
                        debug!("{}.{} has no reverse", call.tool_name(), call.method_name());
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Run a forward step inside a savepoint so a failure leaves no trace
    fn run_isolated(
        &self,
        ctx: &MigrationContext<'_>,
        step: &DataStep,
        last: Option<&Progress>,
    ) -> Result<Option<StepValue>> {
        ctx.conn.execute_batch("SAVEPOINT data_step")?;
        match self.run_step(ctx, step, last, false) {
            Ok(value) => {
                ctx.conn.execute_batch("RELEASE data_step")?;
                Ok(value)
            }
            Err(e) => {
                ctx.conn
                    .execute_batch("ROLLBACK TO data_step; RELEASE data_step")?;
                Err(e)
            }
        }
    }

    /// Best-effort reversal of already applied steps, last first
    pub fn undo(&self, ctx: &MigrationContext<'_>, applied: &[DataStep]) {
        for step in applied.iter().rev() {
            if let Err(e) = self.run_step(ctx, step, None, true) {
                warn!("Could not undo step {:?}: {}", step, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableNames;
    use crate::migration::tools::{ConfigCall, ConfigTool, ModuleCall, ParentRef};
    use rusqlite::Connection;

    fn setup() -> (Connection, TableNames, ToolRegistry) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE config (
                config_name VARCHAR(255) NOT NULL DEFAULT '' PRIMARY KEY,
                config_value VARCHAR(255) NOT NULL DEFAULT '',
                is_dynamic BOOLEAN NOT NULL DEFAULT 0
            )",
        )
        .unwrap();
        let tables = TableNames::with_prefix("");
        let mut tools = ToolRegistry::new();
        tools.register(ConfigTool::new("config"));
        (conn, tables, tools)
    }

    fn config(conn: &Connection, name: &str) -> Option<String> {
        ConfigTool::new("config").get(conn, name).unwrap()
    }

    #[test]
    fn test_one_step_per_call() {
        let (conn, tables, tools) = setup();
        let ctx = MigrationContext::new(&conn, &tables);
        let exec = StepExecutor::new(&tools);
        let steps: Vec<DataStep> = vec![
            ConfigCall::add("a", "1").into(),
            ConfigCall::add("b", "2").into(),
        ];

        let outcome = exec.process(&ctx, &steps, None, Phase::Data).unwrap();
        let StepOutcome::InProgress(checkpoint) = outcome else {
            panic!("expected more work");
        };
        assert_eq!(checkpoint.step, 1);
        assert!(config(&conn, "a").is_some());
        assert!(config(&conn, "b").is_none());

        let outcome = exec
            .process(&ctx, &steps, Some(&checkpoint), Phase::Data)
            .unwrap();
        assert_eq!(outcome, StepOutcome::Completed);
        assert_eq!(config(&conn, "b").as_deref(), Some("2"));
    }

    #[test]
    fn test_partial_progress_keeps_index() {
        let (conn, tables, tools) = setup();
        let ctx = MigrationContext::new(&conn, &tables);
        let exec = StepExecutor::new(&tools);
        let steps = vec![DataStep::custom("count", |_, _, last| {
            let done = match last {
                Some(Progress::Cursor { position }) => *position,
                _ => 0,
            };
            if done >= 2 {
                Ok(StepValue::Unit)
            } else {
                Ok(StepValue::Continue(Progress::Cursor { position: done + 1 }))
            }
        })];

        let mut checkpoint = None;
        let mut calls = 0;
        loop {
            calls += 1;
            match exec
                .process(&ctx, &steps, checkpoint.as_ref(), Phase::Data)
                .unwrap()
            {
                StepOutcome::Completed => break,
                StepOutcome::InProgress(next) => {
                    assert_eq!(next.step, 0);
                    checkpoint = Some(next);
                }
            }
        }
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_checkpoint_of_other_phase_restarts() {
        let (conn, tables, tools) = setup();
        let ctx = MigrationContext::new(&conn, &tables);
        let exec = StepExecutor::new(&tools);
        let steps: Vec<DataStep> = vec![ConfigCall::add("a", "1").into(), ConfigCall::add("b", "1").into()];

        let mut stale = Checkpoint::new(Phase::Schema);
        stale.step = 1;
        let outcome = exec.process(&ctx, &steps, Some(&stale), Phase::Data).unwrap();
        assert!(matches!(outcome, StepOutcome::InProgress(c) if c.step == 1 && c.phase == Phase::Data));
        assert!(config(&conn, "a").is_some());
    }

    #[test]
    fn test_failure_undoes_earlier_steps() {
        let (conn, tables, tools) = setup();
        let ctx = MigrationContext::new(&conn, &tables);
        let exec = StepExecutor::new(&tools);
        let steps: Vec<DataStep> = vec![
            ConfigCall::add("a", "1").into(),
            ConfigCall::add("b", "2").into(),
            ConfigCall::update("missing", "x").into(),
        ];

        let mut checkpoint = None;
        for _ in 0..2 {
            match exec.process(&ctx, &steps, checkpoint.as_ref(), Phase::Data).unwrap() {
                StepOutcome::InProgress(next) => checkpoint = Some(next),
                StepOutcome::Completed => panic!("finished too early"),
            }
        }
        assert!(config(&conn, "b").is_some());

        let err = exec
            .process(&ctx, &steps, checkpoint.as_ref(), Phase::Data)
            .unwrap_err();
        assert_eq!(err.message_key(), "CONFIG_NOT_EXIST");
        assert!(config(&conn, "a").is_none());
        assert!(config(&conn, "b").is_none());
    }

    #[test]
    fn test_failed_custom_step_leaves_no_writes() {
        let (conn, tables, tools) = setup();
        let ctx = MigrationContext::new(&conn, &tables);
        let exec = StepExecutor::new(&tools);
        let steps = vec![DataStep::custom("half", |ctx, _, _| {
            ctx.conn.execute(
                "INSERT INTO config (config_name, config_value) VALUES ('half', '1')",
                [],
            )?;
            Err(Error::custom_step("half", "boom"))
        })];

        assert!(exec.process(&ctx, &steps, None, Phase::Data).is_err());
        assert!(config(&conn, "half").is_none());
    }

    #[test]
    fn test_conditionals() {
        let (conn, tables, mut tools) = setup();
        conn.execute_batch(
            "CREATE TABLE modules (
                module_id INTEGER PRIMARY KEY AUTOINCREMENT,
                module_enabled INTEGER NOT NULL DEFAULT 1,
                module_display INTEGER NOT NULL DEFAULT 1,
                module_basename VARCHAR(255) NOT NULL DEFAULT '',
                module_class VARCHAR(10) NOT NULL DEFAULT '',
                parent_id INTEGER NOT NULL DEFAULT 0,
                left_id INTEGER NOT NULL DEFAULT 0,
                right_id INTEGER NOT NULL DEFAULT 0,
                module_langname VARCHAR(255) NOT NULL DEFAULT '',
                module_mode VARCHAR(255) NOT NULL DEFAULT '',
                module_auth VARCHAR(255) NOT NULL DEFAULT ''
            )",
        )
        .unwrap();
        tools.register(crate::migration::tools::ModuleTool::new("modules"));
        let ctx = MigrationContext::new(&conn, &tables);
        let exec = StepExecutor::new(&tools);

        let literal = DataStep::when(false, ConfigCall::add("never", "1"));
        assert_eq!(exec.run_step(&ctx, &literal, None, false).unwrap(), None);

        let absent = DataStep::when(
            Condition::step(ModuleCall::exists("acp", ParentRef::Root, "ACP_CAT_GHOST")),
            ConfigCall::add("never", "1"),
        );
        assert_eq!(exec.run_step(&ctx, &absent, None, false).unwrap(), None);
        assert!(config(&conn, "never").is_none());

        let yes = DataStep::when(true, ConfigCall::add("yes", "1"));
        assert_eq!(
            exec.run_step(&ctx, &yes, None, false).unwrap(),
            Some(StepValue::Unit)
        );
        assert_eq!(exec.run_step(&ctx, &yes, None, true).unwrap(), None);
        assert!(config(&conn, "yes").is_some());
    }

    #[test]
    fn test_unregistered_tool_fails_at_run_time() {
        let conn = Connection::open_in_memory().unwrap();
        let tables = TableNames::default();
        let tools = ToolRegistry::new();
        let ctx = MigrationContext::new(&conn, &tables);
        let step: DataStep = ConfigCall::add("a", "1").into();

        let err = StepExecutor::new(&tools)
            .run_step(&ctx, &step, None, false)
            .unwrap_err();
        assert!(matches!(err, Error::UndefinedTool { tool, .. } if tool == "config"));
    }
}
