// src/migration/migrator.rs

//! Dependency-ordered, resumable migration runner
//!
//! Every public entry point does at most one atomic unit of work: one
//! schema change kind or one data step. Progress lives in the migrations
//! table, so a run interrupted between calls resumes from the database
//! alone, even with a new `Migrator`.
//!
//! Forward order: for the first incomplete migration in the active list,
//! incomplete dependencies are applied first, depth first. Reverting is the
//! mirror image: applied dependents are reverted before the migration
//! itself, and the data phase is undone before the schema phase.

use super::executor::{StepExecutor, StepOutcome};
use super::output::{MigrationEvent, MigrationOutput, NullOutput, Verbosity};
use super::state::{MigrationState, MigrationStateStore};
use super::step::{Checkpoint, DataStep, Phase};
use super::{Migration, MigrationContext, MigrationRegistry, normalize_name};
use super::delta::SchemaDelta;
use super::tools::ToolRegistry;
use crate::config::TableNames;
use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The unit of work most recently attempted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastRun {
    pub name: String,
    pub task: Phase,
    pub effectively_installed: bool,
    pub state: MigrationState,
}

/// Result of a budgeted run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Units of work performed
    pub steps: usize,
    /// Whether nothing is left to do
    pub finished: bool,
    pub elapsed: Duration,
}

/// Outcome of one phase call, with timing
struct PhaseRun {
    outcome: StepOutcome,
    elapsed: f64,
    total: f64,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn schema_steps(delta: &SchemaDelta) -> Vec<DataStep> {
    delta.split().into_iter().map(DataStep::from).collect()
}

/// Reversed forward steps, last first, followed by the explicit revert steps
pub(crate) fn revert_data_steps(migration: &dyn Migration) -> Vec<DataStep> {
    let mut steps: Vec<DataStep> = migration
        .update_data()
        .iter()
        .rev()
        .filter_map(DataStep::reversed)
        .collect();
    steps.extend(migration.revert_data());
    steps
}

/// Applies and reverts registered migrations
pub struct Migrator<'a> {
    conn: &'a Connection,
    tables: TableNames,
    registry: MigrationRegistry,
    tools: ToolRegistry,
    store: MigrationStateStore,
    /// Active migration list, canonical names in registration order
    migrations: Vec<String>,
    states: HashMap<String, MigrationState>,
    fulfillable: RefCell<HashSet<String>>,
    last_run: Option<LastRun>,
    output: Box<dyn MigrationOutput + 'a>,
}

impl<'a> Migrator<'a> {
    /// Create a migrator over every registered migration
    ///
    /// Fails if the registered migrations depend on each other in a cycle.
    pub fn new(
        conn: &'a Connection,
        tables: TableNames,
        registry: MigrationRegistry,
        tools: ToolRegistry,
    ) -> Result<Self> {
        registry.validate()?;
        let store = MigrationStateStore::new(tables.migrations.clone());
        let mut migrator = Self {
            conn,
            tables,
            migrations: registry.names(),
            registry,
            tools,
            store,
            states: HashMap::new(),
            fulfillable: RefCell::new(HashSet::new()),
            last_run: None,
            output: Box::new(NullOutput),
        };
        migrator.load_migration_state()?;
        Ok(migrator)
    }

    /// Send progress events to `output`
    pub fn with_output(mut self, output: impl MigrationOutput + 'a) -> Self {
        self.output = Box::new(output);
        self
    }

    /// Limit the active list to these migrations, in this order
    pub fn set_migrations<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.migrations = names
            .into_iter()
            .map(|n| normalize_name(n.as_ref()).to_string())
            .collect();
    }

    /// Active migration names
    pub fn migrations(&self) -> &[String] {
        &self.migrations
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Reload recorded states from the database
    pub fn load_migration_state(&mut self) -> Result<()> {
        self.states = if self.store.table_exists(self.conn)? {
            self.store.load_all(self.conn)?
        } else {
            HashMap::new()
        };
        self.fulfillable.borrow_mut().clear();
        Ok(())
    }

    /// Create the migrations table if it does not exist yet
    pub fn create_migrations_table(&self) -> Result<bool> {
        let created = self.store.create_table(self.conn)?;
        if created {
            info!("Created migrations table {}", self.store.table());
        }
        Ok(created)
    }

    pub fn migration_state(&self, name: &str) -> Option<&MigrationState> {
        self.states.get(normalize_name(name))
    }

    pub fn last_run_migration(&self) -> Option<&LastRun> {
        self.last_run.as_ref()
    }

    /// Active migrations that are not complete yet
    pub fn installable_migrations(&self) -> Vec<String> {
        self.migrations
            .iter()
            .filter(|name| !self.is_complete(name))
            .cloned()
            .collect()
    }

    /// Record migrations as installed without running them
    ///
    /// Only names without a recorded state are written.
    pub fn populate_migrations<I, S>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = normalize_name(name.as_ref()).to_string();
            if self.states.contains_key(&name) {
                continue;
            }
            let depends_on = self
                .registry
                .get(&name)
                .map(|m| m.depends_on())
                .unwrap_or_default();
            let state = MigrationState::completed(name.clone(), depends_on);
            self.store.save(self.conn, &state)?;
            self.states.insert(name, state);
        }
        Ok(())
    }

    fn is_complete(&self, name: &str) -> bool {
        self.states
            .get(normalize_name(name))
            .is_some_and(MigrationState::is_complete)
    }

    /// First name in a dependency chain that cannot be satisfied
    ///
    /// A migration is fulfillable when it is already recorded, or when it is
    /// registered and all of its dependencies are fulfillable.
    pub fn unfulfillable(&self, name: &str) -> Option<String> {
        let name = normalize_name(name);
        if self.states.contains_key(name) || self.fulfillable.borrow().contains(name) {
            return None;
        }
        let Some(migration) = self.registry.get(name) else {
            return Some(name.to_string());
        };
        for dep in migration.depends_on() {
            if let Some(missing) = self.unfulfillable(&dep) {
                return Some(missing);
            }
        }
        self.fulfillable.borrow_mut().insert(name.to_string());
        None
    }

    /// Whether every fulfillable active migration is complete
    pub fn finished(&self) -> bool {
        self.migrations.iter().all(|name| match self.states.get(name) {
            Some(state) => state.is_complete(),
            None => self.unfulfillable(name).is_some(),
        })
    }

    /// Do one unit of work on the first incomplete migration
    ///
    /// Returns false when there was nothing to do.
    pub fn advance_one_step(&mut self) -> Result<bool> {
        let pending: Vec<String> = self
            .migrations
            .iter()
            .filter(|name| !self.is_complete(name))
            .cloned()
            .collect();

        for name in pending {
            if !self.registry.contains(&name) {
                self.emit(MigrationEvent::NotValid { name }, Verbosity::Normal);
                continue;
            }
            return self.in_unit(|m| m.try_apply(&name));
        }
        Ok(false)
    }

    /// Undo one unit of work of `name`, dependents first
    ///
    /// Returns false when `name` has no recorded state.
    pub fn revert_one_step(&mut self, name: &str) -> Result<bool> {
        let name = normalize_name(name).to_string();
        if !self.states.contains_key(&name) {
            return Ok(false);
        }
        if let Some(dependent) = self.applied_dependent(&name) {
            debug!("Reverting {} before its dependency {}", dependent, name);
            return self.revert_one_step(&dependent);
        }
        self.in_unit(|m| m.try_revert(&name))
    }

    /// Advance until finished, the budget runs out or `max_steps` units ran
    pub fn run(&mut self, budget: Duration, max_steps: Option<usize>) -> Result<RunSummary> {
        let started = Instant::now();
        let mut steps = 0;
        while !self.finished() && max_steps.is_none_or(|max| steps < max) {
            if !self.advance_one_step()? {
                break;
            }
            steps += 1;
            if started.elapsed() >= budget {
                break;
            }
        }
        Ok(RunSummary {
            steps,
            finished: self.finished(),
            elapsed: started.elapsed(),
        })
    }

    /// Revert `name` (and its dependents) until gone or out of budget
    pub fn revert(&mut self, name: &str, budget: Duration) -> Result<RunSummary> {
        let started = Instant::now();
        let mut steps = 0;
        while self.revert_one_step(name)? {
            steps += 1;
            if started.elapsed() >= budget {
                break;
            }
        }
        Ok(RunSummary {
            steps,
            finished: self.migration_state(name).is_none(),
            elapsed: started.elapsed(),
        })
    }

    /// A recorded migration that lists `name` among its dependencies
    fn applied_dependent(&self, name: &str) -> Option<String> {
        let mut candidates = self.registry.names();
        let mut unregistered: Vec<&String> = self
            .states
            .keys()
            .filter(|k| !self.registry.contains(k))
            .collect();
        unregistered.sort();
        candidates.extend(unregistered.into_iter().cloned());

        candidates.into_iter().find(|candidate| {
            candidate != name
                && self.states.get(candidate).is_some_and(|state| {
                    state.depends_on.iter().any(|dep| normalize_name(dep) == name)
                })
        })
    }

    fn try_apply(&mut self, name: &str) -> Result<bool> {
        let Some(migration) = self.registry.get(name).cloned() else {
            self.emit(
                MigrationEvent::NotValid {
                    name: name.to_string(),
                },
                Verbosity::Normal,
            );
            return Ok(false);
        };

        let recorded = self.states.get(name).cloned();
        let mut state = recorded
            .clone()
            .unwrap_or_else(|| MigrationState::new(name, migration.depends_on()));

        for dep in &state.depends_on {
            if let Some(missing) = self.unfulfillable(dep) {
                return Err(Error::UnfulfillableDependency {
                    migration: name.to_string(),
                    dependency: missing,
                });
            }
            if !self.is_complete(dep) {
                // recorded as started but no longer registered: nothing can finish it
                if !self.registry.contains(dep) {
                    return Err(Error::UnfulfillableDependency {
                        migration: name.to_string(),
                        dependency: normalize_name(dep).to_string(),
                    });
                }
                self.emit(
                    MigrationEvent::ApplyDependencies {
                        name: name.to_string(),
                    },
                    Verbosity::Debug,
                );
                let dep = normalize_name(dep).to_string();
                return self.try_apply(&dep);
            }
        }

        if recorded.is_none() {
            let ctx = MigrationContext::new(self.conn, &self.tables);
            if migration.effectively_installed(&ctx)? {
                state.schema_done = true;
                state.data_done = true;
                self.emit(
                    MigrationEvent::EffectivelyInstalled {
                        name: name.to_string(),
                    },
                    Verbosity::Verbose,
                );
                self.record(name, Phase::Schema, true, state)?;
                return Ok(true);
            }
            state.start_time = now();
        }

        if !state.schema_done {
            let steps = schema_steps(&migration.update_schema());
            self.announce(Phase::Schema, name, state.data_state.as_ref());
            let run = match self.run_phase(&steps, state.data_state.as_ref(), Phase::Schema) {
                Ok(run) => run,
                Err(e) => {
                    // earlier schema kinds were undone; restart the phase next time
                    if recorded.is_some() {
                        state.data_state = None;
                        self.record(name, Phase::Schema, false, state)?;
                    }
                    return Err(e);
                }
            };
            match run.outcome {
                StepOutcome::Completed => {
                    state.schema_done = true;
                    state.data_state = None;
                    self.emit(MigrationEvent::done(Phase::Schema, name, run.total), Verbosity::Normal);
                }
                StepOutcome::InProgress(checkpoint) => {
                    state.data_state = Some(checkpoint);
                    self.emit(
                        MigrationEvent::in_progress(Phase::Schema, name, run.elapsed),
                        Verbosity::VeryVerbose,
                    );
                }
            }
            self.record(name, Phase::Schema, false, state)?;
        } else if !state.data_done {
            let steps = migration.update_data();
            self.announce(Phase::Data, name, state.data_state.as_ref());
            let run = match self.run_phase(&steps, state.data_state.as_ref(), Phase::Data) {
                Ok(run) => run,
                Err(e) => {
                    warn!("Data step of {} failed, reverting its schema changes", name);
                    state.data_state = None;
                    self.record(name, Phase::Data, false, state)?;
                    self.revert_schema_fully(name);
                    return Err(e);
                }
            };
            match run.outcome {
                StepOutcome::Completed => {
                    state.data_done = true;
                    state.data_state = None;
                    state.end_time = now();
                    self.emit(MigrationEvent::done(Phase::Data, name, run.total), Verbosity::Normal);
                    info!("Migration {} applied", name);
                }
                StepOutcome::InProgress(checkpoint) => {
                    state.data_state = Some(checkpoint);
                    self.emit(
                        MigrationEvent::in_progress(Phase::Data, name, run.elapsed),
                        Verbosity::VeryVerbose,
                    );
                }
            }
            self.record(name, Phase::Data, false, state)?;
        }
        Ok(true)
    }

    fn try_revert(&mut self, name: &str) -> Result<bool> {
        let Some(mut state) = self.states.get(name).cloned() else {
            return Ok(false);
        };
        let migration: Arc<dyn Migration> = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownMigration(name.to_string()))?;

        if state.data_done {
            let steps = revert_data_steps(migration.as_ref());
            self.announce(Phase::RevertData, name, state.data_state.as_ref());
            let run = match self.run_phase(&steps, state.data_state.as_ref(), Phase::RevertData) {
                Ok(run) => run,
                Err(e) => {
                    state.data_state = None;
                    self.record(name, Phase::RevertData, false, state)?;
                    return Err(e);
                }
            };
            match run.outcome {
                StepOutcome::Completed => {
                    state.data_done = false;
                    state.data_state = None;
                    self.emit(
                        MigrationEvent::done(Phase::RevertData, name, run.total),
                        Verbosity::Normal,
                    );
                }
                StepOutcome::InProgress(checkpoint) => {
                    state.data_state = Some(checkpoint);
                    self.emit(
                        MigrationEvent::in_progress(Phase::RevertData, name, run.elapsed),
                        Verbosity::VeryVerbose,
                    );
                }
            }
            self.record(name, Phase::RevertData, false, state)?;
            return Ok(true);
        }

        if let Some(checkpoint) = state.data_state.take_if(|c| c.phase == Phase::Data) {
            // data phase was interrupted: undo the steps it already ran
            let steps = migration.update_data();
            let applied = &steps[..checkpoint.step.min(steps.len())];
            debug!("Undoing {} applied data step(s) of {}", applied.len(), name);
            let ctx = MigrationContext::new(self.conn, &self.tables);
            StepExecutor::new(&self.tools).undo(&ctx, applied);
            self.record(name, Phase::RevertData, false, state)?;
            return Ok(true);
        }

        let steps = schema_steps(&migration.revert_schema());
        self.announce(Phase::RevertSchema, name, state.data_state.as_ref());
        let run = match self.run_phase(&steps, state.data_state.as_ref(), Phase::RevertSchema) {
            Ok(run) => run,
            Err(e) => {
                state.data_state = None;
                self.record(name, Phase::RevertSchema, false, state)?;
                return Err(e);
            }
        };
        match run.outcome {
            StepOutcome::Completed => {
                self.store.delete(self.conn, name)?;
                self.states.remove(name);
                self.fulfillable.borrow_mut().clear();
                self.last_run = Some(LastRun {
                    name: name.to_string(),
                    task: Phase::RevertSchema,
                    effectively_installed: false,
                    state: MigrationState::new(name, state.depends_on),
                });
                self.emit(
                    MigrationEvent::done(Phase::RevertSchema, name, run.total),
                    Verbosity::Normal,
                );
                info!("Migration {} reverted", name);
            }
            StepOutcome::InProgress(checkpoint) => {
                state.data_state = Some(checkpoint);
                self.emit(
                    MigrationEvent::in_progress(Phase::RevertSchema, name, run.elapsed),
                    Verbosity::VeryVerbose,
                );
                self.record(name, Phase::RevertSchema, false, state)?;
            }
        }
        Ok(true)
    }

    /// Drop the schema changes of a migration whose data phase failed
    ///
    /// Failures are logged; the caller returns the original error.
    fn revert_schema_fully(&mut self, name: &str) {
        while self.states.contains_key(name) {
            match self.try_revert(name) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!("Could not revert schema of {}: {}", name, e);
                    break;
                }
            }
        }
    }

    fn run_phase(
        &self,
        steps: &[DataStep],
        checkpoint: Option<&Checkpoint>,
        phase: Phase,
    ) -> Result<PhaseRun> {
        let previous = checkpoint
            .filter(|c| c.phase == phase)
            .map_or(0.0, |c| c.total_time);
        let ctx = MigrationContext::new(self.conn, &self.tables);
        let started = Instant::now();
        let mut outcome = StepExecutor::new(&self.tools).process(&ctx, steps, checkpoint, phase)?;
        let elapsed = started.elapsed().as_secs_f64();
        if let StepOutcome::InProgress(checkpoint) = &mut outcome {
            checkpoint.total_time = previous + elapsed;
        }
        Ok(PhaseRun {
            outcome,
            elapsed,
            total: previous + elapsed,
        })
    }

    /// Emit the running event: verbose when the phase starts, debug on resume
    fn announce(&self, phase: Phase, name: &str, checkpoint: Option<&Checkpoint>) {
        let resumed = checkpoint.is_some_and(|c| c.phase == phase);
        let verbosity = if resumed {
            Verbosity::Debug
        } else {
            Verbosity::Verbose
        };
        self.emit(MigrationEvent::running(phase, name), verbosity);
    }

    fn record(
        &mut self,
        name: &str,
        task: Phase,
        effectively_installed: bool,
        state: MigrationState,
    ) -> Result<()> {
        self.store.save(self.conn, &state)?;
        self.last_run = Some(LastRun {
            name: name.to_string(),
            task,
            effectively_installed,
            state: state.clone(),
        });
        self.states.insert(name.to_string(), state);
        Ok(())
    }

    fn emit(&self, event: MigrationEvent, verbosity: Verbosity) {
        self.output.write(&event, verbosity);
    }

    /// Run `f` inside a savepoint, committed whether it succeeds or not
    ///
    /// Compensating writes made on the failure path must survive, so the
    /// savepoint is always released. The in-memory states are reloaded
    /// after a failure to match what was written.
    fn in_unit<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.conn.execute_batch("SAVEPOINT migration_unit")?;
        let result = f(self);
        self.conn.execute_batch("RELEASE migration_unit")?;
        if result.is_err() {
            self.load_migration_state()?;
        }
        result
    }
}

impl std::fmt::Debug for Migrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("migrations", &self.migrations)
            .field("states", &self.states.len())
            .field("last_run", &self.last_run)
            .finish_non_exhaustive()
    }
}
