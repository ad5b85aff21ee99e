//! Crash simulation harness.
//!
//! Runs a seeded stream of inserts and erases against an environment on
//! simulated disks, mirroring every acknowledged change in an in-memory
//! model. Whenever an injected fault breaks a commit, both disks crash,
//! the environment is reopened (replaying the journal) and its contents
//! are checked against the model. The change that was in flight may or
//! may not have survived, but nothing else may differ.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::storage::{FaultConfig, SimulatedDisk};
use crate::config::EnvironmentConfig;
use crate::database::Database;
use crate::diagnostics::ErrorChannel;
use crate::environment::Environment;
use crate::error::Error;
use crate::params::{DbFlags, InsertFlags};
use crate::storage::page::MIN_PAGE_SIZE;

const DATABASE: u16 = 1;

type Model = BTreeMap<Vec<u8>, Vec<u8>>;

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Fault injection configuration.
    pub fault_config: FaultConfig,
    /// Number of distinct keys the operations draw from.
    pub key_space: u32,
    /// Largest record written.
    pub max_record_size: usize,
    /// Page size of the simulated environment.
    pub page_size: usize,
}

impl SimulatorConfig {
    /// Create a new simulator config with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            fault_config: FaultConfig::default(),
            key_space: 500,
            max_record_size: 200,
            page_size: MIN_PAGE_SIZE,
        }
    }

    /// Set the fault configuration.
    #[must_use]
    pub const fn with_fault_config(mut self, config: FaultConfig) -> Self {
        self.fault_config = config;
        self
    }

    #[must_use]
    pub const fn with_key_space(mut self, key_space: u32) -> Self {
        self.key_space = key_space;
        self
    }
}

/// Results from a simulation run.
#[derive(Debug, Default)]
pub struct SimulationResult {
    /// The seed used for this simulation.
    pub seed: u64,
    /// Operations attempted.
    pub operations: u64,
    /// Operations that failed because of an injected fault.
    pub faulted_operations: u64,
    /// Crash and reopen cycles.
    pub recoveries: u64,
    /// Differences between the reopened environment and the model.
    pub violations: Vec<String>,
    /// Error that stopped the run, if any.
    pub error: Option<String>,
}

impl SimulationResult {
    /// Check if the simulation passed.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.error.is_none() && self.violations.is_empty()
    }
}

enum Op {
    Insert(Vec<u8>, Vec<u8>),
    Erase(Vec<u8>),
}

/// The main simulator harness.
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    data: SimulatedDisk,
    journal: SimulatedDisk,
    model: Model,
    result: SimulationResult,
}

impl Simulator {
    /// Create a new simulator with the given configuration.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let seed = config.seed;
        Self {
            rng: StdRng::seed_from_u64(seed),
            data: SimulatedDisk::new(seed.wrapping_add(1), config.fault_config.clone()),
            journal: SimulatedDisk::new(seed.wrapping_add(2), config.fault_config.clone()),
            model: Model::new(),
            result: SimulationResult {
                seed,
                ..SimulationResult::default()
            },
            config,
        }
    }

    fn env_config(&self) -> EnvironmentConfig {
        EnvironmentConfig::default()
            .with_page_size(self.config.page_size)
            .with_cache_size(8 * self.config.page_size)
            .with_diagnostics(ErrorChannel::new())
    }

    /// Run `operations` operations, then crash once more and verify.
    pub fn run(mut self, operations: u64) -> SimulationResult {
        let config = self.env_config();
        self.data.set_faults_enabled(false);
        self.journal.set_faults_enabled(false);
        let created = Environment::with_storage(
            self.data.storage(),
            Some(self.journal.storage()),
            &config,
            true,
        )
        .and_then(|env| {
            env.create_database(DATABASE, DbFlags::empty(), &[])?;
            Ok(env)
        });
        let mut env = match created {
            Ok(env) => Some(env),
            Err(e) => {
                self.result.error = Some(format!("create failed: {e}"));
                return self.result;
            }
        };

        let mut done = 0;
        while done < operations && self.result.error.is_none() {
            let Some(current) = env.take() else {
                break;
            };
            env = self.run_until_fault(current, operations - done, &mut done);
        }

        drop(env);
        self.crash_and_reopen(None);
        self.result
    }

    /// Run operations until the budget is spent or one fails with a fault.
    ///
    /// A fault crashes the disks; the reopened environment is returned.
    fn run_until_fault(
        &mut self,
        env: Environment,
        budget: u64,
        done: &mut u64,
    ) -> Option<Environment> {
        self.data.set_faults_enabled(true);
        self.journal.set_faults_enabled(true);
        let db = match env.open_database(DATABASE) {
            Ok(db) => db,
            Err(e) => {
                self.result.error = Some(format!("open_database failed: {e}"));
                return None;
            }
        };

        for _ in 0..budget {
            *done += 1;
            self.result.operations += 1;
            let op = self.next_op();
            match apply(&db, &op) {
                Ok(()) => apply_to_model(&mut self.model, &op),
                Err(Error::KeyNotFound) => {}
                Err(_) => {
                    self.result.faulted_operations += 1;
                    let mut after = self.model.clone();
                    apply_to_model(&mut after, &op);
                    drop(db);
                    drop(env);
                    return self.crash_and_reopen(Some(after));
                }
            }
        }
        Some(env)
    }

    fn next_op(&mut self) -> Op {
        let key = format!("key-{:06}", self.rng.random_range(0..self.config.key_space)).into_bytes();
        if self.rng.random_bool(0.7) {
            let len = self.rng.random_range(0..=self.config.max_record_size);
            let byte = self.rng.random::<u8>();
            Op::Insert(key, vec![byte; len])
        } else {
            Op::Erase(key)
        }
    }

    /// Crash both disks and reopen. `after` is the model including the
    /// change that was in flight, if any.
    fn crash_and_reopen(&mut self, after: Option<Model>) -> Option<Environment> {
        self.data.set_faults_enabled(false);
        self.journal.set_faults_enabled(false);
        self.data.crash();
        self.journal.crash();
        self.result.recoveries += 1;

        let config = self.env_config();
        let env = match Environment::with_storage(
            self.data.storage(),
            Some(self.journal.storage()),
            &config,
            false,
        ) {
            Ok(env) => env,
            Err(e) => {
                self.result.error = Some(format!("reopen failed: {e}"));
                return None;
            }
        };

        let found = match read_all(&env) {
            Ok(found) => found,
            Err(e) => {
                self.result.error = Some(format!("verification failed: {e}"));
                return None;
            }
        };
        if found == self.model {
            return Some(env);
        }
        if let Some(after) = after
            && found == after
        {
            self.model = after;
            return Some(env);
        }
        self.result.violations.push(format!(
            "after recovery {}: {} keys found, {} expected",
            self.result.recoveries,
            found.len(),
            self.model.len()
        ));
        self.result.error = Some("state diverged from the model".to_string());
        None
    }
}

fn apply(db: &Database, op: &Op) -> crate::error::Result<()> {
    match op {
        Op::Insert(key, record) => db.insert(key, record, InsertFlags::OVERWRITE),
        Op::Erase(key) => db.erase(key),
    }
}

fn apply_to_model(model: &mut Model, op: &Op) {
    match op {
        Op::Insert(key, record) => {
            model.insert(key.clone(), record.clone());
        }
        Op::Erase(key) => {
            model.remove(key);
        }
    }
}

fn read_all(env: &Environment) -> crate::error::Result<Model> {
    let db = env.open_database(DATABASE)?;
    let stats = db.check_integrity()?;
    let model = db.iter()?.collect::<crate::error::Result<Model>>()?;
    if stats.keys != model.len() as u64 || db.count()? != model.len() as u64 {
        return Err(Error::corrupted(format!(
            "counters disagree: {} keys walked, {} iterated",
            stats.keys,
            model.len()
        )));
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults_baseline() {
        let result = Simulator::new(SimulatorConfig::new(42)).run(1500);
        assert!(result.passed(), "{result:?}");
        assert_eq!(result.faulted_operations, 0);
        assert_eq!(result.recoveries, 1);
    }

    #[test]
    fn test_low_faults() {
        for seed in 0..4 {
            let config = SimulatorConfig::new(seed).with_fault_config(FaultConfig::low_faults());
            let result = Simulator::new(config).run(800);
            assert!(result.passed(), "seed {seed}: {result:?}");
        }
    }

    #[test]
    fn test_high_faults_small_key_space() {
        for seed in 100..104 {
            let config = SimulatorConfig::new(seed)
                .with_fault_config(FaultConfig::high_faults())
                .with_key_space(50);
            let result = Simulator::new(config).run(400);
            assert!(result.passed(), "seed {seed}: {result:?}");
            assert!(result.recoveries >= 1);
        }
    }

    #[test]
    fn test_same_seed_same_run() {
        let run = || {
            let config = SimulatorConfig::new(9).with_fault_config(FaultConfig::high_faults());
            let result = Simulator::new(config).run(300);
            (
                result.operations,
                result.faulted_operations,
                result.recoveries,
            )
        };
        assert_eq!(run(), run());
    }
}
