//! Fault injection for the emulated camera.
//!
//! Tests use this to make the emulated device reject writes, lose
//! communication, or fail an operation after a number of successful calls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{DriverError, DriverErrorKind, DriverResult};

/// Driver name used in injected errors.
pub(crate) const DRIVER_TYPE: &str = "emulation";

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `query_features`.
    Query,
    /// `read_feature`.
    Read,
    /// `write_feature`.
    Write,
    /// `invoke_feature`.
    Invoke,
    /// `start_stream`.
    StartStream,
    /// `grab_frame`.
    Grab,
}

#[derive(Debug, Default)]
struct FaultState {
    communication_lost: bool,
    rejected_features: HashSet<String>,
    reject_all_writes: bool,
    fail_after: HashMap<Operation, u32>,
    counts: HashMap<Operation, u32>,
    failure_rate: f64,
}

/// Shared fault configuration. Clones refer to the same state.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    state: Arc<Mutex<FaultState>>,
    rng: Arc<Mutex<StdRng>>,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::none()
    }
}

impl FaultInjector {
    /// No faults.
    pub fn none() -> Self {
        Self {
            state: Arc::new(Mutex::new(FaultState::default())),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(0x5eed))),
        }
    }

    /// Every operation fails with probability `rate` (seeded, reproducible).
    pub fn random_failures_seeded(rate: f64, seed: u64) -> Self {
        let faults = Self {
            state: Arc::new(Mutex::new(FaultState::default())),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        };
        faults.state.lock().failure_rate = rate.clamp(0.0, 1.0);
        faults
    }

    /// Make the device reject writes to `feature` (matched by name).
    pub fn reject_writes_to(&self, feature: &str) {
        self.state.lock().rejected_features.insert(feature.to_string());
    }

    /// Make the device reject every write.
    pub fn reject_all_writes(&self) {
        self.state.lock().reject_all_writes = true;
    }

    /// Drop communication: every operation fails until restored.
    pub fn drop_communication(&self) {
        self.state.lock().communication_lost = true;
    }

    /// Restore communication.
    pub fn restore_communication(&self) {
        self.state.lock().communication_lost = false;
    }

    /// Let `operation` succeed `count` more times, then fail.
    pub fn fail_after(&self, operation: Operation, count: u32) {
        let mut state = self.state.lock();
        state.counts.insert(operation, 0);
        state.fail_after.insert(operation, count);
    }

    /// Clear every configured fault.
    pub fn clear(&self) {
        *self.state.lock() = FaultState::default();
    }

    /// Check whether `operation` should fail.
    pub(crate) fn check(&self, operation: Operation) -> DriverResult<()> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Communication,
                "communication lost",
            ));
        }

        if let Some(limit) = state.fail_after.get(&operation).copied() {
            let count = state.counts.entry(operation).or_insert(0);
            *count += 1;
            if *count > limit {
                return Err(DriverError::new(
                    DRIVER_TYPE,
                    DriverErrorKind::Hardware,
                    format!("injected failure after {} {:?} operations", limit, operation),
                ));
            }
        }

        let rate = state.failure_rate;
        drop(state);
        if rate > 0.0 && self.rng.lock().gen_bool(rate) {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Hardware,
                format!("random failure on {:?}", operation),
            ));
        }
        Ok(())
    }

    /// Check whether a write to `feature` should be rejected.
    pub(crate) fn check_write(&self, feature: &str) -> DriverResult<()> {
        self.check(Operation::Write)?;
        let state = self.state.lock();
        if state.reject_all_writes || state.rejected_features.contains(feature) {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Rejected,
                format!("write to '{}' rejected", feature),
            ));
        }
        Ok(())
    }
}
