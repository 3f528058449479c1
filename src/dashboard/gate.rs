use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use tracing::debug;

pub const STRATEGY_GATE_KEY: &str = "strategy";
pub const STRATEGY_PARAMS_GATE_KEY: &str = "strategy-params";

pub fn position_gate_key(order_id: &str) -> String {
    format!("position:{order_id}")
}

pub fn engine_gate_key(engine_id: &str) -> String {
    format!("engine:{engine_id}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "result", rename_all = "camelCase")]
pub enum MutationOutcome<T> {
    Completed(T),
    AlreadyInFlight,
}

impl<T> MutationOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Tracks which user mutations are currently running, one per key.
#[derive(Debug, Default)]
pub struct MutationGate {
    in_flight: Mutex<HashSet<String>>,
}

/// Held while a mutation runs; dropping it reopens the key.
#[derive(Debug)]
pub struct MutationPermit<'a> {
    gate: &'a MutationGate,
    key: String,
}

impl Drop for MutationPermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.lock().remove(&self.key);
    }
}

impl MutationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: &str) -> Option<MutationPermit<'_>> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(key.to_string()) {
            return None;
        }
        Some(MutationPermit {
            gate: self,
            key: key.to_string(),
        })
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().contains(key)
    }

    /// Runs `mutation` unless another one holds `key`. The key is released on
    /// completion, on failure, and when the caller drops the returned future.
    pub async fn run<F, T>(&self, key: &str, mutation: F) -> MutationOutcome<T>
    where
        F: Future<Output = T>,
    {
        let Some(_permit) = self.try_acquire(key) else {
            debug!(key, "mutation already in flight; ignoring request");
            return MutationOutcome::AlreadyInFlight;
        };
        MutationOutcome::Completed(mutation.await)
    }
}
