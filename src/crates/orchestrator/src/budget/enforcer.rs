//! Runtime budget enforcement: records usage as it happens and halts
//! dispatch once a run's token or cost ceiling is crossed.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;
use workflow_core::{BudgetCheck, BudgetState};

#[derive(Clone)]
pub struct Enforcer {
    state: Arc<Mutex<BudgetState>>,
}

impl Enforcer {
    pub fn new(max_tokens: Option<u64>, max_cost: Option<f64>) -> Self {
        Self { state: Arc::new(Mutex::new(BudgetState::new(max_tokens, max_cost))) }
    }

    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    /// Record usage and evaluate thresholds as one atomic operation.
    pub fn record_and_check(&self, tokens: u64, cost: f64) -> BudgetCheck {
        let mut state = self.state.lock();
        state.record(tokens, cost);
        state.check()
    }

    pub fn halt(&self) -> bool {
        let transitioned = self.state.lock().halt();
        if transitioned {
            warn!("budget enforcer halted dispatch");
        }
        transitioned
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }

    pub fn snapshot(&self) -> BudgetState {
        self.state.lock().clone()
    }
}
