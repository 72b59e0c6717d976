//! Budget accounting data model, mutated by the Enforcer at runtime.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetCheck {
    Ok,
    /// First crossing of the 80% threshold; the caller should emit a
    /// warning event exactly once per run.
    Warning,
    Exceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BudgetState {
    pub max_tokens: Option<u64>,
    pub max_cost: Option<f64>,
    pub used_tokens: u64,
    pub used_cost: f64,
    pub warned: bool,
    pub halted: bool,
}

const WARNING_THRESHOLD: f64 = 0.8;

impl BudgetState {
    pub fn new(max_tokens: Option<u64>, max_cost: Option<f64>) -> Self {
        Self { max_tokens, max_cost, used_tokens: 0, used_cost: 0.0, warned: false, halted: false }
    }

    /// Whether either ceiling is set. With neither set the Enforcer runs
    /// in no-op mode.
    pub fn is_bounded(&self) -> bool {
        self.max_tokens.is_some() || self.max_cost.is_some()
    }

    pub fn record(&mut self, tokens: u64, cost: f64) {
        self.used_tokens += tokens;
        self.used_cost += cost;
    }

    fn exceeded(&self) -> bool {
        self.max_tokens.is_some_and(|m| self.used_tokens >= m)
            || self.max_cost.is_some_and(|m| self.used_cost >= m)
    }

    fn past_warning_threshold(&self) -> bool {
        self.max_tokens.is_some_and(|m| self.used_tokens as f64 >= m as f64 * WARNING_THRESHOLD)
            || self.max_cost.is_some_and(|m| self.used_cost >= m * WARNING_THRESHOLD)
    }

    /// Evaluate current usage against the ceilings. Returns `Warning` at
    /// most once per run (the first call that crosses 80%); subsequent
    /// calls above that line but below 100% return `Ok`.
    pub fn check(&mut self) -> BudgetCheck {
        if !self.is_bounded() {
            return BudgetCheck::Ok;
        }
        if self.exceeded() {
            return BudgetCheck::Exceeded;
        }
        if self.past_warning_threshold() && !self.warned {
            self.warned = true;
            return BudgetCheck::Warning;
        }
        BudgetCheck::Ok
    }

    /// Mark the run halted. Returns `false` if it was already halted, so
    /// callers can avoid double-publishing a halt event.
    pub fn halt(&mut self) -> bool {
        if self.halted {
            false
        } else {
            self.halted = true;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_budget_never_warns_or_halts() {
        let mut b = BudgetState::new(None, None);
        b.record(1_000_000, 1000.0);
        assert_eq!(b.check(), BudgetCheck::Ok);
    }

    #[test]
    fn warning_fires_once_at_eighty_percent() {
        let mut b = BudgetState::new(Some(1000), None);
        b.record(800, 0.0);
        assert_eq!(b.check(), BudgetCheck::Warning);
        assert_eq!(b.check(), BudgetCheck::Ok);
    }

    #[test]
    fn exceeded_takes_priority_over_warning() {
        let mut b = BudgetState::new(Some(1000), None);
        b.record(1000, 0.0);
        assert_eq!(b.check(), BudgetCheck::Exceeded);
    }

    #[test]
    fn halt_is_idempotent() {
        let mut b = BudgetState::new(Some(1000), None);
        assert!(b.halt());
        assert!(!b.halt());
    }
}
