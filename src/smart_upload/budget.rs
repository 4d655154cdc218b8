//! Per-session LLM resource budget.
//!
//! The counter is reserved at the start of each request (pre-send check), so
//! `calls_used <= max_calls` holds at every suspension point. Budgets are
//! never shared across sessions.

use crate::providers::TokenUsage;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Session LLM budget exhausted: {calls_used}/{max_calls} calls, {input_tokens_used}/{max_input_tokens} input tokens")]
pub struct BudgetExhausted {
    pub calls_used: u32,
    pub max_calls: u32,
    pub input_tokens_used: u64,
    pub max_input_tokens: u64,
}

/// Mutable per-job counters, closed when the job completes.
#[derive(Debug)]
pub struct SessionBudget {
    max_calls: u32,
    max_input_tokens: u64,
    calls_used: u32,
    input_tokens_used: u64,
}

impl SessionBudget {
    pub fn new(max_calls: u32, max_input_tokens: u64) -> Self {
        Self {
            max_calls,
            max_input_tokens,
            calls_used: 0,
            input_tokens_used: 0,
        }
    }

    /// Reserve one call before sending it. Fails without mutating when either
    /// cap is already reached.
    pub fn try_reserve_call(&mut self) -> Result<(), BudgetExhausted> {
        if self.calls_used >= self.max_calls || self.input_tokens_used >= self.max_input_tokens {
            return Err(self.exhausted());
        }
        self.calls_used += 1;
        Ok(())
    }

    /// Record usage reported by the provider after a call returns.
    pub fn record_usage(&mut self, usage: &TokenUsage) {
        if let Some(input) = usage.input_tokens {
            self.input_tokens_used += input as u64;
        }
    }

    pub fn calls_used(&self) -> u32 {
        self.calls_used
    }

    pub fn input_tokens_used(&self) -> u64 {
        self.input_tokens_used
    }

    pub fn calls_remaining(&self) -> u32 {
        self.max_calls.saturating_sub(self.calls_used)
    }

    fn exhausted(&self) -> BudgetExhausted {
        BudgetExhausted {
            calls_used: self.calls_used,
            max_calls: self.max_calls,
            input_tokens_used: self.input_tokens_used,
            max_input_tokens: self.max_input_tokens,
        }
    }
}
