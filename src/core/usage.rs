//! Usage accounting and limit enforcement
//!
//! A `UsageLedger` is shared by reference across a whole lineage. Every
//! Context derived without `reset` points at the same ledger, so nested
//! invokes drain a single budget.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::chunk::TokenUsage;
use super::error::{RuntimeError, RuntimeResult};

/// Monotonically increasing counters of a lineage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUsage {
    /// Number of agent calls started
    pub agent_calls: u64,
    /// Prompt tokens reported by model-bearing agents
    pub input_tokens: u64,
    /// Completion tokens reported by model-bearing agents
    pub output_tokens: u64,
    /// Wall-clock milliseconds accumulated across invokes
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl ContextUsage {
    /// Input + output tokens
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Optional ceilings, immutable once a lineage is created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextLimits {
    /// Maximum number of agent calls in the lineage
    #[serde(default)]
    pub max_agent_invokes: Option<u64>,
    /// Maximum input + output tokens in the lineage
    #[serde(default)]
    pub max_tokens: Option<u64>,
    /// Wall-clock budget in milliseconds, counted from the first invoke
    #[serde(default, rename = "timeout")]
    pub timeout_ms: Option<u64>,
}

impl ContextLimits {
    /// No limits at all
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the agent call ceiling
    pub fn with_max_agent_invokes(mut self, max: u64) -> Self {
        self.max_agent_invokes = Some(max);
        self
    }

    /// Set the token ceiling
    pub fn with_max_tokens(mut self, max: u64) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the timeout in milliseconds
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Get the timeout as a Duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Whether any ceiling is configured
    pub fn is_unbounded(&self) -> bool {
        self.max_agent_invokes.is_none() && self.max_tokens.is_none() && self.timeout_ms.is_none()
    }
}

/// Which ceiling a lineage broke. Kept so later steps fail the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Breach {
    AgentInvokes { used: u64, max: u64 },
    Tokens { used: u64, max: u64 },
}

impl From<Breach> for RuntimeError {
    fn from(breach: Breach) -> Self {
        match breach {
            Breach::AgentInvokes { used, max } => RuntimeError::MaxAgentInvokesExceeded { used, max },
            Breach::Tokens { used, max } => RuntimeError::MaxTokensExceeded { used, max },
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    usage: ContextUsage,
    breach: Option<Breach>,
}

/// Lineage-shared usage counters plus the limits they are checked against
#[derive(Debug, Default)]
pub struct UsageLedger {
    limits: ContextLimits,
    state: Mutex<LedgerState>,
}

impl UsageLedger {
    /// Create a ledger with the given limits
    pub fn new(limits: ContextLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// The limits this ledger enforces
    pub fn limits(&self) -> &ContextLimits {
        &self.limits
    }

    /// Snapshot of the counters
    pub fn snapshot(&self) -> ContextUsage {
        self.state.lock().usage
    }

    /// Fail if an earlier step already broke a ceiling
    pub fn ensure_healthy(&self) -> RuntimeResult<()> {
        match self.state.lock().breach {
            Some(breach) => Err(breach.into()),
            None => Ok(()),
        }
    }

    /// Account for a new agent call.
    ///
    /// Fails when the call would push `agent_calls` past `max_agent_invokes`
    /// or when the token budget is already exceeded. A budget used up
    /// exactly still admits calls. The error names the counter value before
    /// this call.
    pub fn begin_agent_call(&self) -> RuntimeResult<u64> {
        let mut state = self.state.lock();
        if let Some(breach) = state.breach {
            return Err(breach.into());
        }

        if let Some(max) = self.limits.max_agent_invokes {
            if state.usage.agent_calls >= max {
                let breach = Breach::AgentInvokes {
                    used: state.usage.agent_calls,
                    max,
                };
                state.breach = Some(breach);
                return Err(breach.into());
            }
        }

        if let Some(max) = self.limits.max_tokens {
            let used = state.usage.total_tokens();
            if used > max {
                let breach = Breach::Tokens { used, max };
                state.breach = Some(breach);
                return Err(breach.into());
            }
        }

        state.usage.agent_calls += 1;
        Ok(state.usage.agent_calls)
    }

    /// Add token usage reported by an agent and check the token ceiling
    pub fn record_tokens(&self, usage: TokenUsage) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        state.usage.input_tokens += usage.input_tokens;
        state.usage.output_tokens += usage.output_tokens;

        if let Some(breach) = state.breach {
            return Err(breach.into());
        }

        if let Some(max) = self.limits.max_tokens {
            let used = state.usage.total_tokens();
            if used > max {
                let breach = Breach::Tokens { used, max };
                state.breach = Some(breach);
                return Err(breach.into());
            }
        }
        Ok(())
    }

    /// Add wall-clock time spent in an invoke
    pub fn add_duration(&self, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut state = self.state.lock();
        state.usage.duration_ms = state.usage.duration_ms.saturating_add(millis);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_call_limit() {
        let ledger = UsageLedger::new(ContextLimits::new().with_max_agent_invokes(2));
        assert_eq!(ledger.begin_agent_call().unwrap(), 1);
        assert_eq!(ledger.begin_agent_call().unwrap(), 2);

        let err = ledger.begin_agent_call().unwrap_err();
        assert_eq!(err.to_string(), "Exceeded max agent invokes 2/2");
        assert_eq!(ledger.snapshot().agent_calls, 2);

        // The lineage stays failed
        assert!(ledger.ensure_healthy().is_err());
    }

    #[test]
    fn test_token_limit() {
        let ledger = UsageLedger::new(ContextLimits::new().with_max_tokens(200));
        ledger.record_tokens(TokenUsage::new(100, 50)).unwrap();

        let err = ledger.record_tokens(TokenUsage::new(100, 50)).unwrap_err();
        assert_eq!(err.to_string(), "Exceeded max tokens 300/200");

        let err = ledger.begin_agent_call().unwrap_err();
        assert!(err.is_limit_exceeded());
    }

    #[test]
    fn test_token_budget_used_exactly_still_admits_calls() {
        let ledger = UsageLedger::new(ContextLimits::new().with_max_tokens(150));
        ledger.begin_agent_call().unwrap();
        ledger.record_tokens(TokenUsage::new(100, 50)).unwrap();

        assert_eq!(ledger.begin_agent_call().unwrap(), 2);
        assert!(ledger.ensure_healthy().is_ok());

        let err = ledger.record_tokens(TokenUsage::new(1, 0)).unwrap_err();
        assert_eq!(err.to_string(), "Exceeded max tokens 151/150");
    }

    #[test]
    fn test_unlimited_ledger_only_counts() {
        let ledger = UsageLedger::default();
        for _ in 0..10 {
            ledger.begin_agent_call().unwrap();
        }
        ledger.record_tokens(TokenUsage::new(1_000, 1_000)).unwrap();
        ledger.add_duration(Duration::from_millis(15));

        let usage = ledger.snapshot();
        assert_eq!(usage.agent_calls, 10);
        assert_eq!(usage.total_tokens(), 2_000);
        assert_eq!(usage.duration_ms, 15);
        assert!(ledger.limits().is_unbounded());
    }

    #[test]
    fn test_usage_serializes_camel_case() {
        let usage = ContextUsage {
            agent_calls: 1,
            input_tokens: 2,
            output_tokens: 3,
            duration_ms: 4,
        };
        let value = serde_json::to_value(usage).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"agentCalls": 1, "inputTokens": 2, "outputTokens": 3, "duration": 4})
        );
    }
}
