use std::sync::Mutex;

use serde::Serialize;

use crate::ai::llm::TokenUsage;

/// USD per 1K tokens as (prompt, completion). Most specific prefix first.
const MODEL_COST_PER_1K_TOKENS: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.000_15, 0.000_6),
    ("gpt-4o", 0.002_5, 0.01),
    ("gpt-4-turbo", 0.01, 0.03),
    ("gpt-4-32k", 0.06, 0.12),
    ("gpt-4", 0.03, 0.06),
    ("gpt-35-turbo-16k", 0.003, 0.004),
    ("gpt-35-turbo-instruct", 0.001_5, 0.002),
    ("gpt-35-turbo", 0.001_5, 0.002),
];

/// Token and cost totals for one agent invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageStats {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub successful_requests: u32,
}

/// Accumulates usage across every model call made while it is alive.
#[derive(Debug, Default)]
pub struct UsageTracker {
    stats: Mutex<UsageStats>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, model: &str, usage: Option<&TokenUsage>) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.successful_requests += 1;

        let Some(usage) = usage else {
            return;
        };
        stats.prompt_tokens += usage.prompt_tokens;
        stats.completion_tokens += usage.completion_tokens;
        stats.total_tokens += usage.total_tokens;

        match model_cost(model) {
            Some((prompt_rate, completion_rate)) => {
                stats.total_cost += usage.prompt_tokens as f64 / 1000.0 * prompt_rate
                    + usage.completion_tokens as f64 / 1000.0 * completion_rate;
            }
            None => {
                tracing::debug!("No pricing for model '{}'; cost not counted", model);
            }
        }
    }

    pub fn snapshot(&self) -> UsageStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Normalize names like `gpt-3.5-turbo-0125` or `GPT-4o-2024-05-13` and look them up.
fn model_cost(model: &str) -> Option<(f64, f64)> {
    let normalized = model.to_ascii_lowercase().replace("gpt-3.5", "gpt-35");
    MODEL_COST_PER_1K_TOKENS
        .iter()
        .find(|(prefix, _, _)| normalized.starts_with(prefix))
        .map(|&(_, prompt, completion)| (prompt, completion))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u64, completion: u64) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    #[test]
    fn accumulates_across_calls() {
        let tracker = UsageTracker::new();
        tracker.record("gpt-35-turbo", Some(&usage(1000, 0)));
        tracker.record("gpt-35-turbo", Some(&usage(0, 1000)));

        let stats = tracker.snapshot();
        assert_eq!(stats.prompt_tokens, 1000);
        assert_eq!(stats.completion_tokens, 1000);
        assert_eq!(stats.total_tokens, 2000);
        assert_eq!(stats.successful_requests, 2);
        assert!((stats.total_cost - 0.0035).abs() < 1e-9);
    }

    #[test]
    fn most_specific_prefix_wins() {
        assert_eq!(model_cost("gpt-4o-mini-2024-07-18"), Some((0.000_15, 0.000_6)));
        assert_eq!(model_cost("gpt-4o-2024-05-13"), Some((0.002_5, 0.01)));
        assert_eq!(model_cost("GPT-3.5-turbo-16k"), Some((0.003, 0.004)));
    }

    #[test]
    fn unknown_model_counts_tokens_but_not_cost() {
        let tracker = UsageTracker::new();
        tracker.record("llama-3-70b", Some(&usage(10, 5)));
        tracker.record("llama-3-70b", None);

        let stats = tracker.snapshot();
        assert_eq!(stats.total_tokens, 15);
        assert_eq!(stats.total_cost, 0.0);
        assert_eq!(stats.successful_requests, 2);
    }
}
