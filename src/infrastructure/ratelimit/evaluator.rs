//! Fixed-window ratelimit evaluation
//!
//! Every rule is counted independently under
//! `ratelimit:{subject}:{rule}:{durationMs}:{windowStart}`, so a new window is
//! simply a new counter and old ones expire on their own.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::ratelimit::{CounterStore, RatelimitRequest, RatelimitResult, RatelimitRule};
use crate::infrastructure::observability::{record_ratelimit_backend_error, record_ratelimit_check};

/// Start of the window containing `now_ms`
pub fn window_start(now_ms: i64, duration_ms: i64) -> i64 {
    now_ms.div_euclid(duration_ms) * duration_ms
}

pub fn counter_key(subject: &str, rule: &str, duration_ms: i64, window_start: i64) -> String {
    format!(
        "ratelimit:{}:{}:{}:{}",
        subject, rule, duration_ms, window_start
    )
}

pub struct RatelimitEvaluator {
    counters: Arc<dyn CounterStore>,
}

impl RatelimitEvaluator {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self { counters }
    }

    /// Evaluate `rules` for `subject` at the current time
    pub async fn evaluate(
        &self,
        subject: &str,
        rules: &[RatelimitRule],
        requests: &[RatelimitRequest],
    ) -> Vec<RatelimitResult> {
        self.evaluate_at(subject, rules, requests, Utc::now().timestamp_millis())
            .await
    }

    /// Charge every requested rule with its requested cost and every auto-applied
    /// rule that was not requested with a cost of 1. Requested names without a
    /// matching rule are ignored.
    pub async fn evaluate_at(
        &self,
        subject: &str,
        rules: &[RatelimitRule],
        requests: &[RatelimitRequest],
        now_ms: i64,
    ) -> Vec<RatelimitResult> {
        let mut results = Vec::new();

        for rule in rules {
            let requested: Vec<&RatelimitRequest> =
                requests.iter().filter(|r| r.name == rule.name).collect();

            let cost = if !requested.is_empty() {
                requested
                    .iter()
                    .fold(0i64, |total, r| total.saturating_add(r.cost.max(0)))
            } else if rule.auto_apply {
                1
            } else {
                continue;
            };

            results.push(self.evaluate_rule(subject, rule, cost, now_ms).await);
        }

        results
    }

    /// Charge a single rule; a cost above the rule's limit can never fit and is
    /// rejected without touching the counter
    pub async fn evaluate_rule(
        &self,
        subject: &str,
        rule: &RatelimitRule,
        cost: i64,
        now_ms: i64,
    ) -> RatelimitResult {
        let start = window_start(now_ms, rule.duration_ms);
        let reset_at = start + rule.duration_ms;
        let key = counter_key(subject, &rule.name, rule.duration_ms, start);

        let outcome = if cost <= 0 {
            self.counters.current(&key).await.map(|current| (true, current))
        } else if cost > rule.limit {
            self.counters.current(&key).await.map(|current| (false, current))
        } else {
            let ttl = Duration::from_millis(rule.duration_ms.unsigned_abs());
            self.counters
                .charge(&key, cost, rule.limit, ttl)
                .await
                .map(|charge| (charge.passed, charge.current))
        };

        let result = match outcome {
            Ok((passed, current)) => RatelimitResult {
                name: rule.name.clone(),
                passed,
                limit: rule.limit,
                remaining: rule.limit.saturating_sub(current).max(0),
                reset_at,
            },
            Err(e) => {
                let passed = cost <= 0 || (rule.is_async && cost <= rule.limit);
                warn!(
                    subject,
                    rule = %rule.name,
                    fail_open = passed,
                    "Ratelimit counter unavailable: {}",
                    e
                );
                record_ratelimit_backend_error(passed);

                RatelimitResult {
                    name: rule.name.clone(),
                    passed,
                    limit: rule.limit,
                    remaining: if passed { rule.limit } else { 0 },
                    reset_at,
                }
            }
        };

        debug!(
            subject,
            rule = %result.name,
            cost,
            passed = result.passed,
            remaining = result.remaining,
            "Evaluated ratelimit"
        );
        record_ratelimit_check(result.passed);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ratelimit::MockCounterStore;
    use crate::domain::DomainError;
    use crate::infrastructure::ratelimit::InMemoryCounterStore;

    const DAY_MS: i64 = 86_400_000;
    const NOW: i64 = 1_700_000_000_000;

    fn evaluator() -> RatelimitEvaluator {
        RatelimitEvaluator::new(Arc::new(InMemoryCounterStore::new()))
    }

    fn failing_evaluator() -> RatelimitEvaluator {
        let mut counters = MockCounterStore::new();
        counters
            .expect_charge()
            .returning(|_, _, _, _| Err(DomainError::counter("connection refused")));
        counters
            .expect_current()
            .returning(|_| Err(DomainError::counter("connection refused")));
        RatelimitEvaluator::new(Arc::new(counters))
    }

    #[test]
    fn test_window_start() {
        assert_eq!(window_start(1_500, 1_000), 1_000);
        assert_eq!(window_start(2_000, 1_000), 2_000);
        assert_eq!(window_start(NOW, DAY_MS) % DAY_MS, 0);
    }

    #[test]
    fn test_counter_key_format() {
        assert_eq!(
            counter_key("key_1", "requests", 1000, 5000),
            "ratelimit:key_1:requests:1000:5000"
        );
    }

    #[tokio::test]
    async fn test_daily_limit_blocks_eleventh_request() {
        let evaluator = evaluator();
        let rules = vec![RatelimitRule::new("requests", 10, DAY_MS)];
        let requests = vec![RatelimitRequest::new("requests")];

        for i in 0..10 {
            let results = evaluator.evaluate_at("key_1", &rules, &requests, NOW + i).await;
            assert!(results[0].passed);
            assert_eq!(results[0].remaining, 9 - i);
        }

        let results = evaluator.evaluate_at("key_1", &rules, &requests, NOW + 10).await;
        assert!(!results[0].passed);
        assert_eq!(results[0].remaining, 0);

        let reset_at = results[0].reset_at;
        assert_eq!(reset_at, window_start(NOW, DAY_MS) + DAY_MS);

        let results = evaluator.evaluate_at("key_1", &rules, &requests, reset_at).await;
        assert!(results[0].passed);
        assert_eq!(results[0].remaining, 9);
    }

    #[tokio::test]
    async fn test_unrequested_rules_are_skipped_unless_auto_applied() {
        let evaluator = evaluator();
        let rules = vec![
            RatelimitRule::new("tokens", 100, DAY_MS),
            RatelimitRule::new("requests", 5, DAY_MS).with_auto_apply(true),
        ];

        let results = evaluator.evaluate_at("key_1", &rules, &[], NOW).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "requests");
        assert_eq!(results[0].remaining, 4);

        let results = evaluator
            .evaluate_at("key_1", &rules, &[RatelimitRequest::new("unknown")], NOW)
            .await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_cost_larger_than_capacity_fails_without_charging() {
        let evaluator = evaluator();
        let rules = vec![RatelimitRule::new("tokens", 10, DAY_MS)];

        let results = evaluator
            .evaluate_at("key_1", &rules, &[RatelimitRequest::new("tokens").with_cost(11)], NOW)
            .await;
        assert!(!results[0].passed);
        assert_eq!(results[0].remaining, 10);

        let results = evaluator
            .evaluate_at("key_1", &rules, &[RatelimitRequest::new("tokens").with_cost(10)], NOW)
            .await;
        assert!(results[0].passed);
        assert_eq!(results[0].remaining, 0);
    }

    #[tokio::test]
    async fn test_huge_cost_does_not_disable_the_limit() {
        let evaluator = evaluator();
        let rule = RatelimitRule::new("ns", 10, DAY_MS);

        assert!(evaluator.evaluate_rule("subject", &rule, 1, NOW).await.passed);

        let huge = evaluator.evaluate_rule("subject", &rule, i64::MAX, NOW).await;
        assert!(!huge.passed);
        assert_eq!(huge.remaining, 9);

        let mut passed = 0;
        for _ in 0..100 {
            if evaluator.evaluate_rule("subject", &rule, 1, NOW).await.passed {
                passed += 1;
            }
        }
        assert_eq!(passed, 9);
    }

    #[tokio::test]
    async fn test_summed_costs_saturate() {
        let evaluator = evaluator();
        let rules = vec![RatelimitRule::new("tokens", 10, DAY_MS)];
        let requests = vec![
            RatelimitRequest::new("tokens").with_cost(i64::MAX),
            RatelimitRequest::new("tokens").with_cost(i64::MAX),
        ];

        let results = evaluator.evaluate_at("key_1", &rules, &requests, NOW).await;
        assert!(!results[0].passed);
        assert_eq!(results[0].remaining, 10);
    }

    #[tokio::test]
    async fn test_negative_cost_cannot_offset_a_charge() {
        let evaluator = evaluator();
        let rules = vec![RatelimitRule::new("requests", 1, DAY_MS).with_auto_apply(true)];

        assert!(evaluator.evaluate_at("key_1", &rules, &[], NOW).await[0].passed);
        assert!(!evaluator.evaluate_at("key_1", &rules, &[], NOW).await[0].passed);

        let requests = vec![
            RatelimitRequest::new("requests").with_cost(-3),
            RatelimitRequest::new("requests").with_cost(1),
        ];
        let results = evaluator.evaluate_at("key_1", &rules, &requests, NOW).await;
        assert!(!results[0].passed);
    }

    #[tokio::test]
    async fn test_failing_rule_does_not_stop_others() {
        let evaluator = evaluator();
        let rules = vec![
            RatelimitRule::new("small", 1, DAY_MS),
            RatelimitRule::new("large", 100, DAY_MS),
        ];
        let requests = vec![RatelimitRequest::new("small"), RatelimitRequest::new("large")];

        evaluator.evaluate_at("key_1", &rules, &requests, NOW).await;
        let results = evaluator.evaluate_at("key_1", &rules, &requests, NOW).await;

        assert!(!results[0].passed);
        assert!(results[1].passed);
        assert_eq!(results[1].remaining, 98);
    }

    #[tokio::test]
    async fn test_zero_cost_passes_without_charging() {
        let evaluator = evaluator();
        let rules = vec![RatelimitRule::new("requests", 1, DAY_MS)];

        evaluator
            .evaluate_at("key_1", &rules, &[RatelimitRequest::new("requests")], NOW)
            .await;

        let results = evaluator
            .evaluate_at("key_1", &rules, &[RatelimitRequest::new("requests").with_cost(0)], NOW)
            .await;
        assert!(results[0].passed);
        assert_eq!(results[0].remaining, 0);
    }

    #[tokio::test]
    async fn test_subjects_are_counted_separately() {
        let evaluator = evaluator();
        let rules = vec![RatelimitRule::new("requests", 1, DAY_MS)];
        let requests = vec![RatelimitRequest::new("requests")];

        assert!(evaluator.evaluate_at("a", &rules, &requests, NOW).await[0].passed);
        assert!(evaluator.evaluate_at("b", &rules, &requests, NOW).await[0].passed);
        assert!(!evaluator.evaluate_at("a", &rules, &requests, NOW).await[0].passed);
    }

    #[tokio::test]
    async fn test_backend_failure_fails_open_for_async_rules() {
        let rules = vec![RatelimitRule::new("requests", 5, DAY_MS).with_async(true)];

        let results = failing_evaluator()
            .evaluate_at("key_1", &rules, &[RatelimitRequest::new("requests")], NOW)
            .await;
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn test_backend_failure_fails_closed_for_sync_rules() {
        let rules = vec![RatelimitRule::new("requests", 5, DAY_MS)];

        let results = failing_evaluator()
            .evaluate_at("key_1", &rules, &[RatelimitRequest::new("requests")], NOW)
            .await;
        assert!(!results[0].passed);
        assert_eq!(results[0].remaining, 0);
    }
}
