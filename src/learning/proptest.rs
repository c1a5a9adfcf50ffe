//! Property-based tests for rule effectiveness and chain integrity.

#![cfg(test)]

use proptest::prelude::*;
use serde_json::json;

use crate::audit::{AuditTrailManager, DecisionType, RecordOptions};
use crate::learning::models::{rule_id, ExtractedRule};

proptest! {
    /// Effectiveness always stays in [0, 1].
    #[test]
    fn effectiveness_bounded(success in 0u32..10_000, failure in 0u32..10_000) {
        let mut rule = ExtractedRule::new("c", "r");
        rule.success_count = success;
        rule.failure_count = failure;

        let eff = rule.effectiveness();
        prop_assert!((0.0..=1.0).contains(&eff));
    }

    /// For a fixed failure count, effectiveness is monotonic in successes.
    #[test]
    fn effectiveness_monotonic_in_success(
        success in 0u32..1000,
        delta in 1u32..100,
        failure in 0u32..1000,
    ) {
        let mut lower = ExtractedRule::new("c", "r");
        lower.success_count = success;
        lower.failure_count = failure;

        let mut higher = lower.clone();
        higher.success_count = success + delta;

        prop_assert!(higher.effectiveness() > lower.effectiveness());
    }

    /// Rule ids are deterministic and change with either component.
    #[test]
    fn rule_id_deterministic(cond in "[a-z ]{1,40}", rec in "[a-z ]{1,40}") {
        prop_assert_eq!(rule_id(&cond, &rec), rule_id(&cond, &rec));

        let other = format!("{}x", cond);
        prop_assert_ne!(rule_id(&other, &rec), rule_id(&cond, &rec));
    }

    /// Any sequence of records yields a chain that verifies cleanly and
    /// whose tip matches the last entry hash.
    #[test]
    fn audit_chain_always_verifies(payloads in proptest::collection::vec(0i64..1000, 1..12)) {
        let manager = AuditTrailManager::in_memory();

        let mut last_hash = String::new();
        for payload in payloads {
            let entry = manager.record(
                DecisionType::OutputGeneration,
                "prop-agent",
                &json!({"input": payload}),
                &json!({"output": payload * 2}),
                RecordOptions::new(),
            ).unwrap();
            last_hash = entry.entry_hash.clone();
        }

        let report = manager.verify_integrity().unwrap();
        prop_assert!(report.verified);
        prop_assert_eq!(manager.storage().latest_hash().unwrap(), last_hash);
    }
}
