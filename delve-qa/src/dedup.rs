//! Duplicate collapsing and keep-set application.
//!
//! Both steps only remove records. Surviving records are returned unchanged
//! and in their original order.

use delve_core::{QuestionRecord, Value};
use std::collections::BTreeSet;

/// Drop records whose normalized question was already seen. The first
/// occurrence wins.
pub fn collapse_exact(records: Vec<QuestionRecord>) -> Vec<QuestionRecord> {
    let mut seen = BTreeSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.normalized_question()))
        .collect()
}

/// Indices from a keep-set answer. Non-integral and negative entries are skipped.
pub fn keep_indices(value: &Value) -> Vec<usize> {
    value
        .as_list()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_f64)
                .filter(|n| *n >= 0.0 && n.fract() == 0.0)
                .map(|n| n as usize)
                .collect()
        })
        .unwrap_or_default()
}

/// Keep the records at `keep`.
///
/// Out-of-range indices are ignored. If nothing valid remains the input is
/// returned unchanged.
pub fn apply_keep_set(records: Vec<QuestionRecord>, keep: &[usize]) -> Vec<QuestionRecord> {
    let keep: BTreeSet<usize> = keep.iter().copied().filter(|i| *i < records.len()).collect();
    if keep.is_empty() {
        return records;
    }
    records
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, record)| record)
        .collect()
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use delve_test_utils::generators::arb_question_record;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_collapse_is_idempotent(records in prop::collection::vec(arb_question_record(), 0..20)) {
            let once = collapse_exact(records);
            let twice = collapse_exact(once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_keeping_everything_changes_nothing(records in prop::collection::vec(arb_question_record(), 0..20)) {
            let all: Vec<usize> = (0..records.len()).collect();
            prop_assert_eq!(apply_keep_set(records.clone(), &all), records);
        }

        #[test]
        fn prop_keep_set_never_grows(
            records in prop::collection::vec(arb_question_record(), 0..20),
            keep in prop::collection::vec(0usize..40, 0..10),
        ) {
            let len = records.len();
            prop_assert!(apply_keep_set(records, &keep).len() <= len);
        }
    }
}
