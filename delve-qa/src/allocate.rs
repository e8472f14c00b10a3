//! Largest-remainder allocation of difficulty and category slots.

use std::collections::BTreeMap;

/// Split `total` slots across weighted keys by the largest-remainder method.
///
/// Each key gets the floor of its exact share; leftover slots go to the
/// largest fractional remainders, ties broken by key order. Zero-weight
/// keys get nothing.
pub fn allocate<K: Ord + Copy>(mix: &BTreeMap<K, f64>, total: usize) -> BTreeMap<K, usize> {
    let weight_sum: f64 = mix.values().filter(|w| **w > 0.0).sum();
    let mut counts: BTreeMap<K, usize> = mix.keys().map(|k| (*k, 0)).collect();
    if total == 0 || weight_sum <= 0.0 {
        return counts;
    }

    let mut remainders = Vec::with_capacity(mix.len());
    let mut assigned = 0;
    for (key, weight) in mix.iter().filter(|(_, w)| **w > 0.0) {
        let exact = total as f64 * weight / weight_sum;
        let floor = exact.floor() as usize;
        counts.insert(*key, floor);
        assigned += floor;
        remainders.push((*key, exact - floor as f64));
    }
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (key, _) in remainders.into_iter().cycle().take(total.saturating_sub(assigned)) {
        if let Some(count) = counts.get_mut(&key) {
            *count += 1;
        }
    }
    counts
}

/// One key per slot, interleaved so neighbouring slots differ where possible.
pub fn assign_slots<K: Ord + Copy>(mix: &BTreeMap<K, f64>, total: usize) -> Vec<K> {
    let mut remaining = allocate(mix, total);
    let mut slots = Vec::with_capacity(total);
    while slots.len() < total {
        let before = slots.len();
        for (key, count) in remaining.iter_mut() {
            if *count > 0 {
                *count -= 1;
                slots.push(*key);
            }
        }
        if slots.len() == before {
            break;
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::{Category, Difficulty};

    #[test]
    fn test_exact_shares() {
        let mix = BTreeMap::from([(Difficulty::Easy, 0.3), (Difficulty::Medium, 0.5), (Difficulty::Hard, 0.2)]);
        let counts = allocate(&mix, 10);
        assert_eq!(counts[&Difficulty::Easy], 3);
        assert_eq!(counts[&Difficulty::Medium], 5);
        assert_eq!(counts[&Difficulty::Hard], 2);
    }

    #[test]
    fn test_leftovers_go_to_largest_remainders() {
        // 7 slots: exact shares 2.1, 3.5, 1.4
        let mix = BTreeMap::from([(Difficulty::Easy, 0.3), (Difficulty::Medium, 0.5), (Difficulty::Hard, 0.2)]);
        let counts = allocate(&mix, 7);
        assert_eq!(counts[&Difficulty::Easy], 2);
        assert_eq!(counts[&Difficulty::Medium], 4);
        assert_eq!(counts[&Difficulty::Hard], 1);
    }

    #[test]
    fn test_zero_weight_gets_nothing() {
        let mix = BTreeMap::from([(Category::Factual, 1.0), (Category::Numerical, 0.0)]);
        let counts = allocate(&mix, 4);
        assert_eq!(counts[&Category::Factual], 4);
        assert_eq!(counts[&Category::Numerical], 0);
    }

    #[test]
    fn test_slots_interleave() {
        let mix = BTreeMap::from([(Difficulty::Easy, 1.0), (Difficulty::Hard, 1.0)]);
        assert_eq!(
            assign_slots(&mix, 4),
            vec![Difficulty::Easy, Difficulty::Hard, Difficulty::Easy, Difficulty::Hard]
        );
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_allocation_sums_to_total(
            weights in prop::collection::vec(0.0f64..10.0, 1..6),
            total in 0usize..200,
        ) {
            prop_assume!(weights.iter().any(|w| *w > 0.0));
            let mix: BTreeMap<usize, f64> = weights.into_iter().enumerate().collect();
            let counts = allocate(&mix, total);
            prop_assert_eq!(counts.values().sum::<usize>(), total);
            prop_assert_eq!(assign_slots(&mix, total).len(), total);
        }

        #[test]
        fn prop_each_share_within_one_of_exact(
            weights in prop::collection::vec(0.1f64..10.0, 1..6),
            total in 1usize..200,
        ) {
            let sum: f64 = weights.iter().sum();
            let mix: BTreeMap<usize, f64> = weights.iter().copied().enumerate().collect();
            let counts = allocate(&mix, total);
            for (key, weight) in weights.iter().enumerate() {
                let exact = total as f64 * weight / sum;
                prop_assert!((counts[&key] as f64 - exact).abs() < 1.0 + 1e-9);
            }
        }
    }
}
