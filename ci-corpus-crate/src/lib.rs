//! Rust-native corpus example exercised in CI.
//!
//! Candidate "a >= b": the error sentinel is reachable (for instance with
//! a = 5, b = 3) and the success sentinel is reachable (a = 1, b = 9).
//!
//! harness:example rust-ineq-a-ge-b
//! harness:expect error-reachable
#![cfg_attr(not(test), no_std)]

use harness_abi::Outcome;

/// Predicate under test. Both inputs come from symbolic slots only.
#[inline(never)]
pub fn fun(inputs: &[i32]) -> Outcome {
    match *inputs {
        [a, b] if a >= b => Outcome::Error,
        _ => Outcome::Success,
    }
}

harness_abi::export_harness! {
    slots {
        __VERIFIER_nondet_slot_a => __VERIFIER_nondet_int_a,
        __VERIFIER_nondet_slot_b => __VERIFIER_nondet_int_b,
    }
    candidate = fun;
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_abi::CounterPair;
    use std::sync::Mutex;

    // The exported statics are process-wide; tests take turns.
    static EXCLUSIVE: Mutex<()> = Mutex::new(());

    fn run(a: i32, b: i32) -> (bool, harness_abi::CounterSnapshot) {
        harness_supply(&[a, b]);
        let before = harness_counters();
        assert_eq!(c2bc_main(), 0);
        (harness_succeeded(), harness_counters().delta_since(&before))
    }

    #[test]
    fn greater_or_equal_reaches_error() {
        let _guard = EXCLUSIVE.lock().unwrap_or_else(|e| e.into_inner());
        let (succeeded, delta) = run(5, 3);
        assert!(!succeeded);
        assert!(harness_reached_error());
        assert_eq!(delta.failure, CounterPair { direct: 3, cut: 7 });
        assert_eq!(delta.abort, CounterPair::default());
        assert_eq!(delta.main_hook, 7);
    }

    #[test]
    fn smaller_reaches_success() {
        let _guard = EXCLUSIVE.lock().unwrap_or_else(|e| e.into_inner());
        let (succeeded, delta) = run(1, 9);
        assert!(succeeded);
        assert!(!harness_reached_error());
        assert_eq!(delta.failure, CounterPair::default());
        assert_eq!(delta.main_hook, 7);
    }

    #[test]
    fn repeated_invocations_accumulate() {
        let _guard = EXCLUSIVE.lock().unwrap_or_else(|e| e.into_inner());
        let before = harness_counters();
        for _ in 0..3 {
            run(7, 7);
        }
        let delta = harness_counters().delta_since(&before);
        assert_eq!(delta.failure.events(), Some(3));
        assert_eq!(delta.failure, CounterPair { direct: 9, cut: 21 });
        assert_eq!(delta.main_hook, 21);
    }

    #[test]
    fn hooks_count_independently() {
        let _guard = EXCLUSIVE.lock().unwrap_or_else(|e| e.into_inner());
        let before = harness_counters();
        c2bc_abort();
        c2bc_abort();
        c2bc_assert_fail();
        let delta = harness_counters().delta_since(&before);
        assert_eq!(delta.abort, CounterPair { direct: 6, cut: 14 });
        assert_eq!(delta.failure, CounterPair { direct: 3, cut: 7 });
    }

    #[test]
    fn accessors_read_distinct_slots() {
        let _guard = EXCLUSIVE.lock().unwrap_or_else(|e| e.into_inner());
        harness_supply(&[11, -4]);
        assert_eq!(__VERIFIER_nondet_int_a(), 11);
        assert_eq!(__VERIFIER_nondet_int_b(), -4);
        assert_eq!(__VERIFIER_nondet_int_a(), 11);
    }
}
