//! Binary-level naming contract for analyzable examples.
//!
//! External tools locate the symbolic inputs, the two sentinels and the shim
//! entry point purely by symbol name, so every name in this crate is part of
//! the contract. The crate is `no_std` and has no required dependencies: an
//! example built with [`export_harness!`] links nothing beyond the symbols the
//! macro defines and the candidate function itself.
//!
//! The exported statics are process-wide. Invoking the same exported example
//! from two threads at once is not supported; run parallel examples in
//! separate processes.
#![no_std]

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

/// Sentinel called when the candidate reaches its error location.
pub const ERROR_SENTINEL: &str = "reach_error";
/// Sentinel called when the candidate reaches its success location.
pub const SUCCESS_SENTINEL: &str = "reach_success";
/// Marker routine the error sentinel calls in freestanding form.
pub const VERIFIER_ERROR: &str = "__VERIFIER_error";
/// Flag written by the success sentinel.
pub const SUCCESS_FLAG: &str = "success_flag";
/// Flag written by the error marker routine, so the error path keeps an
/// observable effect after optimization.
pub const ERROR_FLAG: &str = "error_flag";

/// Library-callable entry point produced by the shim.
pub const SHIM_ENTRY: &str = "c2bc_main";
/// Natural entry point of a freestanding example.
pub const HOST_ENTRY: &str = "main";
/// Intercepted assertion-failure hook.
pub const ASSERT_FAIL_HOOK: &str = "c2bc_assert_fail";
/// Intercepted abort hook.
pub const ABORT_HOOK: &str = "c2bc_abort";
/// Intercepted exit hook; forwards to the abort hook.
pub const EXIT_HOOK: &str = "c2bc_exit";
/// Intercepted assertion helper; forwards failures to the assertion hook.
pub const ASSERT_HOOK: &str = "c2bc_assert";

/// Prefix of every nondeterministic accessor.
pub const NONDET_PREFIX: &str = "__VERIFIER_nondet_";
/// Prefix of the backing storage of a named nondeterministic slot.
pub const NONDET_SLOT_PREFIX: &str = "__VERIFIER_nondet_slot_";

pub const FAILURE_COUNTER: &str = "_stub_failure_counter";
pub const FAILURE_CUT_COUNTER: &str = "_stub_failure_cut_counter";
pub const ABORT_COUNTER: &str = "_stub_abort_counter";
pub const ABORT_CUT_COUNTER: &str = "_stub_abort_cut_counter";
pub const MAIN_HOOK: &str = "_main_hook";

/// Symbols an example must never define on its own account.
pub const RESERVED_SYMBOLS: &[&str] = &[
    ERROR_SENTINEL,
    SUCCESS_SENTINEL,
    VERIFIER_ERROR,
    SUCCESS_FLAG,
    ERROR_FLAG,
    SHIM_ENTRY,
    HOST_ENTRY,
    ASSERT_FAIL_HOOK,
    ABORT_HOOK,
    EXIT_HOOK,
    ASSERT_HOOK,
    FAILURE_COUNTER,
    FAILURE_CUT_COUNTER,
    ABORT_COUNTER,
    ABORT_CUT_COUNTER,
    MAIN_HOOK,
    "abort",
    "exit",
    "assert",
    "__assert_fail",
    "__VERIFIER_assert",
];

/// Prefixes owned by the harness.
pub const RESERVED_PREFIXES: &[&str] = &[NONDET_PREFIX, "c2bc_", "_stub_"];

/// Whether `name` collides with a symbol the harness defines or intercepts.
pub fn is_reserved_symbol(name: &str) -> bool {
    RESERVED_SYMBOLS.contains(&name)
        || RESERVED_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// Amount added to the direct counter of a hook per intercepted call.
pub const DIRECT_STEP: u32 = 3;
/// Amount added to the cut counter of a hook per intercepted call.
pub const CUT_STEP: u32 = 7;

/// Tagged result of a candidate program. The host dispatches it to the
/// matching sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
#[repr(C)]
pub enum Outcome {
    Success = 0,
    Error = 1,
}

impl Outcome {
    pub fn is_error(self) -> bool {
        matches!(self, Outcome::Error)
    }

    /// Symbol of the sentinel this outcome is dispatched to.
    pub fn sentinel_symbol(self) -> &'static str {
        match self {
            Outcome::Error => ERROR_SENTINEL,
            Outcome::Success => SUCCESS_SENTINEL,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Error => "error",
            Outcome::Success => "success",
        }
    }
}

/// Reads a slot so that no optimizer can fold or cache the value.
///
/// The read is volatile, the function is never inlined and the result goes
/// through [`core::hint::black_box`], so two calls on two different slots
/// always stay two loads.
#[inline(never)]
pub fn forced_read(cell: &AtomicI32) -> i32 {
    // SAFETY: `as_ptr` yields an aligned pointer into a live atomic. The
    // single-threaded contract of this crate rules out concurrent writers.
    let value = unsafe { core::ptr::read_volatile(cell.as_ptr()) };
    core::hint::black_box(value)
}

/// Volatile store counterpart of [`forced_read`].
#[inline(never)]
pub fn forced_write(cell: &AtomicI32, value: i32) {
    // SAFETY: see `forced_read`.
    unsafe { core::ptr::write_volatile(cell.as_ptr(), core::hint::black_box(value)) }
}

#[doc(hidden)]
pub fn bump(direct: &AtomicU32, cut: &AtomicU32) {
    direct.fetch_add(DIRECT_STEP, Ordering::Relaxed);
    cut.fetch_add(CUT_STEP, Ordering::Relaxed);
}

/// Values of one hook's direct and cut counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterPair {
    pub direct: u32,
    pub cut: u32,
}

impl CounterPair {
    pub fn read(direct: &AtomicU32, cut: &AtomicU32) -> Self {
        Self {
            direct: direct.load(Ordering::Relaxed),
            cut: cut.load(Ordering::Relaxed),
        }
    }

    pub fn delta_since(self, earlier: CounterPair) -> CounterPair {
        CounterPair {
            direct: self.direct.wrapping_sub(earlier.direct),
            cut: self.cut.wrapping_sub(earlier.cut),
        }
    }

    /// Number of intercepted calls a delta stands for, if it is consistent
    /// with the default steps.
    pub fn events(self) -> Option<u32> {
        if self.direct % DIRECT_STEP != 0 || self.cut % CUT_STEP != 0 {
            return None;
        }
        let calls = self.direct / DIRECT_STEP;
        (calls == self.cut / CUT_STEP).then_some(calls)
    }
}

/// All counters exported by an example at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub failure: CounterPair,
    pub abort: CounterPair,
    pub main_hook: u32,
}

impl CounterSnapshot {
    pub fn delta_since(&self, earlier: &CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            failure: self.failure.delta_since(earlier.failure),
            abort: self.abort.delta_since(earlier.abort),
            main_hook: self.main_hook.wrapping_sub(earlier.main_hook),
        }
    }
}

/// Emits the full exported symbol set for one example.
///
/// Each `storage => accessor` pair becomes a `#[no_mangle]` slot and an
/// `#[inline(never)]` accessor, and `c2bc_main` calls every accessor from its
/// own call site before handing the values to the candidate. The candidate is
/// any `fn(&[i32]) -> Outcome`.
///
/// ```ignore
/// fn candidate(inputs: &[i32]) -> harness_abi::Outcome { /* ... */ }
///
/// harness_abi::export_harness! {
///     slots {
///         __VERIFIER_nondet_slot_a => __VERIFIER_nondet_int_a,
///         __VERIFIER_nondet_slot_b => __VERIFIER_nondet_int_b,
///     }
///     candidate = candidate;
/// }
/// ```
///
/// The macro defines fixed symbol names, so it can be used once per crate.
#[macro_export]
macro_rules! export_harness {
    (
        slots { $($storage:ident => $accessor:ident),+ $(,)? }
        candidate = $candidate:path $(;)?
    ) => {
        $(
            #[no_mangle]
            #[allow(non_upper_case_globals)]
            pub static $storage: ::core::sync::atomic::AtomicI32 =
                ::core::sync::atomic::AtomicI32::new(0);

            #[no_mangle]
            #[inline(never)]
            #[allow(non_snake_case)]
            pub extern "C" fn $accessor() -> i32 {
                $crate::forced_read(&$storage)
            }
        )+

        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static success_flag: ::core::sync::atomic::AtomicI32 =
            ::core::sync::atomic::AtomicI32::new(0);

        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static error_flag: ::core::sync::atomic::AtomicI32 =
            ::core::sync::atomic::AtomicI32::new(0);

        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static _stub_failure_counter: ::core::sync::atomic::AtomicU32 =
            ::core::sync::atomic::AtomicU32::new(0);
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static _stub_failure_cut_counter: ::core::sync::atomic::AtomicU32 =
            ::core::sync::atomic::AtomicU32::new(0);
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static _stub_abort_counter: ::core::sync::atomic::AtomicU32 =
            ::core::sync::atomic::AtomicU32::new(0);
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static _stub_abort_cut_counter: ::core::sync::atomic::AtomicU32 =
            ::core::sync::atomic::AtomicU32::new(0);
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static _main_hook: ::core::sync::atomic::AtomicU32 =
            ::core::sync::atomic::AtomicU32::new(0);

        #[no_mangle]
        #[inline(never)]
        #[allow(non_snake_case)]
        pub extern "C" fn __VERIFIER_error() {
            $crate::forced_write(&error_flag, 1);
        }

        #[no_mangle]
        #[inline(never)]
        pub extern "C" fn c2bc_assert_fail() {
            $crate::bump(&_stub_failure_counter, &_stub_failure_cut_counter);
        }

        #[no_mangle]
        #[inline(never)]
        pub extern "C" fn c2bc_abort() {
            $crate::bump(&_stub_abort_counter, &_stub_abort_cut_counter);
        }

        #[no_mangle]
        #[inline(never)]
        pub extern "C" fn reach_error() {
            __VERIFIER_error();
            c2bc_assert_fail();
        }

        #[no_mangle]
        #[inline(never)]
        pub extern "C" fn reach_success() {
            $crate::forced_write(&success_flag, 1);
        }

        /// Shim entry. A normal return adds the cut step to `_main_hook`
        /// and does not go through `c2bc_abort`, so a clean run never counts
        /// as an abort.
        #[no_mangle]
        pub extern "C" fn c2bc_main() -> i32 {
            $crate::forced_write(&success_flag, 0);
            $crate::forced_write(&error_flag, 0);
            let inputs = [$($accessor()),+];
            match $candidate(&inputs) {
                $crate::Outcome::Error => reach_error(),
                $crate::Outcome::Success => reach_success(),
            }
            _main_hook.fetch_add($crate::CUT_STEP, ::core::sync::atomic::Ordering::Relaxed);
            0
        }

        /// Writes host-chosen values into the slots, in declaration order.
        pub fn harness_supply(values: &[i32]) {
            let slots: &[&::core::sync::atomic::AtomicI32] = &[$(&$storage),+];
            for (slot, value) in slots.iter().zip(values.iter()) {
                $crate::forced_write(slot, *value);
            }
        }

        /// Current values of every exported counter.
        pub fn harness_counters() -> $crate::CounterSnapshot {
            $crate::CounterSnapshot {
                failure: $crate::CounterPair::read(
                    &_stub_failure_counter,
                    &_stub_failure_cut_counter,
                ),
                abort: $crate::CounterPair::read(&_stub_abort_counter, &_stub_abort_cut_counter),
                main_hook: _main_hook.load(::core::sync::atomic::Ordering::Relaxed),
            }
        }

        /// Whether the last `c2bc_main` run reached the error sentinel.
        pub fn harness_reached_error() -> bool {
            $crate::forced_read(&error_flag) == 1
        }

        /// Whether the last `c2bc_main` run reached the success sentinel.
        pub fn harness_succeeded() -> bool {
            $crate::forced_read(&success_flag) == 1
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_read_sees_every_store() {
        let cell = AtomicI32::new(4);
        assert_eq!(forced_read(&cell), 4);
        forced_write(&cell, -9);
        assert_eq!(forced_read(&cell), -9);
        assert_eq!(forced_read(&cell), -9);
    }

    #[test]
    fn bump_uses_distinct_steps() {
        let direct = AtomicU32::new(0);
        let cut = AtomicU32::new(0);
        for _ in 0..4 {
            bump(&direct, &cut);
        }
        let pair = CounterPair::read(&direct, &cut);
        assert_eq!(pair, CounterPair { direct: 12, cut: 28 });
        assert_eq!(pair.events(), Some(4));
    }

    #[test]
    fn inconsistent_deltas_have_no_event_count() {
        let pair = CounterPair { direct: 3, cut: 14 };
        assert_eq!(pair.events(), None);
        let pair = CounterPair { direct: 4, cut: 7 };
        assert_eq!(pair.events(), None);
    }

    #[test]
    fn snapshot_delta_wraps() {
        let earlier = CounterSnapshot {
            failure: CounterPair {
                direct: u32::MAX - 1,
                cut: 0,
            },
            abort: CounterPair::default(),
            main_hook: 7,
        };
        let later = CounterSnapshot {
            failure: CounterPair { direct: 1, cut: 7 },
            abort: CounterPair::default(),
            main_hook: 14,
        };
        let delta = later.delta_since(&earlier);
        assert_eq!(delta.failure, CounterPair { direct: 3, cut: 7 });
        assert_eq!(delta.main_hook, 7);
    }

    #[test]
    fn reserved_symbols_cover_the_contract() {
        for name in [ERROR_SENTINEL, SUCCESS_FLAG, SHIM_ENTRY, HOST_ENTRY, "c2bc_other"] {
            assert!(is_reserved_symbol(name), "{name} should be reserved");
        }
        assert!(is_reserved_symbol("__VERIFIER_nondet_slot_a"));
        assert!(is_reserved_symbol("_stub_int_index"));
        assert!(!is_reserved_symbol("a"));
        assert!(!is_reserved_symbol("result"));
    }

    #[test]
    fn outcome_maps_to_sentinels() {
        assert_eq!(Outcome::Error.sentinel_symbol(), ERROR_SENTINEL);
        assert_eq!(Outcome::Success.sentinel_symbol(), SUCCESS_SENTINEL);
        assert!(Outcome::Error.is_error());
        assert_eq!(Outcome::Error as i32, 1);
    }
}
