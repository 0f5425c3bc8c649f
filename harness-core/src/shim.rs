//! Entry-point shim.
//!
//! A shimmed example exposes its entry point under a fixed library symbol and
//! never terminates the host process. Assertion failures and aborts are
//! intercepted and recorded in counter pairs that move by two fixed,
//! distinct steps per call, then control returns to the candidate exactly as
//! with the generated C stubs. The host reads the counters before and after
//! an invocation and derives what happened from the deltas.

use crate::program::CandidateProgram;
use crate::predicate::Env;
use crate::sentinel::SentinelLog;
use anyhow::{bail, Result};
use harness_abi::{CounterPair, CounterSnapshot, Outcome, CUT_STEP, DIRECT_STEP};
use serde::{Deserialize, Serialize};

/// Default number of values a nondet stream can hold.
pub const DEFAULT_NONDET_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepValues {
    pub direct: u32,
    pub cut: u32,
}

impl Default for StepValues {
    fn default() -> Self {
        Self {
            direct: DIRECT_STEP,
            cut: CUT_STEP,
        }
    }
}

impl StepValues {
    pub fn validate(&self) -> Result<()> {
        if self.direct == 0 || self.cut == 0 {
            bail!("counter steps must be non-zero (got {}/{})", self.direct, self.cut);
        }
        if self.direct == self.cut {
            bail!("direct and cut steps must differ (both {})", self.direct);
        }
        Ok(())
    }

    /// Number of intercepted calls a counter delta stands for, if the two
    /// counters agree on it.
    pub fn events(&self, delta: CounterPair) -> Option<u32> {
        if self.direct == 0 || self.cut == 0 {
            return None;
        }
        if delta.direct % self.direct != 0 || delta.cut % self.cut != 0 {
            return None;
        }
        let calls = delta.direct / self.direct;
        (calls == delta.cut / self.cut).then_some(calls)
    }
}

/// Counter changes over one invocation.
pub type CounterDeltas = CounterSnapshot;

/// Process-lifetime counters of one shimmed example.
#[derive(Clone, Debug, Default)]
pub struct FaultCounters {
    steps: StepValues,
    failure: CounterPair,
    abort: CounterPair,
    main_hook: u32,
}

impl FaultCounters {
    pub fn new(steps: StepValues) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    fn bump(pair: &mut CounterPair, steps: StepValues) {
        pair.direct = pair.direct.wrapping_add(steps.direct);
        pair.cut = pair.cut.wrapping_add(steps.cut);
    }

    pub fn record_failure(&mut self) {
        Self::bump(&mut self.failure, self.steps);
    }

    pub fn record_abort(&mut self) {
        Self::bump(&mut self.abort, self.steps);
    }

    pub fn record_return(&mut self) {
        self.main_hook = self.main_hook.wrapping_add(self.steps.cut);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            failure: self.failure,
            abort: self.abort,
            main_hook: self.main_hook,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShimState {
    #[default]
    NotYetCalled,
    Running,
    Returned,
}

/// Array-backed nondeterministic input supply.
///
/// Reads advance an index; a read past the last value calls the abort hook
/// and yields 0.
#[derive(Clone, Debug)]
pub struct NondetStream {
    values: Vec<i32>,
    index: usize,
}

impl NondetStream {
    pub fn new(values: Vec<i32>) -> Result<Self> {
        Self::with_capacity(values, DEFAULT_NONDET_CAPACITY)
    }

    pub fn with_capacity(values: Vec<i32>, capacity: usize) -> Result<Self> {
        if values.len() > capacity {
            bail!(
                "nondet stream holds at most {capacity} values, got {}",
                values.len()
            );
        }
        Ok(Self { values, index: 0 })
    }

    #[inline(never)]
    fn next(&mut self) -> Option<i32> {
        let index = std::hint::black_box(self.index);
        let value = self.values.get(index).copied()?;
        self.index = index + 1;
        Some(value)
    }

    pub fn consumed(&self) -> usize {
        self.index
    }

    pub fn remaining(&self) -> usize {
        self.values.len() - self.index
    }
}

/// What a shimmed entry point can call instead of the real libc routines.
pub struct ShimContext<'a> {
    counters: &'a mut FaultCounters,
    stream: &'a mut NondetStream,
    sentinels: SentinelLog,
    exhausted_reads: usize,
    exit_status: Option<i32>,
}

impl ShimContext<'_> {
    /// Records an assertion failure; execution continues.
    pub fn assert_fail(&mut self) {
        self.counters.record_failure();
    }

    /// Records an abort; execution continues.
    pub fn abort(&mut self) {
        self.counters.record_abort();
    }

    /// Forwards to the abort hook, keeping the last status for the report.
    pub fn exit(&mut self, status: i32) {
        self.exit_status = Some(status);
        self.abort();
    }

    pub fn assert(&mut self, condition: bool) {
        if !condition {
            self.assert_fail();
        }
    }

    /// Shimmed `reach_error`: marks the sentinel, then fails an assertion.
    pub fn signal_error(&mut self) {
        self.sentinels.signal_error();
        self.assert_fail();
    }

    pub fn signal_success(&mut self) {
        self.sentinels.signal_success();
    }

    pub fn next_nondet(&mut self) -> i32 {
        match self.stream.next() {
            Some(value) => value,
            None => {
                self.exhausted_reads += 1;
                self.abort();
                0
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShimReport {
    /// Return value of the entry point.
    pub status: i32,
    /// Status passed to the last intercepted `exit`.
    pub exit_status: Option<i32>,
    /// Nondet reads served after the stream ran dry.
    pub exhausted_reads: usize,
    pub deltas: CounterDeltas,
    /// The sentinel reached, if exactly one was reached once.
    pub outcome: Option<Outcome>,
}

impl ShimReport {
    pub fn failures(&self, steps: &StepValues) -> Option<u32> {
        steps.events(self.deltas.failure)
    }

    pub fn aborts(&self, steps: &StepValues) -> Option<u32> {
        steps.events(self.deltas.abort)
    }
}

#[derive(Debug)]
pub struct Shim {
    steps: StepValues,
    counters: FaultCounters,
    state: ShimState,
}

impl Shim {
    pub fn new(steps: StepValues) -> Result<Self> {
        steps.validate()?;
        Ok(Self {
            steps,
            counters: FaultCounters::new(steps),
            state: ShimState::NotYetCalled,
        })
    }

    pub fn steps(&self) -> StepValues {
        self.steps
    }

    pub fn state(&self) -> ShimState {
        self.state
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Runs `entry` as the shimmed main. Intercepted calls only move the
    /// counters; an error from `entry` is returned as is and panics
    /// propagate.
    pub fn invoke<F>(&mut self, stream: &mut NondetStream, entry: F) -> Result<ShimReport>
    where
        F: FnOnce(&mut ShimContext<'_>) -> Result<i32>,
    {
        let before = self.counters.snapshot();
        self.state = ShimState::Running;
        let mut ctx = ShimContext {
            counters: &mut self.counters,
            stream,
            sentinels: SentinelLog::new(),
            exhausted_reads: 0,
            exit_status: None,
        };
        let result = entry(&mut ctx);
        let (exhausted_reads, exit_status) = (ctx.exhausted_reads, ctx.exit_status);
        let outcome = ctx.sentinels.settle().ok();
        self.state = ShimState::Returned;

        let status = result?;
        self.counters.record_return();
        let report = ShimReport {
            status,
            exit_status,
            exhausted_reads,
            deltas: self.counters.snapshot().delta_since(&before),
            outcome,
        };
        tracing::debug!(?report, "shimmed entry finished");
        Ok(report)
    }
}

/// Runs a candidate through a fresh shim, drawing its slot inputs from
/// `stream` in declaration order. Reads past the end count an abort and see
/// 0, then the candidate goes on to a sentinel.
pub fn run_shimmed(
    program: &CandidateProgram,
    stream: &mut NondetStream,
    steps: StepValues,
) -> Result<ShimReport> {
    let mut shim = Shim::new(steps)?;
    shim.invoke(stream, |ctx| {
        let mut env = Env::new();
        for input in program.slot_inputs() {
            env.insert(input.name.clone(), i64::from(ctx.next_nondet()));
        }
        program.complete_env(&mut env)?;
        match program.decide(&env)? {
            Outcome::Error => ctx.signal_error(),
            Outcome::Success => ctx.signal_success(),
        }
        Ok(0)
    })
}
