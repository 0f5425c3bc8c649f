//! The two reachability sentinels of a run. Each is its own non-inlined
//! call target with a flag write of its own.

use anyhow::{bail, Result};
use harness_abi::Outcome;
use std::hint::black_box;

/// The error/success sentinel pair of one run.
///
/// Each sentinel raises its own flag, so the log can tell afterwards which
/// one fired and how often.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SentinelLog {
    error_flag: bool,
    success_flag: bool,
    error_hits: u32,
    success_hits: u32,
}

impl SentinelLog {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(never)]
    pub fn signal_error(&mut self) {
        self.error_flag = black_box(true);
        self.error_hits = self.error_hits.saturating_add(1);
    }

    #[inline(never)]
    pub fn signal_success(&mut self) {
        self.success_flag = black_box(true);
        self.success_hits = self.success_hits.saturating_add(1);
    }

    pub fn dispatch(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Error => self.signal_error(),
            Outcome::Success => self.signal_success(),
        }
    }

    pub fn error_hits(&self) -> u32 {
        self.error_hits
    }

    pub fn success_hits(&self) -> u32 {
        self.success_hits
    }

    /// The single outcome of the run. Anything other than exactly one hit on
    /// exactly one sentinel breaks the harness contract.
    pub fn settle(&self) -> Result<Outcome> {
        match (self.error_hits, self.success_hits) {
            (1, 0) if self.error_flag => Ok(Outcome::Error),
            (0, 1) if self.success_flag => Ok(Outcome::Success),
            (0, 0) => bail!("no sentinel was reached"),
            (errors, successes) => bail!(
                "sentinels reached {errors} error / {successes} success times; expected exactly one"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_reaches_exactly_one_sentinel() {
        let mut log = SentinelLog::new();
        log.dispatch(Outcome::Error);
        assert_eq!(log.settle().unwrap(), Outcome::Error);
        assert_eq!(log.success_hits(), 0);

        let mut log = SentinelLog::new();
        log.dispatch(Outcome::Success);
        assert_eq!(log.settle().unwrap(), Outcome::Success);
    }

    #[test]
    fn silent_runs_do_not_settle() {
        let log = SentinelLog::new();
        assert!(log.settle().unwrap_err().to_string().contains("no sentinel"));
    }

    #[test]
    fn double_signals_do_not_settle() {
        let mut log = SentinelLog::new();
        log.signal_error();
        log.signal_success();
        assert!(log.settle().is_err());

        let mut log = SentinelLog::new();
        log.signal_success();
        log.signal_success();
        assert!(log.settle().is_err());
    }
}
