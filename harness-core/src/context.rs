//! Per-run state and the host driver that dispatches candidate outcomes.

use crate::program::CandidateProgram;
use crate::sentinel::SentinelLog;
use crate::slot::{Slot, SlotBank};
use anyhow::{anyhow, bail, Context, Result};
use harness_abi::Outcome;
use std::collections::HashSet;

/// Everything one execution of a candidate may touch. A context is built
/// fresh for each run and dropped afterwards.
#[derive(Debug, Default)]
pub struct RunContext {
    slots: SlotBank,
    sentinels: SentinelLog,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &SlotBank {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut SlotBank {
        &mut self.slots
    }

    pub fn sentinels(&self) -> &SentinelLog {
        &self.sentinels
    }

    /// No-cache read of a slot.
    pub fn read(&mut self, slot: Slot) -> i32 {
        self.slots.read(slot)
    }

    pub fn dispatch(&mut self, outcome: Outcome) {
        self.sentinels.dispatch(outcome);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Execution {
    pub outcome: Outcome,
    /// Total slot reads performed by the candidate.
    pub reads: u32,
}

/// Host side of a run: owns the context, supplies inputs, dispatches.
pub struct Driver;

impl Driver {
    pub fn execute(program: &CandidateProgram, inputs: &[(&str, i32)]) -> Result<Execution> {
        let mut ctx = RunContext::new();
        let slots = program.declare(ctx.slots_mut())?;

        let mut supplied = HashSet::new();
        for (name, value) in inputs {
            let slot = ctx
                .slots()
                .lookup(name)
                .ok_or_else(|| anyhow!("`{}` has no input named `{name}`", program.id))?;
            if !supplied.insert(slot) {
                bail!("input `{name}` supplied twice");
            }
            ctx.slots_mut().supply(slot, *value);
        }
        if let Some(missing) = slots.iter().find(|slot| !supplied.contains(*slot)) {
            bail!(
                "no value supplied for input `{}` of `{}`",
                ctx.slots().name(*missing),
                program.id
            );
        }

        let outcome = program
            .run(&mut ctx)
            .with_context(|| format!("run candidate `{}`", program.id))?;
        ctx.dispatch(outcome);
        let outcome = ctx.sentinels().settle()?;
        let reads = ctx.slots().total_reads();
        tracing::debug!(example = %program.id, outcome = outcome.label(), reads, "candidate executed");
        Ok(Execution { outcome, reads })
    }
}
