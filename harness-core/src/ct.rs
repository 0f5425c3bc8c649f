//! Constant-time candidates.
//!
//! A CT candidate reads public and secret slots and computes a value. What
//! an observer may see is the sequence of branch decisions and table indices
//! the computation produces. The candidate is secure when that sequence is
//! the same for every secret under a fixed public input.

use crate::slot::{Slot, SlotBank, SlotRole};
use crate::verdict::Verdict;
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CtEvent {
    Branch { site: &'static str, taken: bool },
    Load { table: &'static str, index: usize },
}

/// Observable events of one execution, in program order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CtTrace {
    pub events: Vec<CtEvent>,
}

impl CtTrace {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

pub struct CtContext {
    slots: SlotBank,
    trace: CtTrace,
}

impl CtContext {
    pub fn new(slots: SlotBank) -> Self {
        Self {
            slots,
            trace: CtTrace::default(),
        }
    }

    /// Reads a declared input by name.
    pub fn input(&mut self, name: &str) -> Result<i32> {
        let slot = self
            .slots
            .lookup(name)
            .ok_or_else(|| anyhow!("no input named `{name}`"))?;
        Ok(self.slots.read(slot))
    }

    /// Records a conditional and returns its condition.
    pub fn branch(&mut self, site: &'static str, condition: bool) -> bool {
        self.trace.events.push(CtEvent::Branch {
            site,
            taken: condition,
        });
        condition
    }

    pub fn load<T: Copy>(&mut self, table: &'static str, entries: &[T], index: usize) -> Result<T> {
        self.trace.events.push(CtEvent::Load { table, index });
        entries
            .get(index)
            .copied()
            .ok_or_else(|| anyhow!("`{table}[{index}]` is out of bounds"))
    }

    pub fn into_trace(self) -> CtTrace {
        self.trace
    }
}

pub trait CtProgram {
    fn id(&self) -> &str;
    fn description(&self) -> &str;
    fn verdict(&self) -> Verdict;
    fn declare(&self, bank: &mut SlotBank) -> Result<Vec<Slot>>;
    fn execute(&self, ctx: &mut CtContext) -> Result<u32>;
    /// Freestanding C form of the candidate.
    fn c_source(&self) -> String;
}

/// Clears the public input when the secret is negative, without branching.
pub struct BranchlessMask;

impl CtProgram for BranchlessMask {
    fn id(&self) -> &str {
        "simple-ct-branch"
    }

    fn description(&self) -> &str {
        "sign of the secret selects a mask, no secret-dependent branch"
    }

    fn verdict(&self) -> Verdict {
        Verdict::CtSecure
    }

    fn declare(&self, bank: &mut SlotBank) -> Result<Vec<Slot>> {
        Ok(vec![
            bank.make_slot("public_a", SlotRole::Public)?,
            bank.make_slot("secret_b", SlotRole::Secret)?,
        ])
    }

    fn execute(&self, ctx: &mut CtContext) -> Result<u32> {
        let a = ctx.input("public_a")? as u32;
        let b = ctx.input("secret_b")? as u32;
        let sign_mask = 0u32.wrapping_sub(b >> 31);
        Ok(a & !sign_mask)
    }

    fn c_source(&self) -> String {
        r#"volatile int public_a;
volatile int secret_b;

int main(void) {
    int a = public_a;
    int b = secret_b;

    unsigned int ub = (unsigned int)b;
    unsigned int sign_mask = (unsigned int)-(int)(ub >> 31);

    return a & (int)(~sign_mask);
}
"#
        .to_string()
    }
}

pub const LEAK_TABLE: [u8; 16] = [3, 11, 7, 13, 2, 17, 19, 5, 23, 29, 31, 37, 41, 43, 47, 53];

/// Two secret-dependent branches, each followed by a secret-indexed load.
pub struct TableLookupLeak;

impl CtProgram for TableLookupLeak {
    fn id(&self) -> &str {
        "ct-multi-leak"
    }

    fn description(&self) -> &str {
        "secret nibble drives two branches and four table lookups"
    }

    fn verdict(&self) -> Verdict {
        Verdict::CtInsecure
    }

    fn declare(&self, bank: &mut SlotBank) -> Result<Vec<Slot>> {
        Ok(vec![
            bank.make_slot("public_x", SlotRole::Public)?,
            bank.make_slot("secret_k", SlotRole::Secret)?,
        ])
    }

    fn execute(&self, ctx: &mut CtContext) -> Result<u32> {
        let x = ctx.input("public_x")? as u32;
        let k = (ctx.input("secret_k")? as u32) & 0x0f;
        let mut acc = x & 0xff;

        let high = ctx.branch("k > 7", k > 7);
        let index = if high { k } else { 15 - k };
        acc += u32::from(ctx.load("lut", &LEAK_TABLE, index as usize)?);

        let even = ctx.branch("(k & 1) == 0", k & 1 == 0);
        let index = if even { (k + 3) & 0x0f } else { (k + 5) & 0x0f };
        acc ^= u32::from(ctx.load("lut", &LEAK_TABLE, index as usize)?);

        Ok(acc & 0xff)
    }

    fn c_source(&self) -> String {
        let table = LEAK_TABLE
            .iter()
            .map(|entry| entry.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            r#"#include <stdint.h>

volatile uint32_t public_x;
volatile uint32_t secret_k;
volatile uint8_t lut[16] = {{ {table} }};

int main(void) {{
    uint32_t x = public_x;
    uint32_t k = secret_k & 0x0f;
    uint32_t acc = x & 0xff;

    if (k > 7) {{
        acc += lut[k];
    }} else {{
        acc += lut[15 - k];
    }}

    if ((k & 1) == 0) {{
        acc ^= lut[(k + 3) & 0x0f];
    }} else {{
        acc ^= lut[(k + 5) & 0x0f];
    }}

    return (int)(acc & 0xff);
}}
"#
        )
    }
}

pub fn builtin_ct_programs() -> Vec<Box<dyn CtProgram>> {
    vec![Box::new(BranchlessMask), Box::new(TableLookupLeak)]
}

/// Runs a candidate once. Public values go to public slots and secret
/// values to secret slots, each in declaration order.
pub fn observe(program: &dyn CtProgram, public: &[i32], secret: &[i32]) -> Result<CtTrace> {
    let mut bank = SlotBank::new();
    let slots = program
        .declare(&mut bank)
        .with_context(|| format!("declare slots of `{}`", program.id()))?;

    let mut public_values = public.iter();
    let mut secret_values = secret.iter();
    for slot in slots {
        let values = match bank.role(slot) {
            SlotRole::Public => &mut public_values,
            SlotRole::Secret => &mut secret_values,
        };
        let value = values.next().ok_or_else(|| {
            anyhow!(
                "no {} value for `{}` of `{}`",
                bank.role(slot).label(),
                bank.name(slot),
                program.id()
            )
        })?;
        bank.supply(slot, *value);
    }
    if public_values.next().is_some() || secret_values.next().is_some() {
        bail!("too many input values for `{}`", program.id());
    }

    let mut ctx = CtContext::new(bank);
    program.execute(&mut ctx)?;
    Ok(ctx.into_trace())
}

/// Two secrets that produce different traces under the same public input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub public: Vec<i32>,
    pub first_secret: Vec<i32>,
    pub second_secret: Vec<i32>,
    pub first: CtTrace,
    pub second: CtTrace,
}

/// Searches the given inputs for a pair of secrets the trace tells apart.
pub fn find_divergence(
    program: &dyn CtProgram,
    publics: &[Vec<i32>],
    secrets: &[Vec<i32>],
) -> Result<Option<Divergence>> {
    for public in publics {
        let mut baseline: Option<(&Vec<i32>, CtTrace)> = None;
        for secret in secrets {
            let trace = observe(program, public, secret)?;
            if let Some((first_secret, first)) = &baseline {
                if *first != trace {
                    return Ok(Some(Divergence {
                        public: public.clone(),
                        first_secret: (*first_secret).clone(),
                        second_secret: secret.clone(),
                        first: first.clone(),
                        second: trace,
                    }));
                }
                continue;
            }
            baseline = Some((secret, trace));
        }
    }
    Ok(None)
}

/// Checks a CT label against traces over a spread of inputs.
pub fn check_label(program: &dyn CtProgram) -> Result<()> {
    let publics: Vec<Vec<i32>> = [0, 1, 0xff, -1, i32::MAX].iter().map(|v| vec![*v]).collect();
    let secrets: Vec<Vec<i32>> = (-8..24).chain([i32::MIN, i32::MAX]).map(|v| vec![v]).collect();
    let divergence = find_divergence(program, &publics, &secrets)?;
    match (program.verdict(), divergence) {
        (Verdict::CtSecure, Some(found)) => bail!(
            "`{}` is labeled ct-secure but secrets {:?} and {:?} leave different traces",
            program.id(),
            found.first_secret,
            found.second_secret
        ),
        (Verdict::CtInsecure, None) => bail!(
            "`{}` is labeled ct-insecure but no secret changed its trace",
            program.id()
        ),
        (Verdict::CtSecure | Verdict::CtInsecure, _) => Ok(()),
        (other, _) => bail!("`{}` carries non-CT verdict {other}", program.id()),
    }
}
