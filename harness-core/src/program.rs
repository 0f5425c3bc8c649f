//! Reachability candidate programs.
//!
//! A candidate reads its inputs from symbolic slots only, evaluates a chain
//! of guards and ends in exactly one outcome. Every level of a nested chain
//! that fails falls through to the `otherwise` outcome, so no path leaves
//! without reaching a sentinel.

use crate::context::RunContext;
use crate::predicate::{Env, Predicate};
use crate::slot::{validate_identifier, RotatingSource, Slot, SlotBank, SlotRole};
use crate::verdict::{Axis, Verdict};
use anyhow::{anyhow, bail, Context, Result};
use harness_abi::Outcome;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

/// An input computed from another input instead of read from a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
    pub base: String,
    pub offset: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDecl {
    pub name: String,
    #[serde(default)]
    pub role: SlotRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<Offset>,
}

impl InputDecl {
    pub fn slot(name: &str) -> Self {
        Self {
            name: name.to_string(),
            role: SlotRole::Public,
            derived: None,
        }
    }

    pub fn offset(name: &str, base: &str, offset: i64) -> Self {
        Self {
            name: name.to_string(),
            role: SlotRole::Public,
            derived: Some(Offset {
                base: base.to_string(),
                offset,
            }),
        }
    }

    pub fn is_slot(&self) -> bool {
        self.derived.is_none()
    }
}

/// How slot values are fetched in the emitted code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessorStyle {
    /// One storage cell and one accessor per slot.
    #[default]
    PerSlot,
    /// A single accessor rotating over a slot array with a forced-read index.
    Rotating,
}

/// Control-flow shape of the guard chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Shape {
    /// All guards ANDed into one conditional.
    #[default]
    Flat,
    /// One conditional per guard, innermost decides.
    Nested,
}

/// Concrete inputs and the outcome they must produce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub inputs: BTreeMap<String, i32>,
    pub expect: Outcome,
}

fn default_then() -> Outcome {
    Outcome::Error
}

fn default_otherwise() -> Outcome {
    Outcome::Success
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProgram {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<InputDecl>,
    #[serde(default)]
    pub accessor: AccessorStyle,
    #[serde(default)]
    pub shape: Shape,
    pub guards: Vec<Predicate>,
    /// Outcome when every guard holds.
    #[serde(default = "default_then")]
    pub then: Outcome,
    #[serde(default = "default_otherwise")]
    pub otherwise: Outcome,
    pub verdict: Verdict,
    #[serde(default)]
    pub witnesses: Vec<Witness>,
}

impl CandidateProgram {
    pub fn slot_inputs(&self) -> impl Iterator<Item = &InputDecl> {
        self.inputs.iter().filter(|input| input.is_slot())
    }

    /// Declares one slot per non-derived input, in declaration order.
    pub fn declare(&self, bank: &mut SlotBank) -> Result<Vec<Slot>> {
        self.slot_inputs()
            .map(|input| {
                bank.make_slot(&input.name, input.role)
                    .with_context(|| format!("declare slots of `{}`", self.id))
            })
            .collect()
    }

    /// Reads every slot input through the context, then decides.
    pub fn run(&self, ctx: &mut RunContext) -> Result<Outcome> {
        let slots = self
            .slot_inputs()
            .map(|input| {
                ctx.slots()
                    .lookup(&input.name)
                    .ok_or_else(|| anyhow!("slot `{}` is not declared", input.name))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut env = Env::new();
        match self.accessor {
            AccessorStyle::PerSlot => {
                for (input, slot) in self.slot_inputs().zip(&slots) {
                    env.insert(input.name.clone(), i64::from(ctx.read(*slot)));
                }
            }
            AccessorStyle::Rotating => {
                let mut source = RotatingSource::new(slots.clone())?;
                for input in self.slot_inputs() {
                    let value = source.next(ctx.slots_mut());
                    env.insert(input.name.clone(), i64::from(value));
                }
            }
        }

        self.complete_env(&mut env)?;
        self.decide(&env)
    }

    /// Fills in derived inputs from the slot values already in `env`.
    pub fn complete_env(&self, env: &mut Env) -> Result<()> {
        for input in &self.inputs {
            if let Some(derived) = &input.derived {
                let base = env
                    .get(&derived.base)
                    .copied()
                    .ok_or_else(|| anyhow!("`{}` derives from unknown `{}`", input.name, derived.base))?;
                let value = base
                    .checked_add(derived.offset)
                    .ok_or_else(|| anyhow!("`{}` overflows", input.name))?;
                env.insert(input.name.clone(), value);
            }
        }
        Ok(())
    }

    pub fn decide(&self, env: &Env) -> Result<Outcome> {
        for guard in &self.guards {
            if !guard.evaluate(env)? {
                return Ok(self.otherwise);
            }
        }
        Ok(self.then)
    }

    /// Outcome for a set of concrete slot values, without a run context.
    pub fn evaluate(&self, inputs: &BTreeMap<String, i32>) -> Result<Outcome> {
        let mut env = Env::new();
        for input in self.slot_inputs() {
            let value = inputs
                .get(&input.name)
                .ok_or_else(|| anyhow!("no value for slot `{}`", input.name))?;
            env.insert(input.name.clone(), i64::from(*value));
        }
        self.complete_env(&mut env)?;
        self.decide(&env)
    }

    /// Structural checks plus agreement between witnesses and the label.
    pub fn validate(&self) -> Result<()> {
        validate_example_id(&self.id)?;
        if self.verdict.axis() != Axis::Reachability {
            bail!("`{}` is labeled {}, not a reachability verdict", self.id, self.verdict);
        }
        if self.guards.is_empty() {
            bail!("`{}` has no guards", self.id);
        }
        if self.then == self.otherwise {
            bail!("`{}` reaches the {} sentinel on both branches", self.id, self.then.label());
        }

        let mut seen = HashSet::new();
        for input in &self.inputs {
            validate_identifier(&input.name).with_context(|| format!("input of `{}`", self.id))?;
            if let Some(derived) = &input.derived {
                if !seen.contains(derived.base.as_str()) {
                    bail!(
                        "`{}` derives `{}` from `{}`, which is not declared before it",
                        self.id,
                        input.name,
                        derived.base
                    );
                }
            }
            if !seen.insert(input.name.as_str()) {
                bail!("`{}` declares input `{}` twice", self.id, input.name);
            }
        }
        for guard in &self.guards {
            for name in guard.inputs() {
                if !seen.contains(name) {
                    bail!("guard `{guard}` of `{}` uses undeclared input `{name}`", self.id);
                }
            }
        }

        for (idx, witness) in self.witnesses.iter().enumerate() {
            let outcome = self
                .evaluate(&witness.inputs)
                .with_context(|| format!("witness #{idx} of `{}`", self.id))?;
            if outcome != witness.expect {
                bail!(
                    "witness #{idx} of `{}` reaches {} but expects {}",
                    self.id,
                    outcome.label(),
                    witness.expect.label()
                );
            }
        }

        let error_witnesses = self
            .witnesses
            .iter()
            .filter(|witness| witness.expect == Outcome::Error)
            .count();
        match self.verdict {
            Verdict::ErrorUnreachable if error_witnesses > 0 => {
                bail!("`{}` is labeled error-unreachable but has an error witness", self.id)
            }
            Verdict::ErrorReachable if error_witnesses == 0 => {
                bail!("`{}` is labeled error-reachable but has no error witness", self.id)
            }
            _ => Ok(()),
        }
    }

    /// SHA-256 of the canonical JSON form; shared by every emitted form.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self).context("serialize candidate for fingerprint")?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// Example ids become directory and file names.
pub fn validate_example_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("example id is empty");
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        bail!("example id `{id}` contains `{bad}`");
    }
    if id.starts_with('.') {
        bail!("example id `{id}` must not start with `.`");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ge_program() -> CandidateProgram {
        CandidateProgram {
            id: "ge".into(),
            description: String::new(),
            inputs: vec![InputDecl::slot("a"), InputDecl::slot("b")],
            accessor: AccessorStyle::PerSlot,
            shape: Shape::Flat,
            guards: vec![Predicate::parse("a >= b").unwrap()],
            then: Outcome::Error,
            otherwise: Outcome::Success,
            verdict: Verdict::ErrorReachable,
            witnesses: vec![Witness {
                inputs: [("a".to_string(), 5), ("b".to_string(), 3)].into(),
                expect: Outcome::Error,
            }],
        }
    }

    #[test]
    fn evaluate_follows_the_guard() {
        let program = ge_program();
        let inputs = [("a".to_string(), 1), ("b".to_string(), 9)].into();
        assert_eq!(program.evaluate(&inputs).unwrap(), Outcome::Success);
        program.validate().unwrap();
    }

    #[test]
    fn derived_inputs_are_computed_from_their_base() {
        let mut program = ge_program();
        program.inputs = vec![InputDecl::slot("a"), InputDecl::offset("b", "a", 1)];
        program.guards = vec![Predicate::parse("b > a").unwrap()];
        program.witnesses.clear();
        let inputs = [("a".to_string(), i32::MAX)].into();
        assert_eq!(program.evaluate(&inputs).unwrap(), Outcome::Error);
    }

    #[test]
    fn validation_rejects_inconsistent_labels() {
        let mut program = ge_program();
        program.verdict = Verdict::ErrorUnreachable;
        assert!(program.validate().is_err());

        let mut program = ge_program();
        program.witnesses[0].expect = Outcome::Success;
        assert!(program.validate().is_err());

        let mut program = ge_program();
        program.verdict = Verdict::CtSecure;
        assert!(program.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_declarations() {
        let mut program = ge_program();
        program.inputs.push(InputDecl::slot("a"));
        assert!(program.validate().is_err());

        let mut program = ge_program();
        program.inputs = vec![InputDecl::offset("b", "a", 1), InputDecl::slot("a")];
        assert!(program.validate().is_err());

        let mut program = ge_program();
        program.guards = vec![Predicate::parse("a >= c").unwrap()];
        assert!(program.validate().is_err());

        let mut program = ge_program();
        program.id = "bad/id".into();
        assert!(program.validate().is_err());
    }

    #[test]
    fn fingerprint_changes_with_the_program() {
        let program = ge_program();
        let mut other = ge_program();
        other.guards = vec![Predicate::parse("a > b").unwrap()];
        assert_eq!(program.fingerprint().unwrap(), ge_program().fingerprint().unwrap());
        assert_ne!(program.fingerprint().unwrap(), other.fingerprint().unwrap());
        assert_eq!(program.fingerprint().unwrap().len(), 64);
    }
}
