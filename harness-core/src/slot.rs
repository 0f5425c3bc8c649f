//! Symbolic input slots.
//!
//! A slot is a named storage cell plus one accessor that reads it. Reads go
//! through a volatile load and [`black_box`] inside a non-inlined method, so
//! two reads of two slots can never be merged into one value.

use anyhow::{bail, Result};
use crate::generator::CANDIDATE_FN;
use harness_abi::{is_reserved_symbol, NONDET_PREFIX, NONDET_SLOT_PREFIX};
use serde::{Deserialize, Serialize};
use std::hint::black_box;

/// Accessor used when every input is served by one rotating routine.
pub const ROTATING_ACCESSOR: &str = "__VERIFIER_nondet_int";
/// Backing array of the rotating accessor.
pub const ROTATING_STORAGE: &str = "__VERIFIER_nondet_slots";
/// Forced-read rotation index of the rotating accessor.
pub const ROTATING_INDEX: &str = "__VERIFIER_nondet_idx";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotRole {
    #[default]
    Public,
    Secret,
}

impl SlotRole {
    pub fn label(&self) -> &'static str {
        match self {
            SlotRole::Public => "public",
            SlotRole::Secret => "secret",
        }
    }
}

/// Handle to a slot of the [`SlotBank`] that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot(usize);

#[derive(Clone, Debug)]
struct SlotCell {
    name: String,
    role: SlotRole,
    value: i32,
    reads: u32,
}

/// Process-lifetime storage for the slots of one run.
#[derive(Clone, Debug, Default)]
pub struct SlotBank {
    cells: Vec<SlotCell>,
}

impl SlotBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_slot(&mut self, name: &str, role: SlotRole) -> Result<Slot> {
        validate_identifier(name)?;
        if self.lookup(name).is_some() {
            bail!("slot `{name}` is declared twice");
        }
        self.cells.push(SlotCell {
            name: name.to_string(),
            role,
            value: 0,
            reads: 0,
        });
        Ok(Slot(self.cells.len() - 1))
    }

    pub fn lookup(&self, name: &str) -> Option<Slot> {
        self.cells
            .iter()
            .position(|cell| cell.name == name)
            .map(Slot)
    }

    /// Host-side write of the value the next reads will observe.
    pub fn supply(&mut self, slot: Slot, value: i32) {
        self.cells[slot.0].value = value;
    }

    /// Reads a slot without letting the optimizer reuse an earlier value.
    #[inline(never)]
    pub fn read(&mut self, slot: Slot) -> i32 {
        let cell = &mut self.cells[slot.0];
        cell.reads = cell.reads.saturating_add(1);
        // SAFETY: the pointer comes from a live, aligned `&i32`.
        let value = unsafe { std::ptr::read_volatile(&cell.value) };
        black_box(value)
    }

    pub fn name(&self, slot: Slot) -> &str {
        &self.cells[slot.0].name
    }

    pub fn role(&self, slot: Slot) -> SlotRole {
        self.cells[slot.0].role
    }

    pub fn reads(&self, slot: Slot) -> u32 {
        self.cells[slot.0].reads
    }

    pub fn total_reads(&self) -> u32 {
        self.cells.iter().map(|cell| cell.reads).sum()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        (0..self.cells.len()).map(Slot)
    }
}

/// Single accessor serving several slots in turn.
///
/// The rotation index is read through [`black_box`] on every call. Without
/// that, two calls could legally be folded into the same load.
#[derive(Clone, Debug)]
pub struct RotatingSource {
    slots: Vec<Slot>,
    index: usize,
}

impl RotatingSource {
    pub fn new(slots: Vec<Slot>) -> Result<Self> {
        if slots.is_empty() {
            bail!("a rotating source needs at least one slot");
        }
        Ok(Self { slots, index: 0 })
    }

    #[inline(never)]
    pub fn next(&mut self, bank: &mut SlotBank) -> i32 {
        let index = black_box(self.index);
        let slot = self.slots[index % self.slots.len()];
        self.index = index.wrapping_add(1);
        bank.read(slot)
    }

    pub fn position(&self) -> usize {
        self.index
    }
}

/// Accessor routine name for a named slot.
pub fn accessor_symbol(name: &str) -> String {
    format!("{NONDET_PREFIX}int_{name}")
}

/// Storage name for a named slot.
pub fn storage_symbol(name: &str) -> String {
    format!("{NONDET_SLOT_PREFIX}{name}")
}

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Alignas", "_Alignof", "_Atomic",
    "_Bool", "_Complex", "_Generic", "_Imaginary", "_Noreturn", "_Static_assert",
    "_Thread_local",
];

/// Slot and input names end up as C identifiers next to the harness symbols,
/// so keywords and anything the harness defines are refused.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    match chars.next() {
        None => bail!("empty identifier"),
        Some(first) if !(first.is_ascii_alphabetic() || first == '_') => {
            bail!("identifier `{name}` must start with a letter or underscore")
        }
        Some(_) => {}
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        bail!("identifier `{name}` contains `{bad}`");
    }
    if C_KEYWORDS.contains(&name) {
        bail!("identifier `{name}` is a C keyword");
    }
    if name == CANDIDATE_FN || is_reserved_symbol(name) {
        bail!("identifier `{name}` is reserved by the harness");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_stable_without_writes() {
        let mut bank = SlotBank::new();
        let a = bank.make_slot("a", SlotRole::Public).unwrap();
        bank.supply(a, 42);
        assert_eq!(bank.read(a), 42);
        assert_eq!(bank.read(a), 42);
        assert_eq!(bank.reads(a), 2);
    }

    #[test]
    fn distinct_slots_hold_independent_values() {
        let mut bank = SlotBank::new();
        let a = bank.make_slot("a", SlotRole::Public).unwrap();
        let b = bank.make_slot("b", SlotRole::Secret).unwrap();
        bank.supply(a, 1);
        bank.supply(b, -1);
        assert_eq!((bank.read(a), bank.read(b)), (1, -1));
        bank.supply(a, 7);
        assert_eq!((bank.read(a), bank.read(b)), (7, -1));
        assert_eq!(bank.role(b), SlotRole::Secret);
        assert_eq!(bank.total_reads(), 4);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut bank = SlotBank::new();
        bank.make_slot("a", SlotRole::Public).unwrap();
        let err = bank.make_slot("a", SlotRole::Secret).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn identifiers_must_be_c_names() {
        assert!(validate_identifier("public_a").is_ok());
        assert!(validate_identifier("_x9").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("9a").is_err());
        assert!(validate_identifier("a-b").is_err());
    }

    #[test]
    fn keywords_and_harness_symbols_are_refused() {
        for name in ["int", "if", "volatile", "_Bool"] {
            let err = validate_identifier(name).unwrap_err();
            assert!(err.to_string().contains("C keyword"), "{name}: {err}");
        }
        for name in ["fun", "main", "reach_success", "success_flag", "c2bc_main", "error_flag"] {
            let err = validate_identifier(name).unwrap_err();
            assert!(err.to_string().contains("reserved"), "{name}: {err}");
        }
        assert!(validate_identifier("__VERIFIER_nondet_int_a").is_err());
        assert!(validate_identifier("integer").is_ok());

        let mut bank = SlotBank::new();
        assert!(bank.make_slot("reach_error", SlotRole::Public).is_err());
    }

    #[test]
    fn rotating_source_walks_slots_in_order() {
        let mut bank = SlotBank::new();
        let a = bank.make_slot("a", SlotRole::Public).unwrap();
        let b = bank.make_slot("b", SlotRole::Public).unwrap();
        bank.supply(a, 10);
        bank.supply(b, 20);
        let mut source = RotatingSource::new(vec![a, b]).unwrap();
        assert_eq!(source.next(&mut bank), 10);
        assert_eq!(source.next(&mut bank), 20);
        assert_eq!(source.next(&mut bank), 10);
        assert_eq!(source.position(), 3);
    }

    #[test]
    fn symbol_names_follow_the_contract() {
        assert_eq!(accessor_symbol("a"), "__VERIFIER_nondet_int_a");
        assert_eq!(storage_symbol("a"), "__VERIFIER_nondet_slot_a");
    }
}
