//! The example corpus: built-in and pack-loaded reachability candidates
//! plus the constant-time candidates, and the self-check of their labels.

use crate::context::Driver;
use crate::ct::{builtin_ct_programs, check_label, CtProgram};
use crate::manifest::LabelOrigin;
use crate::program::CandidateProgram;
use crate::shim::{run_shimmed, NondetStream, StepValues};
use crate::verdict::Verdict;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUILTIN_PACK: &str = include_str!("../packs/builtin.yaml");
const BUILTIN_ORIGIN: &str = "builtin";

#[derive(Debug, Deserialize, Default)]
struct PackDocument {
    #[serde(default)]
    examples: Vec<CandidateProgram>,
}

/// A problem with an example's label, found without any external tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelIssue {
    pub example: String,
    pub message: String,
}

/// Reachability candidates plus constant-time candidates.
#[derive(Default)]
pub struct Corpus {
    programs: Vec<CandidateProgram>,
    ct_programs: Vec<Box<dyn CtProgram>>,
    origins: HashMap<String, LabelOrigin>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Result<Self> {
        let mut corpus = Self::new();
        corpus.load_pack_from_reader(BUILTIN_PACK.as_bytes(), BUILTIN_ORIGIN)?;
        for program in builtin_ct_programs() {
            corpus.add_ct(program).context("register builtin CT examples")?;
        }
        Ok(corpus)
    }

    pub fn load_pack<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let mut file =
            File::open(path).with_context(|| format!("open corpus pack {}", path.display()))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        self.load_pack_from_reader(&contents[..], &path.display().to_string())
    }

    /// Adds every example of a YAML pack and returns how many were added.
    pub fn load_pack_from_reader<R: Read>(&mut self, mut reader: R, origin: &str) -> Result<usize> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        let document: PackDocument = serde_yaml::from_slice(&buf)
            .with_context(|| format!("parse corpus pack {origin}"))?;

        let label_origin = if origin == BUILTIN_ORIGIN {
            LabelOrigin::Builtin
        } else {
            LabelOrigin::Pack(origin.to_string())
        };
        let count = document.examples.len();
        for program in document.examples {
            self.add(program, label_origin.clone())
                .with_context(|| format!("load corpus pack {origin}"))?;
        }
        tracing::debug!(origin, count, "loaded corpus pack");
        Ok(count)
    }

    pub fn add(&mut self, program: CandidateProgram, origin: LabelOrigin) -> Result<()> {
        if self.contains(&program.id) {
            bail!("example `{}` is defined twice", program.id);
        }
        self.origins.insert(program.id.clone(), origin);
        self.programs.push(program);
        Ok(())
    }

    pub fn add_ct(&mut self, program: Box<dyn CtProgram>) -> Result<()> {
        if self.contains(program.id()) {
            bail!("example `{}` is defined twice", program.id());
        }
        self.origins.insert(program.id().to_string(), LabelOrigin::Builtin);
        self.ct_programs.push(program);
        Ok(())
    }

    pub fn origin(&self, id: &str) -> Option<&LabelOrigin> {
        self.origins.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.program(id).is_some() || self.ct_program(id).is_some()
    }

    pub fn program(&self, id: &str) -> Option<&CandidateProgram> {
        self.programs.iter().find(|program| program.id == id)
    }

    pub fn ct_program(&self, id: &str) -> Option<&dyn CtProgram> {
        self.ct_programs
            .iter()
            .find(|program| program.id() == id)
            .map(|program| program.as_ref())
    }

    pub fn programs(&self) -> &[CandidateProgram] {
        &self.programs
    }

    pub fn ct_programs(&self) -> impl Iterator<Item = &dyn CtProgram> {
        self.ct_programs.iter().map(|program| program.as_ref())
    }

    /// Every example id with its label, reachability examples first.
    pub fn labels(&self) -> Vec<(String, Verdict)> {
        self.programs
            .iter()
            .map(|program| (program.id.clone(), program.verdict))
            .chain(
                self.ct_programs
                    .iter()
                    .map(|program| (program.id().to_string(), program.verdict())),
            )
            .collect()
    }

    pub fn len(&self) -> usize {
        self.programs.len() + self.ct_programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks every label: structure and witnesses through the driver and
    /// through the shim, traces for CT examples.
    pub fn validate(&self, steps: StepValues) -> Vec<LabelIssue> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        for program in &self.programs {
            if !seen.insert(program.id.as_str()) {
                issues.push(LabelIssue {
                    example: program.id.clone(),
                    message: "defined twice".to_string(),
                });
            }
            if let Err(err) = validate_program(program, steps) {
                issues.push(LabelIssue {
                    example: program.id.clone(),
                    message: format!("{err:#}"),
                });
            }
        }
        for program in &self.ct_programs {
            if let Err(err) = check_label(program.as_ref()) {
                issues.push(LabelIssue {
                    example: program.id().to_string(),
                    message: format!("{err:#}"),
                });
            }
        }
        for issue in &issues {
            tracing::warn!(example = %issue.example, "{}", issue.message);
        }
        issues
    }
}

fn validate_program(program: &CandidateProgram, steps: StepValues) -> Result<()> {
    program.validate()?;
    for (idx, witness) in program.witnesses.iter().enumerate() {
        let inputs: Vec<(&str, i32)> = witness
            .inputs
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
            .collect();
        let run = Driver::execute(program, &inputs)
            .with_context(|| format!("witness #{idx} through the driver"))?;
        if run.outcome != witness.expect {
            bail!(
                "witness #{idx} reached {} through the driver, expected {}",
                run.outcome.label(),
                witness.expect.label()
            );
        }

        let values = program
            .slot_inputs()
            .map(|input| witness.inputs.get(&input.name).copied().unwrap_or_default())
            .collect();
        let mut stream = NondetStream::new(values)?;
        let report = run_shimmed(program, &mut stream, steps)
            .with_context(|| format!("witness #{idx} through the shim"))?;
        if report.outcome != Some(witness.expect) {
            bail!(
                "witness #{idx} reached {:?} through the shim, expected {}",
                report.outcome.map(|outcome| outcome.label()),
                witness.expect.label()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_corpus_is_consistent() {
        let corpus = Corpus::builtin().unwrap();
        assert_eq!(corpus.len(), 10);
        assert!(corpus.validate(StepValues::default()).is_empty());
        assert!(corpus.ct_program("ct-multi-leak").is_some());
        let labels = corpus.labels();
        assert!(labels.contains(&("empty-default".to_string(), Verdict::ErrorUnreachable)));
        assert!(labels.contains(&("simple-ct-branch".to_string(), Verdict::CtSecure)));
    }

    #[test]
    fn packs_reject_duplicate_ids() {
        let mut corpus = Corpus::builtin().unwrap();
        let pack = "examples:\n  - id: zero-input\n    inputs: [{ name: x }]\n    guards: [\"x == 1\"]\n    verdict: error-reachable\n";
        let err = corpus.load_pack_from_reader(pack.as_bytes(), "dup.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("defined twice"));
    }

    #[test]
    fn wrong_labels_are_reported() {
        let mut corpus = Corpus::new();
        let pack = r#"
examples:
  - id: mislabeled
    inputs: [{ name: x }]
    guards: ["x == 1"]
    verdict: error-unreachable
    witnesses:
      - { inputs: { x: 1 }, expect: error }
"#;
        assert_eq!(corpus.load_pack_from_reader(pack.as_bytes(), "inline").unwrap(), 1);
        let issues = corpus.validate(StepValues::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].example, "mislabeled");
    }

    #[test]
    fn inputs_named_after_harness_symbols_are_reported() {
        let mut corpus = Corpus::new();
        let pack = r#"
examples:
  - id: shadows-sentinel
    inputs: [{ name: reach_success }]
    guards: ["reach_success == 1"]
    verdict: error-reachable
    witnesses:
      - { inputs: { reach_success: 1 }, expect: error }
"#;
        corpus.load_pack_from_reader(pack.as_bytes(), "inline").unwrap();
        let issues = corpus.validate(StepValues::default());
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("reserved"), "{}", issues[0].message);
    }

    #[test]
    fn bad_guards_fail_to_load() {
        let mut corpus = Corpus::new();
        let pack = "examples:\n  - id: broken\n    guards: [\"x +\"]\n    verdict: error-reachable\n";
        assert!(corpus.load_pack_from_reader(pack.as_bytes(), "inline").is_err());
    }
}
