//! Analyzable-example harness.
//!
//! Builds candidate programs whose only inputs are opaque symbolic slots and
//! whose only observable outcome is which of two sentinels they reach, emits
//! them as C in freestanding and shimmed forms, records their ground-truth
//! verdicts and scores external tool output against those verdicts.

pub mod config;
pub mod context;
pub mod corpus;
pub mod ct;
pub mod generator;
pub mod manifest;
pub mod predicate;
pub mod program;
pub mod sentinel;
pub mod shim;
pub mod slot;
pub mod toollog;
pub mod verdict;

pub use config::HarnessConfig;
pub use context::{Driver, Execution, RunContext};
pub use corpus::{Corpus, LabelIssue};
pub use ct::{check_label, find_divergence, observe, CtProgram, CtTrace};
pub use generator::{generate, generate_ct, Artifact, Form, GeneratorOptions};
pub use harness_abi::{CounterPair, CounterSnapshot, Outcome};
pub use manifest::{
    expected, read_manifest_json, verify_artifacts, write_artifacts, write_manifest_json,
    write_scores_json, ArtifactDrift, LabelOrigin, ManifestEntry, VerdictManifest,
};
pub use predicate::{Env, Predicate};
pub use program::CandidateProgram;
pub use sentinel::SentinelLog;
pub use shim::{run_shimmed, NondetStream, Shim, ShimReport, StepValues};
pub use slot::{Slot, SlotBank, SlotRole};
pub use toollog::{load_tool_runs, score_runs, ToolRun};
pub use verdict::{score, Axis, Score, ScoreRecord, ScoreSummary, ToolVerdict, Verdict};

/// Builds the manifest for a corpus and writes every artifact under `root`.
pub fn build_corpus(
    corpus: &Corpus,
    options: &GeneratorOptions,
    root: &std::path::Path,
) -> anyhow::Result<VerdictManifest> {
    use anyhow::Context;

    let mut manifest = VerdictManifest::new();
    for program in corpus.programs() {
        let artifacts = generate(program, options)?;
        let origin = corpus
            .origin(&program.id)
            .cloned()
            .unwrap_or(LabelOrigin::Builtin);
        let mut entry = ManifestEntry::new(program.verdict, origin);
        entry.description = program.description.clone();
        entry.fingerprint = Some(program.fingerprint()?);
        entry.artifacts = write_artifacts(root, &artifacts)
            .with_context(|| format!("write artifacts of `{}`", program.id))?;
        manifest.insert(&program.id, entry)?;
    }
    for program in corpus.ct_programs() {
        let artifact = generate_ct(program);
        let mut entry = ManifestEntry::new(program.verdict(), LabelOrigin::Builtin);
        entry.description = program.description().to_string();
        entry.fingerprint = Some(artifact.sha256.clone());
        entry.artifacts = write_artifacts(root, std::slice::from_ref(&artifact))
            .with_context(|| format!("write artifacts of `{}`", program.id()))?;
        manifest.insert(program.id(), entry)?;
    }
    tracing::info!(examples = manifest.len(), root = %root.display(), "corpus written");
    Ok(manifest)
}
