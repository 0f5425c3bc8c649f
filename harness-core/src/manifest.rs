//! Verdict manifest: the ground-truth label of every example plus the
//! artifacts generated for it.

use crate::generator::{Artifact, Form};
use crate::verdict::{ScoreSummary, Verdict};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MANIFEST_VERSION: u32 = 1;

/// Where a label came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "path")]
pub enum LabelOrigin {
    Builtin,
    Pack(String),
    Comment(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub form: Form,
    pub path: String,
    pub sha256: String,
}

impl From<&Artifact> for ArtifactRecord {
    fn from(artifact: &Artifact) -> Self {
        Self {
            form: artifact.form,
            path: artifact.file_name.clone(),
            sha256: artifact.sha256.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub verdict: Verdict,
    #[serde(default)]
    pub description: String,
    /// Shared by every form generated from the same candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub origin: LabelOrigin,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
}

impl ManifestEntry {
    pub fn new(verdict: Verdict, origin: LabelOrigin) -> Self {
        Self {
            verdict,
            description: String::new(),
            fingerprint: None,
            origin,
            artifacts: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictManifest {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl Default for VerdictManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl VerdictManifest {
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            generated_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: &str, entry: ManifestEntry) -> Result<()> {
        if let Some(existing) = self.entries.get(id) {
            bail!(
                "example `{id}` is already labeled ({:?}); refusing a second entry",
                existing.origin
            );
        }
        self.entries.insert(id.to_string(), entry);
        Ok(())
    }

    /// Adds a hand-written label. Repeating the same label is fine, a
    /// different one is a conflict.
    pub fn merge_label(&mut self, id: &str, verdict: Verdict, origin: LabelOrigin) -> Result<()> {
        match self.entries.get(id) {
            Some(existing) if existing.verdict == verdict => Ok(()),
            Some(existing) => bail!(
                "conflicting labels for `{id}`: {} from {:?}, {verdict} from {origin:?}",
                existing.verdict,
                existing.origin
            ),
            None => self.insert(id, ManifestEntry::new(verdict, origin)),
        }
    }

    pub fn expected(&self, id: &str) -> Option<Verdict> {
        self.entries.get(id).map(|entry| entry.verdict)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn expected(manifest: &VerdictManifest, id: &str) -> Option<Verdict> {
    manifest.expected(id)
}

/// Writes generated files under `root` and returns their manifest records.
pub fn write_artifacts(root: &Path, artifacts: &[Artifact]) -> Result<Vec<ArtifactRecord>> {
    let mut records = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let path = root.join(&artifact.file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, &artifact.contents)
            .with_context(|| format!("write artifact {}", path.display()))?;
        records.push(ArtifactRecord::from(artifact));
    }
    Ok(records)
}

pub fn write_manifest_json(path: impl AsRef<Path>, manifest: &VerdictManifest) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent).context("create parent directories for manifest JSON")?;
    }
    let mut file = File::create(path.as_ref()).context("create manifest JSON file")?;
    serde_json::to_writer_pretty(&mut file, manifest).context("serialize manifest to JSON")?;
    file.write_all(b"\n").ok();
    Ok(())
}

pub fn read_manifest_json(path: impl AsRef<Path>) -> Result<VerdictManifest> {
    let path = path.as_ref();
    let contents =
        fs::read(path).with_context(|| format!("read manifest {}", path.display()))?;
    let manifest: VerdictManifest = serde_json::from_slice(&contents)
        .with_context(|| format!("parse manifest {}", path.display()))?;
    if manifest.version != MANIFEST_VERSION {
        bail!(
            "manifest {} has version {}, expected {MANIFEST_VERSION}",
            path.display(),
            manifest.version
        );
    }
    Ok(manifest)
}

pub fn write_scores_json(path: impl AsRef<Path>, summary: &ScoreSummary) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent).context("create parent directories for scores JSON")?;
    }
    let mut file = File::create(path.as_ref()).context("create scores JSON file")?;
    serde_json::to_writer_pretty(&mut file, summary).context("serialize scores to JSON")?;
    file.write_all(b"\n").ok();
    Ok(())
}

/// A recorded artifact that no longer matches the file on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArtifactDrift {
    pub example: String,
    pub path: PathBuf,
    pub expected: String,
    /// `None` when the file is missing.
    pub found: Option<String>,
}

pub fn verify_artifacts(manifest: &VerdictManifest, root: &Path) -> Result<Vec<ArtifactDrift>> {
    let mut drift = Vec::new();
    for (id, entry) in &manifest.entries {
        for record in &entry.artifacts {
            let path = root.join(&record.path);
            let found = match fs::read(&path) {
                Ok(bytes) => Some(hex::encode(Sha256::digest(&bytes))),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
                Err(err) => {
                    return Err(err).with_context(|| format!("read artifact {}", path.display()))
                }
            };
            if found.as_deref() != Some(record.sha256.as_str()) {
                drift.push(ArtifactDrift {
                    example: id.clone(),
                    path,
                    expected: record.sha256.clone(),
                    found,
                });
            }
        }
    }
    Ok(drift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{ScoreRecord, ToolVerdict};
    use tempfile::tempdir;

    #[test]
    fn manifest_round_trips_through_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("manifest.json");
        let mut manifest = VerdictManifest::new();
        manifest
            .insert("x", ManifestEntry::new(Verdict::CtSecure, LabelOrigin::Builtin))
            .unwrap();
        write_manifest_json(&path, &manifest).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.contains("\"ct-secure\""));
        let loaded = read_manifest_json(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(expected(&loaded, "x"), Some(Verdict::CtSecure));
        assert_eq!(expected(&loaded, "y"), None);
    }

    #[test]
    fn merging_labels_detects_conflicts() {
        let mut manifest = VerdictManifest::new();
        let origin = LabelOrigin::Comment("a/example.c".into());
        manifest
            .merge_label("a", Verdict::ErrorReachable, origin.clone())
            .unwrap();
        manifest
            .merge_label("a", Verdict::ErrorReachable, origin.clone())
            .unwrap();
        assert!(manifest
            .merge_label("a", Verdict::ErrorUnreachable, origin)
            .is_err());
        assert_eq!(manifest.len(), 1);
    }

    #[test]
    fn edited_artifacts_are_reported_as_drift() {
        let dir = tempdir().unwrap();
        let artifacts = vec![
            Artifact::new(Form::Freestanding, "x/example.c".into(), "int main(void) { return 0; }\n".into()),
            Artifact::new(Form::Shimmed, "x/example.shim.c".into(), "int c2bc_main(void) { return 0; }\n".into()),
        ];
        let mut entry = ManifestEntry::new(Verdict::ErrorReachable, LabelOrigin::Builtin);
        entry.artifacts = write_artifacts(dir.path(), &artifacts).unwrap();
        let mut manifest = VerdictManifest::new();
        manifest.insert("x", entry).unwrap();
        assert!(verify_artifacts(&manifest, dir.path()).unwrap().is_empty());

        fs::write(dir.path().join("x/example.shim.c"), "int c2bc_main(void) { return 1; }\n").unwrap();
        fs::remove_file(dir.path().join("x/example.c")).unwrap();
        let drift = verify_artifacts(&manifest, dir.path()).unwrap();
        assert_eq!(drift.len(), 2);
        assert!(drift.iter().any(|d| d.found.is_none()));
        assert!(drift.iter().any(|d| d.found.is_some()));
    }

    #[test]
    fn scores_are_written_as_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scores.json");
        let summary = ScoreSummary::from_records(vec![ScoreRecord::new(
            "x",
            Some(Verdict::ErrorReachable),
            ToolVerdict::Reachable,
        )]);
        write_scores_json(&path, &summary).unwrap();
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["matches"], 1);
        assert_eq!(value["records"][0]["score"], "match");
    }
}
