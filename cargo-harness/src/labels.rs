//! Labels written by hand into example sources.
//!
//! ```c
//! /*
//!  * harness:example my-example
//!  * harness:expect error-reachable
//!  */
//! ```
//!
//! Constant-time candidates may instead carry
//! `Expected CHECKCT result: secure`. Without `harness:example` the id is
//! the name of the directory holding the file.

use anyhow::{anyhow, bail, Context, Result};
use harness_core::program::validate_example_id;
use harness_core::{LabelOrigin, Verdict, VerdictManifest};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

static RE_EXAMPLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"harness:example\s+(\S+)").expect("example marker regex"));
static RE_EXPECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"harness:expect\s+([A-Za-z-]+)").expect("expect marker regex"));
static RE_CHECKCT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Expected CHECKCT result:\s*(secure|insecure)").expect("checkct marker regex")
});

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelComment {
    pub example: String,
    pub verdict: Verdict,
    pub path: PathBuf,
}

/// Text of the comment on `line`, if any. Continuation lines of a block
/// comment start with `*`.
fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(idx) = trimmed.find("//") {
        return Some(&trimmed[idx + 2..]);
    }
    if let Some(idx) = trimmed.find("/*") {
        return Some(&trimmed[idx + 2..]);
    }
    trimmed.strip_prefix('*')
}

/// Reads the label of one source file. `Ok(None)` when it carries none.
pub fn scan_label_comment(text: &str, path: &Path) -> Result<Option<LabelComment>> {
    let mut example = None;
    let mut verdict: Option<Verdict> = None;

    for line in text.lines() {
        let Some(comment) = comment_text(line) else {
            continue;
        };
        if let Some(caps) = RE_EXAMPLE.captures(comment) {
            example = Some(caps[1].trim_end_matches("*/").to_string());
        }
        let found = if let Some(caps) = RE_EXPECT.captures(comment) {
            Some(caps[1].parse::<Verdict>()?)
        } else if let Some(caps) = RE_CHECKCT.captures(comment) {
            Some(caps[1].parse::<Verdict>()?)
        } else {
            None
        };
        if let Some(found) = found {
            match verdict {
                Some(previous) if previous != found => bail!(
                    "{} carries two labels: {previous} and {found}",
                    path.display()
                ),
                _ => verdict = Some(found),
            }
        }
    }

    let Some(verdict) = verdict else {
        return Ok(None);
    };
    let example = match example {
        Some(example) => example,
        None => path
            .parent()
            .and_then(|parent| parent.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("{} has a label but no example id", path.display()))?,
    };
    validate_example_id(&example).with_context(|| format!("label in {}", path.display()))?;

    Ok(Some(LabelComment {
        example,
        verdict,
        path: path.to_path_buf(),
    }))
}

/// Every labelled `*.c` file below the given directories, in path order.
pub fn scan_label_dirs(dirs: &[PathBuf]) -> Result<Vec<LabelComment>> {
    let mut labels = Vec::new();
    for dir in dirs {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.with_context(|| format!("walk label directory {}", dir.display()))?;
            if entry.file_type().is_file()
                && entry.path().extension().map_or(false, |ext| ext == "c")
            {
                files.push(entry.into_path());
            }
        }
        files.sort();

        for file in files {
            let bytes = fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            if let Some(label) = scan_label_comment(&String::from_utf8_lossy(&bytes), &file)? {
                labels.push(label);
            }
        }
    }
    Ok(labels)
}

/// Merges scanned labels into the manifest and returns how many were new.
pub fn merge_labels(manifest: &mut VerdictManifest, labels: &[LabelComment]) -> Result<usize> {
    let mut added = 0;
    for label in labels {
        let known = manifest.expected(&label.example).is_some();
        manifest.merge_label(
            &label.example,
            label.verdict,
            LabelOrigin::Comment(label.path.display().to_string()),
        )?;
        if !known {
            added += 1;
        }
    }
    tracing::debug!(scanned = labels.len(), added, "merged label comments");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::ManifestEntry;
    use tempfile::tempdir;

    #[test]
    fn block_comment_header_is_read() {
        let text = "/*\n * harness:example my-example\n * harness:expect error-unreachable\n */\nint main(void) { return 0; }\n";
        let label = scan_label_comment(text, Path::new("x/example.c")).unwrap().unwrap();
        assert_eq!(label.example, "my-example");
        assert_eq!(label.verdict, Verdict::ErrorUnreachable);
    }

    #[test]
    fn checkct_line_with_directory_id() {
        let text = "// Expected CHECKCT result: insecure\nint f(int k);\n";
        let label = scan_label_comment(text, Path::new("ct/leaky-lut/candidate.c"))
            .unwrap()
            .unwrap();
        assert_eq!(label.example, "leaky-lut");
        assert_eq!(label.verdict, Verdict::CtInsecure);
    }

    #[test]
    fn markers_outside_comments_are_ignored() {
        let text = "const char *s = \"harness:expect error-reachable\";\n";
        assert!(scan_label_comment(text, Path::new("a/b.c")).unwrap().is_none());
    }

    #[test]
    fn disagreeing_labels_are_rejected() {
        let text = "// harness:expect ct-secure\n// Expected CHECKCT result: insecure\n";
        assert!(scan_label_comment(text, Path::new("a/b.c")).is_err());
        let text = "// harness:expect maybe\n";
        assert!(scan_label_comment(text, Path::new("a/b.c")).is_err());
    }

    #[test]
    fn directories_merge_into_manifest() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("extra-one")).unwrap();
        fs::write(
            dir.path().join("extra-one/example.c"),
            "// harness:expect error-reachable\n",
        )
        .unwrap();
        fs::write(dir.path().join("extra-one/notes.txt"), "// harness:expect ct-secure\n").unwrap();
        fs::write(
            dir.path().join("known.c"),
            "// harness:example zero-input\n// harness:expect error-reachable\n",
        )
        .unwrap();

        let labels = scan_label_dirs(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(labels.len(), 2);

        let mut manifest = VerdictManifest::new();
        manifest
            .insert("zero-input", ManifestEntry::new(Verdict::ErrorReachable, LabelOrigin::Builtin))
            .unwrap();
        assert_eq!(merge_labels(&mut manifest, &labels).unwrap(), 1);
        assert_eq!(manifest.expected("extra-one"), Some(Verdict::ErrorReachable));

        let conflicting = LabelComment {
            example: "zero-input".into(),
            verdict: Verdict::ErrorUnreachable,
            path: PathBuf::from("elsewhere.c"),
        };
        assert!(merge_labels(&mut manifest, &[conflicting]).is_err());
    }
}
