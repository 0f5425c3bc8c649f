//! Parsing of external tool logs into verdicts.
//!
//! A log is whatever the tool printed, optionally framed by the harness:
//!
//! ```text
//! [example] ineq-a-ge-b
//! [source] out/harness/ineq-a-ge-b/example.shim.c
//! [binsec:run] model+ok in 0.42 seconds
//! ```
//!
//! When the run line is missing, reasons are recovered from the raw output
//! by keyword.

use crate::manifest::VerdictManifest;
use crate::verdict::{ScoreRecord, ScoreSummary, ToolVerdict};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Keyword found in raw output, and the reason it stands for.
pub const RISKS: &[(&str, &str)] = &[
    ("unsupported", "unsupported"),
    ("Depth exceeded", "depth"),
    ("UNKNOWN", "unknown"),
    ("TIMEOUT", "solver-timeout"),
    ("warning", "warning"),
    ("Dynamic jump", "jump"),
    ("Uncaught exception", "exception"),
    ("Model", "model"),
    ("Goal unreachable", "unreachable"),
];

static RE_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(?:[a-z-]+-)?binsec:run\]\s+(\S*)\s+in\s+([0-9.eE+-]+)\s+seconds")
        .expect("run line regex")
});
static RE_EXAMPLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[example\]\s+(\S+)").expect("example line regex"));
static RE_SOURCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[source\]\s+(.+?)\s*$").expect("source line regex"));
static RE_CT_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Program status is\s*:\s*(secure|insecure|unknown)").expect("ct status regex")
});

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolRun {
    pub example: String,
    pub log: PathBuf,
    pub source: Option<String>,
    pub reasons: Vec<String>,
    pub elapsed: Option<f64>,
    pub verdict: ToolVerdict,
}

/// Reasons a block of raw output stands for.
pub fn classify_output(text: &str) -> BTreeSet<String> {
    let mut reasons = BTreeSet::new();
    for line in text.lines() {
        for (keyword, reason) in RISKS {
            if line.contains(keyword) {
                reasons.insert(reason.to_string());
            }
        }
    }
    if reasons.is_empty() || (reasons.len() == 1 && reasons.contains("model")) {
        reasons.insert("ok".to_string());
    }
    reasons
}

fn verdict_from(reasons: &BTreeSet<String>, ct_status: Option<&str>) -> ToolVerdict {
    match ct_status {
        Some("secure") => return ToolVerdict::Secure,
        Some("insecure") => return ToolVerdict::Insecure,
        Some(_) => return ToolVerdict::Inconclusive(vec!["unknown".to_string()]),
        None => {}
    }
    if reasons.contains("model") {
        ToolVerdict::Reachable
    } else if reasons.contains("unreachable") {
        ToolVerdict::Unreachable
    } else {
        ToolVerdict::Inconclusive(
            reasons
                .iter()
                .filter(|reason| reason.as_str() != "ok")
                .cloned()
                .collect(),
        )
    }
}

/// Example id implied by a path: the name of its directory.
fn example_from_path(path: &Path) -> Option<String> {
    path.parent()
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
}

pub fn parse_tool_log(text: &str, log: &Path) -> ToolRun {
    let mut example = None;
    let mut source = None;
    let mut run_reasons: Option<BTreeSet<String>> = None;
    let mut elapsed = None;
    let mut ct_status = None;

    for line in text.lines() {
        let line = line.trim_end();
        if let Some(caps) = RE_EXAMPLE.captures(line) {
            example = Some(caps[1].to_string());
        } else if let Some(caps) = RE_SOURCE.captures(line) {
            source = Some(caps[1].to_string());
        } else if let Some(caps) = RE_RUN.captures(line) {
            let reasons = caps[1]
                .split('+')
                .filter(|reason| !reason.is_empty())
                .map(str::to_string)
                .collect();
            run_reasons = Some(reasons);
            elapsed = caps[2].parse::<f64>().ok();
        }
        if let Some(caps) = RE_CT_STATUS.captures(line) {
            ct_status = Some(caps[1].to_ascii_lowercase());
        }
    }

    let reasons = run_reasons.unwrap_or_else(|| classify_output(text));
    let verdict = verdict_from(&reasons, ct_status.as_deref());
    let example = example
        .or_else(|| source.as_deref().and_then(|s| example_from_path(Path::new(s))))
        .or_else(|| example_from_path(log))
        .unwrap_or_else(|| log.display().to_string());

    ToolRun {
        example,
        log: log.to_path_buf(),
        source,
        reasons: reasons.into_iter().collect(),
        elapsed,
        verdict,
    }
}

/// Reads logs from files, or from every `*.log` below a directory.
pub fn load_tool_runs(paths: &[PathBuf]) -> Result<Vec<ToolRun>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found = Vec::new();
            for entry in WalkDir::new(path).follow_links(false) {
                let entry = entry.with_context(|| format!("walk {}", path.display()))?;
                if entry.file_type().is_file()
                    && entry.path().extension().map_or(false, |ext| ext == "log")
                {
                    found.push(entry.into_path());
                }
            }
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }

    let mut runs = Vec::with_capacity(files.len());
    for file in files {
        let bytes = fs::read(&file).with_context(|| format!("read tool log {}", file.display()))?;
        let run = parse_tool_log(&String::from_utf8_lossy(&bytes), &file);
        tracing::debug!(example = %run.example, verdict = %run.verdict.label(), "parsed tool log");
        runs.push(run);
    }
    Ok(runs)
}

/// Scores each run against the manifest label of its example.
pub fn score_runs(manifest: &VerdictManifest, runs: &[ToolRun]) -> ScoreSummary {
    let records = runs
        .iter()
        .map(|run| {
            let mut record =
                ScoreRecord::new(&run.example, manifest.expected(&run.example), run.verdict.clone());
            record.source = run.source.clone();
            record.elapsed_seconds = run.elapsed;
            record
        })
        .collect();
    ScoreSummary::from_records(records)
}
