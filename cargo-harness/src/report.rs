use anyhow::{Context, Result};
use harness_core::{Axis, Score, ScoreSummary, VerdictManifest};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Markdown report of one scoring pass.
pub fn render_score_report(manifest: &VerdictManifest, summary: &ScoreSummary) -> Result<String> {
    let mut content = String::new();

    writeln!(content, "# Tool Score Report")?;
    writeln!(content)?;
    writeln!(content, "Generated by cargo-harness v{}", env!("CARGO_PKG_VERSION"))?;
    writeln!(content, "Date: {}", chrono::Utc::now().format("%Y-%m-%d %H:%M UTC"))?;
    writeln!(
        content,
        "Manifest: {} labelled examples, generated {}",
        manifest.len(),
        manifest.generated_at.format("%Y-%m-%d %H:%M UTC")
    )?;
    writeln!(content)?;

    writeln!(content, "## Summary")?;
    writeln!(content)?;
    writeln!(content, "| Category | Count |")?;
    writeln!(content, "|----------|-------|")?;
    writeln!(content, "| Matches | {} |", summary.matches)?;
    writeln!(content, "| Mismatches | {} |", summary.mismatches)?;
    writeln!(content, "| Unlabelled | {} |", summary.unlabeled)?;
    writeln!(content, "| Total Runs | {} |", summary.records.len())?;
    writeln!(content)?;

    let mut by_axis: BTreeMap<Axis, (usize, usize)> = BTreeMap::new();
    for record in &summary.records {
        let (Some(expected), Some(score)) = (record.expected, record.score) else {
            continue;
        };
        let counts = by_axis.entry(expected.axis()).or_default();
        match score {
            Score::Match => counts.0 += 1,
            Score::Mismatch => counts.1 += 1,
        }
    }
    if !by_axis.is_empty() {
        writeln!(content, "### By Axis")?;
        writeln!(content)?;
        writeln!(content, "| Axis | Matches | Mismatches |")?;
        writeln!(content, "|------|---------|------------|")?;
        for (axis, (matches, mismatches)) in by_axis {
            writeln!(content, "| {axis} | {matches} | {mismatches} |")?;
        }
        writeln!(content)?;
    }

    writeln!(content, "## Runs")?;
    writeln!(content)?;
    writeln!(content, "| Example | Expected | Tool | Score | Time (s) |")?;
    writeln!(content, "|---------|----------|------|-------|----------|")?;
    for record in &summary.records {
        let expected = record
            .expected
            .map(|verdict| verdict.label().to_string())
            .unwrap_or_else(|| "-".to_string());
        let score = match record.score {
            Some(Score::Match) => "match",
            Some(Score::Mismatch) => "**mismatch**",
            None => "unlabelled",
        };
        let elapsed = record
            .elapsed_seconds
            .map(|secs| format!("{secs:.2}"))
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            content,
            "| {} | {} | {} | {} | {} |",
            escape_markdown_pipes(&record.example),
            expected,
            escape_markdown_pipes(&record.observed.label()),
            score,
            elapsed
        )?;
    }
    writeln!(content)?;

    let mismatched: Vec<_> = summary.mismatched().collect();
    if !mismatched.is_empty() {
        writeln!(content, "## Mismatches")?;
        writeln!(content)?;
        for record in mismatched {
            writeln!(content, "- {}", record.explanation())?;
            if let Some(source) = &record.source {
                writeln!(content, "  - source: `{source}`")?;
            }
        }
        writeln!(content)?;
    }

    Ok(content)
}

pub fn write_score_report(
    path: &Path,
    manifest: &VerdictManifest,
    summary: &ScoreSummary,
) -> Result<()> {
    let content = render_score_report(manifest, summary)?;
    fs::write(path, content).with_context(|| format!("write score report {}", path.display()))
}

pub fn escape_markdown_pipes(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::{LabelOrigin, ManifestEntry, ScoreRecord, ToolVerdict, Verdict};

    #[test]
    fn report_lists_mismatches_with_explanations() {
        let mut manifest = VerdictManifest::new();
        manifest
            .insert("zero-input", ManifestEntry::new(Verdict::ErrorReachable, LabelOrigin::Builtin))
            .unwrap();
        manifest
            .insert("simple-ct-branch", ManifestEntry::new(Verdict::CtSecure, LabelOrigin::Builtin))
            .unwrap();
        let records = vec![
            ScoreRecord::new("zero-input", manifest.expected("zero-input"), ToolVerdict::Reachable),
            ScoreRecord::new(
                "simple-ct-branch",
                manifest.expected("simple-ct-branch"),
                ToolVerdict::Reachable,
            ),
            ScoreRecord::new("stray", None, ToolVerdict::Inconclusive(vec!["jump".into()])),
        ];
        let summary = ScoreSummary::from_records(records);

        let report = render_score_report(&manifest, &summary).unwrap();
        assert!(report.contains("| Matches | 1 |"));
        assert!(report.contains("| Mismatches | 1 |"));
        assert!(report.contains("| Unlabelled | 1 |"));
        assert!(report.contains("| reachability | 1 | 0 |"));
        assert!(report.contains("| constant-time | 0 | 1 |"));
        assert!(report.contains("## Mismatches"));
        assert!(report.contains("simple-ct-branch: expected ct-secure"));
    }

    #[test]
    fn clean_runs_have_no_mismatch_section() {
        let manifest = VerdictManifest::new();
        let report = render_score_report(&manifest, &ScoreSummary::default()).unwrap();
        assert!(report.contains("| Total Runs | 0 |"));
        assert!(!report.contains("## Mismatches"));
        assert!(!report.contains("### By Axis"));
    }
}
