//! Verdict labels and scoring of external tool output against them.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ground-truth label attached to an example when it is authored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    ErrorReachable,
    /// The error branch is structurally dead (e.g. a contradictory guard).
    ErrorUnreachable,
    CtSecure,
    CtInsecure,
}

/// Two orthogonal questions a tool can answer about an example.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Axis {
    Reachability,
    ConstantTime,
}

impl Verdict {
    pub fn axis(&self) -> Axis {
        match self {
            Verdict::ErrorReachable | Verdict::ErrorUnreachable => Axis::Reachability,
            Verdict::CtSecure | Verdict::CtInsecure => Axis::ConstantTime,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::ErrorReachable => "error-reachable",
            Verdict::ErrorUnreachable => "error-unreachable",
            Verdict::CtSecure => "ct-secure",
            Verdict::CtInsecure => "ct-insecure",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Verdict {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error-reachable" | "reachable" => Ok(Verdict::ErrorReachable),
            "error-unreachable" | "unreachable" | "contradiction" => Ok(Verdict::ErrorUnreachable),
            "ct-secure" | "secure" => Ok(Verdict::CtSecure),
            "ct-insecure" | "insecure" => Ok(Verdict::CtInsecure),
            other => bail!("unknown verdict `{other}`"),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::Reachability => "reachability",
            Axis::ConstantTime => "constant-time",
        })
    }
}

/// What an external tool concluded about one example.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolVerdict {
    Reachable,
    Unreachable,
    Secure,
    Insecure,
    /// Timeouts, crashes, unsupported features; carries the reasons seen.
    Inconclusive(Vec<String>),
}

impl ToolVerdict {
    pub fn as_verdict(&self) -> Option<Verdict> {
        match self {
            ToolVerdict::Reachable => Some(Verdict::ErrorReachable),
            ToolVerdict::Unreachable => Some(Verdict::ErrorUnreachable),
            ToolVerdict::Secure => Some(Verdict::CtSecure),
            ToolVerdict::Insecure => Some(Verdict::CtInsecure),
            ToolVerdict::Inconclusive(_) => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ToolVerdict::Inconclusive(reasons) if reasons.is_empty() => "inconclusive".to_string(),
            ToolVerdict::Inconclusive(reasons) => format!("inconclusive ({})", reasons.join("+")),
            other => other
                .as_verdict()
                .map(|verdict| verdict.label().to_string())
                .unwrap_or_default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Score {
    Match,
    Mismatch,
}

/// Compares a tool's output with the expected label. Answers on the wrong
/// axis and inconclusive answers never match.
pub fn score(observed: &ToolVerdict, expected: Verdict) -> Score {
    match observed.as_verdict() {
        Some(verdict) if verdict == expected => Score::Match,
        _ => Score::Mismatch,
    }
}

/// One tool run set against the manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub example: String,
    pub expected: Option<Verdict>,
    pub observed: ToolVerdict,
    /// `None` when the example has no label in the manifest.
    pub score: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
}

impl ScoreRecord {
    pub fn new(example: &str, expected: Option<Verdict>, observed: ToolVerdict) -> Self {
        let score = expected.map(|verdict| score(&observed, verdict));
        Self {
            example: example.to_string(),
            expected,
            observed,
            score,
            source: None,
            elapsed_seconds: None,
        }
    }

    pub fn explanation(&self) -> String {
        match (self.expected, self.score) {
            (None, _) | (_, None) => format!(
                "{}: no label; tool said {}",
                self.example,
                self.observed.label()
            ),
            (Some(expected), Some(Score::Match)) => format!("{}: {} (match)", self.example, expected),
            (Some(expected), Some(Score::Mismatch)) => match self.observed.as_verdict() {
                Some(observed) if observed.axis() != expected.axis() => format!(
                    "{}: expected {expected} ({} axis), tool answered on the {} axis",
                    self.example,
                    expected.axis(),
                    observed.axis()
                ),
                _ => format!(
                    "{}: expected {expected}, tool said {}",
                    self.example,
                    self.observed.label()
                ),
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub matches: usize,
    pub mismatches: usize,
    pub unlabeled: usize,
    pub records: Vec<ScoreRecord>,
}

impl ScoreSummary {
    pub fn from_records(records: Vec<ScoreRecord>) -> Self {
        let mut summary = ScoreSummary::default();
        for record in &records {
            match record.score {
                Some(Score::Match) => summary.matches += 1,
                Some(Score::Mismatch) => summary.mismatches += 1,
                None => summary.unlabeled += 1,
            }
        }
        summary.records = records;
        summary
    }

    pub fn is_clean(&self) -> bool {
        self.mismatches == 0
    }

    pub fn mismatched(&self) -> impl Iterator<Item = &ScoreRecord> {
        self.records
            .iter()
            .filter(|record| record.score == Some(Score::Mismatch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_answers_score_as_match() {
        assert_eq!(score(&ToolVerdict::Reachable, Verdict::ErrorReachable), Score::Match);
        assert_eq!(score(&ToolVerdict::Unreachable, Verdict::ErrorUnreachable), Score::Match);
        assert_eq!(score(&ToolVerdict::Insecure, Verdict::CtInsecure), Score::Match);
    }

    #[test]
    fn unreachable_is_distinct_from_reachable() {
        assert_eq!(score(&ToolVerdict::Reachable, Verdict::ErrorUnreachable), Score::Mismatch);
        assert_eq!(score(&ToolVerdict::Unreachable, Verdict::ErrorReachable), Score::Mismatch);
    }

    #[test]
    fn cross_axis_and_inconclusive_answers_mismatch() {
        assert_eq!(score(&ToolVerdict::Secure, Verdict::ErrorUnreachable), Score::Mismatch);
        assert_eq!(
            score(&ToolVerdict::Inconclusive(vec!["timeout".into()]), Verdict::CtSecure),
            Score::Mismatch
        );
        let record = ScoreRecord::new("x", Some(Verdict::ErrorReachable), ToolVerdict::Secure);
        assert!(record.explanation().contains("constant-time axis"));
    }

    #[test]
    fn verdict_parsing_accepts_short_forms() {
        assert_eq!("reachable".parse::<Verdict>().unwrap(), Verdict::ErrorReachable);
        assert_eq!("CT-Insecure".parse::<Verdict>().unwrap(), Verdict::CtInsecure);
        assert_eq!("secure".parse::<Verdict>().unwrap(), Verdict::CtSecure);
        assert!("maybe".parse::<Verdict>().is_err());
        assert_eq!(Verdict::CtSecure.axis(), Axis::ConstantTime);
    }

    #[test]
    fn summary_counts_each_category() {
        let summary = ScoreSummary::from_records(vec![
            ScoreRecord::new("a", Some(Verdict::ErrorReachable), ToolVerdict::Reachable),
            ScoreRecord::new("b", Some(Verdict::ErrorUnreachable), ToolVerdict::Reachable),
            ScoreRecord::new("c", None, ToolVerdict::Secure),
        ]);
        assert_eq!((summary.matches, summary.mismatches, summary.unlabeled), (1, 1, 1));
        assert!(!summary.is_clean());
        assert_eq!(summary.mismatched().count(), 1);
    }

    #[test]
    fn verdicts_serialize_in_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Verdict::ErrorUnreachable).unwrap(),
            "\"error-unreachable\""
        );
    }
}
