mod labels;
mod report;

use anyhow::{bail, Context, Result};
use clap::{builder::BoolishValueParser, ArgAction, Parser};
use harness_core::{
    build_corpus, load_tool_runs, read_manifest_json, score_runs, verify_artifacts,
    write_manifest_json, write_scores_json, Corpus, Form, HarnessConfig, ScoreSummary,
    VerdictManifest,
};
use labels::{merge_labels, scan_label_dirs};
use report::{escape_markdown_pipes, write_score_report};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Generate analyzable examples, record their verdicts and score tool logs against them"
)]
struct Args {
    /// Directory for generated sources, the manifest and scores
    #[arg(long, default_value = "out/harness")]
    out_dir: PathBuf,

    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Additional corpus pack (YAML); may be passed multiple times
    #[arg(long = "corpus-pack", action = ArgAction::Append)]
    corpus_pack: Vec<PathBuf>,

    /// Leave the built-in examples out of the corpus
    #[arg(long)]
    no_builtin: bool,

    /// Output form to emit (`freestanding` or `shimmed`); may be passed multiple times
    #[arg(long = "form", action = ArgAction::Append, value_parser = parse_form)]
    form: Vec<Form>,

    /// Capacity of each generated nondet stub array
    #[arg(long)]
    nondet_capacity: Option<usize>,

    /// Score against an existing manifest instead of generating the corpus
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Directory of hand-written examples carrying label comments; may be passed multiple times
    #[arg(long = "label-dir", action = ArgAction::Append)]
    label_dir: Vec<PathBuf>,

    /// Tool log file, or directory walked for `*.log`; may be passed multiple times
    #[arg(long = "tool-log", action = ArgAction::Append)]
    tool_log: Vec<PathBuf>,

    /// Path for scores JSON (defaults to <out_dir>/scores.json)
    #[arg(long)]
    scores_json: Option<PathBuf>,

    /// Write a Markdown score report (a directory gets score-report.md)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Exit with status 1 when a tool verdict disagrees with its label
    #[arg(long, value_parser = BoolishValueParser::new())]
    fail_on_mismatch: Option<bool>,

    /// Print the corpus labels and exit
    #[arg(long)]
    list: bool,

    /// Check that the artifacts on disk still hash to the manifest's values
    #[arg(long)]
    verify_artifacts: bool,
}

fn parse_form(value: &str) -> Result<Form, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "freestanding" => Ok(Form::Freestanding),
        "shimmed" | "shim" => Ok(Form::Shimmed),
        other => Err(format!(
            "unknown form `{other}` (expected `freestanding` or `shimmed`)"
        )),
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<HarnessConfig> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    if args.no_builtin {
        config.include_builtin = false;
    }
    if !args.form.is_empty() {
        config.forms = args.form.clone();
    }
    if let Some(capacity) = args.nondet_capacity {
        config.nondet_capacity = capacity;
    }
    if let Some(fail) = args.fail_on_mismatch {
        config.fail_on_mismatch = fail;
    }
    config.packs.extend(args.corpus_pack.iter().cloned());
    config.label_dirs.extend(args.label_dir.iter().cloned());
    config.validate()?;
    Ok(config)
}

fn load_corpus(config: &HarnessConfig) -> Result<Corpus> {
    let mut corpus = if config.include_builtin {
        Corpus::builtin()?
    } else {
        Corpus::new()
    };

    if !config.packs.is_empty() {
        println!(
            "Loading corpus packs: {}",
            config
                .packs
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        for pack in &config.packs {
            corpus
                .load_pack(pack)
                .with_context(|| format!("load corpus pack from {}", pack.display()))?;
        }
    }
    Ok(corpus)
}

fn resolve_report_path(user_path: &Path, default_filename: &str) -> PathBuf {
    if user_path.is_dir() || user_path.to_string_lossy().ends_with('/') {
        user_path.join(default_filename)
    } else {
        user_path.to_path_buf()
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = load_config(&args)?;

    let (mut manifest, generated) = match &args.manifest {
        Some(path) => {
            let manifest = read_manifest_json(path)?;
            if args.list {
                print_manifest_inventory(&manifest);
                return Ok(());
            }
            (manifest, false)
        }
        None => {
            let corpus = load_corpus(&config)?;
            if args.list {
                print_corpus_inventory(&corpus);
                return Ok(());
            }

            let issues = corpus.validate(config.steps);
            if !issues.is_empty() {
                for issue in &issues {
                    eprintln!("cargo-harness: {}: {}", issue.example, issue.message);
                }
                bail!("{} example(s) carry a wrong label", issues.len());
            }

            fs::create_dir_all(&args.out_dir).context("create harness output directory")?;
            let manifest = build_corpus(&corpus, &config.generator_options(), &args.out_dir)?;
            (manifest, true)
        }
    };

    let added = if config.label_dirs.is_empty() {
        0
    } else {
        let comments = scan_label_dirs(&config.label_dirs)?;
        merge_labels(&mut manifest, &comments)?
    };

    if args.verify_artifacts {
        let drift = verify_artifacts(&manifest, &args.out_dir)?;
        if !drift.is_empty() {
            for item in &drift {
                eprintln!(
                    "cargo-harness: {} has drifted from `{}` (expected {}, found {})",
                    item.path.display(),
                    item.example,
                    item.expected,
                    item.found.as_deref().unwrap_or("nothing")
                );
            }
            bail!("{} artifact(s) differ from the manifest", drift.len());
        }
        println!("Artifacts match the manifest.");
    }

    if generated || added > 0 {
        fs::create_dir_all(&args.out_dir).context("create harness output directory")?;
        let manifest_path = args.out_dir.join("manifest.json");
        write_manifest_json(&manifest_path, &manifest)?;
        println!(
            "Manifest written: {} labelled examples ({} from label comments).",
            manifest.len(),
            added
        );
        println!("- Artifacts: {}", args.out_dir.display());
        println!("- Manifest: {}", manifest_path.display());
    }

    if args.tool_log.is_empty() {
        return Ok(());
    }

    let runs = load_tool_runs(&args.tool_log)?;
    let summary = score_runs(&manifest, &runs);

    let scores_path = args
        .scores_json
        .clone()
        .unwrap_or_else(|| args.out_dir.join("scores.json"));
    ensure_parent(&scores_path)?;
    write_scores_json(&scores_path, &summary)?;

    print_score_summary(&summary);
    println!("- Scores JSON: {}", scores_path.display());

    if let Some(report_path) = &args.report {
        let resolved = resolve_report_path(report_path, "score-report.md");
        ensure_parent(&resolved)?;
        write_score_report(&resolved, &manifest, &summary)?;
        println!("- Report: {}", resolved.display());
    }

    if !summary.is_clean() && config.fail_on_mismatch {
        std::process::exit(1);
    }

    Ok(())
}

fn print_score_summary(summary: &ScoreSummary) {
    println!(
        "Scored {} tool runs: {} matches, {} mismatches, {} unlabelled.",
        summary.records.len(),
        summary.matches,
        summary.mismatches,
        summary.unlabeled
    );
    for record in summary.mismatched() {
        println!("  mismatch: {}", record.explanation());
    }
    if summary.is_clean() {
        println!("All tool verdicts match their labels.");
    }
}

fn print_corpus_inventory(corpus: &Corpus) {
    let mut rows: Vec<(String, String, String)> = corpus
        .programs()
        .iter()
        .map(|program| {
            (
                program.id.clone(),
                program.verdict.to_string(),
                program.description.clone(),
            )
        })
        .chain(corpus.ct_programs().map(|program| {
            (
                program.id().to_string(),
                program.verdict().to_string(),
                program.description().to_string(),
            )
        }))
        .collect();
    rows.sort();

    println!("cargo-harness knows {} examples (built-ins plus loaded packs).", rows.len());
    print_inventory_table(&rows);
}

fn print_manifest_inventory(manifest: &VerdictManifest) {
    let rows: Vec<(String, String, String)> = manifest
        .entries
        .iter()
        .map(|(id, entry)| (id.clone(), entry.verdict.to_string(), entry.description.clone()))
        .collect();

    println!("Manifest labels {} examples.", rows.len());
    print_inventory_table(&rows);
}

fn print_inventory_table(rows: &[(String, String, String)]) {
    println!("| ID | Verdict | Description |");
    println!("|----|---------|-------------|");
    for (id, verdict, description) in rows {
        println!(
            "| {} | {} | {} |",
            id,
            verdict,
            escape_markdown_pipes(description)
        );
    }
}
