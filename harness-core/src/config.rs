//! YAML configuration of a harness run.

use crate::generator::{Form, GeneratorOptions};
use crate::shim::{StepValues, DEFAULT_NONDET_CAPACITY};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration file format for cargo-harness.
///
/// ```yaml
/// steps: { direct: 3, cut: 7 }
/// nondet_capacity: 1024
/// forms: [freestanding, shimmed]
/// packs: [packs/extra.yaml]
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Counter steps written into the shim stubs.
    pub steps: StepValues,
    pub nondet_capacity: usize,
    pub forms: Vec<Form>,
    pub include_builtin: bool,
    /// Extra corpus packs, relative to the config file.
    pub packs: Vec<PathBuf>,
    pub label_dirs: Vec<PathBuf>,
    pub fail_on_mismatch: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            steps: StepValues::default(),
            nondet_capacity: DEFAULT_NONDET_CAPACITY,
            forms: vec![Form::Freestanding, Form::Shimmed],
            include_builtin: true,
            packs: Vec::new(),
            label_dirs: Vec::new(),
            fail_on_mismatch: false,
        }
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let mut config: HarnessConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parse config file {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for pack in config.packs.iter_mut().chain(config.label_dirs.iter_mut()) {
            if pack.is_relative() {
                *pack = base.join(&*pack);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.steps.validate()?;
        if self.nondet_capacity == 0 {
            bail!("nondet_capacity must be at least 1");
        }
        if self.forms.is_empty() {
            bail!("at least one output form is required");
        }
        Ok(())
    }

    pub fn generator_options(&self) -> GeneratorOptions {
        GeneratorOptions {
            steps: self.steps,
            nondet_capacity: self.nondet_capacity,
            forms: self.forms.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_keys_take_defaults() {
        let config: HarnessConfig = serde_yaml::from_str("nondet_capacity: 16\n").unwrap();
        assert_eq!(config.nondet_capacity, 16);
        assert_eq!(config.steps, StepValues::default());
        assert!(config.include_builtin);
        assert_eq!(config.forms.len(), 2);
    }

    #[test]
    fn load_resolves_paths_and_validates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harness.yaml");
        fs::write(&path, "packs: [extra.yaml]\nforms: [shimmed]\n").unwrap();
        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.packs, vec![dir.path().join("extra.yaml")]);
        assert_eq!(config.generator_options().forms, vec![Form::Shimmed]);

        fs::write(&path, "steps: { direct: 7, cut: 7 }\n").unwrap();
        assert!(HarnessConfig::load(&path).is_err());
    }
}
