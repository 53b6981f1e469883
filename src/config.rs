use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::codegen::limits::{CodeGenerationLimits, RuntimeSafetyGuard};

/// Generator settings. Every field has a default, so a config file only lists overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub limits: CodeGenerationLimits,
    pub safety: RuntimeSafetyGuard,
    /// Used when the program has no `strategy("...")` header
    pub default_strategy_name: String,
    pub default_initial_capital: f64,
    /// Lower bound on the warmup bars fetched for each security context
    pub min_security_warmup: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            limits: CodeGenerationLimits::default(),
            safety: RuntimeSafetyGuard::default(),
            default_strategy_name: "Generated Strategy".to_string(),
            default_initial_capital: 10000.0,
            min_security_warmup: 50,
        }
    }
}

impl GeneratorConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config JSON: {}", path.display()))
    }

    /// Config file if given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_json_file(path),
            None => Ok(Self::default()),
        }
    }
}
