// ============================================================
// Layer 2 — KeyMapUseCase
// ============================================================
// Reads external parameter names, one per line, and reports
// where each one lands in the from-scratch tree:
//
//   embedding.position_embedding.weight -> embed.pos_embedding.weight
//   classification_head.weight -> dropped
//
// Blank lines and lines starting with `#` are skipped.

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};

use crate::domain::key_mapper::KeyMapper;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapping {
    pub external: String,
    /// `None` when the key is not transplanted
    pub mapped:   Option<String>,
}

impl std::fmt::Display for KeyMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.mapped {
            Some(key) => write!(f, "{} -> {}", self.external, key),
            None      => write!(f, "{} -> dropped", self.external),
        }
    }
}

pub struct KeyMapUseCase {
    input: PathBuf,
}

impl KeyMapUseCase {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self { input: input.into() }
    }

    pub fn execute(&self) -> Result<Vec<KeyMapping>> {
        let text = fs::read_to_string(&self.input)
            .with_context(|| format!("Cannot read keys from '{}'", self.input.display()))?;
        let mappings = map_lines(KeyMapper::bert(), &text);
        tracing::info!(
            "Mapped {} keys ({} dropped)",
            mappings.len(),
            mappings.iter().filter(|m| m.mapped.is_none()).count(),
        );
        Ok(mappings)
    }
}

pub fn map_lines(mapper: &KeyMapper, text: &str) -> Vec<KeyMapping> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| KeyMapping {
            external: line.to_string(),
            mapped:   mapper.map_or_drop(line),
        })
        .collect()
}
