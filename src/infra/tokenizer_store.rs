// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads an external HuggingFace `tokenizer.json` and turns text
// into the id rows the model consumes. The vocabulary belongs
// to whoever trained the weights, so nothing is built here.
//
// Encoding adds the tokenizer's own special tokens (e.g.
// `[CLS] … [SEP]` for BERT) through its post-processor.

use anyhow::Result;
use std::path::PathBuf;
use tokenizers::Tokenizer;

pub struct TokenizerStore {
    path: PathBuf,
}

impl TokenizerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the tokenizer JSON from disk
    pub fn load(&self) -> Result<Tokenizer> {
        Tokenizer::from_file(&self.path)
            .map_err(|e| anyhow::anyhow!(
                "Cannot load tokenizer from '{}': {}", self.path.display(), e
            ))
    }

    /// Load, then encode `text` to ids with special tokens.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let tokenizer = self.load()?;
        encode(&tokenizer, text)
    }
}

pub fn encode(tokenizer: &Tokenizer, text: &str) -> Result<Vec<u32>> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| anyhow::anyhow!("Cannot encode '{text}': {e}"))?;
    let ids = encoding.get_ids().to_vec();
    anyhow::ensure!(!ids.is_empty(), "'{text}' encodes to no tokens");
    tracing::debug!("Encoded '{}' to {} ids: {:?}", text, ids.len(), ids);
    Ok(ids)
}

/// Reject ids the model has no embedding row for.
pub fn check_vocab(ids: &[u32], vocab_size: usize) -> Result<()> {
    if let Some(&bad) = ids.iter().find(|&&id| id as usize >= vocab_size) {
        anyhow::bail!("token id {bad} is outside the model vocabulary ({vocab_size})");
    }
    Ok(())
}

/// Write a minimal BERT-style word-level tokenizer to `path`.
///
/// Used by tests that need a real `tokenizer.json` without
/// downloading one.
#[cfg(test)]
pub fn write_word_level(path: &std::path::Path, words: &[&str]) -> Result<()> {
    use anyhow::Context;

    // BERT special-token ids
    let mut vocab = serde_json::json!({
        "[PAD]": 0, "[UNK]": 100, "[CLS]": 101, "[SEP]": 102, "[MASK]": 103,
    });
    for (i, word) in words.iter().enumerate() {
        vocab[*word] = serde_json::json!(104 + i);
    }

    let special = |id: u32, content: &str| serde_json::json!({
        "id": id, "content": content, "single_word": false, "lstrip": false,
        "rstrip": false, "normalized": false, "special": true
    });
    let tokenizer_json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            special(0, "[PAD]"), special(100, "[UNK]"), special(101, "[CLS]"),
            special(102, "[SEP]"), special(103, "[MASK]")
        ],
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": null,
            "lowercase": true
        },
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                { "SpecialToken": { "id": "[CLS]", "type_id": 0 } },
                { "Sequence":     { "id": "A",     "type_id": 0 } },
                { "SpecialToken": { "id": "[SEP]", "type_id": 0 } }
            ],
            "pair": [
                { "SpecialToken": { "id": "[CLS]", "type_id": 0 } },
                { "Sequence":     { "id": "A",     "type_id": 0 } },
                { "SpecialToken": { "id": "[SEP]", "type_id": 0 } },
                { "Sequence":     { "id": "B",     "type_id": 1 } },
                { "SpecialToken": { "id": "[SEP]", "type_id": 1 } }
            ],
            "special_tokens": {
                "[CLS]": { "id": "[CLS]", "ids": [101], "tokens": ["[CLS]"] },
                "[SEP]": { "id": "[SEP]", "ids": [102], "tokens": ["[SEP]"] }
            }
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "[UNK]"
        }
    });

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&tokenizer_json)?)
        .with_context(|| format!("Cannot write tokenizer JSON to '{}'", path.display()))?;
    Ok(())
}
