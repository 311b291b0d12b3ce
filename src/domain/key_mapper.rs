// ============================================================
// Layer 3 — KeyMapper
// ============================================================
// Translates parameter paths from the reference (external)
// naming scheme onto the from-scratch tree's naming scheme so
// externally trained weights can be transplanted.
//
//   reference                                  from-scratch
//   embedding.position_embedding.weight   →   embed.pos_embedding.weight
//   transformer.3.layer_norm.bias         →   blocks.3.layernorm1.bias
//   transformer.3.attention.pattern.project_query.weight
//                                         →   blocks.3.attention.project_query.weight
//   transformer.3.attention.project_out.weight
//                                         →   blocks.3.attention.project_output.weight
//   transformer.3.residual.mlp1.weight    →   blocks.3.mlp.lin1.weight
//   transformer.3.residual.layer_norm.weight
//                                         →   blocks.3.layernorm2.weight
//   lm_head.mlp.weight                    →   lin.weight
//   lm_head.unembedding.bias              →   unembed.bias
//   lm_head.layer_norm.weight             →   layer_norm.weight
//
// Rules run top to bottom, each on the output of the previous
// one. Order matters in exactly one place: the three
// `^transformer\.N\.…` rules must run before the generic
// `^transformer\.` rule, which would otherwise rewrite the
// prefix first and leave them nothing to match. Every other
// rule touches a disjoint substring and commutes with the rest.
//
// Keys under `classification_head` are dropped rather than
// mapped: the from-scratch classifier is initialised on its own.
// Two keys landing on one path is an error, never a silent pick.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::error::BertError;

/// (pattern, replacement) in application order.
pub const BERT_RULES: &[(&str, &str)] = &[
    (r"^embedding\.",                                 "embed."),
    (r"\.position_embedding\.",                       ".pos_embedding."),
    (r"^lm_head\.mlp\.",                              "lin."),
    (r"^lm_head\.unembedding\.",                      "unembed."),
    (r"^lm_head\.layer_norm\.",                       "layer_norm."),
    // must precede the generic transformer rule
    (r"^transformer\.([0-9]+)\.layer_norm",           "blocks.${1}.layernorm1"),
    (r"^transformer\.([0-9]+)\.attention\.pattern\.", "blocks.${1}.attention."),
    (r"^transformer\.([0-9]+)\.residual\.layer_norm\.", "blocks.${1}.layernorm2."),
    (r"^transformer\.",                               "blocks."),
    (r"\.project_out\.",                              ".project_output."),
    (r"\.residual\.mlp",                              ".mlp.lin"),
];

/// Keys under these prefixes are not transplanted.
pub const DROPPED_PREFIXES: &[&str] = &["classification_head"];

// ─── RewriteRule ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pattern:     Regex,
    replacement: String,
}

impl RewriteRule {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, regex::Error> {
        Ok(Self { pattern: Regex::new(pattern)?, replacement: replacement.to_string() })
    }

    pub fn apply(&self, key: &str) -> String {
        self.pattern.replace(key, self.replacement.as_str()).into_owned()
    }
}

// ─── KeyMapper ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct KeyMapper {
    rules:            Vec<RewriteRule>,
    dropped_prefixes: Vec<String>,
}

impl KeyMapper {
    pub fn new(rules: &[(&str, &str)], dropped_prefixes: &[&str]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(p, r)| RewriteRule::new(p, r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            dropped_prefixes: dropped_prefixes.iter().map(|p| p.to_string()).collect(),
        })
    }

    /// The reference → from-scratch BERT mapping, compiled once.
    pub fn bert() -> &'static KeyMapper {
        static MAPPER: OnceLock<KeyMapper> = OnceLock::new();
        MAPPER.get_or_init(|| {
            KeyMapper::new(BERT_RULES, DROPPED_PREFIXES)
                .expect("built-in key mapping rules are valid regexes")
        })
    }

    /// Apply every rule in order. Keys no rule touches pass through.
    pub fn map_key(&self, key: &str) -> String {
        self.rules.iter().fold(key.to_string(), |k, rule| rule.apply(&k))
    }

    pub fn is_dropped(&self, key: &str) -> bool {
        self.dropped_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// `None` for dropped keys, the mapped key otherwise.
    pub fn map_or_drop(&self, key: &str) -> Option<String> {
        (!self.is_dropped(key)).then(|| self.map_key(key))
    }

    /// Rename every entry of an externally named parameter set.
    ///
    /// Fails if two entries land on the same path. Whether the
    /// result actually fits a model is decided at load time, where
    /// unexpected and missing paths are both errors.
    pub fn map_state<V>(&self, state: BTreeMap<String, V>) -> Result<BTreeMap<String, V>, BertError> {
        let mut mapped = BTreeMap::new();
        let mut sources: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in state {
            let Some(new_key) = self.map_or_drop(&key) else {
                tracing::debug!("Dropping '{}'", key);
                continue;
            };
            if let Some(first) = sources.get(&new_key) {
                return Err(BertError::DuplicateKey {
                    target: new_key,
                    first:  first.clone(),
                    second: key,
                });
            }
            sources.insert(new_key.clone(), key);
            mapped.insert(new_key, value);
        }
        Ok(mapped)
    }
}

/// Map one external key with the built-in BERT rules.
#[cfg(test)]
pub fn map_key(key: &str) -> String {
    KeyMapper::bert().map_key(key)
}
