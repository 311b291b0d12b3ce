// ============================================================
// Layer 5 — Model Configuration
// ============================================================

use burn::prelude::*;

use crate::domain::error::BertError;

// Config derives Clone, Serialize, Deserialize and the `with_*`
// builders itself; only Debug and PartialEq are added here.
#[derive(Config, Debug, PartialEq)]
pub struct BertConfig {
    pub vocab_size:              usize,
    pub hidden_size:             usize,
    pub intermediate_size:       usize,
    pub num_layers:              usize,
    pub num_heads:               usize,
    pub max_position_embeddings: usize,
    pub type_vocab_size:         usize,
    #[config(default = 0.1)]
    pub dropout:                 f64,
    /// Adds a classification head on position 0 when set.
    #[config(default = "None")]
    pub num_classes:             Option<usize>,
    #[config(default = 1e-5)]
    pub layer_norm_eps:          f64,
}

impl BertConfig {
    /// bert-base-cased shape.
    pub fn bert_base() -> Self {
        Self::new(28996, 768, 3072, 12, 12, 512, 2)
    }

    /// Every constructor calls this before allocating anything.
    pub fn validate(&self) -> Result<(), BertError> {
        let sizes = [
            ("vocab_size",              self.vocab_size),
            ("hidden_size",             self.hidden_size),
            ("intermediate_size",       self.intermediate_size),
            ("num_layers",              self.num_layers),
            ("num_heads",               self.num_heads),
            ("max_position_embeddings", self.max_position_embeddings),
            ("type_vocab_size",         self.type_vocab_size),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(BertError::InvalidConfig(format!("{name} must be non-zero")));
        }
        if self.hidden_size % self.num_heads != 0 {
            return Err(BertError::InvalidConfig(format!(
                "hidden_size ({}) must be divisible by num_heads ({})",
                self.hidden_size, self.num_heads
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(BertError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.num_classes == Some(0) {
            return Err(BertError::InvalidConfig("num_classes must be non-zero".into()));
        }
        if self.layer_norm_eps <= 0.0 {
            return Err(BertError::InvalidConfig(format!(
                "layer_norm_eps must be positive, got {}",
                self.layer_norm_eps
            )));
        }
        Ok(())
    }
}
