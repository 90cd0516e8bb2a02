use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

fn default_layer_norm_eps() -> f32 {
    1e-12
}

fn default_dropout() -> f32 {
    0.1
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_hidden_act() -> String {
    "gelu".to_string()
}

/// Configuration for a BERT model, parsed from a HuggingFace `config.json`.
///
/// Unknown keys (`initializer_range`, `model_type`, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BertConfig {
    /// Vocabulary size (number of token embeddings and output logits).
    pub vocab_size: usize,
    /// Embedding dimension / hidden size.
    pub hidden_size: usize,
    /// Number of encoder layers.
    pub num_hidden_layers: usize,
    /// Number of attention heads per layer.
    pub num_attention_heads: usize,
    /// Feed-forward intermediate dimension.
    pub intermediate_size: usize,
    /// Activation of the feed-forward block and the prediction head.
    #[serde(default = "default_hidden_act")]
    pub hidden_act: String,
    /// Number of learned position embeddings, the longest accepted sequence.
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f32,
    #[serde(default = "default_dropout")]
    pub hidden_dropout_prob: f32,
    #[serde(default = "default_dropout")]
    pub attention_probs_dropout_prob: f32,
    /// Append every hidden state to the model outputs.
    #[serde(default)]
    pub output_hidden_states: bool,
    /// Append every attention probability map to the model outputs.
    #[serde(default)]
    pub output_attentions: bool,
}

impl BertConfig {
    /// Read and validate `config.json`.
    pub fn from_file(path: &Path) -> Result<BertConfig> {
        let text = std::fs::read_to_string(path)?;
        let config: BertConfig =
            serde_json::from_str(&text).map_err(|e| ModelError::InvalidConfig {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        config.validate().map_err(|reason| ModelError::InvalidConfig {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    /// Checks the invariants the forward pass relies on.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let sizes = [
            ("vocab_size", self.vocab_size),
            ("hidden_size", self.hidden_size),
            ("num_attention_heads", self.num_attention_heads),
            ("intermediate_size", self.intermediate_size),
            ("max_position_embeddings", self.max_position_embeddings),
            ("type_vocab_size", self.type_vocab_size),
        ];
        for (key, value) in sizes {
            if value == 0 {
                return Err(format!("{key} must be non-zero"));
            }
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            ));
        }
        if self.hidden_act != "gelu" {
            return Err(format!("unsupported hidden_act '{}'", self.hidden_act));
        }
        for (key, p) in [
            ("hidden_dropout_prob", self.hidden_dropout_prob),
            ("attention_probs_dropout_prob", self.attention_probs_dropout_prob),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(format!("{key} must be in [0, 1), got {p}"));
            }
        }
        Ok(())
    }

    /// Dimension of each attention head (hidden_size / num_attention_heads).
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BERT_TINY: &str = r#"{
        "hidden_size": 128,
        "hidden_act": "gelu",
        "initializer_range": 0.02,
        "vocab_size": 30522,
        "hidden_dropout_prob": 0.1,
        "num_attention_heads": 2,
        "type_vocab_size": 2,
        "max_position_embeddings": 512,
        "num_hidden_layers": 2,
        "intermediate_size": 512,
        "attention_probs_dropout_prob": 0.1
    }"#;

    #[test]
    fn test_parse_bert_tiny() {
        let config: BertConfig = serde_json::from_str(BERT_TINY).unwrap();
        assert_eq!(config.vocab_size, 30522);
        assert_eq!(config.head_dim(), 64);
        assert_eq!(config.layer_norm_eps, 1e-12);
        assert!(!config.output_hidden_states);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_rejects_bad_heads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let bad = BERT_TINY.replace("\"num_attention_heads\": 2", "\"num_attention_heads\": 3");
        std::fs::write(&path, bad).unwrap();
        let err = BertConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfig { .. }));
    }

    #[test]
    fn test_rejects_other_activations() {
        let mut config: BertConfig = serde_json::from_str(BERT_TINY).unwrap();
        config.hidden_act = "relu".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            BertConfig::from_file(&path),
            Err(ModelError::InvalidConfig { .. })
        ));
    }
}
