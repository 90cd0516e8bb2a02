//! Small randomly initialised BERT checkpoints.
//!
//! Writes a model directory in the same layout a real checkpoint uses, so
//! the loader, the compiler and the export driver can be exercised offline.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use safetensors::tensor::TensorView;
use safetensors::Dtype;

use crate::bert::{BertConfig, CONFIG_FILE, WEIGHTS_FILE};
use crate::error::{ModelError, Result};

/// Dimensions of a synthetic checkpoint.
#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub intermediate_size: usize,
    pub max_position_embeddings: usize,
    pub output_hidden_states: bool,
    pub output_attentions: bool,
    /// Omit `cls.predictions.decoder.weight` so the decoder ties to the
    /// word embeddings.
    pub tie_decoder: bool,
    /// Spell LayerNorm parameters `gamma`/`beta`.
    pub legacy_norm_names: bool,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        SyntheticSpec {
            vocab_size: 32,
            hidden_size: 8,
            num_layers: 2,
            num_heads: 2,
            intermediate_size: 16,
            max_position_embeddings: 16,
            output_hidden_states: false,
            output_attentions: false,
            tie_decoder: false,
            legacy_norm_names: false,
            seed: 0,
        }
    }
}

impl SyntheticSpec {
    pub fn config(&self) -> BertConfig {
        BertConfig {
            vocab_size: self.vocab_size,
            hidden_size: self.hidden_size,
            num_hidden_layers: self.num_layers,
            num_attention_heads: self.num_heads,
            intermediate_size: self.intermediate_size,
            hidden_act: "gelu".to_string(),
            max_position_embeddings: self.max_position_embeddings,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
            hidden_dropout_prob: 0.1,
            attention_probs_dropout_prob: 0.1,
            output_hidden_states: self.output_hidden_states,
            output_attentions: self.output_attentions,
        }
    }
}

struct Builder {
    rng: StdRng,
    legacy_norm_names: bool,
    tensors: Vec<(String, Vec<usize>, Vec<f32>)>,
}

impl Builder {
    fn random(&mut self, name: String, dims: Vec<usize>) {
        let n: usize = dims.iter().product();
        let data = (0..n).map(|_| self.rng.gen_range(-0.2..0.2)).collect();
        self.tensors.push((name, dims, data));
    }

    fn linear(&mut self, prefix: &str, out_dim: usize, in_dim: usize) {
        self.random(format!("{prefix}.weight"), vec![out_dim, in_dim]);
        self.random(format!("{prefix}.bias"), vec![out_dim]);
    }

    fn norm(&mut self, prefix: &str, hidden: usize) {
        let (scale, shift) = if self.legacy_norm_names {
            ("gamma", "beta")
        } else {
            ("weight", "bias")
        };
        let gamma = (0..hidden).map(|_| 1.0 + self.rng.gen_range(-0.1..0.1)).collect();
        self.tensors
            .push((format!("{prefix}.{scale}"), vec![hidden], gamma));
        self.random(format!("{prefix}.{shift}"), vec![hidden]);
    }
}

/// Write `config.json` and `model.safetensors` for `spec` into `dir`.
pub fn write_model_dir(dir: &Path, spec: &SyntheticSpec) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let config = spec.config();
    let json = serde_json::to_string_pretty(&config).map_err(|e| ModelError::InvalidConfig {
        path: dir.join(CONFIG_FILE),
        reason: e.to_string(),
    })?;
    std::fs::write(dir.join(CONFIG_FILE), json)?;

    let h = spec.hidden_size;
    let mut b = Builder {
        rng: StdRng::seed_from_u64(spec.seed),
        legacy_norm_names: spec.legacy_norm_names,
        tensors: Vec::new(),
    };
    b.random(
        "bert.embeddings.word_embeddings.weight".to_string(),
        vec![spec.vocab_size, h],
    );
    b.random(
        "bert.embeddings.position_embeddings.weight".to_string(),
        vec![spec.max_position_embeddings, h],
    );
    b.random(
        "bert.embeddings.token_type_embeddings.weight".to_string(),
        vec![config.type_vocab_size, h],
    );
    b.norm("bert.embeddings.LayerNorm", h);
    for i in 0..spec.num_layers {
        let p = format!("bert.encoder.layer.{i}");
        b.linear(&format!("{p}.attention.self.query"), h, h);
        b.linear(&format!("{p}.attention.self.key"), h, h);
        b.linear(&format!("{p}.attention.self.value"), h, h);
        b.linear(&format!("{p}.attention.output.dense"), h, h);
        b.norm(&format!("{p}.attention.output.LayerNorm"), h);
        b.linear(&format!("{p}.intermediate.dense"), spec.intermediate_size, h);
        b.linear(&format!("{p}.output.dense"), h, spec.intermediate_size);
        b.norm(&format!("{p}.output.LayerNorm"), h);
    }
    b.linear("cls.predictions.transform.dense", h, h);
    b.norm("cls.predictions.transform.LayerNorm", h);
    if !spec.tie_decoder {
        b.random(
            "cls.predictions.decoder.weight".to_string(),
            vec![spec.vocab_size, h],
        );
    }
    b.random("cls.predictions.bias".to_string(), vec![spec.vocab_size]);

    let path = dir.join(WEIGHTS_FILE);
    let encoded: Vec<(String, Vec<usize>, Vec<u8>)> = b
        .tensors
        .into_iter()
        .map(|(name, dims, data)| {
            let bytes = data.iter().flat_map(|v: &f32| v.to_le_bytes()).collect();
            (name, dims, bytes)
        })
        .collect();
    let views = encoded
        .iter()
        .map(|(name, dims, bytes)| {
            TensorView::new(Dtype::F32, dims.clone(), bytes).map(|view| (name.clone(), view))
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ModelError::SafeTensors {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    safetensors::serialize_to_file(views, &None, &path).map_err(|e| ModelError::SafeTensors {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bert::BertWeights;
    use crate::checkpoint::SafetensorsFile;

    #[test]
    fn test_written_dir_loads() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SyntheticSpec::default();
        write_model_dir(dir.path(), &spec).unwrap();

        let config = BertConfig::from_file(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, spec.config());
        let file = SafetensorsFile::open(&dir.path().join(WEIGHTS_FILE)).unwrap();
        let weights = BertWeights::from_safetensors(&file, &config).unwrap();
        assert_eq!(weights.layers.len(), spec.num_layers);
    }

    #[test]
    fn test_legacy_norm_names_load() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SyntheticSpec {
            legacy_norm_names: true,
            ..SyntheticSpec::default()
        };
        write_model_dir(dir.path(), &spec).unwrap();
        let file = SafetensorsFile::open(&dir.path().join(WEIGHTS_FILE)).unwrap();
        assert!(file.contains("bert.embeddings.LayerNorm.gamma").unwrap());
        let weights = BertWeights::from_safetensors(&file, &spec.config()).unwrap();
        assert_eq!(weights.embeddings_norm.gamma.shape().dims(), &[spec.hidden_size]);
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let spec = SyntheticSpec::default();
        write_model_dir(a.path(), &spec).unwrap();
        write_model_dir(b.path(), &spec).unwrap();
        let bytes_a = std::fs::read(a.path().join(WEIGHTS_FILE)).unwrap();
        let bytes_b = std::fs::read(b.path().join(WEIGHTS_FILE)).unwrap();
        assert_eq!(bytes_a, bytes_b);
    }
}
