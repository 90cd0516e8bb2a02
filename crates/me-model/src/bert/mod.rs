pub mod config;
pub mod weights;

pub use config::BertConfig;
pub use weights::{BertWeights, EncoderLayer, LinearWeights, NormWeights};

use std::path::Path;

use me_tensor::{Ops, TensorError, TensorLike};

use crate::architecture::ModelArchitecture;
use crate::checkpoint::SafetensorsFile;
use crate::error::Result;
use crate::output::{MaskedLmRecord, ModelOutput, Mode, OutputConvention};

/// File names expected inside a model directory.
pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// A BERT encoder with a masked language modelling head.
///
/// The forward pass is written once against [`Ops`], so the same code runs
/// eagerly on the CPU and under a graph tracer.
pub struct BertForMaskedLM {
    /// Model hyperparameters.
    pub config: BertConfig,
    /// All weight tensors (widened to f32).
    pub weights: BertWeights,
    convention: OutputConvention,
    mode: Mode,
}

impl BertForMaskedLM {
    /// Build a model from loaded parts. New models start in [`Mode::Train`].
    pub fn new(config: BertConfig, weights: BertWeights, convention: OutputConvention) -> Self {
        BertForMaskedLM {
            config,
            weights,
            convention,
            mode: Mode::Train,
        }
    }

    /// Load `config.json` and `model.safetensors` from a model directory.
    pub fn from_dir(dir: &Path, convention: OutputConvention) -> Result<BertForMaskedLM> {
        let config = BertConfig::from_file(&dir.join(CONFIG_FILE))?;
        let file = SafetensorsFile::open(&dir.join(WEIGHTS_FILE))?;
        let weights = BertWeights::from_safetensors(&file, &config)?;
        tracing::debug!(
            "loaded {} parameters: {} layers, hidden {}, vocab {}",
            weights.num_parameters(),
            config.num_hidden_layers,
            config.hidden_size,
            config.vocab_size
        );
        Ok(BertForMaskedLM::new(config, weights, convention))
    }

    /// Returns a reference to the model configuration.
    pub fn config(&self) -> &BertConfig {
        &self.config
    }

    fn linear<O: Ops>(
        &self,
        ops: &mut O,
        x: &O::Value,
        w: &LinearWeights,
    ) -> me_tensor::Result<O::Value> {
        let weight = ops.constant(&w.weight)?;
        let bias = ops.constant(&w.bias)?;
        ops.linear(x, &weight, &bias)
    }

    fn layer_norm<O: Ops>(
        &self,
        ops: &mut O,
        x: &O::Value,
        n: &NormWeights,
    ) -> me_tensor::Result<O::Value> {
        let gamma = ops.constant(&n.gamma)?;
        let beta = ops.constant(&n.beta)?;
        ops.layer_norm(x, &gamma, &beta, self.config.layer_norm_eps)
    }

    fn dropout<O: Ops>(&self, ops: &mut O, x: &O::Value, p: f32) -> me_tensor::Result<O::Value> {
        if self.mode == Mode::Train && p > 0.0 {
            ops.dropout(x, p)
        } else {
            Ok(x.clone())
        }
    }

    /// One encoder layer. Returns the layer output and its attention
    /// probabilities.
    fn encoder_layer<O: Ops>(
        &self,
        ops: &mut O,
        layer: &EncoderLayer,
        x: &O::Value,
        batch: usize,
        seq_len: usize,
    ) -> me_tensor::Result<(O::Value, O::Value)> {
        let cfg = &self.config;
        let n_heads = cfg.num_attention_heads;
        let head_dim = cfg.head_dim();
        let heads_shape = [batch, seq_len, n_heads, head_dim];

        // [B, L, H] -> [B, heads, L, head_dim]; keys go straight to
        // [B, heads, head_dim, L] for the score product.
        let q = self.linear(ops, x, &layer.query)?;
        let q = ops.reshape(&q, &heads_shape)?;
        let q = ops.transpose(&q, &[0, 2, 1, 3])?;
        let k = self.linear(ops, x, &layer.key)?;
        let k = ops.reshape(&k, &heads_shape)?;
        let k_t = ops.transpose(&k, &[0, 2, 3, 1])?;
        let v = self.linear(ops, x, &layer.value)?;
        let v = ops.reshape(&v, &heads_shape)?;
        let v = ops.transpose(&v, &[0, 2, 1, 3])?;

        let scores = ops.matmul(&q, &k_t)?;
        let scores = ops.scale(&scores, 1.0 / (head_dim as f32).sqrt())?;
        let probs = ops.softmax(&scores)?;
        let dropped = self.dropout(ops, &probs, cfg.attention_probs_dropout_prob)?;

        let context = ops.matmul(&dropped, &v)?;
        let context = ops.transpose(&context, &[0, 2, 1, 3])?;
        let context = ops.reshape(&context, &[batch, seq_len, cfg.hidden_size])?;

        let attn = self.linear(ops, &context, &layer.attention_output)?;
        let attn = self.dropout(ops, &attn, cfg.hidden_dropout_prob)?;
        let attn = ops.add(&attn, x)?;
        let attn = self.layer_norm(ops, &attn, &layer.attention_norm)?;

        let ff = self.linear(ops, &attn, &layer.intermediate)?;
        let ff = ops.gelu(&ff)?;
        let ff = self.linear(ops, &ff, &layer.output)?;
        let ff = self.dropout(ops, &ff, cfg.hidden_dropout_prob)?;
        let ff = ops.add(&ff, &attn)?;
        let out = self.layer_norm(ops, &ff, &layer.output_norm)?;

        Ok((out, probs))
    }
}

impl ModelArchitecture for BertForMaskedLM {
    fn name(&self) -> &str {
        "BertForMaskedLM"
    }

    /// Run the full BERT masked-LM forward pass.
    ///
    /// `ids` must be a [batch, seq_len] i64 tensor. Every token attends to
    /// every other token and all tokens use token type 0.
    fn forward<O: Ops>(
        &self,
        ops: &mut O,
        ids: &O::Value,
    ) -> me_tensor::Result<ModelOutput<O::Value>> {
        let cfg = &self.config;
        let w = &self.weights;

        let dims = ids.shape().dims();
        if dims.len() != 2 {
            return Err(TensorError::Other(format!(
                "input ids must be [batch, seq_len], got {}",
                ids.shape()
            )));
        }
        let (batch, seq_len) = (dims[0], dims[1]);
        if seq_len > cfg.max_position_embeddings {
            return Err(TensorError::IndexOutOfRange {
                index: seq_len as i64,
                size: cfg.max_position_embeddings,
            });
        }

        // Embeddings: word + position + token type 0.
        let word_table = ops.constant(&w.word_embeddings)?;
        let mut hidden = ops.embedding(&word_table, ids)?;
        let position_table = ops.constant(&w.position_embeddings)?;
        let positions = ops.slice_rows(&position_table, seq_len)?;
        hidden = ops.add(&hidden, &positions)?;
        let type_table = ops.constant(&w.token_type_embeddings)?;
        let type_zero = ops.slice_rows(&type_table, 1)?;
        hidden = ops.add(&hidden, &type_zero)?;
        hidden = self.layer_norm(ops, &hidden, &w.embeddings_norm)?;
        hidden = self.dropout(ops, &hidden, cfg.hidden_dropout_prob)?;

        let mut hidden_states = Vec::new();
        let mut attentions = Vec::new();
        if cfg.output_hidden_states {
            hidden_states.push(hidden.clone());
        }

        for layer in &w.layers {
            let (out, probs) = self.encoder_layer(ops, layer, &hidden, batch, seq_len)?;
            hidden = out;
            if cfg.output_hidden_states {
                hidden_states.push(hidden.clone());
            }
            if cfg.output_attentions {
                attentions.push(probs);
            }
        }

        // Prediction head.
        let head = self.linear(ops, &hidden, &w.head_transform)?;
        let head = ops.gelu(&head)?;
        let head = self.layer_norm(ops, &head, &w.head_norm)?;
        let logits = self.linear(ops, &head, &w.decoder)?;

        let record = MaskedLmRecord {
            logits,
            hidden_states: cfg.output_hidden_states.then_some(hidden_states),
            attentions: cfg.output_attentions.then_some(attentions),
        };
        Ok(ModelOutput::package(record, self.convention))
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn output_convention(&self) -> OutputConvention {
        self.convention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{self, SyntheticSpec};
    use approx::assert_abs_diff_eq;
    use me_tensor::{CpuBackend, Eager, Shape, Tensor};

    fn ids(batch: usize, seq_len: usize, vocab: usize) -> Tensor {
        let data = (0..batch * seq_len).map(|i| (i % vocab) as i64).collect();
        Tensor::from_i64(data, Shape::new(vec![batch, seq_len])).unwrap()
    }

    fn load(spec: &SyntheticSpec, convention: OutputConvention) -> BertForMaskedLM {
        let dir = tempfile::tempdir().unwrap();
        synthetic::write_model_dir(dir.path(), spec).unwrap();
        BertForMaskedLM::from_dir(dir.path(), convention).unwrap()
    }

    #[test]
    fn test_logits_shape() {
        let spec = SyntheticSpec::default();
        let mut model = load(&spec, OutputConvention::PlainSequence);
        model.set_mode(Mode::Inference);
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let out = model.forward(&mut ops, &ids(2, 5, spec.vocab_size)).unwrap();
        assert_eq!(out.len(), 1);
        let logits = out.into_first().unwrap();
        assert_eq!(logits.shape().dims(), &[2, 5, spec.vocab_size]);
        assert!(logits.data_f32().unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_inference_is_deterministic() {
        let spec = SyntheticSpec::default();
        let mut model = load(&spec, OutputConvention::PlainSequence);
        model.set_mode(Mode::Inference);
        let backend = CpuBackend::new();
        let input = ids(1, 4, spec.vocab_size);
        let a = model.forward(&mut Eager::new(&backend), &input).unwrap();
        let b = model.forward(&mut Eager::new(&backend), &input).unwrap();
        let (a, b) = (a.into_first().unwrap(), b.into_first().unwrap());
        for (x, y) in a.data_f32().unwrap().iter().zip(b.data_f32().unwrap()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_auxiliary_outputs_follow_logits() {
        let spec = SyntheticSpec {
            output_hidden_states: true,
            output_attentions: true,
            ..SyntheticSpec::default()
        };
        let mut model = load(&spec, OutputConvention::PlainSequence);
        model.set_mode(Mode::Inference);
        let backend = CpuBackend::new();
        let out = model
            .forward(&mut Eager::new(&backend), &ids(2, 3, spec.vocab_size))
            .unwrap()
            .into_sequence();
        // logits, embeddings + one per layer, one attention map per layer
        assert_eq!(out.len(), 1 + (spec.num_layers + 1) + spec.num_layers);
        assert_eq!(out[0].shape().dims(), &[2, 3, spec.vocab_size]);
        assert_eq!(out[1].shape().dims(), &[2, 3, spec.hidden_size]);
        let attn = &out[out.len() - 1];
        assert_eq!(attn.shape().dims(), &[2, spec.num_heads, 3, 3]);
        // each attention row is a probability distribution
        for row in attn.data_f32().unwrap().chunks(3) {
            assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_record_convention() {
        let spec = SyntheticSpec {
            output_hidden_states: true,
            ..SyntheticSpec::default()
        };
        let model = load(&spec, OutputConvention::StructuredRecord);
        let backend = CpuBackend::new();
        let out = model
            .forward(&mut Eager::new(&backend), &ids(1, 2, spec.vocab_size))
            .unwrap();
        match out {
            ModelOutput::StructuredRecord(record) => {
                assert_eq!(record.hidden_states.map(|h| h.len()), Some(spec.num_layers + 1));
                assert!(record.attentions.is_none());
            }
            ModelOutput::PlainSequence(_) => panic!("expected a record"),
        }
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let spec = SyntheticSpec::default();
        let model = load(&spec, OutputConvention::PlainSequence);
        let backend = CpuBackend::new();
        let flat = Tensor::from_i64(vec![0, 1], Shape::new(vec![2])).unwrap();
        assert!(model.forward(&mut Eager::new(&backend), &flat).is_err());
        let too_long = ids(1, spec.max_position_embeddings + 1, spec.vocab_size);
        assert!(matches!(
            model.forward(&mut Eager::new(&backend), &too_long),
            Err(TensorError::IndexOutOfRange { .. })
        ));
        let out_of_vocab = Tensor::from_i64(vec![spec.vocab_size as i64], Shape::new(vec![1, 1]))
            .unwrap();
        assert!(matches!(
            model.forward(&mut Eager::new(&backend), &out_of_vocab),
            Err(TensorError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_tied_decoder_shares_storage() {
        let spec = SyntheticSpec {
            tie_decoder: true,
            ..SyntheticSpec::default()
        };
        let model = load(&spec, OutputConvention::PlainSequence);
        assert_eq!(
            model.weights.decoder.weight.ptr_id(),
            model.weights.word_embeddings.ptr_id()
        );
    }
}
