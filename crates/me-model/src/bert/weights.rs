use me_tensor::Tensor;

use super::config::BertConfig;
use crate::checkpoint::SafetensorsFile;
use crate::error::{ModelError, Result};

/// Weight and bias of a dense projection, weight stored as [out, in].
pub struct LinearWeights {
    pub weight: Tensor,
    pub bias: Tensor,
}

/// Scale and shift of a LayerNorm, both of length hidden_size.
pub struct NormWeights {
    pub gamma: Tensor,
    pub beta: Tensor,
}

/// Weight tensors for a single BERT encoder layer.
pub struct EncoderLayer {
    pub query: LinearWeights,
    pub key: LinearWeights,
    pub value: LinearWeights,
    /// Projection applied to the attention context, [hidden, hidden].
    pub attention_output: LinearWeights,
    pub attention_norm: NormWeights,
    /// Feed-forward up projection, [intermediate, hidden].
    pub intermediate: LinearWeights,
    /// Feed-forward down projection, [hidden, intermediate].
    pub output: LinearWeights,
    pub output_norm: NormWeights,
}

/// All weight tensors for a BERT masked language model.
pub struct BertWeights {
    /// Token embedding matrix, [vocab, hidden].
    pub word_embeddings: Tensor,
    /// [max_position_embeddings, hidden].
    pub position_embeddings: Tensor,
    /// [type_vocab_size, hidden].
    pub token_type_embeddings: Tensor,
    pub embeddings_norm: NormWeights,
    pub layers: Vec<EncoderLayer>,
    /// Prediction head transform, [hidden, hidden].
    pub head_transform: LinearWeights,
    pub head_norm: NormWeights,
    /// Decoder to vocabulary logits; shares storage with `word_embeddings`
    /// when the checkpoint ties them.
    pub decoder: LinearWeights,
}

/// Shape-checked tensor lookups against a checkpoint.
struct Loader<'a> {
    file: &'a SafetensorsFile,
}

impl<'a> Loader<'a> {
    fn tensor(&self, name: &str, expected: &[usize]) -> Result<Tensor> {
        let t = self.file.get_tensor_f32(name)?;
        check_shape(name, &t, expected)?;
        Ok(t)
    }

    fn linear(&self, prefix: &str, out_dim: usize, in_dim: usize) -> Result<LinearWeights> {
        Ok(LinearWeights {
            weight: self.tensor(&format!("{prefix}.weight"), &[out_dim, in_dim])?,
            bias: self.tensor(&format!("{prefix}.bias"), &[out_dim])?,
        })
    }

    fn norm(&self, prefix: &str, hidden: usize) -> Result<NormWeights> {
        let gamma = self
            .file
            .get_first_f32(&[format!("{prefix}.weight"), format!("{prefix}.gamma")])?;
        check_shape(&format!("{prefix}.weight"), &gamma, &[hidden])?;
        let beta = self
            .file
            .get_first_f32(&[format!("{prefix}.bias"), format!("{prefix}.beta")])?;
        check_shape(&format!("{prefix}.bias"), &beta, &[hidden])?;
        Ok(NormWeights { gamma, beta })
    }
}

fn check_shape(name: &str, t: &Tensor, expected: &[usize]) -> Result<()> {
    if t.shape().dims() != expected {
        return Err(ModelError::WeightShape {
            name: name.to_string(),
            expected: expected.to_vec(),
            got: t.shape().dims().to_vec(),
        });
    }
    Ok(())
}

impl BertWeights {
    /// Load all BertForMaskedLM weights from a safetensors checkpoint.
    ///
    /// Tensor names follow the HuggingFace layout:
    /// - `bert.embeddings.{word,position,token_type}_embeddings.weight`
    /// - `bert.embeddings.LayerNorm.{weight,bias}`
    /// - `bert.encoder.layer.{i}.attention.self.{query,key,value}.{weight,bias}`
    /// - `bert.encoder.layer.{i}.attention.output.{dense,LayerNorm}.*`
    /// - `bert.encoder.layer.{i}.{intermediate,output}.dense.*`, `output.LayerNorm.*`
    /// - `cls.predictions.transform.{dense,LayerNorm}.*`
    /// - `cls.predictions.bias`, `cls.predictions.decoder.weight` (falls back to
    ///   the word embeddings when absent, for tied checkpoints)
    pub fn from_safetensors(file: &SafetensorsFile, config: &BertConfig) -> Result<BertWeights> {
        let l = Loader { file };
        let h = config.hidden_size;
        let v = config.vocab_size;
        let inter = config.intermediate_size;

        let word_embeddings = l.tensor("bert.embeddings.word_embeddings.weight", &[v, h])?;
        let position_embeddings = l.tensor(
            "bert.embeddings.position_embeddings.weight",
            &[config.max_position_embeddings, h],
        )?;
        let token_type_embeddings = l.tensor(
            "bert.embeddings.token_type_embeddings.weight",
            &[config.type_vocab_size, h],
        )?;
        let embeddings_norm = l.norm("bert.embeddings.LayerNorm", h)?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            let p = format!("bert.encoder.layer.{i}");
            layers.push(EncoderLayer {
                query: l.linear(&format!("{p}.attention.self.query"), h, h)?,
                key: l.linear(&format!("{p}.attention.self.key"), h, h)?,
                value: l.linear(&format!("{p}.attention.self.value"), h, h)?,
                attention_output: l.linear(&format!("{p}.attention.output.dense"), h, h)?,
                attention_norm: l.norm(&format!("{p}.attention.output.LayerNorm"), h)?,
                intermediate: l.linear(&format!("{p}.intermediate.dense"), inter, h)?,
                output: l.linear(&format!("{p}.output.dense"), h, inter)?,
                output_norm: l.norm(&format!("{p}.output.LayerNorm"), h)?,
            });
        }

        let head_transform = l.linear("cls.predictions.transform.dense", h, h)?;
        let head_norm = l.norm("cls.predictions.transform.LayerNorm", h)?;

        // Decoder weights may not exist if embeddings are tied.
        let decoder_weight = if file.contains("cls.predictions.decoder.weight")? {
            l.tensor("cls.predictions.decoder.weight", &[v, h])?
        } else {
            tracing::warn!("decoder weight absent, tying it to the word embeddings");
            word_embeddings.clone()
        };
        let decoder = LinearWeights {
            weight: decoder_weight,
            bias: l.tensor("cls.predictions.bias", &[v])?,
        };

        Ok(BertWeights {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            embeddings_norm,
            layers,
            head_transform,
            head_norm,
            decoder,
        })
    }

    /// Total number of f32 parameters held (tied tensors counted once).
    pub fn num_parameters(&self) -> usize {
        let linear = |w: &LinearWeights| w.weight.shape().numel() + w.bias.shape().numel();
        let norm = |n: &NormWeights| n.gamma.shape().numel() + n.beta.shape().numel();

        let mut total = self.word_embeddings.shape().numel()
            + self.position_embeddings.shape().numel()
            + self.token_type_embeddings.shape().numel()
            + norm(&self.embeddings_norm)
            + linear(&self.head_transform)
            + norm(&self.head_norm)
            + self.decoder.bias.shape().numel();
        if self.decoder.weight.ptr_id() != self.word_embeddings.ptr_id() {
            total += self.decoder.weight.shape().numel();
        }
        for layer in &self.layers {
            total += linear(&layer.query)
                + linear(&layer.key)
                + linear(&layer.value)
                + linear(&layer.attention_output)
                + norm(&layer.attention_norm)
                + linear(&layer.intermediate)
                + linear(&layer.output)
                + norm(&layer.output_norm);
        }
        total
    }
}
