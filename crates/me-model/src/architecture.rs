use me_tensor::Ops;

use crate::output::{Mode, ModelOutput, OutputConvention};

/// Trait for pretrained model architectures that can be run or traced.
///
/// Implementations hold their weights and a mode flag, and express the
/// forward pass against [`Ops`] so any executor can drive it.
pub trait ModelArchitecture: Send + Sync {
    /// Architecture name, used for module attributes and logs.
    fn name(&self) -> &str;

    /// Run the forward pass over a batch of token ids.
    ///
    /// Returns every output of the model, packaged in the convention the
    /// model was loaded with. Position 0 always holds the logits.
    fn forward<O: Ops>(
        &self,
        ops: &mut O,
        ids: &O::Value,
    ) -> me_tensor::Result<ModelOutput<O::Value>>;

    /// Returns the vocabulary size (number of output logits per token).
    fn vocab_size(&self) -> usize;

    fn mode(&self) -> Mode;

    /// Switch between training and inference behaviour.
    fn set_mode(&mut self, mode: Mode);

    fn output_convention(&self) -> OutputConvention;
}
