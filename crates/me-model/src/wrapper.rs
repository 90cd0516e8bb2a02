use me_tensor::{Module, Ops, TensorError};

use crate::architecture::ModelArchitecture;
use crate::bert::BertForMaskedLM;
use crate::error::Result;
use crate::output::{Mode, OutputConvention};
use crate::provider::ModelProvider;

/// Adapts a multi-output masked language model to a single-output
/// [`Module`].
///
/// The wrapped model is loaded with [`OutputConvention::PlainSequence`] and
/// `forward` returns position 0 of its outputs, untouched.
pub struct MaskedLmWrapper<M: ModelArchitecture = BertForMaskedLM> {
    model: M,
}

impl MaskedLmWrapper<BertForMaskedLM> {
    /// Load `identifier` through `provider` and wrap it.
    pub fn new(provider: &ModelProvider, identifier: &str) -> Result<Self> {
        let model = provider.load(identifier, OutputConvention::PlainSequence)?;
        Ok(MaskedLmWrapper { model })
    }
}

impl<M: ModelArchitecture> MaskedLmWrapper<M> {
    /// Wrap an already loaded model.
    pub fn from_model(model: M) -> Self {
        MaskedLmWrapper { model }
    }

    /// Switch to inference mode. Calling it again has no further effect.
    pub fn eval(&mut self) -> &mut Self {
        self.model.set_mode(Mode::Inference);
        self
    }

    pub fn train(&mut self) -> &mut Self {
        self.model.set_mode(Mode::Train);
        self
    }

    pub fn mode(&self) -> Mode {
        self.model.mode()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn vocab_size(&self) -> usize {
        self.model.vocab_size()
    }
}

impl<M: ModelArchitecture> Module for MaskedLmWrapper<M> {
    fn name(&self) -> &str {
        self.model.name()
    }

    fn forward<O: Ops>(&self, ops: &mut O, input: &O::Value) -> me_tensor::Result<O::Value> {
        self.model
            .forward(ops, input)?
            .into_first()
            .ok_or_else(|| TensorError::Other(format!("{} produced no outputs", self.model.name())))
    }
}
