/// Whether training-only behaviour (dropout) is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Inference,
}

/// How a model packages its outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputConvention {
    /// An ordered list, indexed positionally.
    PlainSequence,
    /// Named fields.
    StructuredRecord,
}

/// Named outputs of a masked language model.
#[derive(Debug, Clone)]
pub struct MaskedLmRecord<V> {
    /// Per-token vocabulary scores, [batch, seq_len, vocab].
    pub logits: V,
    /// Embedding output followed by every encoder layer output.
    pub hidden_states: Option<Vec<V>>,
    /// Attention probabilities of every layer, [batch, heads, seq_len, seq_len].
    pub attentions: Option<Vec<V>>,
}

impl<V> MaskedLmRecord<V> {
    fn into_sequence(self) -> Vec<V> {
        let mut values = vec![self.logits];
        values.extend(self.hidden_states.into_iter().flatten());
        values.extend(self.attentions.into_iter().flatten());
        values
    }
}

/// Outputs of a model forward pass, in the convention it was loaded with.
#[derive(Debug, Clone)]
pub enum ModelOutput<V> {
    PlainSequence(Vec<V>),
    StructuredRecord(MaskedLmRecord<V>),
}

impl<V> ModelOutput<V> {
    /// Package a record according to `convention`.
    ///
    /// The plain sequence lists the logits first, then the hidden states,
    /// then the attention maps, skipping whatever was not requested.
    pub fn package(record: MaskedLmRecord<V>, convention: OutputConvention) -> ModelOutput<V> {
        match convention {
            OutputConvention::StructuredRecord => ModelOutput::StructuredRecord(record),
            OutputConvention::PlainSequence => ModelOutput::PlainSequence(record.into_sequence()),
        }
    }

    /// Number of values carried.
    pub fn len(&self) -> usize {
        match self {
            ModelOutput::PlainSequence(values) => values.len(),
            ModelOutput::StructuredRecord(record) => {
                1 + record.hidden_states.as_ref().map_or(0, Vec::len)
                    + record.attentions.as_ref().map_or(0, Vec::len)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value at position 0 (the logits).
    pub fn first(&self) -> Option<&V> {
        match self {
            ModelOutput::PlainSequence(values) => values.first(),
            ModelOutput::StructuredRecord(record) => Some(&record.logits),
        }
    }

    pub fn into_first(self) -> Option<V> {
        match self {
            ModelOutput::PlainSequence(values) => values.into_iter().next(),
            ModelOutput::StructuredRecord(record) => Some(record.logits),
        }
    }

    /// Flatten into positional order regardless of convention.
    pub fn into_sequence(self) -> Vec<V> {
        match self {
            ModelOutput::PlainSequence(values) => values,
            ModelOutput::StructuredRecord(record) => record.into_sequence(),
        }
    }
}
