use rand::Rng;

use me_tensor::{Result, Shape, Tensor};

/// A `[batch, seq_len]` i64 tensor of token ids drawn uniformly from
/// `[0, vocab)`.
///
/// Only the shape and dtype matter to the tracer, so the generator is left
/// unseeded.
pub fn random_token_ids(batch: usize, seq_len: usize, vocab: usize) -> Result<Tensor> {
    let mut rng = rand::thread_rng();
    let upper = vocab.max(1) as i64;
    let data = (0..batch * seq_len)
        .map(|_| rng.gen_range(0..upper))
        .collect();
    Tensor::from_i64(data, Shape::new(vec![batch, seq_len]))
}
