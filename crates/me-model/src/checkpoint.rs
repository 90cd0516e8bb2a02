use std::path::{Path, PathBuf};

use memmap2::Mmap;
use safetensors::{Dtype, SafeTensors};

use me_tensor::{Shape, Tensor};

use crate::error::{ModelError, Result};

/// A safetensors checkpoint backed by a memory-mapped region.
///
/// The header is parsed on every lookup; it is a small JSON document and
/// lookups only happen while building the model.
pub struct SafetensorsFile {
    path: PathBuf,
    mmap: Mmap,
}

impl SafetensorsFile {
    /// Open and validate a safetensors file from disk.
    pub fn open(path: &Path) -> Result<SafetensorsFile> {
        let file = std::fs::File::open(path)?;
        // Safety: the map is read-only and checkpoints are not rewritten
        // while a model is being loaded from them.
        let mmap = unsafe { Mmap::map(&file)? };

        let checkpoint = SafetensorsFile {
            path: path.to_path_buf(),
            mmap,
        };
        // Fail early on a corrupt header instead of on the first lookup.
        checkpoint.parse()?;
        tracing::debug!(
            "mapped {} ({:.2} MB)",
            path.display(),
            checkpoint.mmap.len() as f64 / (1024.0 * 1024.0)
        );
        Ok(checkpoint)
    }

    fn parse(&self) -> Result<SafeTensors<'_>> {
        SafeTensors::deserialize(&self.mmap).map_err(|e| ModelError::SafeTensors {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Path the checkpoint was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of every tensor in the file, sorted.
    pub fn tensor_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.parse()?.names().into_iter().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Returns true if the file contains a tensor called `name`.
    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.parse()?.tensor(name).is_ok())
    }

    /// Load a tensor by name, widening half-precision data to f32.
    pub fn get_tensor_f32(&self, name: &str) -> Result<Tensor> {
        let st = self.parse()?;
        let view = st
            .tensor(name)
            .map_err(|_| ModelError::TensorNotFound(name.to_string()))?;

        let numel: usize = view.shape().iter().product();
        let raw = view.data();
        let data = match view.dtype() {
            Dtype::F32 => decode_f32(raw),
            Dtype::F16 => decode_f16(raw),
            Dtype::BF16 => decode_bf16(raw),
            other => {
                return Err(ModelError::UnsupportedDType {
                    name: name.to_string(),
                    dtype: format!("{:?}", other),
                })
            }
        };
        if data.len() != numel {
            return Err(ModelError::SafeTensors {
                path: self.path.clone(),
                reason: format!(
                    "tensor '{}' holds {} elements but its shape needs {}",
                    name,
                    data.len(),
                    numel
                ),
            });
        }

        Ok(Tensor::new(data, Shape::from_slice(view.shape())))
    }

    /// Load the first tensor that exists among `names`.
    ///
    /// Older BERT checkpoints name LayerNorm parameters `gamma`/`beta`
    /// instead of `weight`/`bias`; callers list both spellings.
    pub fn get_first_f32(&self, names: &[String]) -> Result<Tensor> {
        for name in names {
            match self.get_tensor_f32(name) {
                Err(ModelError::TensorNotFound(_)) => continue,
                other => return other,
            }
        }
        Err(ModelError::TensorNotFound(names.join(" | ")))
    }
}

/// Reinterpret raw bytes as f32 values (little-endian).
fn decode_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Convert f16 values to f32.
fn decode_f16(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
        .collect()
}

/// Convert bf16 values to f32.
fn decode_bf16(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|b| half::bf16::from_le_bytes([b[0], b[1]]).to_f32())
        .collect()
}
