use std::path::{Path, PathBuf};

use crate::bert::{BertForMaskedLM, CONFIG_FILE, WEIGHTS_FILE};
use crate::error::{ModelError, Result};
use crate::output::OutputConvention;

/// Resolves model identifiers to local checkpoints and loads them.
///
/// An identifier is tried, in order, as a directory path, under each search
/// root, and in the HuggingFace hub cache. Nothing is downloaded.
#[derive(Debug, Clone, Default)]
pub struct ModelProvider {
    search_roots: Vec<PathBuf>,
    hub_cache: Option<PathBuf>,
}

impl ModelProvider {
    /// A provider that consults the default hub cache location.
    pub fn new() -> Self {
        ModelProvider {
            search_roots: Vec::new(),
            hub_cache: default_hub_cache(),
        }
    }

    /// Also look for `<root>/<identifier>`.
    pub fn with_search_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_roots.push(root.into());
        self
    }

    /// Override (or with `None`, disable) the hub cache directory.
    pub fn with_hub_cache(mut self, cache: Option<PathBuf>) -> Self {
        self.hub_cache = cache;
        self
    }

    /// Find the directory holding the checkpoint for `identifier`.
    pub fn resolve(&self, identifier: &str) -> Result<PathBuf> {
        let mut candidates = vec![PathBuf::from(identifier)];
        candidates.extend(self.search_roots.iter().map(|root| root.join(identifier)));
        if let Some(cache) = &self.hub_cache {
            candidates.extend(hub_revisions(cache, identifier)?);
        }

        if let Some(dir) = candidates.iter().find(|dir| is_model_dir(dir)) {
            return Ok(dir.clone());
        }

        let reason = match candidates.iter().find_map(|dir| unsupported_weights(dir)) {
            Some((dir, file)) => format!(
                "{} holds {} but only {} checkpoints can be loaded",
                dir.display(),
                file,
                WEIGHTS_FILE
            ),
            None => format!(
                "no directory with {} and {} found (searched {} root(s){})",
                CONFIG_FILE,
                WEIGHTS_FILE,
                self.search_roots.len(),
                if self.hub_cache.is_some() {
                    " and the hub cache"
                } else {
                    ""
                }
            ),
        };
        Err(ModelError::ModelLoad {
            identifier: identifier.to_string(),
            reason,
        })
    }

    /// Resolve and load a masked language model.
    ///
    /// Any failure after resolution is reported as a load failure of
    /// `identifier`, with the underlying cause in the reason.
    pub fn load(&self, identifier: &str, convention: OutputConvention) -> Result<BertForMaskedLM> {
        let dir = self.resolve(identifier)?;
        tracing::debug!("resolved '{}' to {}", identifier, dir.display());
        BertForMaskedLM::from_dir(&dir, convention).map_err(|e| ModelError::ModelLoad {
            identifier: identifier.to_string(),
            reason: e.to_string(),
        })
    }
}

fn is_model_dir(dir: &Path) -> bool {
    dir.join(CONFIG_FILE).is_file() && dir.join(WEIGHTS_FILE).is_file()
}

/// `$HF_HOME/hub`, falling back to `~/.cache/huggingface/hub`.
fn default_hub_cache() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("HF_HOME") {
        return Some(PathBuf::from(home).join("hub"));
    }
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".cache")
            .join("huggingface")
            .join("hub")
    })
}

/// Weight files of other frameworks that a checkpoint directory may hold
/// instead of `model.safetensors`.
const UNSUPPORTED_WEIGHTS: [&str; 3] = ["pytorch_model.bin", "tf_model.h5", "flax_model.msgpack"];

/// The first foreign weight file in a directory that has a config but no
/// safetensors weights.
fn unsupported_weights(dir: &Path) -> Option<(&Path, &'static str)> {
    if !dir.join(CONFIG_FILE).is_file() || dir.join(WEIGHTS_FILE).is_file() {
        return None;
    }
    UNSUPPORTED_WEIGHTS
        .iter()
        .find(|file| dir.join(file).is_file())
        .map(|file| (dir, *file))
}

/// Every `models--<org>--<name>/snapshots/<rev>/` for `org/name`, sorted.
fn hub_revisions(cache: &Path, identifier: &str) -> Result<Vec<PathBuf>> {
    let repo = format!("models--{}", identifier.replace('/', "--"));
    let snapshots = cache.join(repo).join("snapshots");
    if !snapshots.is_dir() {
        return Ok(Vec::new());
    }

    let mut revisions: Vec<PathBuf> = std::fs::read_dir(&snapshots)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    revisions.sort();
    Ok(revisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{write_model_dir, SyntheticSpec};

    #[test]
    fn test_resolve_direct_path() {
        let dir = tempfile::tempdir().unwrap();
        write_model_dir(dir.path(), &SyntheticSpec::default()).unwrap();
        let provider = ModelProvider::new().with_hub_cache(None);
        let id = dir.path().to_str().unwrap();
        assert_eq!(provider.resolve(id).unwrap(), dir.path());
    }

    #[test]
    fn test_resolve_search_root() {
        let root = tempfile::tempdir().unwrap();
        write_model_dir(&root.path().join("org/tiny"), &SyntheticSpec::default()).unwrap();
        let provider = ModelProvider::new()
            .with_hub_cache(None)
            .with_search_root(root.path());
        assert_eq!(
            provider.resolve("org/tiny").unwrap(),
            root.path().join("org/tiny")
        );
    }

    #[test]
    fn test_resolve_hub_cache_skips_incomplete_revisions() {
        let cache = tempfile::tempdir().unwrap();
        let snapshots = cache.path().join("models--org--tiny").join("snapshots");
        std::fs::create_dir_all(snapshots.join("aaa")).unwrap();
        write_model_dir(&snapshots.join("bbb"), &SyntheticSpec::default()).unwrap();
        let provider = ModelProvider::new().with_hub_cache(Some(cache.path().to_path_buf()));
        assert_eq!(provider.resolve("org/tiny").unwrap(), snapshots.join("bbb"));
    }

    #[test]
    fn test_unknown_identifier() {
        let provider = ModelProvider::new().with_hub_cache(None);
        let err = provider
            .load("this-model-does-not-exist", OutputConvention::PlainSequence)
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::ModelLoad { ref identifier, .. } if identifier == "this-model-does-not-exist"));
    }

    #[test]
    fn test_pytorch_only_checkpoint_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("org/torch-only");
        write_model_dir(&dir, &SyntheticSpec::default()).unwrap();
        std::fs::remove_file(dir.join(WEIGHTS_FILE)).unwrap();
        std::fs::write(dir.join("pytorch_model.bin"), b"pickle").unwrap();

        let provider = ModelProvider::new()
            .with_hub_cache(None)
            .with_search_root(root.path());
        match provider.resolve("org/torch-only") {
            Err(ModelError::ModelLoad { reason, .. }) => {
                assert!(reason.contains("pytorch_model.bin"), "{reason}");
                assert!(reason.contains(WEIGHTS_FILE), "{reason}");
                assert!(!reason.contains("no directory"), "{reason}");
            }
            other => panic!("expected a load error, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_checkpoint_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        write_model_dir(dir.path(), &SyntheticSpec::default()).unwrap();
        std::fs::write(dir.path().join(WEIGHTS_FILE), b"garbage").unwrap();
        let provider = ModelProvider::new().with_hub_cache(None);
        let id = dir.path().to_str().unwrap();
        assert!(matches!(
            provider.load(id, OutputConvention::PlainSequence),
            Err(ModelError::ModelLoad { .. })
        ));
    }
}
