//! Published-model resolution.
//!
//! Tags name repositories on the Hugging Face hub; resolving a tag
//! downloads (or reuses from the local cache) the configuration and
//! checkpoint files and hands back their local paths. Vocoder tags carry a
//! `parallel_wavegan/` prefix naming the vocoder family; anything else is
//! rejected before any network traffic.

use std::path::PathBuf;

use hf_hub::api::sync::Api;

use crate::{Error, Result};

const VOCODER_TAG_PREFIX: &str = "parallel_wavegan/";

const MODEL_CONFIG_FILE: &str = "config.yaml";
const MODEL_CHECKPOINT_FILE: &str = "model.safetensors";
const VOCODER_CONFIG_FILE: &str = "config.yml";
const VOCODER_CHECKPOINT_FILE: &str = "checkpoint.safetensors";

/// Local paths of a resolved model or vocoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PretrainedSource {
    pub config: PathBuf,
    pub checkpoint: PathBuf,
}

/// Resolve an acoustic-model tag to local configuration and checkpoint
/// paths.
pub fn fetch_model(tag: &str) -> Result<PretrainedSource> {
    tracing::info!(tag, "fetching acoustic model");
    fetch(tag, MODEL_CONFIG_FILE, MODEL_CHECKPOINT_FILE)
}

/// Resolve a vocoder tag to local configuration and checkpoint paths.
///
/// Only `parallel_wavegan/<repo>` tags are supported.
pub fn fetch_vocoder(tag: &str) -> Result<PretrainedSource> {
    let repo = tag.strip_prefix(VOCODER_TAG_PREFIX).ok_or_else(|| {
        Error::Config(format!(
            "vocoder tag must start with '{VOCODER_TAG_PREFIX}', got '{tag}'"
        ))
    })?;
    tracing::info!(tag, "fetching vocoder");
    fetch(repo, VOCODER_CONFIG_FILE, VOCODER_CHECKPOINT_FILE)
}

fn fetch(repo_id: &str, config_file: &str, checkpoint_file: &str) -> Result<PretrainedSource> {
    let api = Api::new()?;
    let repo = api.model(repo_id.to_string());
    let config = repo.get(config_file).map_err(|e| {
        Error::Pretrained(format!("failed to fetch '{config_file}' from '{repo_id}': {e}"))
    })?;
    let checkpoint = repo.get(checkpoint_file).map_err(|e| {
        Error::Pretrained(format!(
            "failed to fetch '{checkpoint_file}' from '{repo_id}': {e}"
        ))
    })?;
    Ok(PretrainedSource { config, checkpoint })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocoder_tag_without_prefix_is_rejected_offline() {
        let result = fetch_vocoder("some/repo");
        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("parallel_wavegan/")),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
