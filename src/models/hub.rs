// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model provisioning from the Hugging Face Hub
//!
//! Files are fetched with the synchronous hf-hub client and cached on disk
//! by it. Nothing is kept in memory between runs. The repository listing is
//! read first, so optional files are fetched only when the repo has them and
//! every fetch failure that does happen is fatal.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use hf_hub::api::sync::{Api, ApiError, ApiRepo};
use serde::de::DeserializeOwned;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use super::device::{Placement, Precision};
use super::preprocessor::{Preprocessor, SpecialTokens};
use super::provisioner::{ModelHandle, ModelProvisioner};
use crate::errors::LoadError;
use crate::inference::chat_template::ChatTemplate;
use crate::vision::preprocessing::ImageProcessorConfig;
use crate::vision::qwen2_vl::config::merge_eos_ids;
use crate::vision::qwen2_vl::{
    GenerationConfig, GenerationTokens, Qwen2VlConfig, Qwen2VlFiles, Qwen2VlModel,
};

const REPO_LISTING: &str = "<repository listing>";
const CONFIG_FILE: &str = "config.json";
const GENERATION_CONFIG_FILE: &str = "generation_config.json";
const PREPROCESSOR_CONFIG_FILE: &str = "preprocessor_config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";

const VISION_ENCODER_STEM: &str = "vision_encoder";
const EMBED_TOKENS_STEM: &str = "embed_tokens";
const DECODER_STEM: &str = "decoder_model_merged";

/// Provisioner backed by the Hugging Face Hub
#[derive(Debug, Clone)]
pub struct HubProvisioner {
    placement: Option<Placement>,
}

impl HubProvisioner {
    /// Provisioner with automatic device placement
    pub fn new() -> Self {
        Self { placement: None }
    }

    /// Provisioner pinned to a fixed placement
    pub fn with_placement(placement: Placement) -> Self {
        Self {
            placement: Some(placement),
        }
    }

    fn open_repo(&self, model_id: &str) -> Result<ApiRepo, LoadError> {
        let api = Api::new().map_err(|e| LoadError::Download {
            model_id: model_id.to_string(),
            file: "<hub client>".to_string(),
            source: Box::new(e),
        })?;
        Ok(api.model(model_id.to_string()))
    }
}

impl Default for HubProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP status the hub answered with, when the request got a response
fn response_status(error: ApiError) -> (Option<u16>, String) {
    let message = error.to_string();
    let status = match error {
        ApiError::RequestError(request) => (*request).into_response().map(|r| r.status()),
        _ => None,
    };
    (status, message)
}

/// Map a failed hub request to a load error
///
/// The hub answers 404 for unknown repositories when authenticated and 401
/// otherwise, so both mean the model does not exist for this caller. Only
/// the repository listing is classified this way; any later failure is a
/// download error.
fn hub_error(model_id: &str, file: &str, status: Option<u16>, message: String) -> LoadError {
    if file == REPO_LISTING && matches!(status, Some(401) | Some(404)) {
        return LoadError::NotFound(model_id.to_string());
    }
    LoadError::Download {
        model_id: model_id.to_string(),
        file: file.to_string(),
        source: message.into(),
    }
}

/// Names of every file in the repository
fn list_files(repo: &ApiRepo, model_id: &str) -> Result<HashSet<String>, LoadError> {
    let info = repo.info().map_err(|e| {
        let (status, message) = response_status(e);
        hub_error(model_id, REPO_LISTING, status, message)
    })?;
    debug!("{} lists {} files", model_id, info.siblings.len());
    Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
}

fn fetch(repo: &ApiRepo, model_id: &str, file: &str) -> Result<PathBuf, LoadError> {
    debug!("Fetching {} from {}", file, model_id);
    repo.get(file).map_err(|e| {
        let (status, message) = response_status(e);
        hub_error(model_id, file, status, message)
    })
}

/// External weight file of an ONNX graph, when the repository carries one
fn external_data_file(graph_file: &str, listing: &HashSet<String>) -> Option<String> {
    let data_file = format!("{}_data", graph_file);
    listing.contains(&data_file).then_some(data_file)
}

/// Fetch an ONNX graph plus its external weight file
///
/// Both land side by side in the hf-hub cache, where ONNX Runtime looks for
/// the weights.
fn fetch_graph(
    repo: &ApiRepo,
    listing: &HashSet<String>,
    model_id: &str,
    stem: &str,
    precision: Precision,
) -> Result<PathBuf, LoadError> {
    let file = precision.onnx_file(stem);
    let path = fetch(repo, model_id, &file)?;
    if let Some(data_file) = external_data_file(&file, listing) {
        fetch(repo, model_id, &data_file)?;
        debug!("Fetched external weights {}", data_file);
    }
    Ok(path)
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| LoadError::Config {
        path: path.to_path_buf(),
        source,
    })
}

impl ModelProvisioner for HubProvisioner {
    fn load(&self, model_id: &str) -> Result<(ModelHandle, Preprocessor), LoadError> {
        info!("Resolving {} from the Hugging Face Hub", model_id);
        let repo = self.open_repo(model_id)?;
        let listing = list_files(&repo, model_id)?;

        let config: Qwen2VlConfig = read_json(&fetch(&repo, model_id, CONFIG_FILE)?)?;
        if !config.is_supported() {
            return Err(LoadError::UnsupportedArchitecture(config.model_type));
        }

        let generation: Option<GenerationConfig> = if listing.contains(GENERATION_CONFIG_FILE) {
            Some(read_json(&fetch(&repo, model_id, GENERATION_CONFIG_FILE)?)?)
        } else {
            warn!("⚠️  No generation config in {}, using config.json ids", model_id);
            None
        };
        let image_config: ImageProcessorConfig =
            read_json(&fetch(&repo, model_id, PREPROCESSOR_CONFIG_FILE)?)?;

        let tokenizer_path = fetch(&repo, model_id, TOKENIZER_FILE)?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| LoadError::Tokenizer(format!("{}: {}", tokenizer_path.display(), e)))?;
        info!(
            "Loaded tokenizer with {} tokens",
            tokenizer.get_vocab_size(true)
        );

        let eos = merge_eos_ids(&config, generation.as_ref());
        let mut special_tokens = SpecialTokens::resolve(&tokenizer, config.image_token_id, eos)?;
        if let Some(pad) = generation.as_ref().and_then(|g| g.pad_token_id) {
            special_tokens.pad = pad;
        }

        let placement = self.placement.unwrap_or_else(Placement::auto);
        let files = Qwen2VlFiles {
            vision_encoder: fetch_graph(&repo, &listing, model_id, VISION_ENCODER_STEM, placement.precision)?,
            embed_tokens: fetch_graph(&repo, &listing, model_id, EMBED_TOKENS_STEM, placement.precision)?,
            decoder: fetch_graph(&repo, &listing, model_id, DECODER_STEM, placement.precision)?,
        };
        let tokens = GenerationTokens {
            image_token_id: special_tokens.image_pad,
            pad_token_id: special_tokens.pad,
            eos_token_ids: special_tokens.eos.clone(),
        };
        let model = Qwen2VlModel::load(&files, &config, tokens, placement)?;

        let preprocessor = Preprocessor::new(
            model_id,
            Box::new(tokenizer),
            ChatTemplate::Qwen2Vl,
            image_config,
            special_tokens,
        );

        Ok((ModelHandle::new(model_id, Box::new(model)), preprocessor))
    }
}
