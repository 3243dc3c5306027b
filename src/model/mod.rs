mod bigram;
pub(crate) mod rnn;

pub use bigram::BigramModel;
pub use rnn::{CellKind, RnnLanguageModel};

use crate::error::{ConfigError, Error, InferenceError, Result};
use crate::vocab::TokenId;
use candle_core::Device;
use std::path::Path;
use tracing::warn;

/// A pretrained causal language model.
///
/// `predict(tokens)` returns one row per input position. Row `k` is the
/// natural-log distribution over the vocabulary for the token following
/// `tokens[k]`, computed from `tokens[..=k]` only. Every call starts from a
/// fresh state.
pub trait LanguageModel {
    fn vocab_size(&self) -> usize;

    fn predict(&self, tokens: &[TokenId]) -> Result<Vec<Vec<f32>>, InferenceError>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn predict(&self, tokens: &[TokenId]) -> Result<Vec<Vec<f32>>, InferenceError> {
        (**self).predict(tokens)
    }
}

/// CPU unless `cuda` is set and a CUDA device is usable.
pub fn select_device(cuda: bool) -> Device {
    if !cuda {
        return Device::Cpu;
    }
    match Device::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => device,
        Ok(device) => {
            warn!("CUDA requested but not available in this build, running on CPU");
            device
        }
        Err(e) => {
            warn!("CUDA requested but the device failed to initialise ({e}), running on CPU");
            Device::Cpu
        }
    }
}

/// Loads a serialized network. Only safetensors state dicts are understood.
pub fn load_network(path: &Path, device: &Device) -> Result<RnnLanguageModel> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("safetensors") => RnnLanguageModel::load(path, device),
        _ => Err(Error::Config(ConfigError::UnsupportedModel {
            path: path.to_path_buf(),
            reason: "expected a .safetensors state dict".to_string(),
        })),
    }
}
