//! Recurrent word-level language model on candle.
//!
//! Weights are read from a safetensors state dict using the PyTorch
//! `RNNModel` layout: `encoder.weight`, `rnn.{weight,bias}_{ih,hh}_l{n}`,
//! `decoder.weight`, `decoder.bias`. The cell type follows from the gate
//! multiple of `weight_hh` (4 for LSTM, 3 for GRU).

use super::LanguageModel;
use crate::error::{Error, InferenceError, Result};
use crate::vocab::TokenId;
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::rnn::{gru, lstm, GRUConfig, LSTMConfig, GRU, LSTM, RNN};
use candle_nn::{Embedding, Linear, VarBuilder};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellKind {
    Lstm,
    Gru,
}

enum Layer {
    Lstm(LSTM),
    Gru(GRU),
}

impl Layer {
    /// (batch, seq, in) -> (batch, seq, hidden), starting from a zero state.
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Layer::Lstm(cell) => {
                let states = cell.seq(xs)?;
                cell.states_to_tensor(&states)
            }
            Layer::Gru(cell) => {
                // `GRU::states_to_tensor` concatenates along the time axis and
                // loses the hidden dimension, so stack the states here.
                let states = cell.seq(xs)?;
                let hs: Vec<Tensor> = states.iter().map(|s| s.h().clone()).collect();
                Tensor::stack(&hs, 1)
            }
        }
    }
}

pub struct RnnLanguageModel {
    encoder: Embedding,
    layers: Vec<Layer>,
    decoder: Linear,
    cell: CellKind,
    vocab_size: usize,
    hidden_size: usize,
    device: Device,
}

impl RnnLanguageModel {
    pub fn load(path: &Path, device: &Device) -> Result<RnnLanguageModel> {
        let start_time = std::time::Instant::now();
        let tensors = candle_core::safetensors::load(path, device).map_err(|source| {
            Error::ModelLoad {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let model =
            RnnLanguageModel::from_tensors(tensors, device).map_err(|source| Error::ModelLoad {
                path: path.to_path_buf(),
                source,
            })?;
        info!(
            "Loaded {:?} model from {} ({} layers, {} hidden, {} tokens) in {:.2?}",
            model.cell,
            path.display(),
            model.layers.len(),
            model.hidden_size,
            model.vocab_size,
            start_time.elapsed()
        );
        Ok(model)
    }

    pub fn from_tensors(
        mut tensors: HashMap<String, Tensor>,
        device: &Device,
    ) -> candle_core::Result<RnnLanguageModel> {
        let mut take = |name: &str| -> candle_core::Result<Tensor> {
            match tensors.remove(name) {
                Some(t) => t.to_dtype(DType::F32),
                None => candle_core::bail!("missing tensor `{name}`"),
            }
        };

        let embeddings = take("encoder.weight")?;
        let (vocab_size, embedding_size) = embeddings.dims2()?;
        let encoder = Embedding::new(embeddings, embedding_size);

        let mut layers = Vec::new();
        let mut cell = None;
        let mut in_dim = embedding_size;
        let mut hidden_size = embedding_size;
        loop {
            let idx = layers.len();
            let w_ih = match take(&format!("rnn.weight_ih_l{idx}")) {
                Ok(t) => t,
                Err(_) if idx > 0 => break,
                Err(e) => return Err(e),
            };
            let w_hh = take(&format!("rnn.weight_hh_l{idx}"))?;
            let b_ih = take(&format!("rnn.bias_ih_l{idx}"))?;
            let b_hh = take(&format!("rnn.bias_hh_l{idx}"))?;

            let (gates, hidden) = w_hh.dims2()?;
            let (ih_rows, ih_cols) = w_ih.dims2()?;
            if ih_cols != in_dim || ih_rows != gates {
                candle_core::bail!(
                    "layer {idx}: weight_ih is {ih_rows}x{ih_cols}, expected {gates}x{in_dim}"
                );
            }
            let kind = match gates / hidden {
                4 if gates % hidden == 0 => CellKind::Lstm,
                3 if gates % hidden == 0 => CellKind::Gru,
                _ => candle_core::bail!(
                    "layer {idx}: weight_hh is {gates}x{hidden}, only LSTM and GRU cells are supported"
                ),
            };
            if *cell.get_or_insert(kind) != kind {
                candle_core::bail!("layer {idx}: mixed cell types");
            }

            // candle names a single layer's weights with the `_l0` suffix.
            let layer_tensors = HashMap::from([
                ("weight_ih_l0".to_string(), w_ih),
                ("weight_hh_l0".to_string(), w_hh),
                ("bias_ih_l0".to_string(), b_ih),
                ("bias_hh_l0".to_string(), b_hh),
            ]);
            let vb = VarBuilder::from_tensors(layer_tensors, DType::F32, device);
            layers.push(match kind {
                CellKind::Lstm => Layer::Lstm(lstm(in_dim, hidden, LSTMConfig::default(), vb)?),
                CellKind::Gru => Layer::Gru(gru(in_dim, hidden, GRUConfig::default(), vb)?),
            });
            in_dim = hidden;
            hidden_size = hidden;
        }

        let decoder_weight = take("decoder.weight")?;
        let decoder_bias = take("decoder.bias").ok();
        let (out_rows, out_cols) = decoder_weight.dims2()?;
        if out_rows != vocab_size || out_cols != hidden_size {
            candle_core::bail!(
                "decoder is {out_rows}x{out_cols}, expected {vocab_size}x{hidden_size}"
            );
        }
        let decoder = Linear::new(decoder_weight, decoder_bias);

        Ok(RnnLanguageModel {
            encoder,
            layers,
            decoder,
            cell: cell.unwrap_or(CellKind::Lstm),
            vocab_size,
            hidden_size,
            device: device.clone(),
        })
    }

    pub fn cell(&self) -> CellKind {
        self.cell
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn forward(&self, tokens: &[TokenId]) -> candle_core::Result<Vec<Vec<f32>>> {
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let mut xs = self.encoder.forward(&input)?;
        for layer in &self.layers {
            xs = layer.forward(&xs)?;
        }
        let logits = self.decoder.forward(&xs)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        log_probs.squeeze(0)?.to_dtype(DType::F32)?.to_vec2::<f32>()
    }
}

impl LanguageModel for RnnLanguageModel {
    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn predict(&self, tokens: &[TokenId]) -> Result<Vec<Vec<f32>>, InferenceError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(&index) = tokens.iter().find(|&&t| t as usize >= self.vocab_size) {
            return Err(InferenceError::TokenOutOfRange {
                index,
                size: self.vocab_size,
            });
        }
        Ok(self.forward(tokens)?)
    }
}
