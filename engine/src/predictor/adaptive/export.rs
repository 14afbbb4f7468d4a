// SPDX-License-Identifier: AGPL-3.0-only

//! Weight export for persistence and transfer between engines.

use serde::{Deserialize, Serialize};

use super::{AdaptiveNetwork, Layer};
use crate::error::EngineError;

/// One dense layer, weights flattened row-major (`outputs × inputs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedLayer {
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
}

/// Complete network weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedModel {
    /// Layer widths, input first.
    pub topology: Vec<usize>,
    pub layers: Vec<ExportedLayer>,
}

impl AdaptiveNetwork {
    /// Flatten the current weights.
    #[must_use]
    pub fn export(&self) -> ExportedModel {
        ExportedModel {
            topology: self.topology.clone(),
            layers: self
                .layers
                .iter()
                .map(|layer| ExportedLayer {
                    inputs: layer.inputs(),
                    outputs: layer.biases.len(),
                    weights: layer.weights.iter().flatten().copied().collect(),
                    biases: layer.biases.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild a network from an export.
    ///
    /// # Errors
    /// Returns [`EngineError::StateImport`] when layer shapes disagree with
    /// the topology or with their own flattened lengths, or any weight is
    /// not finite.
    pub fn from_exported(model: &ExportedModel) -> Result<Self, EngineError> {
        if model.topology.len() < 2 || model.layers.len() != model.topology.len() - 1 {
            return Err(EngineError::StateImport(format!(
                "{} layers for topology {:?}",
                model.layers.len(),
                model.topology
            )));
        }
        let layers = model
            .layers
            .iter()
            .zip(model.topology.windows(2))
            .enumerate()
            .map(|(idx, (layer, widths))| {
                let (inputs, outputs) = (widths[0], widths[1]);
                if inputs == 0
                    || layer.inputs != inputs
                    || layer.outputs != outputs
                    || layer.weights.len() != inputs * outputs
                    || layer.biases.len() != outputs
                {
                    return Err(EngineError::StateImport(format!(
                        "layer {idx} shape mismatch: expected {inputs}x{outputs}"
                    )));
                }
                if layer
                    .weights
                    .iter()
                    .chain(&layer.biases)
                    .any(|v| !v.is_finite())
                {
                    return Err(EngineError::StateImport(format!(
                        "layer {idx} has non-finite weights"
                    )));
                }
                Ok(Layer {
                    weights: layer.weights.chunks(inputs).map(<[f64]>::to_vec).collect(),
                    biases: layer.biases.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            topology: model.topology.clone(),
            layers,
        })
    }
}
