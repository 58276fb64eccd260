#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceEngine;
use crate::detect::tensor::Tensor as InputTensor;

/// Tract-based ONNX engine.
///
/// The model is loaded and optimised once; a load failure is a startup error.
pub struct TractEngine {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractEngine {
    /// Load an ONNX model from disk with a fixed `(1, 3, height, width)` input.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, input: &InputTensor) -> Result<Tensor> {
        let expected = [1, 3, self.height as usize, self.width as usize];
        if input.shape() != expected {
            return Err(anyhow!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                expected
            ));
        }
        let array = tract_ndarray::Array4::from_shape_vec(
            (1, 3, self.height as usize, self.width as usize),
            input.data().to_vec(),
        )
        .context("reshape input tensor")?;
        Ok(array.into_tensor())
    }

    fn extract_output(&self, outputs: TVec<TValue>) -> Result<InputTensor> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();
        InputTensor::new(shape, data)
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, input: &InputTensor) -> Result<InputTensor> {
        let input = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_output(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let zeros = InputTensor::zeros(vec![1, 3, self.height as usize, self.width as usize]);
        self.infer(&zeros).map(|_| ())
    }
}
