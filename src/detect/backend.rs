use anyhow::Result;

use super::tensor::Tensor;

/// Inference engine boundary.
///
/// Takes a `(1, 3, H, W)` RGB tensor in [0, 1] and returns the raw
/// `(1, 4 + C, B)` output. Any internal fault surfaces as a single `Err`
/// with no partial result.
pub trait InferenceEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Run the model on one input tensor.
    fn infer(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Optional warm-up hook, run once before the loop starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        (**self).infer(input)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
