use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::InferenceEngine;
use crate::detect::tensor::Tensor;

/// Scripted engine for `stub://` models and tests.
///
/// Replies are consumed in order; once the script runs out the fallback reply
/// is returned for every call.
pub struct StubEngine {
    script: VecDeque<Result<Tensor, String>>,
    fallback: Result<Tensor, String>,
    calls: u64,
}

impl StubEngine {
    /// Engine that always returns `output`.
    pub fn with_output(output: Tensor) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Ok(output),
            calls: 0,
        }
    }

    /// Engine that returns an empty `(1, 4 + classes, 0)` output.
    pub fn empty(num_classes: usize) -> Self {
        Self::with_output(Tensor::zeros(vec![1, 4 + num_classes, 0]))
    }

    /// Engine that always fails.
    pub fn failing(message: &str) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Err(message.to_string()),
            calls: 0,
        }
    }

    /// Queue a reply ahead of the fallback.
    pub fn then_output(mut self, output: Tensor) -> Self {
        self.script.push_back(Ok(output));
        self
    }

    /// Queue a fault ahead of the fallback.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.script.push_back(Err(message.to_string()));
        self
    }

    /// Number of `infer` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        self.calls += 1;
        if input.rank() != 4 || input.shape()[0] != 1 || input.shape()[1] != 3 {
            return Err(anyhow!(
                "stub engine expects (1, 3, H, W) input, got {:?}",
                input.shape()
            ));
        }
        let reply = self.script.pop_front().unwrap_or_else(|| self.fallback.clone());
        reply.map_err(|message| anyhow!("stub engine fault: {}", message))
    }
}
