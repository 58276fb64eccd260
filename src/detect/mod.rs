//! Detection: preprocessing, the inference boundary, decoding and suppression.

mod backend;
mod backends;
pub mod geometry;
pub mod nms;
pub mod postprocess;
pub mod preprocess;
mod result;
pub mod tensor;

pub use backend::InferenceEngine;
pub use backends::StubEngine;
#[cfg(feature = "backend-tract")]
pub use backends::TractEngine;
pub use geometry::{CenterBox, CornerBox};
pub use nms::{suppress, suppress_per_class, SuppressionMode};
pub use postprocess::{postprocess, DecodeParams};
pub use preprocess::preprocess;
pub use result::{label_for, Detection};
pub use tensor::Tensor;
