/// Stride-based frame sampler.
///
/// Counts every frame read off the stream; frame numbers start at 1 and every
/// frame whose number is a multiple of the stride is selected.
#[derive(Clone, Debug)]
pub struct FrameSampler {
    stride: u64,
    frame_index: u64,
}

impl FrameSampler {
    /// A stride of 0 is treated as 1 (every frame).
    pub fn new(stride: u64) -> Self {
        Self {
            stride: stride.max(1),
            frame_index: 0,
        }
    }

    /// Count one frame and report whether it should be processed.
    pub fn tick(&mut self) -> bool {
        self.frame_index += 1;
        self.frame_index.is_multiple_of(self.stride)
    }

    /// Frames counted so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }
}
