use anyhow::{anyhow, Result};

/// Flat `f32` buffer with a row-major shape.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Build a tensor, checking that the element count matches the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| anyhow!("tensor shape {:?} overflows", shape))?;
        if expected != data.len() {
            return Err(anyhow!(
                "tensor shape {:?} needs {} elements, received {}",
                shape,
                expected,
                data.len()
            ));
        }
        Ok(Self { shape, data })
    }

    /// Zero-filled tensor of the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// Build a rank-4 tensor by evaluating `f` at every `(n, c, y, x)` index.
    pub fn from_shape_fn4<F>(shape: [usize; 4], mut f: F) -> Self
    where
        F: FnMut((usize, usize, usize, usize)) -> f32,
    {
        let [d0, d1, d2, d3] = shape;
        let mut data = Vec::with_capacity(d0 * d1 * d2 * d3);
        for n in 0..d0 {
            for c in 0..d1 {
                for y in 0..d2 {
                    for x in 0..d3 {
                        data.push(f((n, c, y, x)));
                    }
                }
            }
        }
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Element at a rank-3 index. Caller guarantees rank and bounds.
    pub(crate) fn at3(&self, i: usize, j: usize, k: usize) -> f32 {
        let (d1, d2) = (self.shape[1], self.shape[2]);
        self.data[(i * d1 + j) * d2 + k]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_checks_element_count() {
        assert!(Tensor::new(vec![1, 2, 3], vec![0.0; 6]).is_ok());
        let err = Tensor::new(vec![1, 2, 3], vec![0.0; 5]).unwrap_err();
        assert!(err.to_string().contains("needs 6 elements"));
    }

    #[test]
    fn shape_fn_fills_row_major() {
        let t = Tensor::from_shape_fn4([1, 2, 2, 2], |(_, c, y, x)| (c * 100 + y * 10 + x) as f32);
        assert_eq!(t.shape(), &[1, 2, 2, 2]);
        assert_eq!(t.data(), &[0.0, 1.0, 10.0, 11.0, 100.0, 101.0, 110.0, 111.0]);
    }

    #[test]
    fn rank3_indexing_is_row_major() -> Result<()> {
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let t = Tensor::new(vec![2, 2, 3], data)?;
        assert_eq!(t.rank(), 3);
        assert_eq!(t.at3(0, 0, 2), 2.0);
        assert_eq!(t.at3(0, 1, 0), 3.0);
        assert_eq!(t.at3(1, 1, 2), 11.0);
        Ok(())
    }
}
