use std::ops::Range;

use anyhow::Result;
use burn::tensor::TensorData;

use crate::prelude::QlError;

/// Dense, row-major multi dimensional `f32` array on top of burn's [TensorData].
///
/// The first axis is the batch axis: a state batch has dims `[n, channels, height, width]`,
/// an action mask or a set of Q-values `[n, action_count]`.
#[derive(Clone, Debug)]
pub struct Tensor {
    data: TensorData,
}

impl Tensor {
    /// Zero-filled tensor
    pub fn new(dims: &[usize]) -> Self {
        Self {
            data: TensorData::zeros::<f32, _>(dims.to_vec()),
        }
    }

    pub fn from_data(
        dims: &[usize],
        data: Vec<f32>,
    ) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(QlError(format!("tensor dims {:?} require {} values, got {}", dims, expected, data.len())).into());
        }
        Ok(Self {
            data: TensorData::new(data, dims.to_vec()),
        })
    }

    pub fn dims(&self) -> &[usize] { &self.data.shape }

    pub fn data(&self) -> &[f32] { self.data.as_slice::<f32>().unwrap_or_default() }

    fn values_mut(&mut self) -> &mut [f32] { self.data.as_mut_slice::<f32>().unwrap_or_default() }

    /// Copy of the underlying data, ready for `burn::tensor::Tensor::from_data`
    pub fn to_data(&self) -> TensorData { self.data.clone() }

    pub fn into_data(self) -> TensorData { self.data }

    /// Length of the first (batch) axis
    pub fn len(&self) -> usize { self.dims().first().copied().unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Number of values of one entry along the batch axis
    pub fn row_len(&self) -> usize { self.dims().iter().skip(1).product() }

    pub fn row(
        &self,
        i: usize,
    ) -> &[f32] {
        let n = self.row_len();
        &self.data()[i * n..(i + 1) * n]
    }

    pub fn row_mut(
        &mut self,
        i: usize,
    ) -> &mut [f32] {
        let n = self.row_len();
        &mut self.values_mut()[i * n..(i + 1) * n]
    }

    /// Copy of the entries `range` along the batch axis
    pub fn rows(
        &self,
        range: Range<usize>,
    ) -> Tensor {
        let n = self.row_len();
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        let mut dims = self.dims().to_vec();
        dims[0] = end - start;
        Tensor {
            data: TensorData::new(self.data()[start * n..end * n].to_vec(), dims),
        }
    }

    /// Index and value of the largest entry of row `i`
    pub fn row_max(
        &self,
        i: usize,
    ) -> (usize, f32) {
        self.row(i)
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (a, &v)| if v > best.1 { (a, v) } else { best })
    }

    fn offset(
        &self,
        index: &[usize],
    ) -> usize {
        let dims = self.dims();
        debug_assert_eq!(index.len(), dims.len());
        index
            .iter()
            .zip(dims.iter())
            .fold(0, |acc, (&i, &d)| {
                debug_assert!(i < d, "index {:?} out of bounds for dims {:?}", index, dims);
                acc * d + i
            })
    }

    pub fn get(
        &self,
        index: &[usize],
    ) -> f32 {
        self.data()[self.offset(index)]
    }

    pub fn set(
        &mut self,
        index: &[usize],
        value: f32,
    ) {
        let o = self.offset(index);
        self.values_mut()[o] = value;
    }
}

impl PartialEq for Tensor {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.dims() == other.dims() && self.data() == other.data()
    }
}

/// Takes over backend output, converting its elements to `f32`
impl TryFrom<TensorData> for Tensor {
    type Error = anyhow::Error;

    fn try_from(data: TensorData) -> Result<Self> {
        let data = data.convert::<f32>();
        let expected: usize = data.shape.iter().product();
        let len = data
            .as_slice::<f32>()
            .map_err(|e| QlError(format!("tensor data is not f32: {:?}", e)))?
            .len();
        if len != expected {
            return Err(QlError(format!("tensor data of shape {:?} holds {} values", data.shape, len)).into());
        }
        Ok(Self { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_linear_storage_assumptions() {
        let t = Tensor::new(&[2, 4, 3, 3]);
        assert_eq!(t.offset(&[0, 0, 0, 0]), 0);
        assert_eq!(t.offset(&[0, 0, 0, 1]), 1);
        assert_eq!(t.offset(&[0, 0, 1, 0]), 3);
        assert_eq!(t.offset(&[0, 1, 0, 0]), 9);
        assert_eq!(t.offset(&[1, 0, 0, 0]), 36);
        assert_eq!(t.row_len(), 36);
        assert_eq!(t.data().len(), 72);
    }

    #[test]
    fn test_rows_are_clamped_to_batch_len() {
        let t = Tensor::from_data(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let r = t.rows(1..10);
        assert_eq!(r.dims(), &[2, 2]);
        assert_eq!(r.data(), &[3.0, 4.0, 5.0, 6.0]);
        assert!(t.rows(5..7).is_empty());
    }

    #[test]
    fn test_row_max() {
        let t = Tensor::from_data(&[2, 3], vec![0.1, 0.7, 0.2, -1.0, -3.0, -0.5]).unwrap();
        assert_eq!(t.row_max(0), (1, 0.7));
        assert_eq!(t.row_max(1), (2, -0.5));
    }

    #[test]
    fn test_set_writes_through() {
        let mut t = Tensor::new(&[2, 2]);
        t.set(&[1, 0], 3.0);
        t.row_mut(0)[1] = 1.5;
        assert_eq!(t.data(), &[0.0, 1.5, 3.0, 0.0]);
        assert_eq!(t.get(&[1, 0]), 3.0);
    }

    #[test]
    fn test_tensor_data_conversion() -> Result<()> {
        let t = Tensor::from_data(&[2, 2], vec![1.0, 2.0, 3.0, 4.0])?;
        assert_eq!(t.to_data().shape, vec![2, 2]);
        assert_eq!(Tensor::try_from(t.clone().into_data())?, t);

        let doubles = TensorData::new(vec![0.5f64, -1.0], vec![1, 2]);
        assert_eq!(Tensor::try_from(doubles)?.data(), &[0.5, -1.0]);
        Ok(())
    }

    #[test]
    fn test_from_data_rejects_wrong_length() {
        assert!(Tensor::from_data(&[2, 2], vec![0.0; 3]).is_err());
    }
}
