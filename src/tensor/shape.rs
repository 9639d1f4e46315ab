//! Shape utilities for parameter tensors
//!
//! Row-wise stacking and splitting used to build and undo fused
//! projections (`in_proj_weight = [q; k; v]`).

use ndarray::{concatenate, Axis};
use smallvec::SmallVec;

use crate::error::{TransformError, TransformResult};

use super::Tensor;

/// Tensor shape, inline for up to four dimensions
pub type Shape = SmallVec<[usize; 4]>;

/// Calculate total number of elements from shape
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Stack tensors along the first axis
///
/// All parts must share their trailing dimensions. Placeholders stack into a
/// placeholder.
pub fn concat_rows(parts: &[&Tensor]) -> TransformResult<Tensor> {
    let first = parts
        .first()
        .ok_or_else(|| TransformError::Internal("concat_rows on empty input".to_string()))?;

    if first.shape().is_empty() {
        return Err(TransformError::ShapeMismatch {
            name: "concat_rows".to_string(),
            expected: vec![1],
            actual: Vec::new(),
        });
    }

    let trailing = &first.shape()[1..];
    for part in parts.iter().skip(1) {
        if part.shape().is_empty() || &part.shape()[1..] != trailing {
            return Err(TransformError::ShapeMismatch {
                name: "concat_rows".to_string(),
                expected: first.shape().to_vec(),
                actual: part.shape().to_vec(),
            });
        }
    }

    let rows: usize = parts.iter().map(|p| p.shape()[0]).sum();
    let mut shape = vec![rows];
    shape.extend_from_slice(trailing);

    if parts.iter().any(|p| p.is_placeholder()) {
        return Ok(Tensor::placeholder(&shape));
    }

    let views: Vec<_> = parts
        .iter()
        .map(|p| p.array().map(|a| a.view()))
        .collect::<TransformResult<_>>()?;
    let stacked =
        concatenate(Axis(0), &views).map_err(|e| TransformError::Internal(e.to_string()))?;

    Ok(Tensor::from_array(stacked).on(first.device()))
}

/// Split a tensor into `chunks` equal parts along the first axis
pub fn split_rows(tensor: &Tensor, chunks: usize) -> TransformResult<Vec<Tensor>> {
    let rows = tensor.shape().first().copied().unwrap_or(0);
    if chunks == 0 || rows % chunks != 0 {
        return Err(TransformError::ShapeMismatch {
            name: format!("split_rows into {chunks}"),
            expected: vec![chunks],
            actual: tensor.shape().to_vec(),
        });
    }

    let step = rows / chunks;
    let mut part_shape = tensor.shape().to_vec();
    part_shape[0] = step;

    let Some(array) = tensor.data() else {
        return Ok((0..chunks).map(|_| Tensor::placeholder(&part_shape)).collect());
    };

    Ok((0..chunks)
        .map(|i| {
            let slice = array.slice_axis(Axis(0), (i * step..(i + 1) * step).into());
            Tensor::from_array(slice.to_owned()).on(tensor.device())
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Device;

    #[test]
    fn test_numel() {
        assert_eq!(numel(&[2, 3, 4]), 24);
        assert_eq!(numel(&[]), 1);
        assert_eq!(numel(&[0, 3]), 0);
    }

    #[test]
    fn test_concat_then_split() {
        let q = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let k = Tensor::from_vec(vec![5.0, 6.0, 7.0, 8.0], &[2, 2]).unwrap();
        let v = Tensor::from_vec(vec![9.0, 10.0, 11.0, 12.0], &[2, 2]).unwrap();

        let qkv = concat_rows(&[&q, &k, &v]).unwrap();
        assert_eq!(qkv.shape(), &[6, 2]);

        let parts = split_rows(&qkv, 3).unwrap();
        assert!(parts[0].bitwise_eq(&q));
        assert!(parts[1].bitwise_eq(&k));
        assert!(parts[2].bitwise_eq(&v));
    }

    #[test]
    fn test_concat_bias_vectors() {
        let a = Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap();
        let b = Tensor::from_vec(vec![3.0, 4.0], &[2]).unwrap();
        let ab = concat_rows(&[&a, &b]).unwrap();
        assert_eq!(ab.shape(), &[4]);
        assert_eq!(ab.data().unwrap().iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_concat_mismatch() {
        let a = Tensor::zeros(&[2, 2]);
        let b = Tensor::zeros(&[2, 3]);
        assert!(concat_rows(&[&a, &b]).is_err());
        assert!(concat_rows(&[]).is_err());
    }

    #[test]
    fn test_split_uneven() {
        let t = Tensor::zeros(&[5, 2]);
        assert!(split_rows(&t, 3).is_err());
        assert!(split_rows(&t, 0).is_err());
    }

    #[test]
    fn test_placeholder_stacking() {
        let a = Tensor::placeholder(&[2, 2]);
        let b = Tensor::zeros(&[2, 2]);
        let ab = concat_rows(&[&a, &b]).unwrap();
        assert!(ab.is_placeholder());
        assert_eq!(ab.device(), Device::Meta);
        assert!(split_rows(&ab, 2).unwrap().iter().all(|t| t.is_placeholder()));
    }

    #[test]
    fn test_device_preserved() {
        let a = Tensor::zeros(&[2]).on(Device::Cuda(1));
        let b = Tensor::zeros(&[2]).on(Device::Cuda(1));
        let ab = concat_rows(&[&a, &b]).unwrap();
        assert_eq!(ab.device(), Device::Cuda(1));
        assert_eq!(split_rows(&ab, 2).unwrap()[0].device(), Device::Cuda(1));
    }
}
