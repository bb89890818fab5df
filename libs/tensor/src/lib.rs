//! Canonical named-tensor representation shared by the aggregation, privacy
//! and encryption crates: a dense float32 tensor with a fixed shape, and an
//! order-preserving map of such tensors keyed by parameter name.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    #[error("shape mismatch for key '{key}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("key sets diverge between maps: {0:?} vs {1:?}")]
    KeySetMismatch(Vec<String>, Vec<String>),
    #[error("key '{0}' missing from named tensor map")]
    MissingKey(String),
    #[error("flat vector length {actual} does not match expected element count {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// A dense, row-major (C-order) float32 tensor with an explicit shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TensorError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Tensor { shape, data })
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn l2_norm(&self) -> f32 {
        self.data.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let n: usize = shape.iter().product();
        Tensor {
            shape,
            data: vec![0.0; n],
        }
    }
}

/// An ordered mapping from parameter name to tensor. Insertion order is
/// significant: it is the order used by [`flatten`] and must be identical
/// across all clients in a round.
pub type NamedTensorMap = IndexMap<String, Tensor>;

/// Concatenate every tensor's row-major elements, in `keys` order, into a
/// single dense vector. `keys` need not equal `map.keys()` — callers pass an
/// explicit order so distinct maps can be flattened consistently.
pub fn flatten(map: &NamedTensorMap, keys: &[String]) -> Result<Vec<f32>, TensorError> {
    let mut out = Vec::with_capacity(keys.iter().map(|k| map.get(k).map_or(0, Tensor::numel)).sum());
    for key in keys {
        let tensor = map
            .get(key)
            .ok_or_else(|| TensorError::MissingKey(key.clone()))?;
        out.extend_from_slice(&tensor.data);
    }
    Ok(out)
}

/// Inverse of [`flatten`]: slice `flat` back into tensors of `shapes`, in
/// `keys` order, and rebuild a [`NamedTensorMap`].
pub fn unflatten(
    flat: &[f32],
    keys: &[String],
    shapes: &[Vec<usize>],
) -> Result<NamedTensorMap, TensorError> {
    let total: usize = shapes.iter().map(|s| s.iter().product::<usize>()).sum();
    if total != flat.len() {
        return Err(TensorError::LengthMismatch {
            expected: total,
            actual: flat.len(),
        });
    }

    let mut out = NamedTensorMap::new();
    let mut offset = 0usize;
    for (key, shape) in keys.iter().zip(shapes.iter()) {
        let numel: usize = shape.iter().product();
        let slice = flat[offset..offset + numel].to_vec();
        out.insert(key.clone(), Tensor::new(shape.clone(), slice)?);
        offset += numel;
    }
    Ok(out)
}

/// Verify that every map in `maps` shares the same keys (in the same order)
/// and shapes as the first map. All clients in a round must agree on this.
pub fn assert_shapes_match(maps: &[NamedTensorMap]) -> Result<(), TensorError> {
    let Some(reference) = maps.first() else {
        return Ok(());
    };
    let ref_keys: Vec<String> = reference.keys().cloned().collect();

    for map in &maps[1..] {
        let keys: Vec<String> = map.keys().cloned().collect();
        if keys != ref_keys {
            return Err(TensorError::KeySetMismatch(ref_keys, keys));
        }
        for key in &ref_keys {
            let expected = &reference[key].shape;
            let actual = &map[key].shape;
            if expected != actual {
                return Err(TensorError::ShapeMismatch {
                    key: key.clone(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Keys whose name begins with `head_prefix` (e.g. `"classifier."`) belong
/// to the classifier head; everything else is body.
pub fn partition_keys(map: &NamedTensorMap, head_prefix: &str) -> (Vec<String>, Vec<String>) {
    let mut body = Vec::new();
    let mut head = Vec::new();
    for key in map.keys() {
        if key.starts_with(head_prefix) {
            head.push(key.clone());
        } else {
            body.push(key.clone());
        }
    }
    (body, head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> NamedTensorMap {
        let mut m = NamedTensorMap::new();
        m.insert(
            "conv1.weight".to_string(),
            Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        );
        m.insert(
            "classifier.bias".to_string(),
            Tensor::new(vec![3], vec![0.1, 0.2, 0.3]).unwrap(),
        );
        m
    }

    #[test]
    fn flatten_unflatten_roundtrip() {
        let map = sample_map();
        let keys: Vec<String> = map.keys().cloned().collect();
        let shapes: Vec<Vec<usize>> = keys.iter().map(|k| map[k].shape.clone()).collect();

        let flat = flatten(&map, &keys).unwrap();
        assert_eq!(flat, vec![1.0, 2.0, 3.0, 4.0, 0.1, 0.2, 0.3]);

        let back = unflatten(&flat, &keys, &shapes).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn flatten_missing_key_errors() {
        let map = sample_map();
        let keys = vec!["nope".to_string()];
        assert!(matches!(
            flatten(&map, &keys),
            Err(TensorError::MissingKey(_))
        ));
    }

    #[test]
    fn shape_mismatch_detected() {
        let a = sample_map();
        let mut b = sample_map();
        b.insert(
            "conv1.weight".to_string(),
            Tensor::new(vec![4], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        );
        assert!(matches!(
            assert_shapes_match(&[a, b]),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn key_partitioning() {
        let map = sample_map();
        let (body, head) = partition_keys(&map, "classifier.");
        assert_eq!(body, vec!["conv1.weight".to_string()]);
        assert_eq!(head, vec!["classifier.bias".to_string()]);
    }
}
