//! Selective homomorphic-style encryption of the classifier head: a
//! symmetric fixed-point quantization scheme with a per-element pseudorandom
//! noise mask derived from a secret key, reproducing the externally visible
//! contract of an approximate (CKKS-style) encryption of real-valued
//! tensors -- serialized ciphertext bytes, a shape registry, and a lossy
//! decrypt-reshape round trip -- without wrapping a real FHE backend.
//!
//! The scheme is additive and symmetric: the same key that produced a
//! ciphertext is required to open it, and the server that aggregates
//! ciphertexts necessarily holds that key (see design notes on why the
//! aggregator cannot avoid this).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tensor::{NamedTensorMap, Tensor, TensorError};
use thiserror::Error;

/// Fixed-point scale applied before quantizing to i64. Chosen to keep
/// typical classifier-head weight magnitudes (roughly [-10, 10]) well
/// within i64 range while preserving several digits of precision.
const FIXED_POINT_SCALE: f64 = 1_048_576.0; // 2^20

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeError {
    #[error("no registered shape for tensor '{0}'")]
    MissingShape(String),
    #[error("ciphertext for '{0}' has {actual} bytes, which is not a multiple of 8")]
    MalformedCiphertext { name: String, actual: usize },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// A single encrypted tensor: fixed-point-quantized values masked with a
/// keystream derived from the context's secret key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ciphertext {
    pub bytes: Vec<u8>,
}

/// Holds the secret key used to mask and unmask tensors, plus the shape
/// registry needed to reshape a decrypted flat vector back into a tensor.
/// Serializing this context necessarily serializes the secret key: the
/// orchestrator that aggregates encrypted heads must be able to decrypt
/// them to average across clients, so it holds this key too.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeContext {
    key: [u8; 32],
    shapes: HashMap<String, Vec<usize>>,
}

impl HeContext {
    pub fn new(key: [u8; 32]) -> Self {
        HeContext {
            key,
            shapes: HashMap::new(),
        }
    }

    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        HeContext::new(key)
    }

    /// Record the shape of every tensor in `map` so a later decrypt can
    /// reshape the flat vector it recovers.
    pub fn register_shapes(&mut self, map: &NamedTensorMap) {
        for (key, tensor) in map {
            self.shapes.insert(key.clone(), tensor.shape.clone());
        }
    }

    pub fn get_shapes(&self) -> &HashMap<String, Vec<usize>> {
        &self.shapes
    }

    pub fn set_shapes(&mut self, shapes: HashMap<String, Vec<usize>>) {
        self.shapes = shapes;
    }

    /// Serialize the context, secret key included. Intended for transport
    /// to whichever party must decrypt (the aggregator), never for clients
    /// that should only encrypt.
    pub fn serialize_context(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("HeContext always serializes")
    }

    pub fn deserialize_context(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encrypt a single named tensor. The tensor need not already be in the
    /// shape registry; its shape is recorded as a side effect.
    pub fn encrypt_tensor(&mut self, name: &str, tensor: &Tensor) -> Ciphertext {
        self.shapes.insert(name.to_string(), tensor.shape.clone());
        let mut bytes = Vec::with_capacity(tensor.data.len() * 8);
        for (i, value) in tensor.data.iter().enumerate() {
            let quantized = (*value as f64 * FIXED_POINT_SCALE).round() as i64;
            let mask = keystream_element(&self.key, name, i);
            let masked = quantized.wrapping_add(mask);
            bytes.extend_from_slice(&masked.to_le_bytes());
        }
        Ciphertext { bytes }
    }

    /// Decrypt a single named tensor, reshaping the recovered flat vector
    /// using the shape previously registered for `name`.
    pub fn decrypt_tensor(&self, name: &str, cipher: &Ciphertext) -> Result<Tensor, HeError> {
        let shape = self
            .shapes
            .get(name)
            .ok_or_else(|| HeError::MissingShape(name.to_string()))?;

        if cipher.bytes.len() % 8 != 0 {
            return Err(HeError::MalformedCiphertext {
                name: name.to_string(),
                actual: cipher.bytes.len(),
            });
        }

        let expected: usize = shape.iter().product();
        let mut flat = Vec::with_capacity(expected);
        for (i, chunk) in cipher.bytes.chunks_exact(8).enumerate() {
            let masked = i64::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes"));
            let mask = keystream_element(&self.key, name, i);
            let quantized = masked.wrapping_sub(mask);
            flat.push(quantized as f64 / FIXED_POINT_SCALE);
        }
        // Truncate to the registered element count, mirroring the
        // source's decrypt-then-reshape behavior for oversized ciphertexts.
        flat.truncate(expected);
        let data: Vec<f32> = flat.into_iter().map(|v| v as f32).collect();
        Ok(Tensor::new(shape.clone(), data)?)
    }

    /// Encrypt every tensor whose key starts with `head_prefix`.
    pub fn encrypt_head(
        &mut self,
        map: &NamedTensorMap,
        head_prefix: &str,
    ) -> HashMap<String, Ciphertext> {
        let mut out = HashMap::new();
        for (key, tensor) in map {
            if key.starts_with(head_prefix) {
                out.insert(key.clone(), self.encrypt_tensor(key, tensor));
            }
        }
        out
    }

    /// Decrypt a map of head ciphertexts back into a [`NamedTensorMap`].
    pub fn decrypt_head(
        &self,
        ciphers: &HashMap<String, Ciphertext>,
    ) -> Result<NamedTensorMap, HeError> {
        let mut out = NamedTensorMap::new();
        for (name, cipher) in ciphers {
            out.insert(name.clone(), self.decrypt_tensor(name, cipher)?);
        }
        Ok(out)
    }
}

/// Derive one pseudorandom i64 mask element from the key, tensor name, and
/// element index via SHA-256. This stands in for a CKKS keystream: uniform,
/// deterministic given the key, and unrecoverable without it.
fn keystream_element(key: &[u8; 32], name: &str, index: usize) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(name.as_bytes());
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();
    i64::from_le_bytes(digest[0..8].try_into().expect("digest has 32 bytes"))
}
