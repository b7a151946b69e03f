//! Embedding vectors on the wire and at rest.
//!
//! Stored inline with messages as little-endian f32 BLOBs. Missing vectors
//! are permitted everywhere; consumers degrade to keyword-only retrieval.

use crate::error::{MemoryError, Result};

/// Encode a vector as a little-endian f32 byte blob.
///
/// Rejects non-finite components; stored vectors must stay comparable.
pub fn encode(vec: &[f32]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for (i, v) in vec.iter().enumerate() {
        if !v.is_finite() {
            return Err(MemoryError::InvalidEmbedding(format!(
                "non-finite component at index {i}"
            )));
        }
        out.extend_from_slice(&v.to_le_bytes());
    }
    Ok(out)
}

/// Decode a blob back into a vector. A truncated blob is an error.
pub fn decode(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(MemoryError::InvalidEmbedding(format!(
            "blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Cosine similarity in [-1, 1]. Zero when either vector is empty,
/// zero-length, or the dimensions differ.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let v = vec![0.5f32, -1.25, 3.0, 0.0];
        let blob = encode(&v).unwrap();
        assert_eq!(blob.len(), 16);
        assert_eq!(decode(&blob).unwrap(), v);
    }

    #[test]
    fn nan_rejected() {
        assert!(encode(&[1.0, f32::NAN]).is_err());
        assert!(encode(&[f32::INFINITY]).is_err());
    }

    #[test]
    fn truncated_blob_rejected() {
        assert!(decode(&[0, 0, 0]).is_err());
    }

    #[test]
    fn cosine_identity() {
        let v = vec![0.3f32, 0.4, 0.5];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        assert!((cosine(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn cosine_dimension_mismatch_is_zero() {
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
