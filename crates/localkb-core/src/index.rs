//! Exact nearest-neighbour index over squared L2 distance.
//!
//! [`FlatIndex`] stores every vector row-major in one contiguous buffer and
//! answers queries by brute force. It is always built wholesale from a
//! complete batch; there is no incremental insert or delete. A filtered
//! search builds a second, transient index with [`FlatIndex::subset`].
//!
//! # Byte layout
//!
//! ```text
//! dims   u32 LE
//! count  u64 LE
//! data   count × dims × f32 LE (row-major)
//! ```

use std::cmp::Ordering;

use crate::embedding::{blob_to_vec, l2_distance_squared, vec_to_blob};
use crate::error::{validate_dimension, KbError, Result};
use crate::models::Neighbor;

const HEADER_LEN: usize = 4 + 8;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dims: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// An index with no vectors. Searches return nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a fresh index from a complete batch of vectors.
    ///
    /// Every vector must have the same, non-zero length.
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self> {
        let dims = match vectors.first() {
            Some(first) => first.len(),
            None => return Ok(Self::empty()),
        };
        if dims == 0 {
            return Err(KbError::InvalidInput(
                "cannot index zero-dimensional vectors".to_string(),
            ));
        }

        let mut data = Vec::with_capacity(dims * vectors.len());
        for v in vectors {
            validate_dimension(dims, v.len())?;
            data.extend_from_slice(v);
        }
        Ok(Self { dims, data })
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimensionality, or 0 for an empty index.
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.len() {
            return None;
        }
        let start = position * self.dims;
        Some(&self.data[start..start + self.dims])
    }

    /// Build a new index over the given positions, in the given order.
    ///
    /// Position `i` of the result corresponds to `positions[i]` here.
    pub fn subset(&self, positions: &[usize]) -> Result<Self> {
        let mut data = Vec::with_capacity(positions.len() * self.dims);
        for &p in positions {
            let v = self.vector(p).ok_or_else(|| {
                KbError::InvalidInput(format!(
                    "position {} out of range for index of {} vectors",
                    p,
                    self.len()
                ))
            })?;
            data.extend_from_slice(v);
        }
        let dims = if data.is_empty() { 0 } else { self.dims };
        Ok(Self { dims, data })
    }

    /// Return up to `k` nearest positions, ascending by distance.
    ///
    /// `k` is clamped to the index size; `k == 0` or an empty index gives
    /// an empty result. Ties are broken by position so ordering is stable.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        validate_dimension(self.dims, query.len())?;

        let mut neighbors: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(position, v)| Neighbor {
                position,
                distance: l2_distance_squared(query, v),
            })
            .collect();

        let k = k.min(neighbors.len());
        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, compare_neighbors);
            neighbors.truncate(k);
        }
        neighbors.sort_by(compare_neighbors);
        Ok(neighbors)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&vec_to_blob(&self.data));
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(KbError::Corrupt(format!(
                "index data truncated: {} bytes",
                bytes.len()
            )));
        }
        let dims = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[4..HEADER_LEN]);
        let count = u64::from_le_bytes(count_bytes) as usize;

        let body = &bytes[HEADER_LEN..];
        let expected = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| KbError::Corrupt("index header overflows".to_string()))?;
        if body.len() != expected {
            return Err(KbError::Corrupt(format!(
                "index holds {} data bytes, header declares {} vectors × {} dims",
                body.len(),
                count,
                dims
            )));
        }
        if count > 0 && dims == 0 {
            return Err(KbError::Corrupt(
                "index declares vectors with zero dimensions".to_string(),
            ));
        }

        let dims = if count == 0 { 0 } else { dims };
        Ok(Self {
            dims,
            data: blob_to_vec(body),
        })
    }
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.position.cmp(&b.position))
}
