use std::sync::OnceLock;

use sha2::{Digest, Sha256};

use crate::error::CommpError;
use crate::fr32::{PADDED_QUAD, UNPADDED_QUAD, pad_quad, padded_size};

pub const NODE_SIZE: usize = 32;
/// Smallest payload a standalone leaf may commit to.
pub const MIN_PAYLOAD: usize = 65;

const ZERO_LEVELS: usize = 64;

/// A 32-byte Merkle node or root.
pub type Commitment = [u8; NODE_SIZE];

/// sha2-256-trunc254-padded: SHA-256 of both children with the two top bits cleared.
pub fn hash_pair(left: &Commitment, right: &Commitment) -> Commitment {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out: Commitment = hasher.finalize().into();
    out[31] &= 0x3f;
    out
}

/// Root of an all-zero subtree of height `level` (level 0 is a single zero node).
pub fn zero_commitment(level: usize) -> Commitment {
    static TABLE: OnceLock<[Commitment; ZERO_LEVELS]> = OnceLock::new();

    let table = TABLE.get_or_init(|| {
        let mut table = [[0u8; NODE_SIZE]; ZERO_LEVELS];
        for i in 1..ZERO_LEVELS {
            table[i] = hash_pair(&table[i - 1], &table[i - 1]);
        }
        table
    });
    table[level.min(ZERO_LEVELS - 1)]
}

/// Height of the tree over `padded` bytes.
pub fn level_of(padded: u64) -> usize {
    (padded / NODE_SIZE as u64).trailing_zeros() as usize
}

/// Reduce a layer of nodes at height `level` to a single root. Odd layers are completed with the
/// zero subtree of that height, which is the same as zero-padding to a power of two.
pub fn merkle_root(mut layer: Vec<Commitment>, mut level: usize) -> Option<Commitment> {
    if layer.is_empty() {
        return None;
    }
    while layer.len() > 1 {
        if layer.len() % 2 == 1 {
            layer.push(zero_commitment(level));
        }
        layer = layer
            .chunks_exact(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
        level += 1;
    }
    layer.pop()
}

/// Commitment over a single leaf of unpadded payload bytes, with the padded size it covers.
pub fn leaf_commitment(data: &[u8]) -> Result<(Commitment, u64), CommpError> {
    if data.len() < MIN_PAYLOAD {
        return Err(CommpError::PayloadTooSmall {
            size: data.len(),
            min: MIN_PAYLOAD,
        });
    }

    let quads = data.len().div_ceil(UNPADDED_QUAD);
    let mut nodes = Vec::with_capacity(quads * PADDED_QUAD / NODE_SIZE);
    let mut quad_in = [0u8; UNPADDED_QUAD];
    let mut quad_out = [0u8; PADDED_QUAD];

    for chunk in data.chunks(UNPADDED_QUAD) {
        let input: &[u8] = if chunk.len() == UNPADDED_QUAD {
            chunk
        } else {
            quad_in = [0u8; UNPADDED_QUAD];
            quad_in[..chunk.len()].copy_from_slice(chunk);
            &quad_in
        };
        pad_quad(input, &mut quad_out);
        for node in quad_out.chunks_exact(NODE_SIZE) {
            let mut n = [0u8; NODE_SIZE];
            n.copy_from_slice(node);
            nodes.push(n);
        }
    }

    let padded = padded_size(data.len() as u64).next_power_of_two();
    let root = merkle_root(nodes, 0).ok_or(CommpError::NoLeaves)?;
    Ok((root, padded))
}
