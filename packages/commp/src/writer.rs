use std::io::{self, Read, Write};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;
use tracing::debug;

use crate::error::CommpError;
use crate::fr32::unpadded_size;
use crate::piece_cid::PieceCid;
use crate::tree::{Commitment, leaf_commitment, level_of, merkle_root, zero_commitment};

/// Padded size of one leaf hashed independently: 8 MiB.
pub const DEFAULT_PADDED_LEAF_SIZE: u64 = 8 << 20;
/// Largest piece a 32 GiB sector can hold.
pub const MAX_PIECE_SIZE: u64 = 32 << 30;

/// How many leaves went into the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeafSummary {
    pub real: usize,
    /// Zero-leaf commitments appended to reach a power of two.
    pub filler: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PieceInfo {
    /// Bytes consumed from the input.
    pub payload_size: u64,
    /// Padded, power-of-two piece size.
    pub piece_size: u64,
    pub piece_cid: PieceCid,
    pub leaves: LeafSummary,
}

type LeafSlot = Receiver<Result<Commitment, CommpError>>;

/// Returns its permit to the pool when the hashing thread ends, even by panic.
struct Permit(Sender<()>);

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Streaming piece-commitment writer.
///
/// Full leaves are hashed on background threads, at most `parallelism` at a time. Each leaf
/// gets its own result slot at submission so the aggregate follows input order regardless of
/// which hasher finishes first.
pub struct CommpWriter {
    padded_leaf: u64,
    unpadded_leaf: usize,
    buf: Vec<u8>,
    payload_size: u64,
    slots: Vec<LeafSlot>,
    permit_tx: Sender<()>,
    permit_rx: Receiver<()>,
}

impl CommpWriter {
    pub fn new(parallelism: usize) -> Result<Self, CommpError> {
        Self::with_leaf_size(DEFAULT_PADDED_LEAF_SIZE, parallelism)
    }

    pub fn with_leaf_size(padded_leaf: u64, parallelism: usize) -> Result<Self, CommpError> {
        if !padded_leaf.is_power_of_two() || padded_leaf < 128 || padded_leaf > MAX_PIECE_SIZE {
            return Err(CommpError::InvalidLeafSize(padded_leaf));
        }

        let parallelism = parallelism.max(1);
        let (permit_tx, permit_rx) = channel::bounded(parallelism);
        for _ in 0..parallelism {
            let _ = permit_tx.send(());
        }

        let unpadded_leaf = unpadded_size(padded_leaf) as usize;
        Ok(Self {
            padded_leaf,
            unpadded_leaf,
            buf: Vec::with_capacity(unpadded_leaf),
            payload_size: 0,
            slots: Vec::new(),
            permit_tx,
            permit_rx,
        })
    }

    pub fn payload_size(&self) -> u64 {
        self.payload_size
    }

    /// Hand the full buffer to a hasher. Blocks while every hashing slot is busy.
    fn submit_leaf(&mut self) -> Result<(), CommpError> {
        let leaf = std::mem::replace(&mut self.buf, Vec::with_capacity(self.unpadded_leaf));
        let index = self.slots.len();

        self.permit_rx
            .recv()
            .map_err(|_| CommpError::LeafHasher { index })?;
        let permit = Permit(self.permit_tx.clone());

        let (result_tx, result_rx) = channel::bounded(1);
        self.slots.push(result_rx);

        thread::Builder::new()
            .name(format!("commp-leaf-{index}"))
            .spawn(move || {
                let _permit = permit;
                let result = leaf_commitment(&leaf).map(|(root, _)| root);
                let _ = result_tx.send(result);
            })?;

        Ok(())
    }

    /// Wait for every leaf and fold them into the piece commitment.
    pub fn finish(mut self) -> Result<PieceInfo, CommpError> {
        let mut leaves = Vec::with_capacity(self.slots.len() + 1);
        for (index, slot) in self.slots.drain(..).enumerate() {
            let root = slot.recv().map_err(|_| CommpError::LeafHasher { index })??;
            leaves.push(root);
        }

        if !self.buf.is_empty() {
            if leaves.is_empty() {
                let (root, padded) = leaf_commitment(&self.buf)?;
                if padded < self.padded_leaf {
                    return Ok(PieceInfo {
                        payload_size: self.payload_size,
                        piece_size: padded,
                        piece_cid: PieceCid::from_commitment(&root)?,
                        leaves: LeafSummary { real: 1, filler: 0 },
                    });
                }
                leaves.push(root);
            } else {
                self.buf.resize(self.unpadded_leaf, 0);
                let (root, _) = leaf_commitment(&self.buf)?;
                leaves.push(root);
            }
        }

        if leaves.is_empty() {
            return Err(CommpError::NoLeaves);
        }

        let real = leaves.len();
        let count = real.next_power_of_two();
        let piece_size = count as u64 * self.padded_leaf;
        if piece_size > MAX_PIECE_SIZE {
            return Err(CommpError::PieceTooLarge {
                size: piece_size,
                max: MAX_PIECE_SIZE,
            });
        }

        let leaf_level = level_of(self.padded_leaf);
        leaves.resize(count, zero_commitment(leaf_level));
        let root = merkle_root(leaves, leaf_level).ok_or(CommpError::NoLeaves)?;

        debug!(
            payload_size = self.payload_size,
            piece_size,
            real_leaves = real,
            filler_leaves = count - real,
            "Aggregated piece commitment"
        );

        Ok(PieceInfo {
            payload_size: self.payload_size,
            piece_size,
            piece_cid: PieceCid::from_commitment(&root)?,
            leaves: LeafSummary {
                real,
                filler: count - real,
            },
        })
    }
}

impl Write for CommpWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut rest = data;
        while !rest.is_empty() {
            let take = (self.unpadded_leaf - self.buf.len()).min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buf.len() == self.unpadded_leaf {
                self.submit_leaf().map_err(io::Error::other)?;
            }
        }
        self.payload_size += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compute the piece commitment of everything `reader` yields, using 8 MiB leaves.
pub fn compute<R: Read>(reader: &mut R, parallelism: usize) -> Result<PieceInfo, CommpError> {
    compute_with_leaf_size(reader, DEFAULT_PADDED_LEAF_SIZE, parallelism)
}

pub fn compute_with_leaf_size<R: Read>(
    reader: &mut R,
    padded_leaf: u64,
    parallelism: usize,
) -> Result<PieceInfo, CommpError> {
    let mut writer = CommpWriter::with_leaf_size(padded_leaf, parallelism)?;
    io::copy(reader, &mut writer)?;
    writer.finish()
}
