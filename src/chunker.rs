//! Streaming chunk splitter (§4.2).
//!
//! Splits an input stream into fixed-size chunks sized by the content's
//! [`Policy`](crate::types::Policy), padding only the final chunk. Holds at
//! most one chunk buffer plus whatever the caller's `Read` already buffers —
//! the whole content is never materialized in memory.

use crate::types::Policy;
use std::io::{self, Read};

/// A single chunk ready for encoding, with its logical index and the amount
/// of zero-padding appended to reach `policy.chunk_size` (0 for every chunk
/// but the last).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: u32,
    pub data: Vec<u8>,
    pub padding: usize,
}

impl Chunk {
    /// Strip the padding back off, returning the original payload bytes.
    pub fn unpadded(&self) -> &[u8] {
        &self.data[..self.data.len() - self.padding]
    }
}

/// Pulls fixed-size chunks off a `Read` source one at a time.
pub struct Chunker<R> {
    source: R,
    chunk_size: usize,
    next_index: u32,
    done: bool,
}

impl<R: Read> Chunker<R> {
    pub fn new(source: R, policy: &Policy) -> Self {
        Self {
            source,
            chunk_size: policy.chunk_size as usize,
            next_index: 0,
            done: false,
        }
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            match self.source.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(e)),
            }
        }

        if filled == 0 {
            self.done = true;
            if self.next_index > 0 {
                return None;
            }
            // Empty content still yields one fully-padded chunk so a
            // zero-byte content has a well-defined chunk/shard layout.
        }

        let padding = self.chunk_size - filled;
        buf[filled..].fill(0);
        self.done = filled < self.chunk_size;

        let chunk = Chunk {
            index: self.next_index,
            data: buf,
            padding,
        };
        self.next_index += 1;
        Some(Ok(chunk))
    }
}

/// Number of chunks a content of `byte_length` bytes splits into under `policy`.
pub fn chunk_count(policy: &Policy, byte_length: u64) -> u32 {
    if byte_length == 0 {
        return 1;
    }
    let chunk_size = policy.chunk_size as u64;
    ((byte_length + chunk_size - 1) / chunk_size) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_exact_multiple_with_no_padding() {
        let policy = Policy::new(4, 2, 8).unwrap();
        let data = (0u8..24).collect::<Vec<_>>();
        let chunks: Vec<Chunk> = Chunker::new(&data[..], &policy)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert_eq!(c.padding, 0);
        }
        assert_eq!(chunks[2].data, &data[16..24]);
    }

    #[test]
    fn final_chunk_is_padded_to_chunk_size() {
        let policy = Policy::new(4, 2, 8).unwrap();
        let data = (0u8..20).collect::<Vec<_>>();
        let chunks: Vec<Chunk> = Chunker::new(&data[..], &policy)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].padding, 4);
        assert_eq!(chunks[2].data.len(), 8);
        assert_eq!(chunks[2].unpadded(), &data[16..20]);
    }

    #[test]
    fn empty_input_yields_one_fully_padded_chunk() {
        let policy = Policy::new(4, 2, 8).unwrap();
        let chunks: Vec<Chunk> = Chunker::new(&[][..], &policy)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].padding, 8);
        assert!(chunks[0].unpadded().is_empty());
    }

    #[test]
    fn chunk_count_matches_iterator_output() {
        let policy = Policy::new(4, 2, 8).unwrap();
        assert_eq!(chunk_count(&policy, 24), 3);
        assert_eq!(chunk_count(&policy, 20), 3);
        assert_eq!(chunk_count(&policy, 0), 1);
    }
}
