use std::collections::VecDeque;

use thiserror::Error;

use super::{BlockHash, BlockRef, ChainId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor expected block {expected} but was handed {received}")]
    NonContiguous { expected: u64, received: u64 },
}

/// Per-chain scan position plus the bounded hash history used to locate a
/// fork point after a reorg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    chain: ChainId,
    next_height: u64,
    recent: VecDeque<BlockRef>,
    capacity: usize,
}

impl Cursor {
    /// A cursor that has not processed anything yet.
    pub fn starting_at(chain: ChainId, start_height: u64, capacity: usize) -> Self {
        Self {
            chain,
            next_height: start_height,
            recent: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Rebuilds a persisted cursor. `recent` must be ascending; entries beyond
    /// `capacity` are dropped from the old end.
    pub fn restore(
        chain: ChainId,
        next_height: u64,
        recent: impl IntoIterator<Item = BlockRef>,
        capacity: usize,
    ) -> Self {
        let mut cursor = Self {
            chain,
            next_height,
            recent: recent
                .into_iter()
                .filter(|entry| entry.height < next_height)
                .collect(),
            capacity: capacity.max(1),
        };
        cursor.trim();
        cursor
    }

    pub fn chain(&self) -> &ChainId {
        &self.chain
    }

    /// Height of the next block to scan.
    pub fn next_height(&self) -> u64 {
        self.next_height
    }

    /// Last processed block, if any is remembered.
    pub fn tip(&self) -> Option<&BlockRef> {
        self.recent.back()
    }

    pub fn height(&self) -> Option<u64> {
        self.tip().map(|tip| tip.height)
    }

    pub fn hash(&self) -> Option<&BlockHash> {
        self.tip().map(|tip| &tip.hash)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn recent(&self) -> impl DoubleEndedIterator<Item = &BlockRef> {
        self.recent.iter()
    }

    pub fn hash_at(&self, height: u64) -> Option<&BlockHash> {
        self.recent
            .iter()
            .rev()
            .find(|entry| entry.height == height)
            .map(|entry| &entry.hash)
    }

    pub fn advance(&mut self, block: BlockRef) -> Result<(), CursorError> {
        if block.height != self.next_height {
            return Err(CursorError::NonContiguous {
                expected: self.next_height,
                received: block.height,
            });
        }
        self.next_height = block.height + 1;
        self.recent.push_back(block);
        self.trim();
        Ok(())
    }

    /// Forgets every block at or above `first_invalid`; scanning resumes
    /// there.
    pub fn rewind_to(&mut self, first_invalid: u64) {
        while self
            .recent
            .back()
            .is_some_and(|entry| entry.height >= first_invalid)
        {
            self.recent.pop_back();
        }
        self.next_height = first_invalid.min(self.next_height);
    }

    fn trim(&mut self) {
        while self.recent.len() > self.capacity {
            self.recent.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(height: u64) -> BlockRef {
        BlockRef {
            height,
            hash: BlockHash::parse(&format!("0x{:064x}", height)).unwrap(),
        }
    }

    fn chain() -> ChainId {
        ChainId::parse("ethereum").unwrap()
    }

    #[test]
    fn advance_requires_contiguous_heights() {
        let mut cursor = Cursor::starting_at(chain(), 10, 4);
        assert_eq!(cursor.height(), None);
        cursor.advance(block(10)).unwrap();
        assert_eq!(
            cursor.advance(block(12)),
            Err(CursorError::NonContiguous {
                expected: 11,
                received: 12
            })
        );
        assert_eq!(cursor.height(), Some(10));
        assert_eq!(cursor.next_height(), 11);
    }

    #[test]
    fn history_is_bounded() {
        let mut cursor = Cursor::starting_at(chain(), 0, 3);
        for height in 0..10 {
            cursor.advance(block(height)).unwrap();
        }
        let heights: Vec<u64> = cursor.recent().map(|entry| entry.height).collect();
        assert_eq!(heights, vec![7, 8, 9]);
        assert!(cursor.hash_at(6).is_none());
        assert_eq!(cursor.hash_at(8), Some(&block(8).hash));
    }

    #[test]
    fn rewind_drops_invalid_tail() {
        let mut cursor = Cursor::starting_at(chain(), 100, 8);
        for height in 100..106 {
            cursor.advance(block(height)).unwrap();
        }
        cursor.rewind_to(101);
        assert_eq!(cursor.height(), Some(100));
        assert_eq!(cursor.next_height(), 101);
        cursor.advance(block(101)).unwrap();
    }

    #[test]
    fn restore_discards_entries_past_next_height() {
        let cursor = Cursor::restore(chain(), 3, (0..6).map(block), 2);
        let heights: Vec<u64> = cursor.recent().map(|entry| entry.height).collect();
        assert_eq!(heights, vec![1, 2]);
        assert_eq!(cursor.next_height(), 3);
    }
}
