//! In-memory block index and the active chain.

use std::sync::Arc;

use emberd_consensus::Hash256;

/// Metadata kept per connected block. Entries form a tree through `prev`;
/// `skip` points far back along the same branch so ancestor lookups are
/// logarithmic.
#[derive(Clone, Debug)]
pub struct BlockIndex {
    pub height: i32,
    pub time: u32,
    pub hash: Hash256,
    /// Scrambler mixed into every kernel hash built on top of this block.
    pub stake_modifier: Hash256,
    pub proof_of_stake: bool,
    prev: Option<Arc<BlockIndex>>,
    skip: Option<Arc<BlockIndex>>,
}

impl BlockIndex {
    pub fn genesis(hash: Hash256, time: u32) -> Arc<Self> {
        Arc::new(Self {
            height: 0,
            time,
            hash,
            stake_modifier: [0u8; 32],
            proof_of_stake: false,
            prev: None,
            skip: None,
        })
    }

    pub fn new_child(
        prev: &Arc<BlockIndex>,
        hash: Hash256,
        time: u32,
        stake_modifier: Hash256,
        proof_of_stake: bool,
    ) -> Arc<Self> {
        let height = prev.height + 1;
        let skip = ancestor_arc(prev, skip_height(height));
        Arc::new(Self {
            height,
            time,
            hash,
            stake_modifier,
            proof_of_stake,
            prev: Some(Arc::clone(prev)),
            skip,
        })
    }

    pub fn prev(&self) -> Option<&Arc<BlockIndex>> {
        self.prev.as_ref()
    }

    /// The ancestor of this block at `height`, or `None` when `height` is
    /// outside `[0, self.height]`.
    pub fn ancestor(&self, height: i32) -> Option<&BlockIndex> {
        if height < 0 || height > self.height {
            return None;
        }

        let mut walk: &BlockIndex = self;
        while walk.height > height {
            walk = match next_step(walk, height) {
                Step::Skip => walk.skip.as_deref()?,
                Step::Prev => walk.prev.as_deref()?,
            };
        }
        Some(walk)
    }
}

enum Step {
    Skip,
    Prev,
}

fn next_step(walk: &BlockIndex, height: i32) -> Step {
    let height_skip = skip_height(walk.height);
    let height_skip_prev = skip_height(walk.height - 1);
    let use_skip = walk.skip.is_some()
        && (height_skip == height
            || (height_skip > height
                && !(height_skip_prev < height_skip - 2 && height_skip_prev >= height)));
    if use_skip {
        Step::Skip
    } else {
        Step::Prev
    }
}

fn ancestor_arc(start: &Arc<BlockIndex>, height: i32) -> Option<Arc<BlockIndex>> {
    if height < 0 || height > start.height {
        return None;
    }

    let mut walk = Arc::clone(start);
    while walk.height > height {
        let next = match next_step(&walk, height) {
            Step::Skip => walk.skip.clone()?,
            Step::Prev => walk.prev.clone()?,
        };
        walk = next;
    }
    Some(walk)
}

fn invert_lowest_one(value: i32) -> i32 {
    value & (value - 1)
}

/// Height the skip pointer of a block at `height` lands on.
fn skip_height(height: i32) -> i32 {
    if height < 2 {
        return 0;
    }
    if height & 1 == 1 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

/// The active branch, indexable by height.
#[derive(Default)]
pub struct Chain {
    blocks: Vec<Arc<BlockIndex>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active branch with the one ending at `tip`.
    pub fn set_tip(&mut self, tip: Arc<BlockIndex>) {
        let mut branch = Vec::with_capacity(tip.height as usize + 1);
        let mut walk = Some(tip);
        while let Some(index) = walk {
            walk = index.prev().cloned();
            branch.push(index);
        }
        branch.reverse();
        self.blocks = branch;
    }

    pub fn get(&self, height: i32) -> Option<&Arc<BlockIndex>> {
        if height < 0 {
            return None;
        }
        self.blocks.get(height as usize)
    }

    pub fn tip(&self) -> Option<&Arc<BlockIndex>> {
        self.blocks.last()
    }

    pub fn height(&self) -> i32 {
        self.blocks.len() as i32 - 1
    }

    pub fn contains(&self, index: &BlockIndex) -> bool {
        self.get(index.height)
            .map(|entry| entry.hash == index.hash)
            .unwrap_or(false)
    }
}
