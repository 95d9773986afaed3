//! Media state descriptors

use serde::{Deserialize, Serialize};

use crate::heap::HeapBlock;
use crate::kernel::KernelBinding;
use crate::list::{Linked, Links};
use crate::tracker::CompletionToken;

/// Handle to a media state in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaStateId(pub(crate) u32);

impl MediaStateId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Component that reserved a media state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentId {
    Codec,
    VideoProcessing,
    Compute,
    Other(u32),
}

/// Which pool list holds a media state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaStateList {
    Free,
    Reserved,
    Submitted,
}

/// Descriptor block for one GPU dispatch
#[derive(Debug, Clone, Default)]
pub struct MediaState {
    pub(crate) block: Option<HeapBlock>,
    /// Kernel allocation table, one entry per binding slot
    pub(crate) kernels: Vec<Option<KernelBinding>>,
    pub(crate) sync: Option<CompletionToken>,
    pub(crate) busy: bool,
    pub(crate) component: Option<ComponentId>,
    pub(crate) links: Links<MediaStateList>,
}

impl MediaState {
    pub(crate) fn new(block: HeapBlock, table_len: usize) -> Self {
        MediaState {
            block: Some(block),
            kernels: vec![None; table_len],
            ..MediaState::default()
        }
    }

    /// Byte offset into the general state heap
    pub fn offset(&self) -> usize {
        self.block.map_or(0, |b| b.offset)
    }

    pub fn block(&self) -> Option<HeapBlock> {
        self.block
    }

    pub fn kernels(&self) -> &[Option<KernelBinding>] {
        &self.kernels
    }

    /// Kernels currently bound, in slot order
    pub fn bound_kernels(&self) -> impl Iterator<Item = KernelBinding> + '_ {
        self.kernels.iter().flatten().copied()
    }

    pub fn sync_token(&self) -> Option<CompletionToken> {
        self.sync
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn component(&self) -> Option<ComponentId> {
        self.component
    }

    pub fn list(&self) -> Option<MediaStateList> {
        self.links.owner()
    }

    /// Forget the previous dispatch
    pub(crate) fn recycle(&mut self) {
        self.kernels.iter_mut().for_each(|slot| *slot = None);
        self.sync = None;
        self.busy = false;
        self.component = None;
    }
}

impl Linked<MediaStateList> for MediaState {
    fn links(&self) -> &Links<MediaStateList> {
        &self.links
    }

    fn links_mut(&mut self) -> &mut Links<MediaStateList> {
        &mut self.links
    }
}

/// Pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaStatePoolStats {
    pub acquired: u64,
    pub submitted: u64,
    pub recycled: u64,
    pub extensions: u64,
}
