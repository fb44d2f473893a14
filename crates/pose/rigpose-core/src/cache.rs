//! Memoized deformation results.
//!
//! Entries are keyed by the frame, the skeleton and keyframe-source content
//! hashes, the requested bones, the IK switch and the pass.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::scheduler::{DeformRequest, Deltas};
use crate::skeleton::{DeformPass, Skeleton};

/// Identity of one deformation request.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct PoseKey {
    frame_bits: u32,
    skeleton_hash: u64,
    source_hash: u64,
    bones: Vec<String>,
    calc_ik: bool,
    pass: DeformPass,
}

impl PoseKey {
    pub fn new(skeleton: &Skeleton, source_hash: u64, request: &DeformRequest<'_>) -> Self {
        Self {
            frame_bits: request.frame.to_bits(),
            skeleton_hash: skeleton.content_hash(),
            source_hash,
            bones: request.bones.iter().map(|b| b.to_string()).collect(),
            calc_ik: request.calc_ik,
            pass: request.pass,
        }
    }
}

/// LRU of resolved deltas, handed out as shared `Arc`s.
pub struct PoseCache {
    entries: LruCache<PoseKey, Arc<Deltas>>,
    hits: u64,
    misses: u64,
}

impl PoseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &PoseKey) -> Option<Arc<Deltas>> {
        match self.entries.get(key) {
            Some(deltas) => {
                self.hits += 1;
                Some(Arc::clone(deltas))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: PoseKey, deltas: Arc<Deltas>) {
        self.entries.put(key, deltas);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

impl std::fmt::Debug for PoseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.entries.cap())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}
