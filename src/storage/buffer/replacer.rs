use std::fmt::Debug;

pub type FrameId = u32;

/// Eviction policy over buffer frames. Only unpinned frames are ever
/// candidates; the pool reports pin transitions through `pin`/`unpin`.
pub trait Replacer: Send + Sync + Debug {
    /// Pick a frame to evict, removing it from the candidate set.
    /// `None` means every frame is pinned.
    fn evict(&mut self) -> Option<FrameId>;

    /// A frame gained its first pin and leaves the candidate set.
    fn pin(&mut self, frame_id: FrameId);

    /// A frame dropped its last pin and becomes a candidate.
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn evictable(&self) -> usize;
}
