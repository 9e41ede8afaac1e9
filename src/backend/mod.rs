//! Buffer types shared with the rest of the crate.
//!
//! Only the `allocator` module (the `Dmabuf`/`Format` types describing a
//! client's already-allocated buffer, per spec.md §4.3) survives from the
//! original windowing-backend tree; the render/input/session backends it
//! used to sit alongside are not part of this compositor core.

pub mod allocator;
