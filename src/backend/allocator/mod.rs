//! Buffer and format types describing a client's already-allocated GEM/dmabuf
//! buffer (spec.md §4.3), the only slice of Smithay's allocator backend this
//! core still needs — the GBM/EGLStream/Vulkan allocators it sits alongside
//! belong to the renderer stack this spec treats as an external collaborator.

pub mod dmabuf;

pub use drm_fourcc::{
    DrmFormat as Format, DrmFourcc as Fourcc, DrmModifier as Modifier, DrmVendor as Vendor,
    UnrecognizedFourcc, UnrecognizedVendor,
};

/// A buffer with a known size and pixel format.
pub trait Buffer {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
    fn format(&self) -> Format;
}
