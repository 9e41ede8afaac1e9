//! The external GPU pre-composition contract (spec.md §1, §3, §4.6 step 1).
//!
//! Grounded on `examples/original_source/glworker.h`'s `GLWorkerCompositor`:
//! a renderer that blends N source layers into one destination framebuffer.
//! The EGL/GLES implementation itself is an external collaborator this core
//! never constructs (spec.md §1 Non-goals); what lives here is the contract
//! [`DrmDisplayCompositor`](crate::compositor::DrmDisplayCompositor) calls
//! into, plus the ring of framebuffers it cycles through.

use crate::composition::PrecompRegion;
use crate::error::Result;
use crate::layer::DrmHwcLayer;

/// One pre-composited result: the real kernel framebuffer id the regions
/// were rendered into (`GLWorkerCompositor::Composite`'s output buffer),
/// ready to be bound straight to a plane.
#[derive(Debug, Clone, Copy)]
pub struct PrecompOutput {
    pub fb_id: u32,
}

/// `GLWorkerCompositor::Composite`/`CompositeAndFinish`: blends every layer
/// named by `regions` into a `width`x`height` framebuffer and returns its
/// fb id. Implementations own their own backing-buffer allocation and
/// import, the same way `DrmFramebuffer::Allocate` does ahead of the
/// original's `Composite` call.
pub trait PreCompositor: Send + Sync {
    fn composite(
        &self,
        layers: &[DrmHwcLayer],
        regions: &[PrecompRegion],
        width: u32,
        height: u32,
    ) -> Result<PrecompOutput>;
}

#[cfg(test)]
pub mod fake {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records every call and fabricates a monotonically increasing fb id,
    /// standing in for a real GL renderer's allocate-and-blend cycle in
    /// tests that never touch a GPU — the same fake-trait-seam pattern as
    /// [`crate::device::real::fake::FakeDevice`].
    #[derive(Default)]
    pub struct FakePreCompositor {
        next_fb_id: AtomicU32,
        pub calls: Mutex<Vec<(usize, u32, u32)>>,
    }

    impl PreCompositor for FakePreCompositor {
        fn composite(
            &self,
            _layers: &[DrmHwcLayer],
            regions: &[PrecompRegion],
            width: u32,
            height: u32,
        ) -> Result<PrecompOutput> {
            self.calls.lock().unwrap().push((regions.len(), width, height));
            let fb_id = 9000 + self.next_fb_id.fetch_add(1, Ordering::SeqCst);
            Ok(PrecompOutput { fb_id })
        }
    }
}
