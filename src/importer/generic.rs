//! The one concrete [`Importer`] this crate ships (spec.md §4.3, §9's "generic"
//! variant of the closed importer set).
//!
//! Grounded on `examples/original_source/platformdrmgeneric.cpp`'s
//! `DrmGenericImporter::ImportBuffer`: prime-fd-import each plane's dmabuf fd
//! into a GEM handle, decide whether the format needs `ADDFB2WithModifiers`
//! (spec.md §4.3's Intel Y-tiled NV12 case), and fail cleanly with no leaked
//! handles if any step fails.

use tracing::debug;

use crate::backend::allocator::dmabuf::Dmabuf;
use crate::device::api::{FramebufferDescriptor, GemHandle, KernelDevice};
use crate::error::{Error, Result};
use crate::fbcache::FrameBufferManager;
use crate::layer::ImportedBuffer;

use super::format::{plane_count, requires_modifiers};
use super::Importer;

/// Imports dmabufs through a [`KernelDevice`]'s prime-fd-import and
/// `ADDFB2`/`ADDFB2WithModifiers` ioctls, with no platform-specific HAL
/// translation layer (spec.md §9: hisi/nvidia/minigbm variants are out of
/// scope; only the shared contract plus this one implementation is required).
///
/// Framebuffer creation is routed through a [`FrameBufferManager`] unless
/// `hwc.drm.use_framebuffer_cache` disabled it at construction, so that
/// repeated imports of the same (plane-count, gem-handle tuple) never create
/// more than one kernel framebuffer (spec.md §4.2).
pub struct GenericImporter<D: KernelDevice> {
    device: std::sync::Arc<D>,
    cache: Option<FrameBufferManager>,
}

impl<D: KernelDevice> GenericImporter<D> {
    /// Builds an importer backed by a fresh, private framebuffer cache.
    pub fn new(device: std::sync::Arc<D>) -> Self {
        GenericImporter {
            device,
            cache: Some(FrameBufferManager::new()),
        }
    }

    /// Builds an importer that calls `ADDFB2`/`RMFB` directly on every
    /// import/release, for `hwc.drm.use_framebuffer_cache=0`.
    pub fn without_cache(device: std::sync::Arc<D>) -> Self {
        GenericImporter { device, cache: None }
    }
}

impl<D: KernelDevice> Importer for GenericImporter<D> {
    /// `ImportBuffer`: one `prime_fd_to_handle` per distinct dmabuf plane fd,
    /// then a single `ADDFB2`. On any failure, every gem handle already
    /// imported this call is closed before returning (spec.md §4.3 "Failure
    /// policy").
    fn import_buffer(&self, dmabuf: &Dmabuf) -> Result<ImportedBuffer> {
        let format = dmabuf.format();
        let num_planes = plane_count(format.code).min(dmabuf.handles().len()).max(1);

        let mut gem_handles = [0 as GemHandle; 4];
        let mut pitches = [0u32; 4];
        let mut offsets = [0u32; 4];

        for i in 0..num_planes {
            let fd = dmabuf.handles()[i];
            match self.device.prime_fd_to_handle(fd) {
                Ok(handle) => gem_handles[i] = handle,
                Err(err) => {
                    close_handles(&*self.device, &gem_handles[..i]);
                    return Err(Error::ImportFailed(format!("prime_fd_to_handle failed: {err}")));
                }
            }
            pitches[i] = dmabuf.strides()[i];
            offsets[i] = dmabuf.offsets()[i];
        }

        // Multi-plane YUV formats with a single backing fd (e.g. minigbm
        // YVU420_ANDROID) share one gem handle across every plane
        // (spec.md §4.3).
        if dmabuf.handles().len() == 1 && num_planes > 1 {
            for handle in gem_handles.iter_mut().take(num_planes).skip(1) {
                *handle = gem_handles[0];
            }
        }

        let tiled = dmabuf.has_modifier() && requires_modifiers(format.modifier);
        let desc = FramebufferDescriptor {
            width: dmabuf.width(),
            height: dmabuf.height(),
            format: format.code,
            num_planes,
            gem_handles,
            pitches,
            offsets,
            modifiers: tiled.then_some([format.modifier.into(); 4]),
        };

        let fb_id = match &self.cache {
            Some(cache) => {
                cache.register(desc.clone());
                match cache.find_or_create(&*self.device, num_planes, gem_handles) {
                    Ok(id) => id,
                    Err(err) => {
                        close_handles(&*self.device, &gem_handles[..num_planes]);
                        return Err(Error::ImportFailed(format!("ADDFB2 failed: {err}")));
                    }
                }
            }
            None => match self.device.add_framebuffer(&desc) {
                Ok(id) => id,
                Err(err) => {
                    close_handles(&*self.device, &gem_handles[..num_planes]);
                    return Err(Error::ImportFailed(format!("ADDFB2 failed: {err}")));
                }
            },
        };

        debug!(fb_id, num_planes, "imported buffer");
        Ok(ImportedBuffer {
            width: dmabuf.width(),
            height: dmabuf.height(),
            format: Some(format.code),
            pitches,
            offsets,
            gem_handles,
            num_planes,
            fb_id,
        })
    }

    /// `ReleaseBuffer`: drops this buffer's reference to its cached fb (or
    /// `RMFB`s directly with the cache disabled), then `GEM_CLOSE`s every
    /// distinct handle.
    fn release_buffer(&self, bo: ImportedBuffer) -> Result<()> {
        match &self.cache {
            Some(cache) => cache.remove(&*self.device, bo.num_planes, bo.gem_handles),
            None => {
                if bo.fb_id != 0 {
                    let _ = self.device.remove_framebuffer(bo.fb_id);
                }
            }
        }
        close_handles(&*self.device, &bo.gem_handles[..bo.num_planes]);
        Ok(())
    }

    fn can_import_buffer(&self, dmabuf: &Dmabuf) -> bool {
        !dmabuf.handles().is_empty()
    }
}

/// Closes every distinct gem handle in `handles` (a shared handle, common for
/// multi-plane YUV, must only be closed once).
fn close_handles<D: KernelDevice + ?Sized>(device: &D, handles: &[GemHandle]) {
    let mut closed = Vec::new();
    for &handle in handles {
        if handle == 0 || closed.contains(&handle) {
            continue;
        }
        let _ = device.gem_close(handle);
        closed.push(handle);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::real::fake::FakeDevice;

    fn dmabuf(width: u32, height: u32, fourcc: drm_fourcc::DrmFourcc, fds: &[i32]) -> Dmabuf {
        use crate::backend::allocator::{Buffer as _, Format};
        struct Src(u32, u32, drm_fourcc::DrmFourcc);
        impl Buffer for Src {
            fn width(&self) -> u32 {
                self.0
            }
            fn height(&self) -> u32 {
                self.1
            }
            fn format(&self) -> Format {
                Format {
                    code: self.2,
                    modifier: drm_fourcc::DrmModifier::Linear,
                }
            }
        }
        let src = Src(width, height, fourcc);
        let strides = vec![width * 4; fds.len()];
        let offsets = vec![0u32; fds.len()];
        Dmabuf::new(&src, fds.len(), &offsets, &strides, fds).unwrap()
    }

    #[test]
    fn import_buffer_creates_one_framebuffer() {
        let device = std::sync::Arc::new(FakeDevice::single_internal_display());
        let importer = GenericImporter::new(device);
        let buf = dmabuf(1920, 1080, drm_fourcc::DrmFourcc::Xrgb8888, &[3]);
        let imported = importer.import_buffer(&buf).unwrap();
        assert_ne!(imported.fb_id, 0);
        assert_eq!(imported.num_planes, 1);
    }

    #[test]
    fn release_buffer_does_not_panic_on_zero_fb() {
        let device = std::sync::Arc::new(FakeDevice::single_internal_display());
        let importer = GenericImporter::new(device);
        importer
            .release_buffer(ImportedBuffer::default())
            .unwrap();
    }

    #[test]
    fn can_import_buffer_accepts_a_populated_dmabuf() {
        let device = std::sync::Arc::new(FakeDevice::single_internal_display());
        let importer = GenericImporter::new(device);
        let buf = dmabuf(1, 1, drm_fourcc::DrmFourcc::Xrgb8888, &[3]);
        assert!(importer.can_import_buffer(&buf));
    }

    #[test]
    fn repeated_import_of_the_same_dmabuf_reuses_the_cached_framebuffer() {
        let device = std::sync::Arc::new(FakeDevice::single_internal_display());
        let importer = GenericImporter::new(device);
        let buf = dmabuf(1920, 1080, drm_fourcc::DrmFourcc::Xrgb8888, &[3]);
        let a = importer.import_buffer(&buf).unwrap();
        let b = importer.import_buffer(&buf).unwrap();
        assert_eq!(a.fb_id, b.fb_id, "same gem handle tuple must not get two framebuffers");
    }

    #[test]
    fn without_cache_creates_a_fresh_framebuffer_every_import() {
        let device = std::sync::Arc::new(FakeDevice::single_internal_display());
        let importer = GenericImporter::without_cache(device);
        let buf = dmabuf(1920, 1080, drm_fourcc::DrmFourcc::Xrgb8888, &[3]);
        let a = importer.import_buffer(&buf).unwrap();
        let b = importer.import_buffer(&buf).unwrap();
        assert_ne!(a.fb_id, b.fb_id);
    }
}
