//! Content-addressed framebuffer cache (spec.md §4.2).
//!
//! Grounded directly on `examples/original_source/common/core/framebuffermanager.cpp`:
//! entries are keyed by (plane count, gem handle tuple), reference-counted, and
//! the kernel `ADDFB2` call is made lazily on first use rather than at
//! registration time.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::device::api::{FbId, FramebufferDescriptor, GemHandle, KernelDevice};
use crate::error::Result;

/// Key = plane count plus up to four GEM handles, matching
/// `FBKey(num_planes, gem_handles)` in the original source (hash on
/// `gem_handles[0]`, equality compares all four — expressed here as a plain
/// `Eq`/`Hash` derive over the full tuple, which is equivalent and simpler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FbKey {
    num_planes: usize,
    gem_handles: [GemHandle; 4],
}

impl FbKey {
    fn new(num_planes: usize, gem_handles: [GemHandle; 4]) -> Self {
        FbKey { num_planes, gem_handles }
    }
}

struct Entry {
    fb_id: FbId,
    ref_count: u32,
    created: bool,
    desc: FramebufferDescriptor,
}

/// Stats exposed for diagnostics (SPEC_FULL.md §5 addition).
#[derive(Debug, Clone, Copy, Default)]
pub struct FbCacheStats {
    pub entries: usize,
    pub created: usize,
}

/// `FrameBufferManager`: content-addressed, refcounted kernel framebuffer cache.
pub struct FrameBufferManager {
    entries: Mutex<HashMap<FbKey, Entry>>,
}

impl FrameBufferManager {
    pub fn new() -> Self {
        FrameBufferManager {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `Register`: if the key is present, bump its ref count; otherwise insert
    /// with ref=1, created=false (no `ADDFB2` yet).
    pub fn register(&self, desc: FramebufferDescriptor) {
        let key = FbKey::new(desc.num_planes, desc.gem_handles);
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&key) {
            entry.ref_count += 1;
        } else {
            entries.insert(
                key,
                Entry {
                    fb_id: 0,
                    ref_count: 1,
                    created: false,
                    desc,
                },
            );
        }
    }

    /// `FindOrCreate`: looks up the key; lazily creates the kernel framebuffer on
    /// first use. Returns `0` if the key was never `register`ed (caller bug, per
    /// the original source).
    pub fn find_or_create(
        &self,
        device: &dyn KernelDevice,
        num_planes: usize,
        gem_handles: [GemHandle; 4],
    ) -> Result<FbId> {
        let key = FbKey::new(num_planes, gem_handles);
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(&key) else {
            warn!(?gem_handles, "find_or_create on an unregistered gem handle set");
            return Ok(0);
        };

        if !entry.created {
            let fb_id = device.add_framebuffer(&entry.desc)?;
            entry.fb_id = fb_id;
            entry.created = true;
            debug!(fb_id, "created framebuffer");
        }
        Ok(entry.fb_id)
    }

    /// `Remove`: decrement the ref count; at zero, destroy the kernel
    /// framebuffer and erase the entry. Missing keys are logged, not errored.
    pub fn remove(&self, device: &dyn KernelDevice, num_planes: usize, gem_handles: [GemHandle; 4]) {
        let key = FbKey::new(num_planes, gem_handles);
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(&key) else {
            if gem_handles.iter().any(|h| *h != 0) {
                warn!(?gem_handles, "remove on an unregistered gem handle set");
            }
            return;
        };

        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count == 0 {
            let created = entry.created;
            let fb_id = entry.fb_id;
            entries.remove(&key);
            if created {
                let _ = device.remove_framebuffer(fb_id);
            }
        }
    }

    /// `PurgeAll`: releases every outstanding framebuffer and clears the cache.
    pub fn purge_all(&self, device: &dyn KernelDevice) {
        let mut entries = self.entries.lock().unwrap();
        for (_, entry) in entries.drain() {
            if entry.created {
                let _ = device.remove_framebuffer(entry.fb_id);
            }
        }
    }

    pub fn stats(&self) -> FbCacheStats {
        let entries = self.entries.lock().unwrap();
        FbCacheStats {
            entries: entries.len(),
            created: entries.values().filter(|e| e.created).count(),
        }
    }
}

impl Default for FrameBufferManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::real::fake::FakeDevice;
    use drm_fourcc::DrmFourcc;

    fn desc(handles: [GemHandle; 4]) -> FramebufferDescriptor {
        FramebufferDescriptor {
            width: 1920,
            height: 1080,
            format: DrmFourcc::Xrgb8888,
            num_planes: 1,
            gem_handles: handles,
            pitches: [7680, 0, 0, 0],
            offsets: [0, 0, 0, 0],
            modifiers: None,
        }
    }

    #[test]
    fn find_or_create_never_duplicates_a_framebuffer() {
        let device = FakeDevice::single_internal_display();
        let cache = FrameBufferManager::new();
        let handles = [42, 0, 0, 0];

        cache.register(desc(handles));
        cache.register(desc(handles));

        let a = cache.find_or_create(&device, 1, handles).unwrap();
        let b = cache.find_or_create(&device, 1, handles).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.stats().created, 1);
    }

    #[test]
    fn remove_on_unknown_handle_does_not_panic() {
        let device = FakeDevice::single_internal_display();
        let cache = FrameBufferManager::new();
        cache.remove(&device, 1, [99, 0, 0, 0]);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn refcount_reaches_zero_and_erases_entry() {
        let device = FakeDevice::single_internal_display();
        let cache = FrameBufferManager::new();
        let handles = [7, 0, 0, 0];

        cache.register(desc(handles));
        cache.register(desc(handles));
        cache.find_or_create(&device, 1, handles).unwrap();

        cache.remove(&device, 1, handles);
        assert_eq!(cache.stats().entries, 1);
        cache.remove(&device, 1, handles);
        assert_eq!(cache.stats().entries, 0);
    }
}
