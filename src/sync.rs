//! Fence and software sync-timeline primitives (spec.md §6 "Fences").
//!
//! `Fence` mirrors the shape of `backend::renderer::sync::SyncPoint` (an
//! optional owned fd that is polled rather than actively waited on in a
//! spin loop), adapted from an EGL sync object to a raw Linux sync_file fd.
//! `SyncTimeline` is grounded on `examples/original_source/drmdisplaycomposition.cpp`'s
//! `timeline_fd_`/`timeline_`/`timeline_current_` fields and the
//! `CreateNextTimelineFence`/`IncreaseTimelineToPoint` methods: a monotonic
//! point counter, one `sw_sync_fence_create` per frame, and increments that
//! are no-ops when the target point has already been reached.

use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::Duration;

use rustix::event::{poll, PollFd, PollFlags};

use crate::error::{Error, Result};

/// An owned fence fd (e.g. an atomic commit's `OUT_FENCE_PTR`, or a layer's
/// acquire fence). `None` is always considered already signaled, matching
/// `SyncPoint::signaled()`.
#[derive(Debug, Default)]
pub struct Fence(Option<OwnedFd>);

impl Fence {
    pub fn signaled() -> Self {
        Fence(None)
    }

    pub fn from_owned_fd(fd: OwnedFd) -> Self {
        Fence(Some(fd))
    }

    /// SAFETY: caller must guarantee `fd` is a valid, otherwise-unused fence fd.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Fence(Some(OwnedFd::from_raw_fd(fd)))
    }

    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.0.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub fn into_owned_fd(self) -> Option<OwnedFd> {
        self.0
    }

    /// Hands the fd to a caller who takes ownership of closing it (e.g. an
    /// ABI retire/release fence return value). `-1` means already-signaled.
    pub fn into_raw_fd(self) -> RawFd {
        self.0.map(|fd| fd.into_raw_fd()).unwrap_or(-1)
    }

    /// Duplicates the underlying fd so both fences can be handed to
    /// independent owners (e.g. a per-layer release fence kept by the facade
    /// while the original is consumed into a queued composition).
    pub fn try_clone(&self) -> Result<Fence> {
        let Some(fd) = self.0.as_ref() else {
            return Ok(Fence::signaled());
        };
        // SAFETY: dup(2) on a valid owned fd returns either -1 or a fresh,
        // otherwise-unowned fd.
        let dup = unsafe { libc::dup(fd.as_raw_fd()) };
        if dup < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(Fence(Some(unsafe { OwnedFd::from_raw_fd(dup) })))
    }

    /// Non-blocking poll of the fence's fd for readability, which is how the
    /// kernel signals a sync_file fence is ready.
    pub fn is_signaled(&self) -> bool {
        let Some(fd) = self.0.as_ref() else {
            return true;
        };
        let mut fds = [PollFd::new(fd, PollFlags::IN)];
        matches!(poll(&mut fds, 0), Ok(n) if n > 0)
    }

    /// Blocks until signaled or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let Some(fd) = self.0.as_ref() else {
            return Ok(());
        };
        let mut fds = [PollFd::new(fd, PollFlags::IN)];
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        match poll(&mut fds, millis) {
            Ok(0) => Err(Error::FenceTimeout),
            Ok(_) => Ok(()),
            Err(rustix::io::Errno::INTR) => Err(Error::Interrupted),
            Err(_) => Err(Error::FenceTimeout),
        }
    }
}

/// A software sync-point fence counter for a single display's pre-composition
/// and frame completion signaling (`DrmDisplayComposition::timeline_*`).
///
/// `SyncTimeline` is an inert data holder here: the actual `sw_sync` ioctl
/// calls live behind the [`SwSync`] trait so display-less unit tests can run
/// against an in-memory fake, the same pattern used for [`crate::device::api::KernelDevice`].
pub struct SyncTimeline<S: SwSync> {
    driver: S,
    point: u32,
    current: u32,
}

impl<S: SwSync> SyncTimeline<S> {
    pub fn new(driver: S) -> Result<Self> {
        Ok(SyncTimeline {
            driver,
            point: 0,
            current: 0,
        })
    }

    /// Bumps the point counter and returns a fence that signals once the
    /// timeline reaches it.
    pub fn create_next_fence(&mut self) -> Result<Fence> {
        self.point += 1;
        self.driver.fence_create(self.point)
    }

    pub fn current_point(&self) -> u32 {
        self.current
    }

    pub fn pending_point(&self) -> u32 {
        self.point
    }

    /// Only advances the timeline forward; a `point` at or behind the
    /// current value is a silent no-op (`timeline_increase <= 0` in the
    /// original).
    pub fn increase_to_point(&mut self, point: u32) -> Result<()> {
        if point <= self.current {
            return Ok(());
        }
        self.driver.timeline_inc(point - self.current)?;
        self.current = point;
        Ok(())
    }
}

/// Seam over the `sw_sync` kernel debug ioctls (`SW_SYNC_IOC_CREATE_FENCE`,
/// `SW_SYNC_IOC_INC`), which no crate in this stack wraps.
pub trait SwSync: Send {
    fn fence_create(&self, point: u32) -> Result<Fence>;
    fn timeline_inc(&self, delta: u32) -> Result<()>;
}

impl SwSync for Box<dyn SwSync> {
    fn fence_create(&self, point: u32) -> Result<Fence> {
        (**self).fence_create(point)
    }

    fn timeline_inc(&self, delta: u32) -> Result<()> {
        (**self).timeline_inc(delta)
    }
}

/// Real `sw_sync` debug-timeline driver (spec.md §6 "Sw_sync timeline"),
/// grounded on `examples/original_source/drmdisplaycomposition.cpp`'s
/// `sw_sync_timeline_create`/`sw_sync_fence_create`/`sw_sync_timeline_inc`
/// calls. No crate in this stack wraps the kernel's `sw_sync` debug ioctls
/// (`SW_SYNC_IOC_CREATE_FENCE`/`SW_SYNC_IOC_INC`), so they are issued directly
/// against the timeline fd obtained by opening `/dev/sw_sync` — each open
/// allocates a fresh timeline, matching `sw_sync_timeline_create`'s contract.
pub mod real {
    use std::ffi::CString;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    use crate::error::{Error, Result};

    use super::{Fence, SwSync};

    const SW_SYNC_IOC_MAGIC: u32 = b'W' as u32;

    #[repr(C)]
    struct SwSyncCreateFenceData {
        value: u32,
        name: [libc::c_char; 32],
        fence: i32,
    }

    const fn ioc(dir: u32, ty: u32, nr: u32, size: u32) -> libc::c_ulong {
        (((dir as u64) << 30) | ((ty as u64) << 8) | (nr as u64) | ((size as u64) << 16)) as libc::c_ulong
    }

    const IOC_WRITE: u32 = 1;
    const IOC_READ: u32 = 2;

    fn ioc_create_fence() -> libc::c_ulong {
        ioc(
            IOC_READ | IOC_WRITE,
            SW_SYNC_IOC_MAGIC,
            0,
            std::mem::size_of::<SwSyncCreateFenceData>() as u32,
        )
    }

    fn ioc_inc() -> libc::c_ulong {
        ioc(IOC_WRITE, SW_SYNC_IOC_MAGIC, 1, std::mem::size_of::<u32>() as u32)
    }

    /// One display composition's sw_sync timeline, backed by a real kernel fd.
    pub struct RealSwSync {
        timeline: OwnedFd,
    }

    impl RealSwSync {
        /// Opens a fresh timeline (`sw_sync_timeline_create`).
        pub fn create() -> Result<Self> {
            let path = CString::new("/dev/sw_sync").expect("static path has no NUL byte");
            // SAFETY: a valid NUL-terminated path and O_RDWR are passed; the kernel
            // either returns a valid owned fd or -1.
            let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
            if fd < 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
            // SAFETY: fd was just returned by a successful open(2) and is not
            // otherwise owned.
            let timeline = unsafe { OwnedFd::from_raw_fd(fd) };
            Ok(RealSwSync { timeline })
        }
    }

    impl SwSync for RealSwSync {
        fn fence_create(&self, point: u32) -> Result<Fence> {
            let mut name = [0 as libc::c_char; 32];
            for (dst, src) in name.iter_mut().zip(b"drm_fence\0".iter()) {
                *dst = *src as libc::c_char;
            }
            let mut data = SwSyncCreateFenceData {
                value: point,
                name,
                fence: -1,
            };
            // SAFETY: `data` is a valid, correctly sized buffer for this ioctl;
            // the kernel writes the new fence fd back into `data.fence`.
            let ret = unsafe {
                libc::ioctl(self.timeline.as_raw_fd(), ioc_create_fence(), &mut data as *mut _)
            };
            if ret < 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
            // SAFETY: the kernel returned a newly allocated, otherwise-unowned fd.
            Ok(Fence::from_owned_fd(unsafe { OwnedFd::from_raw_fd(data.fence) }))
        }

        fn timeline_inc(&self, delta: u32) -> Result<()> {
            // SAFETY: `delta` is passed by value as the ioctl's documented argument.
            let ret = unsafe { libc::ioctl(self.timeline.as_raw_fd(), ioc_inc(), &delta as *const _) };
            if ret < 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeSwSync {
        pub increments: Mutex<Vec<u32>>,
    }

    impl SwSync for FakeSwSync {
        fn fence_create(&self, _point: u32) -> Result<Fence> {
            Ok(Fence::signaled())
        }

        fn timeline_inc(&self, delta: u32) -> Result<()> {
            self.increments.lock().unwrap().push(delta);
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::fake::FakeSwSync;
    use super::*;

    #[test]
    fn signaled_fence_never_blocks() {
        let fence = Fence::signaled();
        assert!(fence.is_signaled());
        assert!(fence.wait(Duration::from_millis(0)).is_ok());
    }

    #[test]
    fn increase_to_point_ignores_non_advancing_targets() {
        let mut timeline = SyncTimeline::new(FakeSwSync::default()).unwrap();
        timeline.create_next_fence().unwrap();
        timeline.increase_to_point(1).unwrap();
        timeline.increase_to_point(1).unwrap();
        timeline.increase_to_point(0).unwrap();
        assert_eq!(timeline.driver.increments.lock().unwrap().as_slice(), &[1]);
        assert_eq!(timeline.current_point(), 1);
    }

    #[test]
    fn pending_point_tracks_fences_created() {
        let mut timeline = SyncTimeline::new(FakeSwSync::default()).unwrap();
        timeline.create_next_fence().unwrap();
        timeline.create_next_fence().unwrap();
        assert_eq!(timeline.pending_point(), 2);
        assert_eq!(timeline.current_point(), 0);
    }
}
