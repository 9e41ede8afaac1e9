//! The device-level HWC2 facade (spec.md §4.9, §6 "HWC2 ABI surface").
//!
//! Grounded on `examples/original_source/drmhwctwo.h`'s `DrmHwcTwo`: one
//! instance per process, owning every [`HwcDisplay`] the [`ResourceManager`]
//! enumerated, the three registered callbacks (`Hotplug`/`Vsync`/`Refresh`),
//! and the hotplug dispatch that drives `UpdateModes`/`Hotplug` on connector
//! transitions (spec.md §4.9 "Hotplug handler", scenario S6).

pub mod display;
pub mod layer;
pub mod types;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::compositor::{CompositorDump, DrmDisplayCompositor};
use crate::config::Config;
use crate::device::api::KernelDevice;
use crate::error::{Error, Result};
use crate::resource_manager::ResourceManager;
use crate::sync::real::RealSwSync;
use crate::sync::SwSync;
use crate::vsync::VsyncCallback;

pub use display::{HwcDisplay, SyncFactory};
pub use types::{CallbackDescriptor, CompositionType, Connection, DisplayAttribute, DisplayType, Hwc2Error};

/// Registered callback slots (`RegisterCallback`); `None` clears the slot,
/// mirroring `HWC2::Callback` registration with a null function pointer.
#[derive(Default)]
struct Callbacks {
    hotplug: Option<Arc<dyn Fn(usize, Connection) + Send + Sync>>,
    vsync: Option<Arc<dyn Fn(usize, i64) + Send + Sync>>,
    refresh: Option<Arc<dyn Fn(usize) + Send + Sync>>,
}

/// Forwards a per-display [`VsyncWorker`](crate::vsync::VsyncWorker) callback
/// into whatever `Vsync` callback is currently registered, so that a display
/// constructed before `RegisterCallback(Vsync, ...)` still delivers events
/// once one is installed (the original registers callbacks once at device
/// creation; this core allows late (re-)registration as the ABI permits).
struct VsyncRouter(Arc<Mutex<Callbacks>>);

impl VsyncCallback for VsyncRouter {
    fn on_vsync(&self, display: usize, timestamp_ns: i64) {
        if let Some(cb) = self.0.lock().unwrap().vsync.clone() {
            cb(display, timestamp_ns);
        }
    }
}

/// One physical HWC2 device: every display the kernel node exposes, dispatch
/// for hotplug, and the callback table clients register against.
pub struct HwcTwo<K: KernelDevice + 'static> {
    resource_manager: ResourceManager<K>,
    displays: HashMap<usize, HwcDisplay<K>>,
    callbacks: Arc<Mutex<Callbacks>>,
    use_overlay_planes: bool,
}

fn real_sync_factory() -> SyncFactory {
    Arc::new(|| RealSwSync::create().map(|s| Box::new(s) as Box<dyn SwSync>))
}

impl<K: KernelDevice + 'static> HwcTwo<K> {
    /// `DrmHwcTwo::Init`: opens the device, builds one [`HwcDisplay`] per
    /// enumerated display pipe.
    pub fn new(api: Arc<K>, config: Config) -> Result<Self> {
        let resource_manager = ResourceManager::init(api, config.clone())?;
        let callbacks = Arc::new(Mutex::new(Callbacks::default()));

        let mut hwc = HwcTwo {
            resource_manager,
            displays: HashMap::new(),
            callbacks,
            use_overlay_planes: config.use_overlay_planes,
        };

        let count = hwc.resource_manager.display_count();
        for display in 0..count {
            hwc.spawn_display(display)?;
        }
        Ok(hwc)
    }

    fn spawn_display(&mut self, display: usize) -> Result<()> {
        let device = self.resource_manager.device();
        let importer = self.resource_manager.importer(display)?;
        let compositor = Arc::new(DrmDisplayCompositor::new(display, device.clone()));
        let vsync_callback: Arc<dyn VsyncCallback> = Arc::new(VsyncRouter(self.callbacks.clone()));

        let hwc_display = HwcDisplay::new(
            display,
            device,
            compositor,
            importer,
            real_sync_factory(),
            vsync_callback,
            self.use_overlay_planes,
        )?;
        self.displays.insert(display, hwc_display);
        Ok(())
    }

    /// Looks up a display by id, the shared entry point every ABI hook
    /// addressing a `hwc2_display_t` goes through.
    pub fn display(&mut self, display: usize) -> Result<&mut HwcDisplay<K>> {
        self.displays.get_mut(&display).ok_or(Error::UnknownDisplay(display))
    }

    pub fn display_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.displays.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// `RegisterCallback`. Passing `None` removes a previously registered
    /// callback (spec.md §8 "`RegisterCallback(cb); RegisterCallback(null)`
    /// removes the callback").
    pub fn register_hotplug_callback(&self, cb: Option<Arc<dyn Fn(usize, Connection) + Send + Sync>>) {
        self.callbacks.lock().unwrap().hotplug = cb;
    }

    pub fn register_vsync_callback(&self, cb: Option<Arc<dyn Fn(usize, i64) + Send + Sync>>) {
        self.callbacks.lock().unwrap().vsync = cb;
    }

    pub fn register_refresh_callback(&self, cb: Option<Arc<dyn Fn(usize) + Send + Sync>>) {
        self.callbacks.lock().unwrap().refresh = cb;
    }

    /// `GetMaxVirtualDisplayCount`: virtual displays are unimplemented
    /// (spec.md §9 Open Question), so the device advertises zero capacity.
    pub fn max_virtual_display_count(&self) -> u32 {
        0
    }

    /// `CreateVirtualDisplay` (spec.md §1 Non-goals, §9 Open Question).
    pub fn create_virtual_display(&self) -> Result<usize> {
        self.resource_manager.create_virtual_display()
    }

    /// `Dump`: a diagnostic snapshot of every display's compositor, per
    /// `drmhwctwo.cpp`'s `Dump` walking each `DrmHwcTwo::HwcDisplay`.
    pub fn dump(&self) -> Vec<CompositorDump> {
        let mut ids = self.display_ids();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.displays.get(&id))
            .map(|d| d.compositor_dump())
            .collect()
    }

    /// Called from the hotplug listener thread (spec.md §5 "device's hotplug
    /// listener is a third thread"): re-scans connector state and fires the
    /// `Hotplug` callback for each transition, per spec.md §4.9's handler and
    /// scenario S6.
    pub fn handle_hotplug(&mut self) -> Result<()> {
        let events = self.resource_manager.rescan()?;
        for event in events {
            match event {
                crate::device::ScanEvent::Connected { display } => {
                    info!(display, "connector connected");
                    if let Some(hwc_display) = self.displays.get_mut(&display) {
                        if let Ok(configs) = hwc_display.get_display_configs() {
                            if let Some(&preferred) = configs.first() {
                                if let Err(err) = hwc_display.set_active_config(preferred) {
                                    warn!(display, ?err, "failed to apply preferred config on hotplug");
                                }
                            }
                        }
                    }
                    self.fire_hotplug(display, Connection::Connected);
                }
                crate::device::ScanEvent::Disconnected { display } => {
                    info!(display, "connector disconnected");
                    if let Some(hwc_display) = self.displays.get(&display) {
                        hwc_display.clear_display();
                    }
                    self.fire_hotplug(display, Connection::Disconnected);
                }
            }
        }
        Ok(())
    }

    fn fire_hotplug(&self, display: usize, connection: Connection) {
        if let Some(cb) = self.callbacks.lock().unwrap().hotplug.clone() {
            cb(display, connection);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::real::fake::FakeDevice;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn new_spawns_one_display_per_pipe() {
        let hwc = HwcTwo::new(Arc::new(FakeDevice::single_internal_display()), Config::default()).unwrap();
        assert_eq!(hwc.display_ids(), vec![0]);
        assert_eq!(hwc.max_virtual_display_count(), 0);
    }

    #[test]
    fn unknown_display_is_bad_display() {
        let mut hwc = HwcTwo::new(Arc::new(FakeDevice::single_internal_display()), Config::default()).unwrap();
        assert!(matches!(hwc.display(99), Err(Error::UnknownDisplay(99))));
    }

    #[test]
    fn register_and_clear_hotplug_callback() {
        let hwc = HwcTwo::new(Arc::new(FakeDevice::single_internal_display()), Config::default()).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        hwc.register_hotplug_callback(Some(Arc::new(move |_d, _c| {
            seen2.fetch_add(1, Ordering::SeqCst);
        })));
        hwc.fire_hotplug(0, Connection::Connected);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        hwc.register_hotplug_callback(None);
        hwc.fire_hotplug(0, Connection::Connected);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dump_reports_one_entry_per_display() {
        let hwc = HwcTwo::new(Arc::new(FakeDevice::single_internal_display()), Config::default()).unwrap();
        assert_eq!(hwc.dump().len(), 1);
    }
}
