//! Device/importer bootstrap and hotplug scanning (spec.md §4.10, component #10).
//!
//! Grounded on `examples/original_source/resourcemanager.h`'s `ResourceManager`:
//! one owner of every opened [`DrmDevice`], one [`Importer`] per display, and
//! the writeback-connector brokering `DrmDevice::attach_writeback` already
//! performs at open time. Hotplug rescanning is supplemented beyond the
//! original's polling model, using [`crate::device::DrmDevice::rescan`] driven
//! from a udev monitor the way Smithay's own `backend::udev`/`smithay_drm_extras::drm_scanner`
//! integrate with `calloop` in `anvil/src/udev.rs`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::device::api::KernelDevice;
use crate::device::types::Connector;
use crate::device::{DrmDevice, ScanEvent};
use crate::error::{Error, Result};
use crate::importer::generic::GenericImporter;
use crate::importer::Importer;

/// Owns the opened [`DrmDevice`] and the importer displays on it share,
/// per `ResourceManager::Init`/`GetDrmDevice`/`GetImporter`.
///
/// The original indexes both by display to support multi-GPU setups (one
/// `DrmDevice` per render node); this core targets the single-node case
/// named in spec.md §1 and keeps one shared importer, which is a strict
/// simplification recorded in DESIGN.md.
pub struct ResourceManager<K: KernelDevice + 'static> {
    device: Arc<Mutex<DrmDevice<K>>>,
    importer: Arc<dyn Importer>,
    config: Config,
}

impl<K: KernelDevice + 'static> ResourceManager<K> {
    /// `Init`: opens the device topology and constructs the shared importer.
    #[instrument(skip_all)]
    pub fn init(api: Arc<K>, config: Config) -> Result<Self> {
        let device = DrmDevice::open(api)?;
        info!(displays = device.display_count(), "resource manager initialized");
        let importer_device = device.api().clone();
        let importer: Arc<dyn Importer> = if config.use_framebuffer_cache {
            Arc::new(GenericImporter::new(importer_device))
        } else {
            Arc::new(GenericImporter::without_cache(importer_device))
        };
        Ok(ResourceManager {
            device: Arc::new(Mutex::new(device)),
            importer,
            config,
        })
    }

    pub fn device(&self) -> Arc<Mutex<DrmDevice<K>>> {
        self.device.clone()
    }

    /// `GetImporter`: every display shares the one importer this core builds.
    pub fn importer(&self, display: usize) -> Result<Arc<dyn Importer>> {
        let device = self.device.lock().unwrap();
        if display >= device.display_count() {
            return Err(Error::UnknownDisplay(display));
        }
        Ok(self.importer.clone())
    }

    pub fn display_count(&self) -> usize {
        self.device.lock().unwrap().display_count()
    }

    /// `AvailableWritebackConnector`.
    pub fn available_writeback_connector(&self, display: usize) -> Option<Connector> {
        self.device
            .lock()
            .unwrap()
            .writeback_connector_for_display(display)
            .cloned()
    }

    /// Re-scans connector state, reporting connect/disconnect transitions
    /// (spec.md §4.9 "Hotplug handler").
    pub fn rescan(&self) -> Result<Vec<ScanEvent>> {
        self.device.lock().unwrap().rescan()
    }

    /// `CreateVirtualDisplay`: out of scope (spec.md §1 Non-goals).
    pub fn create_virtual_display(&self) -> Result<usize> {
        Err(Error::Unsupported("virtual displays"))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Hotplug monitoring glue: a udev `drm`-subsystem monitor socket whose fd can
/// be driven on a [`calloop::EventLoop`] via `calloop::generic::Generic` to
/// trigger [`ResourceManager::rescan`] whenever the kernel reports a connector
/// change, the same wiring Smithay's own udev backend uses in `anvil/src/udev.rs`.
/// Gated behind the same `backend_udev` feature the rest of the crate uses for
/// its udev integration, since it pulls in the `udev` crate directly.
#[cfg(feature = "backend_udev")]
pub mod hotplug {
    use std::os::fd::{AsRawFd, RawFd};

    use udev::{EventType, MonitorBuilder, MonitorSocket};

    use crate::error::{Error, Result};

    /// A udev monitor socket bound to the `drm` subsystem. Readable whenever
    /// a connector is added, removed, or changes state; the caller registers
    /// `as_raw_fd()` with its own event loop and calls [`Self::drain`] on
    /// readiness, then [`ResourceManager::rescan`] to act on it.
    pub struct HotplugMonitor {
        socket: MonitorSocket,
    }

    impl HotplugMonitor {
        pub fn open() -> Result<Self> {
            let socket = MonitorBuilder::new()
                .and_then(|b| b.match_subsystem("drm"))
                .and_then(|b| b.listen())
                .map_err(Error::Io)?;
            Ok(HotplugMonitor { socket })
        }

        pub fn as_raw_fd(&self) -> RawFd {
            self.socket.as_raw_fd()
        }

        /// Drains every pending uevent, returning `true` if at least one
        /// arrived (any of them means "re-scan", regardless of which
        /// connector or action triggered it).
        pub fn drain(&mut self) -> bool {
            let mut any = false;
            for event in self.socket.iter() {
                let _ = event.event_type() == EventType::Change;
                any = true;
            }
            any
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::real::fake::FakeDevice;

    #[test]
    fn importer_rejects_unknown_display() {
        let rm = ResourceManager::init(Arc::new(FakeDevice::single_internal_display()), Config::default()).unwrap();
        assert!(rm.importer(0).is_ok());
        assert!(matches!(rm.importer(5), Err(Error::UnknownDisplay(5))));
    }

    #[test]
    fn create_virtual_display_is_unsupported() {
        let rm = ResourceManager::init(Arc::new(FakeDevice::single_internal_display()), Config::default()).unwrap();
        assert!(matches!(rm.create_virtual_display(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn available_writeback_connector_is_none_without_writeback_hardware() {
        let rm = ResourceManager::init(Arc::new(FakeDevice::single_internal_display()), Config::default()).unwrap();
        assert!(rm.available_writeback_connector(0).is_none());
    }
}
