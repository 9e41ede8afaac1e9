//! Device topology and display-pipe routing (spec.md §4.1).
//!
//! `DrmDevice` owns the immutable-after-init KMS object graph — CRTCs, encoders,
//! connectors and planes — and the one mutable piece of topology state that
//! changes over the device's lifetime: which connector is routed to which
//! display index. Grounded on `backend/drm/device/mod.rs`'s `DrmDevice::new` /
//! `crtcs()` / `planes()` and `backend/drm/device/atomic.rs`'s property-mapping
//! construction.

pub mod api;
pub mod property;
pub mod real;
pub mod types;

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::node::DrmNode;

use api::{ClientCap, ConnectionState, ConnectorKind, KernelDevice, PlaneKind};
use types::{
    connector_from_info, crtc_from_info, encoder_from_info, plane_from_info, Connector, Crtc,
    Encoder, Mode, Plane,
};

/// The three plane roles usable by a single present on one CRTC, grounded on
/// Smithay's `Planes` struct (`backend/drm/atomic/surface.rs`) used by
/// `DrmDevice::planes` and `compositor::FrameState::from_planes`.
#[derive(Debug, Clone)]
pub struct Planes {
    pub primary: Plane,
    pub cursor: Option<Plane>,
    pub overlay: Vec<Plane>,
}

impl Planes {
    /// All planes usable on this crtc, primary first, then overlays, per
    /// `platform.cpp`'s `GetUsablePlanes` (primary planes copied before overlay planes).
    pub fn usable(&self, use_overlay_planes: bool) -> Vec<Plane> {
        let mut planes = vec![self.primary.clone()];
        if use_overlay_planes {
            planes.extend(self.overlay.iter().cloned());
        }
        planes
    }
}

/// Connector hotplug notifications produced by [`DrmDevice::rescan`], grounded
/// on `smithay_drm_extras::drm_scanner::DrmScanEvent` as used in the
/// Nuthatch-compositor's udev integration.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Connected { display: usize },
    Disconnected { display: usize },
}

pub struct DrmDevice<K: KernelDevice> {
    api: Arc<K>,
    node: Option<DrmNode>,
    crtcs: Vec<Crtc>,
    encoders: Vec<Encoder>,
    connectors: Vec<Connector>,
    writeback_connectors: Vec<Connector>,
    planes: Vec<Plane>,
    /// display index -> index into `connectors`.
    displays: Vec<usize>,
    min_resolution: (u32, u32),
    max_resolution: (u32, u32),
    writeback_capable: bool,
    next_mode_id: u32,
}

impl<K: KernelDevice> DrmDevice<K> {
    /// Runs the full init sequence of spec.md §4.1 steps 1-9.
    #[instrument(skip_all)]
    pub fn open(api: Arc<K>) -> Result<Self> {
        let node = DrmNode::from_path(api.path().unwrap_or_default()).ok();

        api.set_client_cap(ClientCap::UniversalPlanes, true)?;
        api.set_client_cap(ClientCap::Atomic, true)?;
        let writeback_capable = api.set_client_cap(ClientCap::WritebackConnectors, true).is_ok();

        let ids = api.resource_ids()?;

        let mut crtcs = Vec::with_capacity(ids.crtcs.len());
        for id in &ids.crtcs {
            let info = api.crtc_info(*id)?;
            let mut crtc = crtc_from_info(&info);
            let props = api.object_properties(*id)?;
            crtc.props = property::fill_crtc_props(&props, *id)?;
            crtcs.push(crtc);
        }

        let mut encoders = Vec::with_capacity(ids.encoders.len());
        for id in &ids.encoders {
            let info = api.encoder_info(*id)?;
            encoders.push(encoder_from_info(&info));
        }
        link_possible_clones(&mut encoders);

        let mut next_mode_id = 0u32;
        let mut connectors = Vec::new();
        let mut writeback_connectors = Vec::new();
        for id in &ids.connectors {
            let info = api.connector_info(*id, false)?;
            let mut connector = connector_from_info(&info, &mut next_mode_id);
            let writeback = connector.is_writeback();
            let props = api.object_properties(*id)?;
            connector.props = property::fill_connector_props(&props, *id, writeback)?;
            if writeback {
                writeback_connectors.push(connector);
            } else {
                connectors.push(connector);
            }
        }

        let mut planes = Vec::new();
        for id in api.plane_ids()? {
            let info = api.plane_info(id)?;
            let mut plane = plane_from_info(&info);
            let props = api.object_properties(id)?;
            plane.props = property::fill_plane_props(&props, id)?;
            planes.push(plane);
        }

        let mut device = DrmDevice {
            api,
            node,
            crtcs,
            encoders,
            connectors,
            writeback_connectors,
            planes,
            displays: Vec::new(),
            min_resolution: (ids.min_width, ids.min_height),
            max_resolution: (ids.max_width, ids.max_height),
            writeback_capable,
            next_mode_id,
        };

        device.assign_displays();

        for display in 0..device.displays.len() {
            device.create_display_pipe(display)?;
        }
        for display in 0..device.displays.len() {
            device.attach_writeback(display);
        }

        info!(displays = device.displays.len(), "device topology initialized");
        Ok(device)
    }

    pub fn node(&self) -> Option<DrmNode> {
        self.node
    }

    pub fn min_resolution(&self) -> (u32, u32) {
        self.min_resolution
    }

    pub fn max_resolution(&self) -> (u32, u32) {
        self.max_resolution
    }

    pub fn display_count(&self) -> usize {
        self.displays.len()
    }

    pub fn connector(&self, display: usize) -> Result<&Connector> {
        let idx = *self.displays.get(display).ok_or(Error::UnknownDisplay(display))?;
        Ok(&self.connectors[idx])
    }

    fn connector_mut(&mut self, display: usize) -> Result<&mut Connector> {
        let idx = *self.displays.get(display).ok_or(Error::UnknownDisplay(display))?;
        Ok(&mut self.connectors[idx])
    }

    pub fn crtc_for_display(&self, display: usize) -> Result<&Crtc> {
        let connector = self.connector(display)?;
        let crtc_handle = connector.display.and_then(|_| {
            self.crtcs
                .iter()
                .find(|c| c.display == Some(display))
        });
        crtc_handle.ok_or(Error::UnknownDisplay(display))
    }

    /// Step 6: first internal connector becomes display 0; the rest (internal
    /// and external, in scan order) receive consecutive ids. Writeback
    /// connectors never receive a display id.
    fn assign_displays(&mut self) {
        let mut order: Vec<usize> = Vec::with_capacity(self.connectors.len());
        if let Some(first_internal) = self
            .connectors
            .iter()
            .position(|c| c.kind == ConnectorKind::Internal)
        {
            order.push(first_internal);
        }
        for i in 0..self.connectors.len() {
            if !order.contains(&i) {
                order.push(i);
            }
        }

        self.displays = order;
        for (display, &idx) in self.displays.iter().enumerate() {
            self.connectors[idx].display = Some(display);
        }
    }

    /// Step 8: `CreateDisplayPipe`. Tries the connector's current encoder first,
    /// then every possible encoder, picking the first CRTC whose display binding
    /// is free or already matches this display.
    #[instrument(skip(self))]
    pub fn create_display_pipe(&mut self, display: usize) -> Result<()> {
        let idx = *self
            .displays
            .get(display)
            .ok_or(Error::UnknownDisplay(display))?;
        let connector_handle = self.connectors[idx].handle;

        let mut candidate_encoders: Vec<usize> = Vec::new();
        if let Some(current) = self.connectors[idx].current_encoder {
            if let Some(pos) = self.encoders.iter().position(|e| e.handle == current) {
                candidate_encoders.push(pos);
            }
        }
        for &enc_handle in &self.connectors[idx].encoders.clone() {
            if let Some(pos) = self.encoders.iter().position(|e| e.handle == enc_handle) {
                if !candidate_encoders.contains(&pos) {
                    candidate_encoders.push(pos);
                }
            }
        }

        for enc_idx in candidate_encoders {
            let mask = self.encoders[enc_idx].possible_crtcs;
            for (crtc_idx, crtc) in self.crtcs.iter_mut().enumerate() {
                if mask & (1 << crtc_idx) == 0 {
                    continue;
                }
                if crtc.display.is_none() || crtc.display == Some(display) {
                    crtc.display = Some(display);
                    self.encoders[enc_idx].crtc = Some(crtc.handle);
                    debug!(display, crtc = crtc.handle, "bound display pipe");
                    return Ok(());
                }
            }
        }

        Err(Error::NoPipe(connector_handle))
    }

    /// Step 9: best-effort attach a writeback connector sharing the display's crtc.
    fn attach_writeback(&mut self, display: usize) {
        if !self.writeback_capable {
            return;
        }
        if let Some(crtc) = self.crtcs.iter().position(|c| c.display == Some(display)) {
            if let Some(wb) = self.writeback_connectors.iter_mut().find(|c| c.display.is_none()) {
                wb.display = Some(display);
                let _ = crtc;
            }
        }
    }

    /// Mode list rescan (hotplug / reconfigure). Preserves ids for modes whose
    /// timing is unchanged and assigns fresh ids to new ones (spec.md §4.1
    /// "Mode update").
    pub fn update_modes(&mut self, display: usize) -> Result<()> {
        let idx = *self
            .displays
            .get(display)
            .ok_or(Error::UnknownDisplay(display))?;
        let handle = self.connectors[idx].handle;
        let info = self.api.connector_info(handle, true)?;

        let old_modes = std::mem::take(&mut self.connectors[idx].modes);
        let mut new_modes = Vec::with_capacity(info.modes.len());
        for timing in &info.modes {
            let reused = old_modes.iter().find(|m| m.same_timing(timing));
            let id = match reused {
                Some(m) => m.id,
                None => {
                    let id = self.next_mode_id;
                    self.next_mode_id += 1;
                    id
                }
            };
            new_modes.push(Mode {
                id,
                timing: timing.clone(),
            });
        }

        self.connectors[idx].preferred_mode = new_modes
            .iter()
            .position(|m| m.is_preferred())
            .or(if new_modes.is_empty() { None } else { Some(0) });
        self.connectors[idx].state = info.state;
        self.connectors[idx].modes = new_modes;
        Ok(())
    }

    /// Scans every connector for a connection-state change, updates modes and
    /// returns the set of hotplug events to report through the facade (spec.md
    /// §4.9 "Hotplug handler").
    pub fn rescan(&mut self) -> Result<Vec<ScanEvent>> {
        let mut events = Vec::new();
        for display in 0..self.displays.len() {
            let idx = self.displays[display];
            let handle = self.connectors[idx].handle;
            let info = self.api.connector_info(handle, false)?;
            let was_connected = self.connectors[idx].state == ConnectionState::Connected;
            let now_connected = info.state == ConnectionState::Connected;
            if was_connected != now_connected {
                self.update_modes(display)?;
                events.push(if now_connected {
                    ScanEvent::Connected { display }
                } else {
                    ScanEvent::Disconnected { display }
                });
            }
        }
        Ok(events)
    }

    /// The crtc's position in `self.crtcs`, which is the bit index `possible_crtcs`
    /// masks are expressed against (used by the planner's `usable_planes`).
    pub fn crtc_index_for_display(&self, display: usize) -> Result<u32> {
        let crtc = self.crtc_for_display(display)?;
        Ok(self
            .crtcs
            .iter()
            .position(|c| c.handle == crtc.handle)
            .expect("crtc_for_display returned a crtc absent from self.crtcs") as u32)
    }

    /// Returns the primary/cursor/overlay planes usable on this display's crtc.
    pub fn planes_for_display(&self, display: usize) -> Result<Planes> {
        let crtc = self.crtc_for_display(display)?;
        let crtc_index = self
            .crtcs
            .iter()
            .position(|c| c.handle == crtc.handle)
            .expect("crtc_for_display returned a crtc absent from self.crtcs") as u32;

        let mut primary = None;
        let mut cursor = None;
        let mut overlay = Vec::new();
        for plane in &self.planes {
            if !plane.supports_crtc(crtc_index) {
                continue;
            }
            match plane.kind {
                PlaneKind::Primary if primary.is_none() => primary = Some(plane.clone()),
                PlaneKind::Cursor if cursor.is_none() => cursor = Some(plane.clone()),
                PlaneKind::Overlay => overlay.push(plane.clone()),
                _ => warn!(plane = plane.handle, "ignoring duplicate primary/cursor plane"),
            }
        }

        let primary = primary.ok_or(Error::NoUsablePlane(crtc.handle))?;
        Ok(Planes { primary, cursor, overlay })
    }

    pub fn set_active_mode(&mut self, display: usize, mode_id: u32) -> Result<()> {
        let connector = self.connector_mut(display)?;
        let index = connector
            .modes
            .iter()
            .position(|m| m.id == mode_id)
            .ok_or_else(|| Error::BadParameter(format!("unknown mode id {mode_id}")))?;
        connector.active_mode = Some(index);
        Ok(())
    }

    pub fn active_mode(&self, display: usize) -> Result<Option<&Mode>> {
        let connector = self.connector(display)?;
        Ok(connector.active_mode.map(|i| &connector.modes[i]))
    }

    pub fn preferred_mode(&self, display: usize) -> Result<Option<&Mode>> {
        let connector = self.connector(display)?;
        Ok(connector.preferred_mode.map(|i| &connector.modes[i]))
    }

    pub fn api(&self) -> &Arc<K> {
        &self.api
    }

    /// The writeback connector currently brokered to `display`, if any
    /// (spec.md §4.1 step 9).
    pub fn writeback_connector_for_display(&self, display: usize) -> Option<&Connector> {
        self.writeback_connectors.iter().find(|c| c.display == Some(display))
    }
}

/// Links each encoder's `possible_clones` bitmask to actual encoder handles,
/// grounded on `backend/drm/device/mod.rs`'s note that clone lists can only be
/// resolved once every encoder has been read.
fn link_possible_clones(encoders: &mut [Encoder]) {
    let handles: Vec<_> = encoders.iter().map(|e| e.handle).collect();
    for encoder in encoders.iter_mut() {
        encoder.possible_clones = handles
            .iter()
            .enumerate()
            .filter(|(i, _)| encoder.possible_crtcs & (1 << i) != 0)
            .map(|(_, h)| *h)
            .collect();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::real::fake::FakeDevice;

    #[test]
    fn open_assigns_first_internal_connector_to_display_zero() {
        let api = Arc::new(FakeDevice::single_internal_display());
        let device = DrmDevice::open(api).unwrap();
        assert_eq!(device.display_count(), 1);
        assert_eq!(device.connector(0).unwrap().kind, ConnectorKind::Internal);
    }

    #[test]
    fn create_display_pipe_binds_unique_crtc_per_display() {
        let api = Arc::new(FakeDevice::dual_display());
        let device = DrmDevice::open(api).unwrap();
        let crtc0 = device.crtc_for_display(0).unwrap().handle;
        let crtc1 = device.crtc_for_display(1).unwrap().handle;
        assert_ne!(crtc0, crtc1);
    }

    #[test]
    fn update_modes_preserves_id_for_unchanged_timing() {
        let api = Arc::new(FakeDevice::single_internal_display());
        let mut device = DrmDevice::open(api).unwrap();
        let before = device.connector(0).unwrap().modes[0].id;
        device.update_modes(0).unwrap();
        let after = device.connector(0).unwrap().modes[0].id;
        assert_eq!(before, after);
    }
}
