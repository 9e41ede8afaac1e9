//! Display compositor worker (spec.md §4.6).
//!
//! Grounded on `examples/original_source/drmdisplaycompositor.h`/`.cpp`:
//! a per-display [`crate::queue_worker::QueueWorker`] drains queued
//! [`DrmDisplayComposition`]s and applies them as atomic KMS commits,
//! swapping in the newly-applied composition as "active" and releasing the
//! previous one's fences.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{trace, warn};

use crate::composition::{DpmsMode, DrmDisplayComposition};
use crate::device::api::{CommitFlags, KernelDevice};
use crate::device::property::{encode_mode_timing, ModeBlob};
use crate::device::types::Mode;
use crate::device::DrmDevice;
use crate::error::{Error, Result};
use crate::layer::{Blending, Transform};
use crate::planner::{PlaneAssignment, PlaneAssignmentKind};
use crate::precomp::PreCompositor;
use crate::queue_worker::{QueueWorker, QueueWorkerDelegate};
use crate::sync::{Fence, SwSync};

/// `DRM_DISPLAY_BUFFERS`: depth of the composition queue and the
/// pre-composition ring buffer.
pub const DISPLAY_BUFFERS: usize = 3;

/// `FLATTEN_COUNTDOWN_INIT`.
pub const FLATTEN_COUNTDOWN_INIT: i64 = 60;

const ACQUIRE_WAIT_TRIES: u32 = 5;
const ACQUIRE_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

type Composition = DrmDisplayComposition<Box<dyn SwSync>>;

#[derive(Debug, Clone, Default)]
struct ModeState {
    needs_modeset: bool,
    mode: Option<Mode>,
    blob_id: u32,
    old_blob_id: u32,
}

/// Snapshot returned by [`DrmDisplayCompositor::dump`] (`Dump(ostringstream*)`
/// in the original); reading resets the frame counter, matching the original's
/// "counters reset on each dump" comment.
#[derive(Debug, Clone, Copy)]
pub struct CompositorDump {
    pub display: usize,
    pub active: bool,
    pub frames_composited: u64,
    pub last_timestamp_ns: i64,
    pub flatten_countdown: i64,
}

/// One slot of the pre-composition ring buffer (`DRM_DISPLAY_BUFFERS`-deep
/// in the original): the last fb id rendered into it, and the release fence
/// that must signal before the slot is reused.
#[derive(Default)]
struct PrecompSlot {
    fb_id: Option<u32>,
    release_fence: Option<Fence>,
}

struct Inner {
    active: bool,
    mode: ModeState,
    flatten_countdown: i64,
    frames_composited: u64,
    last_timestamp_ns: i64,
    precomp_ring: Vec<PrecompSlot>,
    precomp_index: usize,
}

/// Per-display compositor, owning the queue worker and the currently-active
/// composition. Generic over the kernel seam so it can be driven by a
/// [`crate::device::real::fake::FakeDevice`] in tests.
pub struct DrmDisplayCompositor<K: KernelDevice + 'static> {
    display: usize,
    device: Arc<Mutex<DrmDevice<K>>>,
    inner: Arc<Mutex<Inner>>,
    worker: QueueWorker<Composition>,
}

impl<K: KernelDevice + 'static> DrmDisplayCompositor<K> {
    /// Buffer import and framebuffer-id resolution happen upstream of the
    /// compositor (the HWC2 facade resolves each layer's `ImportedBuffer`
    /// before a composition is queued), so this worker only ever deals in
    /// already-resolved `fb_id`s.
    pub fn new(display: usize, device: Arc<Mutex<DrmDevice<K>>>) -> Self {
        Self::with_precompositor(display, device, None)
    }

    /// As [`Self::new`], additionally wiring `precompositor` as the external
    /// GL renderer any layers the planner couldn't fit onto a plane get
    /// pre-composed through (`ApplyPreComposite`). Passing `None` disables
    /// the precomposition plane entirely rather than failing: it is simply
    /// disabled at commit time, same as if the plane pool never had one to
    /// spare.
    pub fn with_precompositor(
        display: usize,
        device: Arc<Mutex<DrmDevice<K>>>,
        precompositor: Option<Arc<dyn PreCompositor>>,
    ) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            active: false,
            mode: ModeState::default(),
            flatten_countdown: FLATTEN_COUNTDOWN_INIT,
            frames_composited: 0,
            last_timestamp_ns: 0,
            precomp_ring: (0..DISPLAY_BUFFERS).map(|_| PrecompSlot::default()).collect(),
            precomp_index: 0,
        }));

        let delegate = Delegate {
            display,
            device: device.clone(),
            inner: inner.clone(),
            active_composition: None,
            precompositor,
        };

        let worker = QueueWorker::spawn(
            &format!("compositor-{display}"),
            DISPLAY_BUFFERS,
            None,
            delegate,
        );

        DrmDisplayCompositor {
            display,
            device,
            inner,
            worker,
        }
    }

    pub fn display(&self) -> usize {
        self.display
    }

    /// `QueueComposition`: rejects a real composition while the display is
    /// inactive; a `Dpms` composition flips the active flag synchronously so
    /// the very next `Frame` queued after `SetPowerMode(On)` isn't rejected
    /// due to the worker thread not having processed the `Dpms` item yet.
    pub fn queue_composition(&self, composition: Composition) -> Result<()> {
        if let Some(dpms) = composition.dpms() {
            let mut inner = self.inner.lock().unwrap();
            inner.active = dpms == DpmsMode::On;
        } else {
            let mut inner = self.inner.lock().unwrap();
            if !inner.active && !composition.is_empty() {
                return Err(Error::BadParameter("display is not active".into()));
            }
            if composition.as_frame().is_some() {
                inner.flatten_countdown = FLATTEN_COUNTDOWN_INIT;
            }
        }
        self.worker.queue_work(composition)
    }

    /// `GetActiveModeResolution`: (width, height, vsync period in nanoseconds).
    pub fn active_mode_resolution(&self) -> Result<(u32, u32, i32)> {
        let device = self.device.lock().unwrap();
        let mode = device
            .active_mode(self.display)?
            .ok_or(Error::UnknownDisplay(self.display))?;
        let period_ns = (1_000_000_000.0 / mode.refresh_hz()) as i32;
        Ok((mode.width(), mode.height(), period_ns))
    }

    /// `Dump`: returns a snapshot and resets the frame counter.
    pub fn dump(&self) -> CompositorDump {
        let mut inner = self.inner.lock().unwrap();
        let dump = CompositorDump {
            display: self.display,
            active: inner.active,
            frames_composited: inner.frames_composited,
            last_timestamp_ns: inner.last_timestamp_ns,
            flatten_countdown: inner.flatten_countdown,
        };
        inner.frames_composited = 0;
        dump
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().unwrap().active
    }

    pub fn exit(&mut self) {
        self.worker.exit();
    }
}

struct Delegate<K: KernelDevice + 'static> {
    display: usize,
    device: Arc<Mutex<DrmDevice<K>>>,
    inner: Arc<Mutex<Inner>>,
    active_composition: Option<Composition>,
    precompositor: Option<Arc<dyn PreCompositor>>,
}

impl<K: KernelDevice + 'static> QueueWorkerDelegate<Composition> for Delegate<K> {
    fn process_work(&mut self, mut composition: Composition) {
        if let Some(mode) = composition.modeset().cloned() {
            let mut inner = self.inner.lock().unwrap();
            inner.mode.needs_modeset = true;
            inner.mode.mode = Some(mode);
            return;
        }

        if let Some(dpms) = composition.dpms() {
            if let Err(err) = self.apply_dpms(dpms) {
                warn!(display = self.display, ?err, "failed to apply dpms");
            }
            return;
        }

        if composition.as_frame().is_some() {
            match self.apply_frame(&mut composition) {
                Ok(()) => {
                    let _ = composition.signal_composition_done();
                    let mut inner = self.inner.lock().unwrap();
                    inner.frames_composited += 1;
                    inner.flatten_countdown = (inner.flatten_countdown - 1).max(0);
                    drop(inner);
                    if let Some(mut previous) = self.active_composition.replace(composition) {
                        let _ = previous.signal_composition_done();
                    }
                }
                Err(err) => {
                    warn!(display = self.display, ?err, "ApplyFrame failed, disabling planes");
                    if let Some(active) = self.active_composition.take() {
                        self.disable_planes(&active);
                    }
                }
            }
        }
    }
}

impl<K: KernelDevice + 'static> Delegate<K> {
    fn apply_dpms(&self, mode: DpmsMode) -> Result<()> {
        let device = self.device.lock().unwrap();
        let connector = device.connector(self.display)?;
        let Some(dpms_prop) = connector.props.dpms else {
            return Err(Error::Unsupported("connector has no DPMS property"));
        };
        let value = match mode {
            DpmsMode::On => 0u64,
            DpmsMode::Off => 3u64,
        };
        let mut request = crate::device::api::AtomicRequest::new();
        request.set_u64(connector.handle, dpms_prop, value);
        device
            .api()
            .atomic_commit(CommitFlags::ALLOW_MODESET, &request)
    }

    fn disable_planes(&self, composition: &Composition) {
        let Some((_, planes, _)) = composition.as_frame() else {
            return;
        };
        let device = self.device.lock().unwrap();
        let mut request = crate::device::api::AtomicRequest::new();
        for assignment in planes {
            disable_plane(&mut request, assignment);
        }
        let _ = device.api().atomic_commit(CommitFlags::ALLOW_MODESET, &request);
    }

    /// Runs the external GL renderer over every leftover-layer region named
    /// by the composition's `Precomposite` plane assignment, cycling the
    /// pre-composition ring buffer (`ApplyPreComposite`). Returns the fb id
    /// and dimensions to bind to the plane, or `None` when there is nothing
    /// to pre-compose, no renderer configured, or no active mode to size the
    /// buffer against — in every such case the plane is simply disabled.
    fn run_precomposite(
        &self,
        composition: &mut Composition,
        active_mode: Option<&Mode>,
    ) -> Result<Option<(u32, u32, u32)>> {
        let (layers, planes, regions) = composition.as_frame().ok_or(Error::InvalidState)?;
        if regions.is_empty() || !planes.iter().any(|a| a.kind == PlaneAssignmentKind::Precomposite) {
            return Ok(None);
        }

        let Some(precompositor) = self.precompositor.as_ref() else {
            trace!(display = self.display, "no precompositor configured, disabling precomposite plane");
            return Ok(None);
        };

        let Some(mode) = active_mode else {
            warn!(display = self.display, "no active mode, cannot size precomposition buffer");
            return Ok(None);
        };
        let (width, height) = (mode.width(), mode.height());

        let (idx, stale_fence) = {
            let mut inner = self.inner.lock().unwrap();
            let idx = inner.precomp_index;
            let fence = inner.precomp_ring[idx].release_fence.take();
            (idx, fence)
        };
        if let Some(fence) = stale_fence {
            if let Err(Error::FenceTimeout) = fence.wait(ACQUIRE_WAIT_TIMEOUT) {
                warn!(display = self.display, idx, "precomposition ring slot not yet released");
            }
        }

        let output = precompositor.composite(layers, regions, width, height)?;

        let fence = composition.create_ring_buffer_fence()?;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.precomp_ring[idx].fb_id = Some(output.fb_id);
            inner.precomp_ring[idx].release_fence = Some(fence);
            inner.precomp_index = (idx + 1) % DISPLAY_BUFFERS;
        }
        composition.signal_precomposition_done()?;

        Ok(Some((output.fb_id, width, height)))
    }

    /// `ApplyFrame`.
    fn apply_frame(&mut self, composition: &mut Composition) -> Result<()> {
        let device = self.device.lock().unwrap();
        let connector_handle = device.connector(self.display)?.handle;
        let connector_crtc_id_prop = device.connector(self.display)?.props.crtc_id;
        let crtc = device.crtc_for_display(self.display)?.clone();
        let api: Arc<dyn KernelDevice> = device.api().clone();
        let active_mode = device.active_mode(self.display)?;

        let mut request = crate::device::api::AtomicRequest::new();

        let mut needs_modeset = false;
        let mut new_blob: Option<ModeBlob> = None;
        let mut old_blob_id = 0u32;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.mode.needs_modeset {
                needs_modeset = true;
                old_blob_id = inner.mode.blob_id;
                let mode = inner.mode.mode.clone().ok_or(Error::InvalidState)?;
                let blob = ModeBlob::create(api.clone(), &encode_mode_timing(&mode.timing))?;
                if let Some(mode_id_prop) = crtc.props.mode_id {
                    request.set_u64(crtc.handle, mode_id_prop, blob.id() as u64);
                }
                if let Some(active_prop) = crtc.props.active {
                    request.set_u64(crtc.handle, active_prop, 1);
                }
                if let Some(crtc_id_prop) = connector_crtc_id_prop {
                    request.set_u64(connector_handle, crtc_id_prop, crtc.handle as u64);
                }
                inner.mode.blob_id = blob.id();
                new_blob = Some(blob);
            }
        }

        let precomp_buffer = self.run_precomposite(composition, active_mode)?;

        let (layers, planes, _) = composition.as_frame().ok_or(Error::InvalidState)?;
        let planes = planes.to_vec();

        for assignment in planes.iter() {
            match assignment.kind {
                PlaneAssignmentKind::Disable => disable_plane(&mut request, assignment),
                PlaneAssignmentKind::Precomposite => match precomp_buffer {
                    Some((fb_id, width, height)) => {
                        trace!(display = self.display, fb_id, "precomposite plane bound");
                        let synth = precomp_plane_layer(width, height);
                        build_layer_props(&mut request, assignment, &synth, fb_id, crtc.handle);
                    }
                    None => {
                        trace!(display = self.display, "no precomposition buffer available, disabling plane");
                        disable_plane(&mut request, assignment);
                    }
                },
                PlaneAssignmentKind::Layer => {
                    let Some(index) = assignment.layer_index else {
                        disable_plane(&mut request, assignment);
                        continue;
                    };
                    let layer = &layers[index];
                    let Some(fb_id) = layer.fb_id() else {
                        disable_plane(&mut request, assignment);
                        continue;
                    };
                    wait_acquire_fence(layer, self.display);
                    build_layer_props(&mut request, assignment, layer, fb_id, crtc.handle);
                }
            }
        }
        drop(device);

        let commit = api.atomic_commit(CommitFlags::ALLOW_MODESET, &request);

        if let Err(err) = commit {
            drop(new_blob);
            return Err(err);
        }

        composition.set_out_fence(crate::sync::Fence::signaled());

        if needs_modeset {
            if old_blob_id != 0 {
                let _ = api.destroy_property_blob(old_blob_id);
            }
            drop(new_blob);
            let mode_id = {
                let mut inner = self.inner.lock().unwrap();
                inner.mode.needs_modeset = false;
                inner.mode.mode.as_ref().map(|m| m.id)
            };
            if let Some(mode_id) = mode_id {
                let mut device = self.device.lock().unwrap();
                let _ = device.set_active_mode(self.display, mode_id);
            }
            let _ = self.apply_dpms(DpmsMode::On);
        }

        Ok(())
    }
}

/// Synthesizes the full-screen layer geometry bound to the precomposition
/// plane: the renderer always fills the whole `width`x`height` buffer, so
/// its source crop and display frame both cover the entire mode (the
/// original's synthetic `kLayerProtected`-style client-target layer plays
/// the same role for `ApplyPreComposite`'s plane).
fn precomp_plane_layer(width: u32, height: u32) -> crate::layer::DrmHwcLayer {
    let mut layer = crate::layer::DrmHwcLayer::new(0, 0);
    layer.source_crop = crate::layer::FRect {
        left: 0.0,
        top: 0.0,
        right: width as f32,
        bottom: height as f32,
    };
    layer.display_frame = crate::layer::Rect {
        left: 0,
        top: 0,
        right: width as i32,
        bottom: height as i32,
    };
    layer
}

fn wait_acquire_fence(layer: &crate::layer::DrmHwcLayer, display: usize) {
    let Some(fence) = layer.acquire_fence.as_ref() else {
        return;
    };
    for attempt in 0..ACQUIRE_WAIT_TRIES {
        match fence.wait(ACQUIRE_WAIT_TIMEOUT) {
            Ok(()) => return,
            Err(Error::FenceTimeout) => {
                warn!(display, attempt, "acquire fence not yet signaled");
            }
            Err(err) => {
                warn!(display, ?err, "acquire fence wait failed");
                return;
            }
        }
    }
    warn!(display, "acquire fence never signaled, continuing anyway");
}

fn disable_plane(request: &mut crate::device::api::AtomicRequest, assignment: &PlaneAssignment) {
    if let Some(crtc_prop) = assignment.plane.props.crtc_id {
        request.set_u64(assignment.plane.handle, crtc_prop, 0);
    }
    if let Some(fb_prop) = assignment.plane.props.fb_id {
        request.set_u64(assignment.plane.handle, fb_prop, 0);
    }
}

/// Translates `transform` to the plane's rotation enum value per spec.md
/// §4.6 step 4 ("single-bit cases map to REFLECT_X/REFLECT_Y/ROTATE_90/180/270").
fn rotation_value(plane_props: &crate::device::types::PlaneProps, transform: Transform) -> Option<u64> {
    let name = match transform {
        Transform::IDENTITY => return None,
        Transform::FLIP_H => "reflect-x",
        Transform::FLIP_V => "reflect-y",
        Transform::ROTATE_90 => "rotate-90",
        Transform::ROTATE_180 => "rotate-180",
        Transform::ROTATE_270 => "rotate-270",
        _ => return None,
    };
    plane_props.rotation_enum.get(name).copied()
}

fn blend_value(plane_props: &crate::device::types::PlaneProps, blending: Blending) -> Option<u64> {
    let name = match blending {
        Blending::None => "none",
        Blending::PreMult => "premult",
        Blending::Coverage => "coverage",
    };
    plane_props.blend_enum.get(name).copied()
}

fn build_layer_props(
    request: &mut crate::device::api::AtomicRequest,
    assignment: &PlaneAssignment,
    layer: &crate::layer::DrmHwcLayer,
    fb_id: u32,
    crtc_handle: u32,
) {
    let plane = &assignment.plane;
    let props = &plane.props;

    if let Some(p) = props.crtc_id {
        request.set_u64(plane.handle, p, crtc_handle as u64);
    }
    if let Some(p) = props.fb_id {
        request.set_u64(plane.handle, p, fb_id as u64);
    }
    if let Some(p) = props.crtc_x {
        request.set_i64(plane.handle, p, layer.display_frame.left as i64);
    }
    if let Some(p) = props.crtc_y {
        request.set_i64(plane.handle, p, layer.display_frame.top as i64);
    }
    if let Some(p) = props.crtc_w {
        request.set_u64(plane.handle, p, layer.display_frame.width() as u64);
    }
    if let Some(p) = props.crtc_h {
        request.set_u64(plane.handle, p, layer.display_frame.height() as u64);
    }

    let fixed = layer.source_crop.to_fixed16();
    if let Some(p) = props.src_x {
        request.set_i64(plane.handle, p, fixed.left);
    }
    if let Some(p) = props.src_y {
        request.set_i64(plane.handle, p, fixed.top);
    }
    if let Some(p) = props.src_w {
        request.set_u64(plane.handle, p, fixed.width as u64);
    }
    if let Some(p) = props.src_h {
        request.set_u64(plane.handle, p, fixed.height as u64);
    }

    if let Some(p) = props.rotation {
        if let Some(value) = rotation_value(props, layer.transform) {
            request.set_u64(plane.handle, p, value);
        }
    }
    if let Some(p) = props.blend {
        if let Some(value) = blend_value(props, layer.blending) {
            request.set_u64(plane.handle, p, value);
        }
    }
    if let Some(p) = props.alpha {
        request.set_u64(plane.handle, p, layer.alpha as u64);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::composition::PrecompRegion;
    use crate::device::api::{PlaneInfo, PlaneKind};
    use crate::device::real::fake::FakeDevice;
    use crate::device::types::plane_from_info;
    use crate::importer::Importer as ImporterTrait;
    use crate::layer::DrmHwcLayer;
    use crate::precomp::fake::FakePreCompositor;
    use crate::sync::fake::FakeSwSync;
    use drm_fourcc::DrmFourcc;

    struct NullImporter;
    impl ImporterTrait for NullImporter {
        fn import_buffer(
            &self,
            _dmabuf: &crate::backend::allocator::dmabuf::Dmabuf,
        ) -> Result<crate::layer::ImportedBuffer> {
            unimplemented!()
        }
        fn release_buffer(&self, _bo: crate::layer::ImportedBuffer) -> Result<()> {
            Ok(())
        }
        fn can_import_buffer(&self, _dmabuf: &crate::backend::allocator::dmabuf::Dmabuf) -> bool {
            true
        }
    }

    fn new_compositor() -> DrmDisplayCompositor<FakeDevice> {
        let device = Arc::new(Mutex::new(DrmDevice::open(Arc::new(FakeDevice::single_internal_display())).unwrap()));
        DrmDisplayCompositor::new(0, device)
    }

    fn empty_frame() -> Composition {
        let mut c = DrmDisplayComposition::new(0, 1, FakeSwSync::default(), Arc::new(NullImporter)).unwrap();
        c.set_layers(vec![], vec![], vec![]).unwrap();
        c
    }

    fn test_plane(handle: u32) -> crate::device::types::Plane {
        plane_from_info(&PlaneInfo {
            id: handle,
            kind: PlaneKind::Overlay,
            possible_crtcs: 0b1,
            formats: vec![DrmFourcc::Xrgb8888],
        })
    }

    fn new_delegate_with_precompositor(
        precompositor: Option<Arc<dyn PreCompositor>>,
    ) -> (Delegate<FakeDevice>, Arc<Mutex<DrmDevice<FakeDevice>>>, Arc<Mutex<Inner>>) {
        let device = Arc::new(Mutex::new(DrmDevice::open(Arc::new(FakeDevice::single_internal_display())).unwrap()));
        let inner = Arc::new(Mutex::new(Inner {
            active: true,
            mode: ModeState::default(),
            flatten_countdown: FLATTEN_COUNTDOWN_INIT,
            frames_composited: 0,
            last_timestamp_ns: 0,
            precomp_ring: (0..DISPLAY_BUFFERS).map(|_| PrecompSlot::default()).collect(),
            precomp_index: 0,
        }));
        let delegate = Delegate {
            display: 0,
            device: device.clone(),
            inner: inner.clone(),
            active_composition: None,
            precompositor,
        };
        (delegate, device, inner)
    }

    fn precomp_frame() -> Composition {
        let mut c = DrmDisplayComposition::new(0, 1, FakeSwSync::default(), Arc::new(NullImporter)).unwrap();
        let region = PrecompRegion {
            layer_indices: vec![0],
            source_crop: crate::layer::FRect::default(),
            display_frame: crate::layer::Rect::default(),
        };
        let assignment = PlaneAssignment {
            kind: PlaneAssignmentKind::Precomposite,
            plane: test_plane(20),
            layer_index: None,
            precomp_regions: vec![region.clone()],
        };
        c.set_layers(vec![DrmHwcLayer::new(1, 0)], vec![assignment], vec![region]).unwrap();
        c
    }

    #[test]
    fn run_precomposite_disabled_without_renderer() {
        let (delegate, device, _inner) = new_delegate_with_precompositor(None);
        let mut composition = precomp_frame();
        let device_guard = device.lock().unwrap();
        let active_mode = device_guard.active_mode(0).unwrap();
        let result = delegate.run_precomposite(&mut composition, active_mode).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn run_precomposite_binds_fb_and_advances_ring() {
        let precompositor = Arc::new(FakePreCompositor::default());
        let (delegate, device, inner) =
            new_delegate_with_precompositor(Some(precompositor.clone() as Arc<dyn PreCompositor>));
        {
            let mut d = device.lock().unwrap();
            d.set_active_mode(0, 0).unwrap();
        }

        let mut first = precomp_frame();
        let (fb_first, w, h) = {
            let device_guard = device.lock().unwrap();
            let active_mode = device_guard.active_mode(0).unwrap();
            delegate.run_precomposite(&mut first, active_mode).unwrap().unwrap()
        };
        assert_eq!((w, h), (1920, 1080));
        assert_eq!(precompositor.calls.lock().unwrap().len(), 1);
        assert_eq!(inner.lock().unwrap().precomp_index, 1);
        assert_eq!(inner.lock().unwrap().precomp_ring[0].fb_id, Some(fb_first));

        let mut second = precomp_frame();
        let (fb_second, _, _) = {
            let device_guard = device.lock().unwrap();
            let active_mode = device_guard.active_mode(0).unwrap();
            delegate.run_precomposite(&mut second, active_mode).unwrap().unwrap()
        };
        assert_ne!(fb_first, fb_second, "ring must hand out a fresh fb id each frame");
        assert_eq!(inner.lock().unwrap().precomp_index, 2);
        assert_eq!(precompositor.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn queue_composition_rejects_frame_while_inactive() {
        let compositor = new_compositor();
        assert!(!compositor.is_active());
        let err = compositor.queue_composition(empty_frame()).unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[test]
    fn dpms_on_unblocks_subsequent_frame_queuing() {
        let compositor = new_compositor();
        let mut dpms = DrmDisplayComposition::new(0, 1, FakeSwSync::default(), Arc::new(NullImporter)).unwrap();
        dpms.set_dpms(DpmsMode::On).unwrap();
        compositor.queue_composition(dpms).unwrap();
        assert!(compositor.is_active());
        compositor.queue_composition(empty_frame()).unwrap();
    }

    #[test]
    fn dump_resets_frame_counter() {
        let compositor = new_compositor();
        let first = compositor.dump();
        assert_eq!(first.frames_composited, 0);
    }

    #[test]
    fn unused_layer_import() {
        let _ = DrmHwcLayer::new(1, 0);
    }
}
