//! Plane provisioning (spec.md §5 "Plane assignment").
//!
//! Grounded on `examples/original_source/platform.h`/`platform.cpp`'s
//! `Planner`/`Planner::PlanStage` interfaces: an ordered list of stages each
//! consumes from a shared layer map and a shared plane pool, emplacing
//! layer-plane pairs into the resulting composition plan.

pub mod stages;

use std::collections::BTreeMap;

use crate::composition::PrecompRegion;
use crate::device::types::Plane;
use crate::error::{Error, Result};
use crate::layer::DrmHwcLayer;

/// `DrmCompositionPlane::Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneAssignmentKind {
    Disable,
    Layer,
    Precomposite,
}

/// One entry of a provisioned plan: a kernel plane bound to either a single
/// layer or the precomposition surface.
#[derive(Debug, Clone)]
pub struct PlaneAssignment {
    pub kind: PlaneAssignmentKind,
    pub plane: Plane,
    /// Index into the original layer map, when `kind == Layer`.
    pub layer_index: Option<usize>,
    /// The source regions this plane's precomposition framebuffer covers,
    /// populated only when `kind == Precomposite` (spec.md §3 "ring of
    /// DRM_DISPLAY_BUFFERS pre-composition framebuffers").
    pub precomp_regions: Vec<PrecompRegion>,
}

/// A stage consumes from `layers`/`planes` and appends to `composition`.
/// Mirrors `Planner::PlanStage::ProvisionPlanes`.
pub trait PlanStage {
    fn provision_planes(
        &self,
        composition: &mut Vec<PlaneAssignment>,
        layers: &mut BTreeMap<usize, DrmHwcLayer>,
        planes: &mut Vec<Plane>,
    ) -> Result<()>;
}

/// Removes and returns the plane pool's first entry (`PopPlane`).
pub(crate) fn pop_plane(planes: &mut Vec<Plane>) -> Option<Plane> {
    if planes.is_empty() {
        None
    } else {
        Some(planes.remove(0))
    }
}

/// Checks whether `plane` can host `layer` given its resolved property set
/// (`ValidatePlane`): rotation and alpha require the matching property to
/// exist at all; blending only requires the property when the layer needs
/// more than `None`/`PreMult`, and otherwise resolves to a concrete enum value.
pub(crate) fn validate_plane(plane: &Plane, layer: &DrmHwcLayer) -> Result<()> {
    use crate::layer::{Blending, Transform};

    if plane.props.rotation.is_none() && layer.transform != Transform::IDENTITY {
        return Err(Error::NoUsablePlane(plane.handle));
    }
    if plane.props.alpha.is_none() && layer.alpha != 0xffff {
        return Err(Error::NoUsablePlane(plane.handle));
    }
    match plane.props.blend {
        None => {
            if !matches!(layer.blending, Blending::None | Blending::PreMult) {
                return Err(Error::NoUsablePlane(plane.handle));
            }
        }
        Some(_) => {
            let name = match layer.blending {
                Blending::PreMult => "premult",
                Blending::Coverage => "coverage",
                Blending::None => "none",
            };
            if !plane.props.blend_enum.contains_key(name) {
                return Err(Error::NoUsablePlane(plane.handle));
            }
        }
    }
    if let Some(format) = layer.buffer.as_ref().and_then(|b| b.format) {
        if !plane.supports_format(format) {
            return Err(Error::NoUsablePlane(plane.handle));
        }
    }
    Ok(())
}

/// Finds the first plane in `planes` that validates against `layer`, popping
/// planes off the front as it goes; planes that are popped and rejected, but
/// are not zpos-immutable, are returned to the front of the pool afterwards
/// (`Emplace`). On success the winning plane is appended to `composition`.
pub(crate) fn emplace(
    composition: &mut Vec<PlaneAssignment>,
    planes: &mut Vec<Plane>,
    kind: PlaneAssignmentKind,
    layer: &DrmHwcLayer,
    layer_index: usize,
) -> Result<()> {
    let mut unused = Vec::new();
    let mut result = Err(Error::NoUsablePlane(0));

    while let Some(plane) = pop_plane(planes) {
        match validate_plane(&plane, layer) {
            Ok(()) => {
                result = Ok(plane);
                break;
            }
            Err(err) => {
                if !plane.props.zpos_immutable {
                    unused.push(plane);
                }
                result = Err(err);
            }
        }
    }

    planes.splice(0..0, unused);

    let plane = result?;
    composition.push(PlaneAssignment {
        kind,
        plane,
        layer_index: Some(layer_index),
        precomp_regions: Vec::new(),
    });
    Ok(())
}

/// Filters primary and overlay planes down to those usable on `crtc`
/// (`GetUsablePlanes`): primary planes first, then overlays, each only if
/// the crtc bit is set.
pub(crate) fn usable_planes(crtc_index: u32, primary: &[Plane], overlay: &[Plane]) -> Vec<Plane> {
    primary
        .iter()
        .chain(overlay.iter())
        .filter(|p| p.supports_crtc(crtc_index))
        .cloned()
        .collect()
}

/// Runs an ordered list of stages over a layer stack and crtc-usable plane
/// pool, producing a plane assignment plan (`Planner::ProvisionPlanes`).
pub struct Planner {
    stages: Vec<Box<dyn PlanStage>>,
}

impl Planner {
    pub fn new(stages: Vec<Box<dyn PlanStage>>) -> Self {
        Planner { stages }
    }

    /// The default stage order used by every display: dedicate protected
    /// layers first, then greedily assign the rest.
    pub fn default_stages() -> Self {
        Planner::new(vec![
            Box::new(stages::ProtectedStage),
            Box::new(stages::GreedyStage),
        ])
    }

    pub fn provision_planes(
        &self,
        mut layers: BTreeMap<usize, DrmHwcLayer>,
        crtc_index: u32,
        primary_planes: &[Plane],
        overlay_planes: &[Plane],
    ) -> Result<Vec<PlaneAssignment>> {
        let mut composition = Vec::new();
        let mut planes = usable_planes(crtc_index, primary_planes, overlay_planes);
        if planes.is_empty() {
            return Err(Error::NoUsablePlane(0));
        }

        for stage in &self.stages {
            stage.provision_planes(&mut composition, &mut layers, &mut planes)?;
        }

        Ok(composition)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::api::{PlaneInfo, PlaneKind};
    use crate::device::types::plane_from_info;
    use drm_fourcc::DrmFourcc;

    fn primary(handle: u32) -> Plane {
        plane_from_info(&PlaneInfo {
            id: handle,
            kind: PlaneKind::Primary,
            possible_crtcs: 0b1,
            formats: vec![DrmFourcc::Xrgb8888],
        })
    }

    #[test]
    fn usable_planes_filters_by_crtc_bit() {
        let mut other = primary(2);
        other.possible_crtcs = 0b10;
        let planes = usable_planes(0, &[primary(1), other], &[]);
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].handle, 1);
    }

    #[test]
    fn validate_plane_rejects_rotation_without_property() {
        let mut layer = DrmHwcLayer::new(1, 0);
        layer.transform = crate::layer::Transform::ROTATE_90;
        let plane = primary(1);
        assert!(validate_plane(&plane, &layer).is_err());
    }

    #[test]
    fn validate_plane_allows_premult_without_blend_property() {
        let mut layer = DrmHwcLayer::new(1, 0);
        layer.blending = crate::layer::Blending::PreMult;
        let plane = primary(1);
        assert!(validate_plane(&plane, &layer).is_ok());
    }

    #[test]
    fn validate_plane_rejects_coverage_without_blend_property() {
        let mut layer = DrmHwcLayer::new(1, 0);
        layer.blending = crate::layer::Blending::Coverage;
        let plane = primary(1);
        assert!(validate_plane(&plane, &layer).is_err());
    }

    #[test]
    fn validate_plane_rejects_unsupported_format() {
        let mut layer = DrmHwcLayer::new(1, 0);
        layer.buffer = Some(crate::layer::ImportedBuffer {
            format: Some(DrmFourcc::Nv12),
            ..Default::default()
        });
        let plane = primary(1);
        assert!(validate_plane(&plane, &layer).is_err());
    }

    #[test]
    fn provision_planes_errors_when_no_planes_usable_on_crtc() {
        let planner = Planner::default_stages();
        let layers = BTreeMap::new();
        let err = planner.provision_planes(layers, 5, &[], &[]).unwrap_err();
        assert!(matches!(err, Error::NoUsablePlane(_)));
    }
}
