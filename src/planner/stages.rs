//! Concrete plan stages, grounded on `PlanStageProtected`/`PlanStageGreedy`
//! in `examples/original_source/platform.cpp`.

use std::collections::BTreeMap;

use crate::composition::PrecompRegion;
use crate::device::types::Plane;
use crate::error::{Error, Result};
use crate::layer::DrmHwcLayer;

use super::{emplace, pop_plane, PlaneAssignment, PlaneAssignmentKind, PlanStage};

/// Pulls every layer whose `protected_usage()` is set out of the shared
/// layer map and onto a dedicated plane, ahead of any other stage.
pub struct ProtectedStage;

impl PlanStage for ProtectedStage {
    fn provision_planes(
        &self,
        composition: &mut Vec<PlaneAssignment>,
        layers: &mut BTreeMap<usize, DrmHwcLayer>,
        planes: &mut Vec<Plane>,
    ) -> Result<()> {
        let protected_indices: Vec<usize> = layers
            .iter()
            .filter(|(_, layer)| layer.protected_usage())
            .map(|(index, _)| *index)
            .collect();

        for index in protected_indices {
            let layer = layers.get(&index).expect("index just collected above");
            emplace(composition, planes, PlaneAssignmentKind::Layer, layer, index)?;
            layers.remove(&index);
        }

        Ok(())
    }
}

/// Assigns the rest of the stack first-come-first-served; stops cleanly once
/// the plane pool is exhausted (`ret == -ENOENT`) rather than treating it as
/// a hard failure, leaving any remaining layers in the map for a later
/// precomposition fallback.
pub struct GreedyStage;

impl PlanStage for GreedyStage {
    fn provision_planes(
        &self,
        composition: &mut Vec<PlaneAssignment>,
        layers: &mut BTreeMap<usize, DrmHwcLayer>,
        planes: &mut Vec<Plane>,
    ) -> Result<()> {
        let indices: Vec<usize> = layers.keys().copied().collect();

        for index in indices {
            let layer = layers.get(&index).expect("index just collected above");
            match emplace(composition, planes, PlaneAssignmentKind::Layer, layer, index) {
                Ok(()) => {
                    layers.remove(&index);
                }
                Err(Error::NoUsablePlane(_)) => break,
                Err(err) => return Err(err),
            }
        }

        if !layers.is_empty() {
            if let Some(plane) = pop_plane(planes) {
                let regions = layers
                    .iter()
                    .map(|(index, layer)| PrecompRegion {
                        layer_indices: vec![*index],
                        source_crop: layer.source_crop,
                        display_frame: layer.display_frame,
                    })
                    .collect();
                composition.push(PlaneAssignment {
                    kind: PlaneAssignmentKind::Precomposite,
                    plane,
                    layer_index: None,
                    precomp_regions: regions,
                });
                layers.clear();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::api::{PlaneInfo, PlaneKind};
    use crate::device::types::plane_from_info;
    use drm_fourcc::DrmFourcc;

    fn plane(handle: u32) -> Plane {
        plane_from_info(&PlaneInfo {
            id: handle,
            kind: PlaneKind::Overlay,
            possible_crtcs: 0b1,
            formats: vec![DrmFourcc::Xrgb8888],
        })
    }

    #[test]
    fn protected_stage_dedicates_plane_and_removes_layer() {
        let mut layers = BTreeMap::new();
        let mut protected = DrmHwcLayer::new(1, 0);
        protected.layer_type = crate::layer::LayerType::Protected;
        layers.insert(0, protected);
        layers.insert(1, DrmHwcLayer::new(2, 1));

        let mut planes = vec![plane(10), plane(11)];
        let mut composition = Vec::new();
        ProtectedStage.provision_planes(&mut composition, &mut layers, &mut planes).unwrap();

        assert_eq!(composition.len(), 1);
        assert_eq!(layers.len(), 1);
        assert!(!layers.contains_key(&0));
    }

    #[test]
    fn greedy_stage_stops_cleanly_when_planes_run_out() {
        let mut layers = BTreeMap::new();
        layers.insert(0, DrmHwcLayer::new(1, 0));
        layers.insert(1, DrmHwcLayer::new(2, 1));

        let mut planes = vec![plane(10)];
        let mut composition = Vec::new();
        GreedyStage.provision_planes(&mut composition, &mut layers, &mut planes).unwrap();

        assert_eq!(composition.len(), 1);
        assert_eq!(layers.len(), 1, "second layer left for precomposition fallback");
    }

    #[test]
    fn greedy_stage_precomposites_layers_no_plane_can_host() {
        let mut layers = BTreeMap::new();
        let mut unsupported = DrmHwcLayer::new(1, 0);
        unsupported.buffer = Some(crate::layer::ImportedBuffer {
            format: Some(DrmFourcc::Nv12),
            ..Default::default()
        });
        layers.insert(0, unsupported);

        let mut planes = vec![plane(10)];
        let mut composition = Vec::new();
        GreedyStage.provision_planes(&mut composition, &mut layers, &mut planes).unwrap();

        assert!(layers.is_empty(), "leftover layer handed to precomposition");
        assert_eq!(composition.len(), 1);
        assert_eq!(composition[0].kind, PlaneAssignmentKind::Precomposite);
        assert_eq!(composition[0].precomp_regions.len(), 1);
        assert_eq!(composition[0].precomp_regions[0].layer_indices, vec![0]);
    }
}
