//! Per-layer facade state (spec.md §4.9 `HwcLayer`).
//!
//! Grounded on `examples/original_source/drmhwctwo.h`'s `DrmHwcTwo::HwcLayer`:
//! a bag of client-set properties (buffer, blend mode, crop, display frame,
//! transform, z-order, composition type) plus the validated type `Validate`
//! computed last, translated into a [`crate::layer::DrmHwcLayer`] for planning.

use crate::backend::allocator::dmabuf::Dmabuf;
use crate::layer::{Blending, DrmHwcLayer, FRect, LayerType, Rect, Transform};
use crate::sync::Fence;

use super::types::CompositionType;

/// One client-visible layer, addressed by a monotonic id (`hwc2_layer_t`).
#[derive(Debug)]
pub struct HwcLayer {
    pub(super) buffer: Option<Dmabuf>,
    pub(super) acquire_fence: Option<Fence>,
    pub(super) blend_mode: Blending,
    pub(super) composition_type: CompositionType,
    pub(super) validated_type: CompositionType,
    pub(super) display_frame: Rect,
    pub(super) source_crop: FRect,
    pub(super) plane_alpha: f32,
    pub(super) transform: Transform,
    pub(super) z_order: u32,
    pub(super) protected: bool,
    pub(super) layer_type: LayerType,
}

impl Default for HwcLayer {
    fn default() -> Self {
        HwcLayer {
            buffer: None,
            acquire_fence: None,
            blend_mode: Blending::None,
            composition_type: CompositionType::Device,
            validated_type: CompositionType::Invalid,
            display_frame: Rect::default(),
            source_crop: FRect::default(),
            plane_alpha: 1.0,
            transform: Transform::IDENTITY,
            z_order: 0,
            protected: false,
            layer_type: LayerType::Normal,
        }
    }
}

impl HwcLayer {
    pub fn set_layer_buffer(&mut self, buffer: Option<Dmabuf>, acquire_fence: Option<Fence>) {
        self.buffer = buffer;
        self.acquire_fence = acquire_fence;
    }

    pub fn set_layer_blend_mode(&mut self, mode: Blending) {
        self.blend_mode = mode;
    }

    pub fn set_layer_composition_type(&mut self, kind: CompositionType) {
        self.composition_type = kind;
    }

    pub fn set_layer_display_frame(&mut self, frame: Rect) {
        self.display_frame = frame;
    }

    pub fn set_layer_source_crop(&mut self, crop: FRect) {
        self.source_crop = crop;
    }

    /// Stored as [0.0, 1.0] at the ABI boundary; converted to the 16-bit
    /// fixed-point `alpha` the planner/compositor operate on.
    pub fn set_layer_plane_alpha(&mut self, alpha: f32) {
        self.plane_alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn set_layer_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn set_layer_z_order(&mut self, z: u32) {
        self.z_order = z;
    }

    pub fn set_protected(&mut self, protected: bool) {
        self.protected = protected;
    }

    pub fn composition_type(&self) -> CompositionType {
        self.composition_type
    }

    pub fn validated_type(&self) -> CompositionType {
        self.validated_type
    }

    pub fn z_order(&self) -> u32 {
        self.z_order
    }

    pub fn display_frame(&self) -> Rect {
        self.display_frame
    }

    pub fn source_crop(&self) -> FRect {
        self.source_crop
    }

    pub fn buffer_ref(&self) -> Option<&Dmabuf> {
        self.buffer.as_ref()
    }

    pub fn acquire_fence_clone(&self) -> Option<Fence> {
        self.acquire_fence.as_ref().and_then(|f| f.try_clone().ok())
    }

    pub fn layer_type_is_video(&self) -> bool {
        self.layer_type == LayerType::Video
    }

    pub(super) fn set_validated_type(&mut self, kind: CompositionType) {
        self.validated_type = kind;
    }

    /// `AcceptDisplayChanges`: the client agrees to every HWC-proposed type.
    pub(super) fn accept_validated_type(&mut self) {
        self.composition_type = self.validated_type;
    }

    /// Builds the planning-time [`DrmHwcLayer`] for this client layer. The
    /// imported buffer is attached by the caller once `Importer::import_buffer`
    /// has run, so this alone never touches the kernel.
    pub(super) fn to_drm_hwc_layer(&self, sf_handle: u64) -> DrmHwcLayer {
        let mut layer = DrmHwcLayer::new(sf_handle, self.z_order);
        layer.transform = self.transform;
        layer.blending = self.blend_mode;
        layer.alpha = (self.plane_alpha * 0xffff as f32).round() as u16;
        layer.source_crop = self.source_crop;
        layer.display_frame = self.display_frame;
        layer.layer_type = if self.protected {
            LayerType::Protected
        } else {
            self.layer_type
        };
        layer.gralloc_usage_protected = self.protected;
        layer
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plane_alpha_is_clamped_to_unit_range() {
        let mut layer = HwcLayer::default();
        layer.set_layer_plane_alpha(1.5);
        assert_eq!(layer.plane_alpha, 1.0);
        layer.set_layer_plane_alpha(-1.0);
        assert_eq!(layer.plane_alpha, 0.0);
    }

    #[test]
    fn to_drm_hwc_layer_converts_alpha_to_16_bit() {
        let mut layer = HwcLayer::default();
        layer.set_layer_plane_alpha(1.0);
        let drm_layer = layer.to_drm_hwc_layer(1);
        assert_eq!(drm_layer.alpha, 0xffff);
    }

    #[test]
    fn protected_flag_forces_protected_layer_type() {
        let mut layer = HwcLayer::default();
        layer.set_protected(true);
        let drm_layer = layer.to_drm_hwc_layer(1);
        assert!(drm_layer.protected_usage());
    }
}
