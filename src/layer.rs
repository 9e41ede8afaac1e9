//! Layer data model (spec.md §3 "Layer").
//!
//! Grounded on `examples/original_source/drmhwcomposer.h`'s `DrmHwcLayer` /
//! `DrmHwcTransform` / `DrmHwcBlending` / `DrmHwcLayerType`, and
//! `drm_hwcomposer.h`'s `hwc_drm_bo` for the imported-buffer record.

use bitflags::bitflags;
use drm_fourcc::DrmFourcc;

use crate::sync::Fence;

bitflags! {
    /// Bitmask transform applied to a layer before scanout, matching
    /// `DrmHwcTransform` (`kFlipH`/`kFlipV`/`kRotate90/180/270`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Transform: u32 {
        const IDENTITY = 0;
        const FLIP_H = 1 << 0;
        const FLIP_V = 1 << 1;
        const ROTATE_90 = 1 << 2;
        const ROTATE_180 = 1 << 3;
        const ROTATE_270 = 1 << 4;
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}

/// `DrmHwcBlending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Blending {
    #[default]
    None,
    PreMult,
    Coverage,
}

/// `DrmHwcLayerType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerType {
    #[default]
    Normal,
    Cursor,
    Protected,
    Video,
    SolidColor,
}

/// A float-pixel rectangle, used for source crop.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl FRect {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// 16.16 fixed point conversion: float pixels * 65536 (spec.md §6).
    pub fn to_fixed16(self) -> FixedRect {
        FixedRect {
            left: (self.left * 65536.0) as i64,
            top: (self.top * 65536.0) as i64,
            width: (self.width() * 65536.0) as i64,
            height: (self.height() * 65536.0) as i64,
        }
    }
}

/// A source crop already converted to 16.16 fixed point for an atomic commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRect {
    pub left: i64,
    pub top: i64,
    pub width: i64,
    pub height: i64,
}

/// An integer-pixel rectangle, used for the on-screen display frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// An imported buffer record, matching `hwc_drm_bo` field-for-field.
#[derive(Debug, Clone, Default)]
pub struct ImportedBuffer {
    pub width: u32,
    pub height: u32,
    pub format: Option<DrmFourcc>,
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
    pub gem_handles: [u32; 4],
    pub num_planes: usize,
    pub fb_id: u32,
}

/// One layer in a frame's layer stack (`DrmHwcLayer`).
#[derive(Debug)]
pub struct DrmHwcLayer {
    pub sf_handle: u64,
    pub buffer: Option<ImportedBuffer>,
    pub transform: Transform,
    pub blending: Blending,
    pub alpha: u16,
    pub source_crop: FRect,
    pub display_frame: Rect,
    pub layer_type: LayerType,
    pub acquire_fence: Option<Fence>,
    pub release_fence: Option<Fence>,
    pub z_order: u32,
    pub gralloc_usage_protected: bool,
}

impl DrmHwcLayer {
    pub fn new(sf_handle: u64, z_order: u32) -> Self {
        DrmHwcLayer {
            sf_handle,
            buffer: None,
            transform: Transform::IDENTITY,
            blending: Blending::None,
            alpha: 0xffff,
            source_crop: FRect::default(),
            display_frame: Rect::default(),
            layer_type: LayerType::Normal,
            acquire_fence: None,
            release_fence: None,
            z_order,
            gralloc_usage_protected: false,
        }
    }

    /// `protected_usage()`: protected layers always get a dedicated plane.
    pub fn protected_usage(&self) -> bool {
        self.gralloc_usage_protected || self.layer_type == LayerType::Protected
    }

    pub fn fb_id(&self) -> Option<u32> {
        self.buffer.as_ref().filter(|b| b.fb_id != 0).map(|b| b.fb_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed16_conversion_matches_spec_formula() {
        let crop = FRect {
            left: 0.0,
            top: 0.0,
            right: 1920.0,
            bottom: 1080.0,
        };
        let fixed = crop.to_fixed16();
        assert_eq!(fixed.width, 1920 << 16);
        assert_eq!(fixed.height, 1080 << 16);
    }

    #[test]
    fn protected_layer_forces_dedicated_plane_flag() {
        let mut layer = DrmHwcLayer::new(1, 0);
        layer.layer_type = LayerType::Protected;
        assert!(layer.protected_usage());
    }

    #[test]
    fn fb_id_is_none_when_buffer_missing_or_zero() {
        let layer = DrmHwcLayer::new(1, 0);
        assert_eq!(layer.fb_id(), None);
    }
}
