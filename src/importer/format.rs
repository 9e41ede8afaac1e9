//! Pure format-translation helpers (spec.md §4.3).
//!
//! Grounded on `examples/original_source/platformdrmgeneric.cpp`'s
//! `ConvertHalFormatToDrm`/`DrmFormatToBitsPerPixel`, generalized from the
//! Android HAL format space to the dmabuf fourcc space this crate's layers
//! arrive in, plus the Intel Y-tiled NV12 and minigbm multi-plane YUV rules
//! named in spec.md §4.3.

use drm_fourcc::{DrmFourcc, DrmModifier};

/// Bits per pixel for the first plane of `format`, used for stride sanity
/// checks and diagnostics. Falls back to 32 for anything unrecognized,
/// matching the original's fallback behavior.
pub fn bits_per_pixel(format: DrmFourcc) -> u32 {
    match format {
        DrmFourcc::Argb8888 | DrmFourcc::Xrgb8888 | DrmFourcc::Abgr8888 | DrmFourcc::Xbgr8888 => 32,
        DrmFourcc::Bgr888 | DrmFourcc::Rgb888 => 24,
        DrmFourcc::Rgb565 | DrmFourcc::Bgr565 => 16,
        DrmFourcc::Nv12 | DrmFourcc::Yvu420 | DrmFourcc::Yuv420 => 12,
        _ => 32,
    }
}

/// Number of distinct image planes a format decomposes into on import.
pub fn plane_count(format: DrmFourcc) -> usize {
    match format {
        DrmFourcc::Nv12 => 2,
        DrmFourcc::Yvu420 | DrmFourcc::Yuv420 => 3,
        _ => 1,
    }
}

/// True when `modifier` names a real tiling layout (e.g. the Intel Y-tiled
/// NV12 case named in spec.md §4.3) rather than linear/unset, meaning the
/// framebuffer must be created with `ADDFB2WithModifiers` instead of plain
/// `ADDFB2` (spec.md §6 "Framebuffer creation"), mirroring the
/// Linear/Invalid checks `backend/drm/gbm.rs` uses to decide the same thing.
pub fn requires_modifiers(modifier: DrmModifier) -> bool {
    modifier != DrmModifier::Linear && modifier != DrmModifier::Invalid
}

/// Computes per-plane offsets for a minigbm-style multi-plane YUV layout
/// (e.g. `YVU420_ANDROID`) given a single base stride, stacking planes one
/// after another and sharing one gem handle across all of them (spec.md
/// §4.3: "shares the gem handle across planes").
pub fn planar_yuv_offsets(format: DrmFourcc, width: u32, height: u32, luma_stride: u32) -> Vec<(u32, u32)> {
    let planes = plane_count(format);
    let mut out = Vec::with_capacity(planes);
    let mut offset = 0u32;
    out.push((luma_stride, offset));
    offset += luma_stride * height;
    if planes > 1 {
        let chroma_stride = luma_stride / 2;
        let chroma_height = height / 2;
        for _ in 1..planes {
            out.push((chroma_stride, offset));
            offset += chroma_stride * chroma_height;
        }
    }
    let _ = width;
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tiled_modifier_requires_modifiers_path() {
        assert!(!requires_modifiers(DrmModifier::Linear));
        assert!(!requires_modifiers(DrmModifier::Invalid));
    }

    #[test]
    fn yuv420_splits_into_three_planes_sharing_one_handle() {
        let offsets = planar_yuv_offsets(DrmFourcc::Yuv420, 640, 480, 640);
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets[0], (640, 0));
        assert_eq!(offsets[1].0, 320);
    }

    #[test]
    fn nv12_bpp_matches_original_fallback_table() {
        assert_eq!(bits_per_pixel(DrmFourcc::Nv12), 12);
        assert_eq!(bits_per_pixel(DrmFourcc::Argb8888), 32);
    }
}
