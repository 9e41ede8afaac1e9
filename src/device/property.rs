//! Property-id resolution and mode-blob lifecycle.
//!
//! Grounded on `backend/drm/device/atomic.rs`'s `add_props`/`map_props` helpers:
//! each KMS object's property ids are looked up by name exactly once, at
//! enumeration time, and cached — later atomic commits only ever touch the
//! cached [`PropertyId`], never re-resolving by name.

use std::sync::Arc;

use crate::error::{Error, Result};

use super::api::{KernelDevice, PropertyInfo, PropertyId};
use super::types::{ConnectorProps, CrtcProps, PlaneProps};

pub(crate) fn find<'a>(props: &'a [PropertyInfo], name: &str) -> Option<&'a PropertyInfo> {
    props.iter().find(|p| p.name == name)
}

pub(crate) fn require(
    props: &[PropertyInfo],
    object: u32,
    name: &'static str,
) -> Result<PropertyId> {
    find(props, name)
        .map(|p| p.id)
        .ok_or(Error::UnknownProperty {
            handle: object,
            name,
        })
}

pub(crate) fn fill_crtc_props(props: &[PropertyInfo], object: u32) -> Result<CrtcProps> {
    Ok(CrtcProps {
        active: Some(require(props, object, "ACTIVE")?),
        mode_id: Some(require(props, object, "MODE_ID")?),
        out_fence_ptr: find(props, "OUT_FENCE_PTR").map(|p| p.id),
    })
}

pub(crate) fn fill_connector_props(props: &[PropertyInfo], object: u32, writeback: bool) -> Result<ConnectorProps> {
    let mut out = ConnectorProps {
        dpms: find(props, "DPMS").map(|p| p.id),
        crtc_id: Some(require(props, object, "CRTC_ID")?),
        ..Default::default()
    };
    if writeback {
        out.writeback_pixel_formats = Some(require(props, object, "WRITEBACK_PIXEL_FORMATS")?);
        out.writeback_fb_id = Some(require(props, object, "WRITEBACK_FB_ID")?);
        out.writeback_out_fence_ptr = find(props, "WRITEBACK_OUT_FENCE_PTR").map(|p| p.id);
    }
    Ok(out)
}

pub(crate) fn fill_plane_props(props: &[PropertyInfo], object: u32) -> Result<PlaneProps> {
    let mut out = PlaneProps {
        crtc_id: Some(require(props, object, "CRTC_ID")?),
        fb_id: Some(require(props, object, "FB_ID")?),
        crtc_x: Some(require(props, object, "CRTC_X")?),
        crtc_y: Some(require(props, object, "CRTC_Y")?),
        crtc_w: Some(require(props, object, "CRTC_W")?),
        crtc_h: Some(require(props, object, "CRTC_H")?),
        src_x: Some(require(props, object, "SRC_X")?),
        src_y: Some(require(props, object, "SRC_Y")?),
        src_w: Some(require(props, object, "SRC_W")?),
        src_h: Some(require(props, object, "SRC_H")?),
        rotation: find(props, "rotation").map(|p| p.id),
        alpha: find(props, "alpha").map(|p| p.id),
        zpos: find(props, "zpos").map(|p| p.id),
        in_fence_fd: find(props, "IN_FENCE_FD").map(|p| p.id),
        ..Default::default()
    };
    if let Some(rotation) = find(props, "rotation") {
        out.rotation_enum = rotation
            .enum_values
            .iter()
            .filter_map(|(name, value)| match name.as_str() {
                "rotate-0" => Some(("identity", *value)),
                "reflect-x" => Some(("reflect-x", *value)),
                "reflect-y" => Some(("reflect-y", *value)),
                "rotate-90" => Some(("rotate-90", *value)),
                "rotate-180" => Some(("rotate-180", *value)),
                "rotate-270" => Some(("rotate-270", *value)),
                _ => None,
            })
            .collect();
    }
    if let Some(blend) = find(props, "pixel blend mode") {
        out.blend = Some(blend.id);
        out.blend_enum = blend
            .enum_values
            .iter()
            .filter_map(|(name, value)| match name.as_str() {
                "None" => Some(("none", *value)),
                "Pre-multiplied" => Some(("premult", *value)),
                "Coverage" => Some(("coverage", *value)),
                _ => None,
            })
            .collect();
    }
    if let Some(zpos) = find(props, "zpos") {
        out.zpos_immutable = zpos.immutable;
    }
    Ok(out)
}

/// Owns a mode-id property blob for its lifetime and destroys it on drop unless
/// already consumed, mirroring `AtomicDrmSurface::commit`'s "destroy old blob only
/// once the new one is live" rule (spec.md §4.1 "Property blob management").
pub struct ModeBlob {
    device: Arc<dyn KernelDevice>,
    id: u32,
    destroyed: bool,
}

impl ModeBlob {
    pub fn create(device: Arc<dyn KernelDevice>, data: &[u8]) -> Result<Self> {
        let id = device.create_property_blob(data)?;
        Ok(ModeBlob {
            device,
            id,
            destroyed: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn destroy(mut self) -> Result<()> {
        self.device.destroy_property_blob(self.id)?;
        self.destroyed = true;
        Ok(())
    }
}

impl Drop for ModeBlob {
    fn drop(&mut self) {
        if !self.destroyed {
            let _ = self.device.destroy_property_blob(self.id);
        }
    }
}

/// Encodes a mode timing into the kernel's `drm_mode_modeinfo` byte layout
/// (`<drm/drm_mode.h>`), the same struct `drm-rs`'s `Mode` serializes under
/// `Device::create_property_blob` in `backend/drm/surface/atomic.rs`.
pub fn encode_mode_timing(timing: &super::api::ModeTiming) -> Vec<u8> {
    let mut buf = Vec::with_capacity(68);
    buf.extend_from_slice(&timing.clock.to_ne_bytes());
    buf.extend_from_slice(&timing.hdisplay.to_ne_bytes());
    buf.extend_from_slice(&timing.hsync_start.to_ne_bytes());
    buf.extend_from_slice(&timing.hsync_end.to_ne_bytes());
    buf.extend_from_slice(&timing.htotal.to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes()); // hskew, unused by this crate
    buf.extend_from_slice(&timing.vdisplay.to_ne_bytes());
    buf.extend_from_slice(&timing.vsync_start.to_ne_bytes());
    buf.extend_from_slice(&timing.vsync_end.to_ne_bytes());
    buf.extend_from_slice(&timing.vtotal.to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes()); // vscan, unused by this crate
    buf.extend_from_slice(&timing.vrefresh.to_ne_bytes());
    buf.extend_from_slice(&timing.flags.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes()); // type
    let mut name = [0u8; 32];
    let bytes = timing.name.as_bytes();
    let len = bytes.len().min(31);
    name[..len].copy_from_slice(&bytes[..len]);
    buf.extend_from_slice(&name);
    buf
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::api::{PropValue, PropertyInfo};

    fn props() -> Vec<PropertyInfo> {
        vec![
            PropertyInfo {
                id: 1,
                name: "ACTIVE".into(),
                value: PropValue::Bool(false),
                immutable: false,
                enum_values: vec![],
            },
            PropertyInfo {
                id: 2,
                name: "MODE_ID".into(),
                value: PropValue::Blob(0),
                immutable: false,
                enum_values: vec![],
            },
        ]
    }

    #[test]
    fn fill_crtc_props_resolves_required_ids() {
        let resolved = fill_crtc_props(&props(), 42).unwrap();
        assert_eq!(resolved.active, Some(1));
        assert_eq!(resolved.mode_id, Some(2));
        assert_eq!(resolved.out_fence_ptr, None);
    }

    #[test]
    fn missing_required_property_is_an_error() {
        let err = require(&props(), 42, "OUT_FENCE_PTR").unwrap_err();
        assert!(matches!(err, Error::UnknownProperty { name: "OUT_FENCE_PTR", .. }));
    }

    #[test]
    fn encode_mode_timing_has_drm_mode_modeinfo_length() {
        let timing = super::super::api::ModeTiming {
            clock: 148_500,
            hdisplay: 1920,
            hsync_start: 2008,
            hsync_end: 2052,
            htotal: 2200,
            vdisplay: 1080,
            vsync_start: 1084,
            vsync_end: 1089,
            vtotal: 1125,
            vrefresh: 60,
            flags: 0,
            preferred: true,
            name: "1920x1080".into(),
        };
        let bytes = encode_mode_timing(&timing);
        assert_eq!(bytes.len(), 68);
        assert_eq!(u32::from_ne_bytes(bytes[0..4].try_into().unwrap()), 148_500);
    }
}
