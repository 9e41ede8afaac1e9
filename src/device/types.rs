//! Crate-owned topology types (spec.md §3 "Device topology").

use std::collections::HashMap;

use drm_fourcc::DrmFourcc;

use super::api::{
    ConnectionState, ConnectorId, ConnectorInfo, ConnectorKind, CrtcId, CrtcInfo, EncoderId,
    EncoderInfo, ModeTiming, PlaneId, PlaneInfo, PlaneKind, PropertyId,
};

/// A display mode. Equality is field-wise on the timing, per spec.md §3; the id is
/// assigned once per distinct timing and is excluded from equality/hash so that
/// `UpdateModes` (spec.md §4.1) can recognize "the same mode" across a rescan.
#[derive(Debug, Clone)]
pub struct Mode {
    pub id: u32,
    pub timing: ModeTiming,
}

impl Mode {
    pub fn width(&self) -> u32 {
        self.timing.hdisplay as u32
    }

    pub fn height(&self) -> u32 {
        self.timing.vdisplay as u32
    }

    pub fn refresh_hz(&self) -> f64 {
        if self.timing.vrefresh != 0 {
            self.timing.vrefresh as f64
        } else if self.timing.htotal != 0 && self.timing.vtotal != 0 {
            self.timing.clock as f64 * 1000.0 / (self.timing.htotal as f64 * self.timing.vtotal as f64)
        } else {
            60.0
        }
    }

    pub fn is_preferred(&self) -> bool {
        self.timing.preferred
    }

    /// Field-wise timing equality, ignoring the assigned id and name.
    pub fn same_timing(&self, other: &ModeTiming) -> bool {
        let t = &self.timing;
        t.clock == other.clock
            && t.hdisplay == other.hdisplay
            && t.hsync_start == other.hsync_start
            && t.hsync_end == other.hsync_end
            && t.htotal == other.htotal
            && t.vdisplay == other.vdisplay
            && t.vsync_start == other.vsync_start
            && t.vsync_end == other.vsync_end
            && t.vtotal == other.vtotal
            && t.flags == other.flags
    }
}

/// A CRTC's named mutable properties, resolved once at enumeration time.
#[derive(Debug, Clone, Default)]
pub struct CrtcProps {
    pub active: Option<PropertyId>,
    pub mode_id: Option<PropertyId>,
    pub out_fence_ptr: Option<PropertyId>,
}

#[derive(Debug, Clone)]
pub struct Crtc {
    pub handle: CrtcId,
    pub pipe: u32,
    /// Which display index currently owns this crtc, if any.
    pub display: Option<usize>,
    pub props: CrtcProps,
}

#[derive(Debug, Clone)]
pub struct Encoder {
    pub handle: EncoderId,
    pub crtc: Option<CrtcId>,
    pub possible_crtcs: u32,
    pub possible_clones: Vec<EncoderId>,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectorProps {
    pub dpms: Option<PropertyId>,
    pub crtc_id: Option<PropertyId>,
    pub writeback_pixel_formats: Option<PropertyId>,
    pub writeback_fb_id: Option<PropertyId>,
    pub writeback_out_fence_ptr: Option<PropertyId>,
}

#[derive(Debug, Clone)]
pub struct Connector {
    pub handle: ConnectorId,
    pub kind: ConnectorKind,
    pub state: ConnectionState,
    pub mm_width: u32,
    pub mm_height: u32,
    pub encoders: Vec<EncoderId>,
    pub current_encoder: Option<EncoderId>,
    pub modes: Vec<Mode>,
    pub preferred_mode: Option<usize>,
    pub active_mode: Option<usize>,
    pub props: ConnectorProps,
    /// Assigned once the connector is routed to a display pipe (spec.md §4.1 step 6).
    pub display: Option<usize>,
}

impl Connector {
    pub fn is_writeback(&self) -> bool {
        self.kind == ConnectorKind::Writeback
    }

    /// dpi = display_pixels * 25400 / mm_dimension, -1 when mm_dimension == 0 (spec.md §6).
    pub fn dpi(&self, pixels: u32, mm: u32) -> i32 {
        if mm == 0 {
            -1
        } else {
            ((pixels as u64 * 25400) / mm as u64) as i32
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlaneProps {
    pub crtc_id: Option<PropertyId>,
    pub fb_id: Option<PropertyId>,
    pub crtc_x: Option<PropertyId>,
    pub crtc_y: Option<PropertyId>,
    pub crtc_w: Option<PropertyId>,
    pub crtc_h: Option<PropertyId>,
    pub src_x: Option<PropertyId>,
    pub src_y: Option<PropertyId>,
    pub src_w: Option<PropertyId>,
    pub src_h: Option<PropertyId>,
    pub rotation: Option<PropertyId>,
    pub rotation_enum: HashMap<&'static str, u64>,
    pub blend: Option<PropertyId>,
    pub blend_enum: HashMap<&'static str, u64>,
    pub alpha: Option<PropertyId>,
    pub zpos: Option<PropertyId>,
    pub zpos_immutable: bool,
    pub in_fence_fd: Option<PropertyId>,
}

#[derive(Debug, Clone)]
pub struct Plane {
    pub handle: PlaneId,
    pub kind: PlaneKind,
    pub possible_crtcs: u32,
    pub formats: Vec<DrmFourcc>,
    pub props: PlaneProps,
}

impl Plane {
    pub fn supports_crtc(&self, crtc_index: u32) -> bool {
        self.possible_crtcs & (1 << crtc_index) != 0
    }

    /// Treats the cursor format family as collapsing to ARGB8888 (spec.md §4.4).
    pub fn supports_format(&self, format: DrmFourcc) -> bool {
        let format = if self.kind == PlaneKind::Cursor {
            DrmFourcc::Argb8888
        } else {
            format
        };
        self.formats.contains(&format)
    }
}

pub(crate) fn crtc_from_info(info: &CrtcInfo) -> Crtc {
    Crtc {
        handle: info.id,
        pipe: info.pipe,
        display: None,
        props: CrtcProps::default(),
    }
}

pub(crate) fn encoder_from_info(info: &EncoderInfo) -> Encoder {
    Encoder {
        handle: info.id,
        crtc: info.crtc,
        possible_crtcs: info.possible_crtcs,
        possible_clones: Vec::new(),
    }
}

pub(crate) fn connector_from_info(info: &ConnectorInfo, next_mode_id: &mut u32) -> Connector {
    let modes: Vec<Mode> = info
        .modes
        .iter()
        .map(|timing| {
            let id = *next_mode_id;
            *next_mode_id += 1;
            Mode {
                id,
                timing: timing.clone(),
            }
        })
        .collect();
    let preferred_mode = modes
        .iter()
        .position(|m| m.is_preferred())
        .or(if modes.is_empty() { None } else { Some(0) });

    Connector {
        handle: info.id,
        kind: info.kind,
        state: info.state,
        mm_width: info.mm_width,
        mm_height: info.mm_height,
        encoders: info.encoders.clone(),
        current_encoder: info.current_encoder,
        modes,
        preferred_mode,
        active_mode: None,
        props: ConnectorProps::default(),
        display: None,
    }
}

pub(crate) fn plane_from_info(info: &PlaneInfo) -> Plane {
    Plane {
        handle: info.id,
        kind: info.kind,
        possible_crtcs: info.possible_crtcs,
        formats: info.formats.clone(),
        props: PlaneProps::default(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn timing(hdisplay: u16, vdisplay: u16) -> ModeTiming {
        ModeTiming {
            clock: 148_500,
            hdisplay,
            hsync_start: 0,
            hsync_end: 0,
            htotal: hdisplay + 100,
            vdisplay,
            vsync_start: 0,
            vsync_end: 0,
            vtotal: vdisplay + 50,
            vrefresh: 60,
            flags: 0,
            preferred: false,
            name: "test".into(),
        }
    }

    #[test]
    fn dpi_is_minus_one_for_zero_mm() {
        let connector = connector_from_info(
            &ConnectorInfo {
                id: 1,
                kind: ConnectorKind::Internal,
                state: ConnectionState::Connected,
                mm_width: 0,
                mm_height: 0,
                encoders: vec![],
                current_encoder: None,
                modes: vec![],
            },
            &mut 0,
        );
        assert_eq!(connector.dpi(1920, 0), -1);
    }

    #[test]
    fn same_timing_ignores_assigned_id() {
        let mode = Mode {
            id: 5,
            timing: timing(1920, 1080),
        };
        assert!(mode.same_timing(&timing(1920, 1080)));
        assert!(!mode.same_timing(&timing(1280, 720)));
    }

    #[test]
    fn cursor_plane_format_collapses_to_argb8888() {
        let plane = plane_from_info(&PlaneInfo {
            id: 10,
            kind: PlaneKind::Cursor,
            possible_crtcs: 1,
            formats: vec![DrmFourcc::Argb8888],
        });
        assert!(plane.supports_format(DrmFourcc::Xrgb8888));
    }

    #[test]
    fn supports_crtc_checks_bit_for_index() {
        let plane = plane_from_info(&PlaneInfo {
            id: 10,
            kind: PlaneKind::Overlay,
            possible_crtcs: 0b010,
            formats: vec![],
        });
        assert!(!plane.supports_crtc(0));
        assert!(plane.supports_crtc(1));
        assert!(!plane.supports_crtc(2));
    }
}
