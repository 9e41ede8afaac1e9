//! The narrow seam between the topology/composition logic and the kernel DRM ioctls.
//!
//! Every other module in this crate talks to the display hardware exclusively
//! through the [`KernelDevice`] trait, the same way Smithay's `AtomicDrmDevice<A>`
//! is generic over `A: AsRawFd` rather than hard-wiring a concrete file handle.
//! This crate goes one step further and makes the ioctl surface itself a trait,
//! so the topology, planner, compositor and facade can be unit tested against an
//! in-memory fake (see `device::fake`) without a real GPU.

use std::os::unix::io::RawFd;
use std::path::PathBuf;

use bitflags::bitflags;
use drm_fourcc::DrmFourcc;

use crate::error::{Error, Result};

pub type CrtcId = u32;
pub type EncoderId = u32;
pub type ConnectorId = u32;
pub type PlaneId = u32;
pub type PropertyId = u32;
pub type FbId = u32;
pub type BlobId = u32;
pub type GemHandle = u32;

/// The client capabilities negotiated at device-open time (spec.md §4.1 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCap {
    UniversalPlanes,
    Atomic,
    WritebackConnectors,
}

/// A decoded property value, independent of the kernel's raw ioctl representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    Unsigned(u64),
    Signed(i64),
    Bool(bool),
    Blob(BlobId),
    Object(u32),
    Bitmask(u64),
    Enum(String),
}

impl PropValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropValue::Unsigned(v) => Some(*v),
            PropValue::Bitmask(v) => Some(*v),
            PropValue::Bool(v) => Some(*v as u64),
            PropValue::Object(v) | PropValue::Blob(v) => Some(*v as u64),
            PropValue::Signed(_) | PropValue::Enum(_) => None,
        }
    }
}

/// One property exposed by a KMS object, as read at enumeration time.
#[derive(Debug, Clone)]
pub struct PropertyInfo {
    pub id: PropertyId,
    pub name: String,
    pub value: PropValue,
    pub immutable: bool,
    /// For enum properties, the accepted name -> raw value mapping.
    pub enum_values: Vec<(String, u64)>,
}

bitflags! {
    /// Flags passed to an atomic commit, matching `DRM_MODE_ATOMIC_*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommitFlags: u32 {
        const ALLOW_MODESET = 0x0400;
        const NONBLOCK = 0x0200;
        const TEST_ONLY = 0x0100;
        const PAGE_FLIP_EVENT = 0x01;
    }
}

/// One property write, addressed by (object id, property id).
#[derive(Debug, Clone, Copy)]
pub struct PropertyWrite {
    pub object: u32,
    pub property: PropertyId,
    pub value: PropValueRaw,
}

/// The raw integer form of a property value, as sent to `drmModeAtomicAddProperty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropValueRaw {
    U64(u64),
    I64(i64),
}

/// An atomic commit request being built up one property at a time.
#[derive(Debug, Clone, Default)]
pub struct AtomicRequest {
    pub writes: Vec<PropertyWrite>,
}

impl AtomicRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_u64(&mut self, object: u32, property: PropertyId, value: u64) -> &mut Self {
        self.writes.push(PropertyWrite {
            object,
            property,
            value: PropValueRaw::U64(value),
        });
        self
    }

    pub fn set_i64(&mut self, object: u32, property: PropertyId, value: i64) -> &mut Self {
        self.writes.push(PropertyWrite {
            object,
            property,
            value: PropValueRaw::I64(value),
        });
        self
    }
}

/// Topology enumeration result from `drmModeGetResources`.
#[derive(Debug, Clone)]
pub struct ResourceIds {
    pub crtcs: Vec<CrtcId>,
    pub encoders: Vec<EncoderId>,
    pub connectors: Vec<ConnectorId>,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

#[derive(Debug, Clone)]
pub struct CrtcInfo {
    pub id: CrtcId,
    /// Index into the CRTC list returned by `resource_ids`; used for the high-crtc
    /// vblank pipe encoding (spec.md §4.7).
    pub pipe: u32,
}

#[derive(Debug, Clone)]
pub struct EncoderInfo {
    pub id: EncoderId,
    pub crtc: Option<CrtcId>,
    /// Bitmask, bit `i` set means `resource_ids.crtcs[i]` is usable.
    pub possible_crtcs: u32,
    pub possible_clones: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    Internal,
    External,
    Writeback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Unknown,
}

/// A raw mode timing as read from the kernel, independent of its assigned id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeTiming {
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vrefresh: u32,
    pub flags: u32,
    pub preferred: bool,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    pub id: ConnectorId,
    pub kind: ConnectorKind,
    pub state: ConnectionState,
    pub mm_width: u32,
    pub mm_height: u32,
    pub encoders: Vec<EncoderId>,
    pub current_encoder: Option<EncoderId>,
    pub modes: Vec<ModeTiming>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneKind {
    Primary,
    Overlay,
    Cursor,
}

#[derive(Debug, Clone)]
pub struct PlaneInfo {
    pub id: PlaneId,
    pub kind: PlaneKind,
    /// Bitmask, bit `i` set means `resource_ids.crtcs[i]` is usable.
    pub possible_crtcs: u32,
    pub formats: Vec<DrmFourcc>,
}

/// Description of a framebuffer to be created via `ADDFB2`/`ADDFB2WithModifiers`.
#[derive(Debug, Clone)]
pub struct FramebufferDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: DrmFourcc,
    pub num_planes: usize,
    pub gem_handles: [GemHandle; 4],
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
    pub modifiers: Option<[u64; 4]>,
}

#[derive(Debug, Clone, Copy)]
pub struct VBlankReply {
    pub sequence: u32,
    pub timestamp_ns: i64,
}

/// An event read back from the device fd (page flip completion or hotplug).
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    PageFlip { crtc: CrtcId, timestamp_ns: i64 },
    Unknown,
}

/// The seam every other module programs against instead of calling `drm`/`gbm`
/// directly. Grounded in `backend/drm/device/mod.rs` and
/// `backend/drm/surface/atomic.rs`'s use of the `drm::control::Device` trait.
pub trait KernelDevice: Send + Sync {
    fn path(&self) -> Option<PathBuf>;
    fn as_raw_fd(&self) -> RawFd;

    fn set_client_cap(&self, cap: ClientCap, enable: bool) -> Result<()>;

    fn resource_ids(&self) -> Result<ResourceIds>;
    fn crtc_info(&self, id: CrtcId) -> Result<CrtcInfo>;
    fn encoder_info(&self, id: EncoderId) -> Result<EncoderInfo>;
    fn connector_info(&self, id: ConnectorId, force_probe: bool) -> Result<ConnectorInfo>;
    fn plane_info(&self, id: PlaneId) -> Result<PlaneInfo>;
    fn plane_ids(&self) -> Result<Vec<PlaneId>>;

    /// Enumerates every mutable/immutable property on a KMS object, by raw id.
    fn object_properties(&self, object: u32) -> Result<Vec<PropertyInfo>>;

    fn create_property_blob(&self, data: &[u8]) -> Result<BlobId>;
    fn destroy_property_blob(&self, id: BlobId) -> Result<()>;

    fn atomic_commit(&self, flags: CommitFlags, request: &AtomicRequest) -> Result<()>;

    fn add_framebuffer(&self, desc: &FramebufferDescriptor) -> Result<FbId>;
    fn remove_framebuffer(&self, id: FbId) -> Result<()>;

    fn prime_fd_to_handle(&self, fd: RawFd) -> Result<GemHandle>;
    fn gem_close(&self, handle: GemHandle) -> Result<()>;

    fn wait_vblank(&self, pipe: u32) -> Result<VBlankReply>;
    fn receive_events(&self) -> Result<Vec<DeviceEvent>>;
}

pub(crate) fn access_error(errmsg: &'static str, dev: Option<PathBuf>, source: std::io::Error) -> Error {
    Error::Access { errmsg, dev, source }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prop_value_as_u64_covers_numeric_variants() {
        assert_eq!(PropValue::Unsigned(7).as_u64(), Some(7));
        assert_eq!(PropValue::Bitmask(0b101).as_u64(), Some(0b101));
        assert_eq!(PropValue::Enum("none".into()).as_u64(), None);
    }

    #[test]
    fn atomic_request_accumulates_writes_in_order() {
        let mut req = AtomicRequest::new();
        req.set_u64(1, 2, 3).set_i64(1, 4, -1);
        assert_eq!(req.writes.len(), 2);
        assert_eq!(req.writes[0].object, 1);
        assert_eq!(req.writes[1].value, PropValueRaw::I64(-1));
    }
}
