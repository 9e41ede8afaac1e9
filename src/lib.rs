#![warn(missing_debug_implementations, rust_2018_idioms)]
// Allow acronyms like DRM, KMS, HWC2
#![allow(clippy::upper_case_acronyms)]

//! # drmhwc: a DRM/KMS hardware compositor core
//!
//! Given per-frame lists of textured rectangles ("layers") from a window-system
//! client, this crate decides how to assign each layer to a kernel display
//! pipeline's scanout planes, falls back to GPU composition for layers that
//! cannot be scanned out directly, and drives the kernel's atomic modesetting
//! interface to present the result with correct synchronization, mode
//! selection, and hotplug handling.
//!
//! ## Structure
//!
//! - [`node`] and [`device`] enumerate the kernel display device's topology
//!   (CRTCs, encoders, connectors, planes) and route connectors to CRTCs.
//! - [`fbcache`] and [`importer`] turn foreign GEM handles into kernel
//!   framebuffer ids, with reference-counted lifetime.
//! - [`planner`] decides, per present, which layers go to which plane and
//!   which must be GPU-pre-composed.
//! - [`precomp`] is the contract the external GL renderer is called through
//!   for layers `planner` could not fit onto a plane.
//! - [`composition`] and [`compositor`] hold and apply one display's queued
//!   presents as atomic KMS commits, propagating release and retire fences.
//! - [`vsync`] and [`queue_worker`] are the two reusable worker primitives the
//!   per-display compositor and vsync threads are built from.
//! - [`hwc2`] is the client-facing facade: per-display/per-layer state and
//!   the Validate → Accept → Present flow driving everything above.
//! - [`resource_manager`] owns the opened device and its importer, and
//!   brokers hotplug rescans and writeback connector selection.
//!
//! The EGL/GLES pre-composition renderer, gralloc/minigbm buffer allocation,
//! and any CLI/front-end driving this crate are external collaborators, not
//! part of this core (see `spec.md` §1).

pub mod backend;
pub mod composition;
pub mod compositor;
pub mod config;
pub mod device;
pub mod error;
pub mod fbcache;
pub mod hwc2;
pub mod importer;
pub mod layer;
pub mod node;
pub mod planner;
pub mod precomp;
pub mod queue_worker;
pub mod resource_manager;
pub mod sync;
pub mod vsync;
