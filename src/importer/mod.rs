//! Buffer importer contract (spec.md §4.3).
//!
//! Grounded on `examples/original_source/platform.h`'s `Importer` interface:
//! `ImportBuffer`/`ReleaseBuffer`/`CanImportBuffer`. spec.md §9 scopes the
//! platform-specific variants (hisi, nvidia, minigbm) out and keeps only the
//! shared contract plus one concrete implementation.

pub mod format;
pub mod generic;

use crate::backend::allocator::dmabuf::Dmabuf;
use crate::error::Result;
use crate::layer::ImportedBuffer;

/// Imports a foreign dmabuf-backed buffer into a kernel GEM handle set, and
/// releases it again. Implementations must be safe to call from two
/// different threads concurrently for import and release respectively
/// (`Importer`'s documented threading contract).
pub trait Importer: Send + Sync {
    fn import_buffer(&self, dmabuf: &Dmabuf) -> Result<ImportedBuffer>;
    fn release_buffer(&self, bo: ImportedBuffer) -> Result<()>;
    fn can_import_buffer(&self, dmabuf: &Dmabuf) -> bool;
}
