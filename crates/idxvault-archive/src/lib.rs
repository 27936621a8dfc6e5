//! idxvault-archive: snapshot and restore of on-disk search indexes
//!
//! An index folder under `<work_dir>/<data_dir>/` is packed with an external
//! archiver piped into a block compressor, the compressed blob is sealed with
//! AES-256-GCM into `<name>.enc`, and the plaintext intermediates are
//! removed. Restore runs the same stages in reverse.
//!
//! - [`compress`]: the `tar | lz4` process pair behind the [`Compressor`] seam
//! - [`disk`]: free space query and threshold check
//! - [`lifecycle`]: stage ordering, cleanup, timeouts and cancellation

pub mod compress;
pub mod disk;
pub mod lifecycle;

pub use compress::{Compressor, ExternalCompressor, ProcessOutput};
pub use disk::DiskGuard;
pub use lifecycle::{remove_dir_recursive, ArchiveJob, ArchiveManager};
