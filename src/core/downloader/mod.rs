// ─── Downloader ───
// `source` resolves where the pack comes from, `transfer` streams it to disk.

pub mod source;
pub mod transfer;

pub use source::{ArtifactBody, ArtifactFetcher, Resolution, ResolvedArtifact, UpdateSource};
pub use transfer::{TempArchive, TransferEngine, TransferOutcome};
