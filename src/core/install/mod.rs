// ─── Installation Reconciler ───
// layout  — install-root paths, legacy relocation table, purge list
// fsops   — move/copy/remove helpers with cross-device fallback
// extract — archive unpacking plus layout normalization
// detect  — content inspection of what is installed

pub mod detect;
pub mod extract;
pub mod fsops;
pub mod layout;

pub use detect::{detect, Detection, Requirements, ScanDiagnostic};
pub use extract::{extract_archive, normalize_layout, ExtractSummary};
pub use layout::InstallLayout;
