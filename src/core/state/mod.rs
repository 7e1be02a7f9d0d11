pub mod app_state;
pub mod store;

pub use app_state::{AppState, InstallationState, LauncherSnapshot};
pub use store::{PersistedState, StateStore};
