pub mod api;
pub mod display;
pub mod model;
pub mod preferences;
pub mod scheduler;
pub mod session;
pub mod store;

pub use api::{
    api, clear_credentials, evaluate_response, fetch_realtime_data, validate_credentials,
    CloudSource, Error,
};
pub use scheduler::{RefreshHandle, RefreshScheduler, RefreshState, TelemetrySource};
pub use session::{Access, SessionGate};
pub use store::{CredentialStore, FileStore, MemoryStore, StorageKey};
