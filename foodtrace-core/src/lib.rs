//! foodtrace-core: shared client runtime for the food-traceability apps.
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod observability;
pub mod storage;
pub mod store;

pub use api::{ApiClient, ClientConfig, RequestConfig};
pub use auth::{AuthApi, AuthStore, HttpAuthApi};
pub use config::Settings;
pub use context::AppContext;
pub use error::{AppError, AppResult, ErrorType, Locale};
pub use storage::StorageAdapter;
pub use store::{BaseState, BaseStore, StoreState};
