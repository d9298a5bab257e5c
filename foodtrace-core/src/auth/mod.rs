//! Authenticated session: types, the backend seam and the store.

pub mod api;
pub mod store;
pub mod types;

pub use api::{AuthApi, HttpAuthApi, TokenSink};
pub use store::{AuthStore, AuthStoreBuilder, AuthStoreConfig, refresh_delay_millis};
pub use types::{
    ADMIN_RESOURCE, AuthResponse, AuthSnapshot, AuthState, AuthStatus, ChangePasswordRequest,
    LoginCredentials, MANAGE_ACTION, Permission, ProfileUpdate, RefreshResponse, RegisterRequest,
    User, lifetime_millis,
};
