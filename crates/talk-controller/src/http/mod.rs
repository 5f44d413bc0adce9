//! HTTP surface: JSON API over the coordinator handle.

pub mod handlers;
pub mod identity;
pub mod routes;

pub use identity::{Identity, USER_ID_HEADER};
pub use routes::{build_routes, AppState};
