//! Web server for screenshot uploads, status polling and admin review

mod auth;
mod server;

pub use auth::{create_admin_registry, SharedAdminRegistry};
pub use server::{start_web_server, AppState};
