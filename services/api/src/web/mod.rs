pub mod auth;
pub mod clients;
pub mod contacts;
pub mod invoices;
pub mod middleware;
pub mod pagination;
pub mod payments;
pub mod rest;
pub mod state;

// Re-export what the binaries need to build the server.
pub use middleware::{require_auth, CurrentUser};
pub use rest::{build_router, ApiDoc};
pub use state::AppState;
