//! HTTP surface.

pub mod handlers;
pub mod response;
pub mod router;

pub use router::{build_router, AppState};
