//! HTTP API module.
//!
//! REST endpoints for projects, their stored trees and runtime control, plus
//! the `/ws` log stream.

mod error;
pub mod handlers;
mod routes;
mod state;
pub mod ws;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
