pub mod app;
pub mod config;
pub mod error;
pub mod state;
pub mod users;

pub use app::build_app;
pub use error::{AppError, ErrorKind, StoreError};
pub use state::AppState;
