//! GitHub API service implementations.

mod repositories;
mod users;

pub use repositories::*;
pub use users::*;
