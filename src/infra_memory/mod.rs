mod auth_session_store_memory;
mod credential_repo_memory;

pub use auth_session_store_memory::*;
pub use credential_repo_memory::*;
