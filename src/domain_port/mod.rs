// store

mod auth_session_store;

pub use auth_session_store::*;

// repo

mod credential_repo;

pub use credential_repo::*;
