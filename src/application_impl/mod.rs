mod clock;
mod credential_verifier_argon2;
mod session_manager_impl;
mod token_codec_jwt;

pub use clock::*;
pub use credential_verifier_argon2::*;
pub use session_manager_impl::*;
pub use token_codec_jwt::*;
