mod clock;
mod credential;
mod session_manager;
mod token_codec;

pub use clock::*;
pub use credential::*;
pub use session_manager::*;
pub use token_codec::*;
