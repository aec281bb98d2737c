mod server;
mod session_sweeper;

pub use server::*;
pub use session_sweeper::*;
