pub mod base;
pub mod cache;
pub mod fetch;
pub mod logging;
pub mod providers;
pub mod secrets;
pub mod server;
pub mod tokens;

pub use base::*;
pub use cache::*;
pub use fetch::*;
pub use logging::*;
pub use providers::*;
pub use secrets::*;
pub use server::*;
pub use tokens::*;
