pub mod livearena;
pub mod manager;
pub mod plugin;
pub mod session;
pub mod vidcloud;

pub use manager::ProviderManager;
pub use plugin::{ProviderContext, ProviderPlugin};
pub use session::ExtractionSession;
