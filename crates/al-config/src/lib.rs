pub mod background;
pub mod client;
pub mod paths;
pub mod profile;

pub use background::BackgroundConfig;
pub use client::ClientConfig;
pub use paths::ConfigPaths;
pub use profile::{ProtocolKind, ServerProfile};
