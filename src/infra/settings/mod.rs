pub mod env_settings;

pub use env_settings::{AppConfig, LayeredSettings};
