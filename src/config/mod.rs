pub mod loader;

pub use loader::{load_config, load_layered_config, validate_config};
