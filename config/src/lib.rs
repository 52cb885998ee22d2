//! Configuration loading for the BigQuery emulator manager.
//!
//! Configuration is layered from optional files in a `configuration` directory and
//! `APP_`-prefixed environment variables on top of the defaults declared in [`shared`].

mod load;
pub mod shared;

pub use load::{Environment, LoadConfigError, load_config, load_config_from};
