pub mod config;
pub mod demo;

pub use config::load_config;
pub use demo::{run_demo, DemoOptions};
