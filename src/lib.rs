pub mod adapters;
pub mod cli;
pub mod config;
pub mod diff;
pub mod extract;
pub mod matrix;
pub mod monitor;
pub mod navigator;
pub mod snapshot;
pub mod surface;
pub mod utils;

pub use adapters::*;
pub use cli::*;
pub use config::*;
pub use diff::*;
pub use extract::*;
pub use matrix::*;
pub use monitor::*;
pub use navigator::*;
pub use snapshot::*;
pub use surface::*;
pub use utils::*;
