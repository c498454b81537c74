pub mod api_client;
pub mod cli;
pub mod configuration;
pub mod foundation;
pub mod process;
pub mod startup;

pub use api_client::{SmugError, SmugMug};
pub use configuration::*;
pub use process::{SmugFs, SyncOptions};
