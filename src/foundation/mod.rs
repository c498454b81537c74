pub mod console;
pub mod media;
pub mod persistent;
pub mod pool;
pub mod status;
pub mod utils;
