mod limit;
mod start;

pub use start::{ServerConfig, start_server};
