mod config;
mod ports;
mod serve;
mod token;

pub use config::run_config;
pub use ports::run_ports;
pub use serve::run_serve;
pub use token::run_token;
