// camrelay Models
// Data structures shared by the relay services

mod endpoint;
mod path_config;
mod settings;

pub use endpoint::*;
pub use path_config::*;
pub use settings::*;
