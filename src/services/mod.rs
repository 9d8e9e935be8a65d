// camrelay Services
// Session orchestration and the clients it drives

mod session_credentials;
mod mediamtx_client;
mod signaling_client;
mod ingest_command;
mod relay_context;
mod camera_resource;
mod video_session;
mod session_registry;
mod settings_manager;
mod log_manager;

pub use session_credentials::*;
pub use mediamtx_client::*;
pub use signaling_client::*;
pub use ingest_command::*;
pub use relay_context::*;
pub use camera_resource::*;
pub use video_session::*;
pub use session_registry::*;
pub use settings_manager::*;
pub use log_manager::*;
