pub mod handler;
pub mod heartbeat;

pub use handler::ws_handler;
pub use heartbeat::heartbeat;
