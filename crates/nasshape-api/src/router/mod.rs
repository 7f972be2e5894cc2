// Router management REST API surface.

mod client;
pub mod models;
pub mod session;
pub mod shaping;

pub use client::RouterClient;
pub use models::ActiveSession;
pub use shaping::{Direction, QueueSpec};
