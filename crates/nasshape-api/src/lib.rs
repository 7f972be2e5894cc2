// nasshape-api: Async clients for NAS router management and RADIUS CoA

pub mod coa;
pub mod error;
pub mod router;
pub mod transport;

pub use coa::CoaSender;
pub use error::Error;
pub use router::{ActiveSession, Direction, QueueSpec, RouterClient};
pub use transport::{TlsMode, TransportConfig};
