pub mod sessions;
pub mod rooms;
pub mod relay;
pub mod gateway;

pub use relay::{Relay, RelayHandle, RelayStats};
pub use sessions::{ConnectionId, Identity};
