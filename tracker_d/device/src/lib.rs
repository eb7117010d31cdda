pub mod coordinator;
pub mod decoder;
pub mod handoff;
pub mod session;
pub mod transport;

pub use coordinator::TrackingCoordinator;
pub use decoder::TelemetryDecoder;
pub use handoff::Handoff;
pub use session::{CommandReply, DeviceSession, SessionCommand, SessionHandle};
pub use transport::{Connector, DeviceCommand, DeviceConnector, TransportChannel};
