mod long_polling;
mod manager;
mod protocol;
mod state;
mod transport;

pub use long_polling::LongPollingTransport;
pub use manager::{ConnectionManager, JOIN_GROUP_METHOD, TELEMETRY_MESSAGE};
pub use protocol::{encode_invocation, handshake_request, parse_frames, HubMessage, RECORD_SEPARATOR};
pub use state::{ConnectionState, Trigger};
pub use transport::{HubTransport, TransportEvent, TransportSession};
