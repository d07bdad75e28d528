pub mod connection;
pub mod handshake;
pub mod session;
pub mod shared;

pub use connection::SessionPhase;
pub use handshake::sync_with_peer;
pub use session::{RemoteControl, SessionState, session_bindings};
pub use shared::{FieldUpdate, SharedState, StateBindings, decode_field};
