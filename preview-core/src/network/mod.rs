pub mod connection;
pub mod mux;

pub use connection::{Connection, ConnectionInfo};
pub use mux::{Demuxer, Handler, Liveness, Muxer, Subscription};
