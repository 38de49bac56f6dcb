//! The Transport Adapter: wires the Matchmaker Core onto HTTP
//! and WebSocket endpoints. Swappable in principle for any other
//! transport that can produce `(method, name, options)` triples and a
//! room-join socket.

pub mod http;
mod matchmake_session;
mod session;
