//! Library surface for `upwatchd`: the HTTP/WS front end, connection
//! registry, handshake, broadcaster and detection bridge. Split out from
//! `main` so integration tests can spin up a real router against an
//! ephemeral loopback port.

pub mod app;
pub mod detection;
pub mod errors;
pub mod websocket;
