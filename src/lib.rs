//! Realtime shared whiteboard.
//!
//! Two halves share the `Frame` wire type:
//! - the relay (`routes`, `services`, `state`): one authoritative shape
//!   list, fanned out to every connected participant
//! - the client (`session`, `provision`): find or spawn a backend, wait for
//!   it to come up, then talk to it without losing anything sent early

pub mod config;
pub mod frame;
pub mod provision;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
