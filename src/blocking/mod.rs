//! Blocking execution mode: the client runs on the caller's thread and the
//! server dedicates a thread to every accepted connection. All I/O blocks
//! on socket readiness inside the TLS library.

mod client;
mod server;
mod session;

pub use client::{Client, Response, DEFAULT_MAX_REDIRECTS};
pub use server::{BoundServer, Request, Server};
pub use session::Session;
