//! Cooperative execution mode on tokio. One task per connection or
//! request; every socket read and write, and every TLS WANT_READ or
//! WANT_WRITE, suspends the task rather than the thread, so the whole
//! server runs happily on a current-thread runtime.

mod client;
mod server;
mod session;

pub use client::{Client, Response};
pub use server::{BoundServer, HandlerFuture, Request, Server};
pub use session::Session;
