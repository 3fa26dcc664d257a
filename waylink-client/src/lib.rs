//! A simple Rust implementation of a Wayland client runtime
//!
//! Connect with [`Connection::connect`], roundtrip to collect globals, bind
//! what you need and drive the event loop with
//! [`Connection::dispatch_events`] or [`Connection::run`].

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod connection;
pub mod object;
pub mod protocol;

pub use connection::{BindError, ConnectError, Connection, Error, ProtocolError};
pub use waylink_core as core;

use object::Proxy;

/// Everything a per-object event callback gets access to
pub struct EventCtx<'a, D, P: Proxy> {
    pub conn: &'a mut Connection<D>,
    pub state: &'a mut D,
    pub proxy: P,
    pub event: P::Event,
}
