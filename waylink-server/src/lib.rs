//! A compositor-side Wayland runtime
//!
//! [`Server::listen`] binds the compositor socket, [`Server::add_global`]
//! advertises globals, and [`Server::accept_loop`] serves each client on its
//! own thread, dispatching core-protocol requests up to the surface-commit
//! boundary. Compositor policy (rendering, input, shells) plugs in through
//! [`Hooks`] and custom global factories.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod socket;
pub mod surface;

pub use client::{ClientConnection, ClientError, ClientId, Resource, ResourceKind};
pub use socket::{BindSocketError, ListeningSocket};
pub use surface::{BufferAttach, Rect, RegionOp, RegionState, SurfaceContent, SurfacePhase, SurfaceState};
pub use waylink_core as core;

use std::env;
use std::ffi::OsStr;
use std::io;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{debug, warn};

use waylink_core::sync::{MessageQueue, SharedRegistry};
use waylink_core::{Interface, ObjectId};

/// A factory invoked when a client binds a global; it decides what kind of
/// resource backs the new object.
pub type GlobalFactory = Box<dyn Fn(ClientId, ObjectId, u32) -> ResourceKind + Send + Sync>;

/// One entry in the server's global table.
pub struct Global {
    pub interface: &'static Interface,
    pub version: u32,
    factory: GlobalFactory,
}

impl Global {
    pub(crate) fn instantiate(
        &self,
        client: ClientId,
        id: ObjectId,
        version: u32,
    ) -> ResourceKind {
        (self.factory)(client, id, version)
    }
}

/// Global-table changes broadcast to the per-client serving threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlEvent {
    GlobalAdded(u32),
    GlobalRemoved(u32),
}

/// The cross-thread face of a connected client.
pub(crate) struct ClientHandle {
    pub(crate) control: MessageQueue<ControlEvent>,
}

/// Surface lifecycle notifications.
///
/// These are pure notifications: the core applies the protocol state change
/// itself, the hooks tell the embedding compositor about it.
pub struct Hooks {
    pub on_surface_created: Box<dyn Fn(ClientId, ObjectId) + Send + Sync>,
    pub on_surface_destroyed: Box<dyn Fn(ClientId, ObjectId) + Send + Sync>,
    pub on_surface_commit: Box<dyn Fn(ClientId, ObjectId, &SurfaceState) + Send + Sync>,
    pub schedule_frame_callback: Box<dyn Fn(ClientId, ObjectId) + Send + Sync>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            on_surface_created: Box::new(|client, id| {
                debug!("client {}: surface {} created", client.0, id.as_u32())
            }),
            on_surface_destroyed: Box::new(|client, id| {
                debug!("client {}: surface {} destroyed", client.0, id.as_u32())
            }),
            on_surface_commit: Box::new(|client, id, state| {
                debug!(
                    "client {}: surface {} committed ({} damage rects)",
                    client.0,
                    id.as_u32(),
                    state.current.damage.len()
                )
            }),
            schedule_frame_callback: Box::new(|client, id| {
                debug!(
                    "client {}: frame callback {} fires immediately",
                    client.0,
                    id.as_u32()
                )
            }),
        }
    }
}

/// The compositor-side runtime.
pub struct Server {
    socket: ListeningSocket,
    globals: Arc<SharedRegistry<Global>>,
    clients: Arc<SharedRegistry<ClientHandle>>,
    hooks: Arc<Hooks>,
    strict: bool,
    started: Instant,
}

impl Server {
    /// Listen on `$XDG_RUNTIME_DIR/$WAYLAND_DISPLAY` (default `wayland-1`).
    pub fn listen() -> Result<Self, BindSocketError> {
        let name = env::var_os("WAYLAND_DISPLAY").unwrap_or_else(|| "wayland-1".into());
        Self::listen_at(&name)
    }

    /// Listen on an explicitly named socket.
    pub fn listen_at(name: &OsStr) -> Result<Self, BindSocketError> {
        Ok(Self {
            socket: ListeningSocket::bind(name)?,
            globals: Arc::new(SharedRegistry::new()),
            clients: Arc::new(SharedRegistry::new()),
            hooks: Arc::new(Hooks::default()),
            strict: false,
            started: Instant::now(),
        })
    }

    /// Replace the lifecycle hooks. Call before serving clients.
    pub fn set_hooks(&mut self, hooks: Hooks) {
        self.hooks = Arc::new(hooks);
    }

    /// Treat unknown opcodes as protocol errors instead of logging and
    /// skipping them.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// The path of the listening socket.
    pub fn socket_path(&self) -> &std::path::Path {
        self.socket.path()
    }

    /// Advertise a global and return its name.
    ///
    /// Names are allocated centrally and never reused. Clients with a live
    /// registry learn about the new global before their next request is
    /// processed.
    pub fn add_global(
        &self,
        interface: &'static Interface,
        version: u32,
        factory: impl Fn(ClientId, ObjectId, u32) -> ResourceKind + Send + Sync + 'static,
    ) -> u32 {
        assert!(
            version >= 1 && version <= interface.version,
            "global version must be within the interface's supported range"
        );
        let name = self.globals.add(Global {
            interface,
            version,
            factory: Box::new(factory),
        });
        self.broadcast(ControlEvent::GlobalAdded(name));
        name
    }

    /// Register a `wl_compositor` global backed by the built-in surface and
    /// region handling.
    pub fn add_compositor_global(&self) -> u32 {
        self.add_global(
            &waylink_core::interfaces::WL_COMPOSITOR,
            waylink_core::interfaces::WL_COMPOSITOR.version,
            |_, _, _| ResourceKind::Compositor,
        )
    }

    /// Withdraw a global; connected registries receive `global_remove`.
    /// Objects already bound to it stay alive.
    pub fn remove_global(&self, name: u32) -> bool {
        if self.globals.remove(name).is_some() {
            self.broadcast(ControlEvent::GlobalRemoved(name));
            true
        } else {
            false
        }
    }

    /// A snapshot `(name, interface, version)` projection of the global
    /// table.
    pub fn globals(&self) -> Vec<(u32, &'static Interface, u32)> {
        self.globals
            .entries()
            .into_iter()
            .map(|(name, global)| (name, global.interface, global.version))
            .collect()
    }

    fn broadcast(&self, event: ControlEvent) {
        for (id, handle) in self.clients.entries() {
            if handle.control.push(event).is_err() {
                warn!("client {id}: control queue unavailable, event dropped");
            }
        }
    }

    /// Accept clients forever, serving each one on its own thread.
    pub fn accept_loop(&self) -> io::Result<()> {
        loop {
            let stream = self.socket.accept()?;
            let conn = self.prepare_client(stream);
            let client_id = conn.id();
            let spawned = thread::Builder::new()
                .name(format!("waylink-client-{}", client_id.0))
                .spawn(move || {
                    if let Err(err) = conn.serve() {
                        warn!("client {}: terminated: {err}", client_id.0);
                    }
                });
            if let Err(err) = spawned {
                warn!("failed to spawn a client thread: {err}");
            }
        }
    }

    /// Serve a single, already-connected client on the calling thread.
    ///
    /// Mostly useful for tests and single-client embeddings.
    pub fn serve_stream(&self, stream: UnixStream) -> Result<(), ClientError> {
        self.prepare_client(stream).serve()
    }

    fn prepare_client(&self, stream: UnixStream) -> ClientConnection {
        let id = self.clients.add(ClientHandle {
            control: MessageQueue::new(64),
        });
        let handle = self.clients.get(id).expect("freshly registered client");
        ClientConnection::new(
            ClientId(id),
            stream,
            handle,
            self.globals.clone(),
            self.clients.clone(),
            self.hooks.clone(),
            self.strict,
            self.started,
        )
    }
}
