//! Per-client connection state and request dispatch

use std::collections::VecDeque;
use std::ffi::{CStr, CString};
use std::io;
use std::num::NonZeroU32;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};

use waylink_core::debug::DebugMessage;
use waylink_core::interfaces::{self, WL_DISPLAY_DELETE_ID, WL_DISPLAY_ERROR};
use waylink_core::sync::SharedRegistry;
use waylink_core::transport::{
    BufferedSocket, EncodeError, PeekHeaderError, RecvMessageError, SendMessageError,
};
use waylink_core::{
    ArgValue, Interface, IoMode, Message, MessageBuffersPool, MessageHeader, ObjectId,
};

use crate::surface::{Rect, RegionOp, RegionState, SurfaceState};
use crate::{ClientHandle, ControlEvent, Global, Hooks};

// `wl_display.error` codes
const ERR_INVALID_OBJECT: u32 = 0;
const ERR_INVALID_METHOD: u32 = 1;
const ERR_IMPLEMENTATION: u32 = 3;

// Request opcodes of the dispatched interfaces
const REGISTRY_BIND: u16 = 0;
const COMPOSITOR_CREATE_SURFACE: u16 = 0;
const COMPOSITOR_CREATE_REGION: u16 = 1;
const SURFACE_DESTROY: u16 = 0;
const SURFACE_ATTACH: u16 = 1;
const SURFACE_DAMAGE: u16 = 2;
const SURFACE_FRAME: u16 = 3;
const SURFACE_SET_OPAQUE_REGION: u16 = 4;
const SURFACE_SET_INPUT_REGION: u16 = 5;
const SURFACE_COMMIT: u16 = 6;
const SURFACE_SET_BUFFER_TRANSFORM: u16 = 7;
const SURFACE_SET_BUFFER_SCALE: u16 = 8;
const SURFACE_DAMAGE_BUFFER: u16 = 9;
const SURFACE_OFFSET: u16 = 10;
const REGION_DESTROY: u16 = 0;
const REGION_ADD: u16 = 1;
const REGION_SUBTRACT: u16 = 2;

// Event opcodes
const CALLBACK_DONE: u16 = 0;
const REGISTRY_GLOBAL: u16 = 0;
const REGISTRY_GLOBAL_REMOVE: u16 = 1;

/// Identifies one client for the lifetime of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u32);

/// An error on one client connection.
///
/// Everything except [`Disconnected`](ClientError::Disconnected) is reported
/// to the client as `wl_display.error` where a protocol code applies, after
/// which the connection is torn down.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client disconnected")]
    Disconnected,
    #[error("io: {0}")]
    Io(io::Error),
    #[error("malformed message header: {0}")]
    BadHeader(PeekHeaderError),
    #[error("malformed message: {0}")]
    Codec(RecvMessageError),
    #[error("failed to encode event: {0}")]
    Encode(EncodeError),
    #[error("request for unknown object {0}")]
    UnknownObject(u32),
    #[error("unknown opcode {opcode} on {interface:?}")]
    UnknownOpcode {
        interface: &'static CStr,
        opcode: u16,
    },
    #[error("invalid new object id {0}")]
    InvalidNewId(u32),
    #[error("object id {0} is already in use")]
    DuplicateId(u32),
    #[error("server object id space exhausted")]
    IdSpaceExhausted,
    #[error("bind to unknown global {0}")]
    UnknownGlobal(u32),
    #[error("bind requested interface {requested:?} but global is {actual:?}")]
    InterfaceMismatch {
        requested: CString,
        actual: &'static CStr,
    },
    #[error("bind requested version {requested} but global supports up to {max}")]
    VersionMismatch { requested: u32, max: u32 },
    #[error("malformed request arguments")]
    InvalidArgument,
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset => Self::Disconnected,
            _ => Self::Io(err),
        }
    }
}

impl From<PeekHeaderError> for ClientError {
    fn from(err: PeekHeaderError) -> Self {
        match err {
            PeekHeaderError::Io(io) => io.into(),
            other => Self::BadHeader(other),
        }
    }
}

impl From<RecvMessageError> for ClientError {
    fn from(err: RecvMessageError) -> Self {
        match err {
            RecvMessageError::Io(io) => io.into(),
            other => Self::Codec(other),
        }
    }
}

impl ClientError {
    /// The `wl_display.error` code for this failure, if the client should
    /// hear about it before the connection closes.
    fn protocol_code(&self) -> Option<u32> {
        match self {
            Self::UnknownObject(_)
            | Self::UnknownGlobal(_)
            | Self::InvalidNewId(_)
            | Self::DuplicateId(_)
            | Self::InterfaceMismatch { .. }
            | Self::VersionMismatch { .. } => Some(ERR_INVALID_OBJECT),
            Self::UnknownOpcode { .. } => Some(ERR_INVALID_METHOD),
            Self::Codec(_) | Self::BadHeader(_) | Self::InvalidArgument => {
                Some(ERR_IMPLEMENTATION)
            }
            _ => None,
        }
    }

    /// The object the error is about, defaulting to the display.
    fn culprit(&self) -> u32 {
        match self {
            Self::UnknownObject(id) | Self::InvalidNewId(id) | Self::DuplicateId(id) => *id,
            _ => ObjectId::DISPLAY.as_u32(),
        }
    }
}

/// Concrete role of a server-side protocol object.
pub enum ResourceKind {
    Display,
    Registry,
    Callback,
    Compositor,
    Surface(SurfaceState),
    Region(RegionState),
    /// An object bound through a factory this crate knows nothing about;
    /// its requests are decoded and dropped.
    Generic,
}

/// A server-side protocol object.
pub struct Resource {
    pub id: ObjectId,
    pub interface: &'static Interface,
    pub version: u32,
    pub kind: ResourceKind,
}

/// Per-connection object table: dense per-range storage, client IDs
/// validated, server IDs allocated monotonically with a free list.
pub(crate) struct ObjectMap {
    client_objects: Vec<Option<Resource>>,
    server_objects: Vec<Option<Resource>>,
    free_server_ids: Vec<ObjectId>,
    next_server_id: u32,
}

impl ObjectMap {
    fn new() -> Self {
        Self {
            client_objects: vec![Some(Resource {
                id: ObjectId::DISPLAY,
                interface: &interfaces::WL_DISPLAY,
                version: 1,
                kind: ResourceKind::Display,
            })],
            server_objects: Vec::new(),
            free_server_ids: Vec::new(),
            next_server_id: ObjectId::MIN_SERVER.as_u32(),
        }
    }

    fn get(&self, id: ObjectId) -> Option<&Resource> {
        let slot = if id.created_by_client() {
            self.client_objects.get(id.as_index())
        } else {
            self.server_objects.get(id.as_index())
        };
        slot.and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: ObjectId) -> Option<&mut Resource> {
        let slot = if id.created_by_client() {
            self.client_objects.get_mut(id.as_index())
        } else {
            self.server_objects.get_mut(id.as_index())
        };
        slot.and_then(Option::as_mut)
    }

    /// Install an object under a client-chosen ID.
    ///
    /// The ID must be in the client range, must not skip ahead of the
    /// densely allocated IDs and must not be in use.
    fn insert_client(
        &mut self,
        id: ObjectId,
        interface: &'static Interface,
        version: u32,
        kind: ResourceKind,
    ) -> Result<(), ClientError> {
        if !id.created_by_client() {
            return Err(ClientError::InvalidNewId(id.as_u32()));
        }
        let index = id.as_index();
        if index > self.client_objects.len() {
            return Err(ClientError::InvalidNewId(id.as_u32()));
        }
        if index == self.client_objects.len() {
            self.client_objects.push(None);
        }
        let slot = &mut self.client_objects[index];
        if slot.is_some() {
            return Err(ClientError::DuplicateId(id.as_u32()));
        }
        *slot = Some(Resource {
            id,
            interface,
            version,
            kind,
        });
        Ok(())
    }

    /// Allocate a server-side ID and install an object under it.
    pub(crate) fn alloc_server(
        &mut self,
        interface: &'static Interface,
        version: u32,
        kind: ResourceKind,
    ) -> Result<ObjectId, ClientError> {
        let id = match self.free_server_ids.pop() {
            Some(id) => id,
            None => {
                let raw = self.next_server_id;
                let id = ObjectId(NonZeroU32::new(raw).ok_or(ClientError::IdSpaceExhausted)?);
                // Wraps to the zero sentinel after the last valid ID
                self.next_server_id = raw.wrapping_add(1);
                id
            }
        };

        let index = id.as_index();
        while index >= self.server_objects.len() {
            self.server_objects.push(None);
        }
        self.server_objects[index] = Some(Resource {
            id,
            interface,
            version,
            kind,
        });
        Ok(id)
    }

    fn remove(&mut self, id: ObjectId) -> Option<Resource> {
        if id.created_by_client() {
            self.client_objects.get_mut(id.as_index())?.take()
        } else {
            let resource = self.server_objects.get_mut(id.as_index())?.take();
            if resource.is_some() {
                self.free_server_ids.push(id);
            }
            resource
        }
    }
}

/// One connected client: its socket, object table and event queue.
///
/// Owned by a single serving thread; cross-thread coordination happens via
/// the [`ClientHandle`] control queue.
pub struct ClientConnection {
    id: ClientId,
    socket: BufferedSocket<UnixStream>,
    msg_pool: MessageBuffersPool,
    resources: ObjectMap,
    events: VecDeque<Message>,
    registries: Vec<ObjectId>,
    globals: Arc<SharedRegistry<Global>>,
    clients: Arc<SharedRegistry<ClientHandle>>,
    handle: Arc<ClientHandle>,
    hooks: Arc<Hooks>,
    serial: u32,
    strict: bool,
    debug: bool,
    started: Instant,
}

impl AsRawFd for ClientConnection {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl ClientConnection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ClientId,
        stream: UnixStream,
        handle: Arc<ClientHandle>,
        globals: Arc<SharedRegistry<Global>>,
        clients: Arc<SharedRegistry<ClientHandle>>,
        hooks: Arc<Hooks>,
        strict: bool,
        started: Instant,
    ) -> Self {
        Self {
            id,
            socket: BufferedSocket::from(stream),
            msg_pool: MessageBuffersPool::default(),
            resources: ObjectMap::new(),
            events: VecDeque::new(),
            registries: Vec::new(),
            globals,
            clients,
            handle,
            hooks,
            serial: 0,
            strict,
            debug: std::env::var_os("WAYLAND_DEBUG").is_some(),
            started,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Serve this client until it disconnects or violates the protocol.
    ///
    /// A clean disconnect returns `Ok(())`. Dropping `self` afterwards
    /// closes the socket, the object table and any unconsumed received file
    /// descriptors.
    pub fn serve(mut self) -> Result<(), ClientError> {
        debug!("client {} connected", self.id.0);
        let result = self.serve_inner();

        if let Err(err) = &result {
            if let Some(code) = err.protocol_code() {
                let culprit = NonZeroU32::new(err.culprit())
                    .map(ObjectId)
                    .unwrap_or(ObjectId::DISPLAY);
                let mut args = self.msg_pool.get_args();
                args.push(ArgValue::Object(culprit));
                args.push(ArgValue::Uint(code));
                args.push(ArgValue::String(
                    CString::new(err.to_string()).unwrap_or_default(),
                ));
                self.queue_event(
                    &interfaces::WL_DISPLAY,
                    ObjectId::DISPLAY,
                    WL_DISPLAY_ERROR,
                    args,
                );
                // Best effort: the client may already be gone
                let _ = self.flush();
            }
        }

        self.clients.remove(self.id.0);

        match result {
            Err(ClientError::Disconnected) => {
                debug!("client {} disconnected", self.id.0);
                Ok(())
            }
            other => other,
        }
    }

    fn serve_inner(&mut self) -> Result<(), ClientError> {
        loop {
            self.drain_control();
            self.flush()?;
            let msg = self.recv_request()?;
            // Apply pending global-table changes first, so their events are
            // serialized ahead of whatever this request produces. A sync is
            // then guaranteed to observe them before its done callback.
            self.drain_control();
            self.handle_request(msg)?;
        }
    }

    /// Apply control events queued by other threads (global table changes).
    ///
    /// Delivery happens before the next request is read, so a blocked client
    /// sees them on its next wakeup.
    fn drain_control(&mut self) {
        while let Some(event) = self.handle.control.pop() {
            let registries = self.registries.clone();
            match event {
                ControlEvent::GlobalAdded(name) => {
                    if let Some(global) = self.globals.get(name) {
                        for registry in registries {
                            self.queue_global(registry, name, &global);
                        }
                    }
                }
                ControlEvent::GlobalRemoved(name) => {
                    for registry in registries {
                        let mut args = self.msg_pool.get_args();
                        args.push(ArgValue::Uint(name));
                        self.queue_event(
                            &interfaces::WL_REGISTRY,
                            registry,
                            REGISTRY_GLOBAL_REMOVE,
                            args,
                        );
                    }
                }
            }
        }
    }

    fn recv_request(&mut self) -> Result<Message, ClientError> {
        loop {
            let header = self.socket.peek_message_header(IoMode::Blocking)?;

            let Some(resource) = self.resources.get(header.object_id) else {
                return Err(ClientError::UnknownObject(header.object_id.as_u32()));
            };
            let interface = resource.interface;
            let version = resource.version;

            let desc = interface.requests.get(header.opcode as usize);
            let desc = match desc {
                Some(desc) if desc.since <= version => desc,
                _ => {
                    // Tolerate unknown or too-new opcodes so protocol
                    // version skew does not kill the connection
                    if self.strict {
                        return Err(ClientError::UnknownOpcode {
                            interface: interface.name,
                            opcode: header.opcode,
                        });
                    }
                    warn!(
                        "client {}: dropping unknown opcode {} on {}@{}",
                        self.id.0,
                        header.opcode,
                        interface.name.to_string_lossy(),
                        header.object_id.as_u32()
                    );
                    self.socket.skip_message(header, IoMode::Blocking)?;
                    continue;
                }
            };

            let msg = self.socket.recv_message(
                header,
                desc.signature,
                &mut self.msg_pool,
                IoMode::Blocking,
            )?;

            if self.debug {
                eprintln!("[waylink] {:?}", DebugMessage::new(&msg, false, interface));
            }

            return Ok(msg);
        }
    }

    fn handle_request(&mut self, mut msg: Message) -> Result<(), ClientError> {
        let Some(resource) = self.resources.get(msg.header.object_id) else {
            return Err(ClientError::UnknownObject(msg.header.object_id.as_u32()));
        };
        let interface = resource.interface;

        let result = if interface == &interfaces::WL_DISPLAY {
            self.handle_display(&mut msg)
        } else if interface == &interfaces::WL_REGISTRY {
            self.handle_registry(&mut msg)
        } else if interface == &interfaces::WL_COMPOSITOR {
            self.handle_compositor(&mut msg)
        } else if interface == &interfaces::WL_SURFACE {
            self.handle_surface(&mut msg)
        } else if interface == &interfaces::WL_REGION {
            self.handle_region(&mut msg)
        } else {
            debug!(
                "client {}: ignoring request on {:?}",
                self.id.0, interface
            );
            Ok(())
        };

        self.msg_pool.reuse_args(std::mem::take(&mut msg.args));
        result
    }

    fn handle_display(&mut self, msg: &mut Message) -> Result<(), ClientError> {
        match msg.header.opcode {
            interfaces::WL_DISPLAY_SYNC => {
                let new_id = match msg.args.drain(..).next() {
                    Some(ArgValue::NewId(id)) => id,
                    _ => return Err(ClientError::InvalidArgument),
                };
                self.resources.insert_client(
                    new_id,
                    &interfaces::WL_CALLBACK,
                    1,
                    ResourceKind::Callback,
                )?;

                // Acknowledge everything processed so far, then retire the
                // single-shot callback
                let serial = self.next_serial();
                let mut args = self.msg_pool.get_args();
                args.push(ArgValue::Uint(serial));
                self.queue_event(&interfaces::WL_CALLBACK, new_id, CALLBACK_DONE, args);
                self.destroy_resource(new_id);
                Ok(())
            }
            interfaces::WL_DISPLAY_GET_REGISTRY => {
                let new_id = match msg.args.drain(..).next() {
                    Some(ArgValue::NewId(id)) => id,
                    _ => return Err(ClientError::InvalidArgument),
                };
                self.resources.insert_client(
                    new_id,
                    &interfaces::WL_REGISTRY,
                    1,
                    ResourceKind::Registry,
                )?;
                self.registries.push(new_id);

                for (name, global) in self.globals.entries() {
                    self.queue_global(new_id, name, &global);
                }
                Ok(())
            }
            _ => Err(ClientError::InvalidArgument),
        }
    }

    fn handle_registry(&mut self, msg: &mut Message) -> Result<(), ClientError> {
        match msg.header.opcode {
            REGISTRY_BIND => {
                let mut args = msg.args.drain(..);
                let (name, iface_name, version, new_id) = match (args.next(), args.next()) {
                    (
                        Some(ArgValue::Uint(name)),
                        Some(ArgValue::AnyNewId(iface_name, version, new_id)),
                    ) => (name, iface_name, version, new_id),
                    _ => return Err(ClientError::InvalidArgument),
                };
                drop(args);

                let Some(global) = self.globals.get(name) else {
                    return Err(ClientError::UnknownGlobal(name));
                };
                if global.interface.name != iface_name.as_ref() {
                    return Err(ClientError::InterfaceMismatch {
                        requested: iface_name.into_owned(),
                        actual: global.interface.name,
                    });
                }
                if version == 0 || version > global.version {
                    return Err(ClientError::VersionMismatch {
                        requested: version,
                        max: global.version,
                    });
                }

                let kind = global.instantiate(self.id, new_id, version);
                self.resources
                    .insert_client(new_id, global.interface, version, kind)?;
                Ok(())
            }
            _ => Err(ClientError::InvalidArgument),
        }
    }

    fn handle_compositor(&mut self, msg: &mut Message) -> Result<(), ClientError> {
        let version = self
            .resources
            .get(msg.header.object_id)
            .map_or(1, |r| r.version);
        let new_id = match msg.args.drain(..).next() {
            Some(ArgValue::NewId(id)) => id,
            _ => return Err(ClientError::InvalidArgument),
        };

        match msg.header.opcode {
            COMPOSITOR_CREATE_SURFACE => {
                self.resources.insert_client(
                    new_id,
                    &interfaces::WL_SURFACE,
                    version,
                    ResourceKind::Surface(SurfaceState::default()),
                )?;
                (self.hooks.on_surface_created)(self.id, new_id);
                Ok(())
            }
            COMPOSITOR_CREATE_REGION => {
                self.resources.insert_client(
                    new_id,
                    &interfaces::WL_REGION,
                    version,
                    ResourceKind::Region(RegionState::default()),
                )?;
                Ok(())
            }
            _ => Err(ClientError::InvalidArgument),
        }
    }

    fn handle_surface(&mut self, msg: &mut Message) -> Result<(), ClientError> {
        let id = msg.header.object_id;

        match msg.header.opcode {
            SURFACE_DESTROY => {
                (self.hooks.on_surface_destroyed)(self.id, id);
                self.destroy_resource(id);
                Ok(())
            }
            SURFACE_ATTACH => {
                let mut args = msg.args.drain(..);
                match (args.next(), args.next(), args.next()) {
                    (
                        Some(ArgValue::OptObject(buffer)),
                        Some(ArgValue::Int(x)),
                        Some(ArgValue::Int(y)),
                    ) => {
                        drop(args);
                        self.surface_mut(id)?.attach(buffer, x, y);
                        Ok(())
                    }
                    _ => Err(ClientError::InvalidArgument),
                }
            }
            SURFACE_DAMAGE | SURFACE_DAMAGE_BUFFER => {
                let rect = take_rect(msg)?;
                self.surface_mut(id)?.damage(rect);
                Ok(())
            }
            SURFACE_FRAME => {
                let new_id = match msg.args.drain(..).next() {
                    Some(ArgValue::NewId(id)) => id,
                    _ => return Err(ClientError::InvalidArgument),
                };
                self.resources.insert_client(
                    new_id,
                    &interfaces::WL_CALLBACK,
                    1,
                    ResourceKind::Callback,
                )?;
                (self.hooks.schedule_frame_callback)(self.id, new_id);

                // Reference behavior: present immediately rather than on a
                // real vblank
                let timestamp = self.started.elapsed().as_millis() as u32;
                let mut args = self.msg_pool.get_args();
                args.push(ArgValue::Uint(timestamp));
                self.queue_event(&interfaces::WL_CALLBACK, new_id, CALLBACK_DONE, args);
                self.destroy_resource(new_id);
                Ok(())
            }
            SURFACE_SET_OPAQUE_REGION | SURFACE_SET_INPUT_REGION => {
                let region = match msg.args.drain(..).next() {
                    Some(ArgValue::OptObject(region)) => region,
                    _ => return Err(ClientError::InvalidArgument),
                };
                if let Some(region_id) = region {
                    match self.resources.get(region_id).map(|r| &r.kind) {
                        Some(ResourceKind::Region(_)) => {}
                        _ => return Err(ClientError::InvalidArgument),
                    }
                }
                let opcode = msg.header.opcode;
                let surface = self.surface_mut(id)?;
                if opcode == SURFACE_SET_OPAQUE_REGION {
                    surface.pending.opaque_region = region;
                } else {
                    surface.pending.input_region = region;
                }
                Ok(())
            }
            SURFACE_COMMIT => {
                let Some(resource) = self.resources.get_mut(id) else {
                    return Err(ClientError::UnknownObject(id.as_u32()));
                };
                let ResourceKind::Surface(surface) = &mut resource.kind else {
                    return Err(ClientError::InvalidArgument);
                };
                surface.commit();
                (self.hooks.on_surface_commit)(self.id, id, surface);
                Ok(())
            }
            SURFACE_SET_BUFFER_TRANSFORM => {
                let value = take_int(msg)?;
                self.surface_mut(id)?.pending.buffer_transform = value;
                Ok(())
            }
            SURFACE_SET_BUFFER_SCALE => {
                let value = take_int(msg)?;
                self.surface_mut(id)?.pending.buffer_scale = value;
                Ok(())
            }
            SURFACE_OFFSET => {
                let mut args = msg.args.drain(..);
                match (args.next(), args.next()) {
                    (Some(ArgValue::Int(x)), Some(ArgValue::Int(y))) => {
                        drop(args);
                        self.surface_mut(id)?.pending.offset = (x, y);
                        Ok(())
                    }
                    _ => Err(ClientError::InvalidArgument),
                }
            }
            _ => Err(ClientError::InvalidArgument),
        }
    }

    fn handle_region(&mut self, msg: &mut Message) -> Result<(), ClientError> {
        let id = msg.header.object_id;

        match msg.header.opcode {
            REGION_DESTROY => {
                self.destroy_resource(id);
                Ok(())
            }
            REGION_ADD | REGION_SUBTRACT => {
                let op = if msg.header.opcode == REGION_ADD {
                    RegionOp::Add
                } else {
                    RegionOp::Subtract
                };
                let rect = take_rect(msg)?;
                let Some(resource) = self.resources.get_mut(id) else {
                    return Err(ClientError::UnknownObject(id.as_u32()));
                };
                let ResourceKind::Region(region) = &mut resource.kind else {
                    return Err(ClientError::InvalidArgument);
                };
                region.ops.push((op, rect));
                Ok(())
            }
            _ => Err(ClientError::InvalidArgument),
        }
    }

    fn surface_mut(&mut self, id: ObjectId) -> Result<&mut SurfaceState, ClientError> {
        let Some(resource) = self.resources.get_mut(id) else {
            return Err(ClientError::UnknownObject(id.as_u32()));
        };
        match &mut resource.kind {
            ResourceKind::Surface(surface) => Ok(surface),
            _ => Err(ClientError::InvalidArgument),
        }
    }

    /// Create an object on the server-allocated side of the ID space.
    ///
    /// The core protocol never does this on its own; protocol extensions
    /// that announce objects to the client (through events carrying a
    /// `new_id`) allocate them here.
    pub fn create_server_object(
        &mut self,
        interface: &'static Interface,
        version: u32,
        kind: ResourceKind,
    ) -> Result<ObjectId, ClientError> {
        self.resources.alloc_server(interface, version, kind)
    }

    fn next_serial(&mut self) -> u32 {
        let serial = self.serial;
        self.serial = self.serial.wrapping_add(1);
        serial
    }

    fn queue_global(&mut self, registry: ObjectId, name: u32, global: &Global) {
        let mut args = self.msg_pool.get_args();
        args.push(ArgValue::Uint(name));
        args.push(ArgValue::String(global.interface.name.to_owned()));
        args.push(ArgValue::Uint(global.version));
        self.queue_event(&interfaces::WL_REGISTRY, registry, REGISTRY_GLOBAL, args);
    }

    fn queue_event(
        &mut self,
        iface: &'static Interface,
        object_id: ObjectId,
        opcode: u16,
        args: Vec<ArgValue>,
    ) {
        let msg = Message {
            // The size field is computed when the message hits the wire
            header: MessageHeader {
                object_id,
                size: 0,
                opcode,
            },
            args,
        };
        if self.debug {
            eprintln!("[waylink]  -> {:?}", DebugMessage::new(&msg, true, iface));
        }
        self.events.push_back(msg);
    }

    /// Remove a resource; client-created IDs are handed back to the client
    /// via `wl_display.delete_id`.
    fn destroy_resource(&mut self, id: ObjectId) -> Option<Resource> {
        let resource = self.resources.remove(id)?;
        if id.created_by_client() {
            let mut args = self.msg_pool.get_args();
            args.push(ArgValue::Uint(id.as_u32()));
            self.queue_event(
                &interfaces::WL_DISPLAY,
                ObjectId::DISPLAY,
                WL_DISPLAY_DELETE_ID,
                args,
            );
        }
        Some(resource)
    }

    fn flush(&mut self) -> Result<(), ClientError> {
        while let Some(msg) = self.events.pop_front() {
            if let Err(SendMessageError { msg, err }) =
                self.socket
                    .write_message(msg, &mut self.msg_pool, IoMode::Blocking)
            {
                self.events.push_front(msg);
                return Err(match err {
                    EncodeError::Io(io) => io.into(),
                    other => ClientError::Encode(other),
                });
            }
        }
        self.socket.flush(IoMode::Blocking).map_err(Into::into)
    }
}

fn take_int(msg: &mut Message) -> Result<i32, ClientError> {
    match msg.args.drain(..).next() {
        Some(ArgValue::Int(value)) => Ok(value),
        _ => Err(ClientError::InvalidArgument),
    }
}

fn take_rect(msg: &mut Message) -> Result<Rect, ClientError> {
    let mut args = msg.args.drain(..);
    match (args.next(), args.next(), args.next(), args.next()) {
        (
            Some(ArgValue::Int(x)),
            Some(ArgValue::Int(y)),
            Some(ArgValue::Int(width)),
            Some(ArgValue::Int(height)),
        ) => Ok(Rect {
            x,
            y,
            width,
            height,
        }),
        _ => Err(ClientError::InvalidArgument),
    }
}
