//! Wayland connection

use std::collections::VecDeque;
use std::env;
use std::ffi::{CStr, CString};
use std::io;
use std::num::NonZeroU32;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use log::warn;

use waylink_core::debug::DebugMessage;
use waylink_core::transport::{
    BufferedSocket, EncodeError, PeekHeaderError, RecvMessageError, SendMessageError,
};
use waylink_core::{ArgType, ArgValue, Interface, IoMode, Message, MessageBuffersPool, ObjectId};

use crate::object::{IdSpaceExhausted, Object, ObjectManager, Proxy};
use crate::protocol::wl_callback::WlCallback;
use crate::protocol::wl_display::{self, WlDisplay};
use crate::protocol::wl_registry::{self, GlobalArgs, WlRegistry};
use crate::protocol::REGISTRY_ID;
use crate::EventCtx;

#[cfg(feature = "tokio")]
use tokio::io::unix::AsyncFd;

/// An error that can occur while connecting to a Wayland socket.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// `$XDG_RUNTIME_DIR` is needed to resolve a relative socket name but is
    /// not set.
    #[error("$XDG_RUNTIME_DIR must be set unless $WAYLAND_DISPLAY is an absolute path")]
    NoRuntimeDir,
    /// The socket could not be reached.
    #[error("failed to connect to the wayland socket: {0}")]
    ConnectFailed(#[from] io::Error),
}

/// The server reported a protocol violation via `wl_display.error`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("protocol error on object {object_id} (code {code}): {message:?}")]
pub struct ProtocolError {
    pub object_id: u32,
    pub code: u32,
    pub message: CString,
}

/// An error on an established Wayland connection.
///
/// All of these except `WouldBlock`-carrying IO errors are terminal: the
/// connection is closed, its objects are dropped and every subsequent call
/// returns [`SocketClosed`](Error::SocketClosed).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection closed by the peer")]
    SocketClosed,
    #[error("io: {0}")]
    Io(io::Error),
    #[error("malformed message header: {0}")]
    BadHeader(PeekHeaderError),
    #[error("malformed message: {0}")]
    Codec(RecvMessageError),
    #[error("failed to encode message: {0}")]
    Encode(EncodeError),
    #[error(transparent)]
    Protocol(ProtocolError),
    #[error("received a message for unknown object {0}")]
    UnknownObject(u32),
    #[error("unknown opcode {opcode} on {interface:?}")]
    UnknownOpcode {
        interface: &'static CStr,
        opcode: u16,
    },
    #[error("client object id space exhausted")]
    IdSpaceExhausted,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset => Self::SocketClosed,
            _ => Self::Io(err),
        }
    }
}

impl From<PeekHeaderError> for Error {
    fn from(err: PeekHeaderError) -> Self {
        match err {
            PeekHeaderError::Io(io) => io.into(),
            other => Self::BadHeader(other),
        }
    }
}

impl From<RecvMessageError> for Error {
    fn from(err: RecvMessageError) -> Self {
        match err {
            RecvMessageError::Io(io) => io.into(),
            other => Self::Codec(other),
        }
    }
}

impl From<IdSpaceExhausted> for Error {
    fn from(_: IdSpaceExhausted) -> Self {
        Self::IdSpaceExhausted
    }
}

/// An error that can occur while binding a global.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("global with interface {0:?} not found")]
    GlobalNotFound(&'static CStr),
    #[error("global has version {actual} but version {requested} was requested")]
    UnsupportedVersion { actual: u32, requested: u32 },
    #[error(transparent)]
    Connection(#[from] Error),
}

/// Wayland connection state.
///
/// Manages a buffered Wayland socket, keeps track of objects and
/// request/event queues and dispatches object events.
///
/// Set the `WAYLAND_DEBUG` environment variable to trace messages.
pub struct Connection<D> {
    #[cfg(feature = "tokio")]
    async_fd: Option<AsyncFd<RawFd>>,

    socket: BufferedSocket<UnixStream>,
    msg_buffers_pool: MessageBuffersPool,

    object_mgr: ObjectManager<D>,

    event_queue: VecDeque<QueuedEvent>,
    requests_queue: VecDeque<Message>,
    break_dispatch: bool,
    closed: bool,
    strict: bool,

    registry: WlRegistry,
    globals: Vec<GlobalArgs>,

    // `None` while dispatching registry events, to prevent mutation from
    // registry callbacks.
    registry_cbs: Option<Vec<RegistryCb<D>>>,

    debug: bool,
}

enum QueuedEvent {
    DeleteId(ObjectId),
    RegistryEvent(wl_registry::Event),
    Message(Message),
}

pub(crate) type GenericCallback<D> =
    Box<dyn FnMut(&mut Connection<D>, &mut D, Object, Message) + Send>;

type RegistryCb<D> = Box<dyn FnMut(&mut Connection<D>, &mut D, &wl_registry::Event) + Send>;

impl<D> AsRawFd for Connection<D> {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

fn socket_path() -> Result<PathBuf, ConnectError> {
    let display = PathBuf::from(env::var_os("WAYLAND_DISPLAY").unwrap_or_else(|| "wayland-0".into()));
    if display.is_absolute() {
        Ok(display)
    } else {
        let runtime_dir = env::var_os("XDG_RUNTIME_DIR").ok_or(ConnectError::NoRuntimeDir)?;
        Ok(PathBuf::from(runtime_dir).join(display))
    }
}

impl<D> Connection<D> {
    /// Connect to the Wayland socket named by `$WAYLAND_DISPLAY` (default
    /// `wayland-0`), resolved inside `$XDG_RUNTIME_DIR` unless the name is an
    /// absolute path.
    ///
    /// The registry is created together with the connection; call
    /// [`blocking_roundtrip`](Self::blocking_roundtrip) to collect the
    /// advertised globals.
    pub fn connect() -> Result<Self, ConnectError> {
        Ok(Self::connect_to(UnixStream::connect(socket_path()?)?))
    }

    /// Wrap an already-connected stream.
    ///
    /// Useful for non-standard transports and for tests driving both ends of
    /// a socketpair.
    pub fn connect_to(stream: UnixStream) -> Self {
        let mut this = Self {
            #[cfg(feature = "tokio")]
            async_fd: None,

            socket: BufferedSocket::from(stream),
            msg_buffers_pool: MessageBuffersPool::default(),

            object_mgr: ObjectManager::new(),

            event_queue: VecDeque::with_capacity(32),
            requests_queue: VecDeque::with_capacity(32),
            break_dispatch: false,
            closed: false,
            strict: false,

            registry: Proxy::new(REGISTRY_ID, 1),
            globals: Vec::new(),
            registry_cbs: Some(Vec::new()),

            debug: env::var_os("WAYLAND_DEBUG").is_some(),
        };

        // The registry record is premade in the object table; announce it.
        let mut args = this.msg_buffers_pool.get_args();
        args.push(ArgValue::NewId(REGISTRY_ID));
        this.send_request(
            WlDisplay::INTERFACE,
            Message {
                header: waylink_core::MessageHeader {
                    object_id: ObjectId::DISPLAY,
                    size: 0,
                    opcode: wl_display::GET_REGISTRY,
                },
                args,
            },
        );

        this
    }

    /// Get the Wayland registry.
    pub fn registry(&self) -> WlRegistry {
        self.registry
    }

    /// Get the list of currently advertised globals.
    ///
    /// This list reflects every registry event received so far, including
    /// ones not yet dispatched by [`dispatch_events`](Self::dispatch_events).
    pub fn globals(&self) -> &[GlobalArgs] {
        &self.globals
    }

    /// Treat unknown opcodes and unknown objects as fatal errors instead of
    /// logging and skipping them.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Send `wl_display.sync` and return the callback that will receive
    /// `done`.
    pub fn sync(&mut self) -> Result<WlCallback, Error> {
        WlDisplay::INSTANCE.sync(self)
    }

    /// Bind a singleton global.
    ///
    /// If more than one global of the requested interface is advertised, the
    /// first one wins.
    pub fn bind_singleton<P: Proxy>(&mut self, version: u32) -> Result<P, BindError> {
        assert!(
            version <= P::INTERFACE.version,
            "requested a version newer than the supported interface"
        );

        let global = self
            .globals
            .iter()
            .find(|g| g.is::<P>())
            .ok_or(BindError::GlobalNotFound(P::INTERFACE.name))?;

        if global.version < version {
            return Err(BindError::UnsupportedVersion {
                actual: global.version,
                requested: version,
            });
        }

        let name = global.name;
        let registry = self.registry;
        Ok(registry.bind(self, name, version)?)
    }

    /// Register a registry event callback.
    ///
    /// # Panics
    ///
    /// Panics if called from the context of a registry callback.
    pub fn add_registry_cb<
        F: FnMut(&mut Connection<D>, &mut D, &wl_registry::Event) + Send + 'static,
    >(
        &mut self,
        cb: F,
    ) {
        self.registry_cbs
            .as_mut()
            .expect("add_registry_cb called from a registry callback")
            .push(Box::new(cb));
    }

    /// Set the event callback of `proxy`.
    ///
    /// # Panics
    ///
    /// Panics if the object does not exist or is dead, or if `proxy` is the
    /// registry (use [`add_registry_cb`](Self::add_registry_cb) instead).
    pub fn set_callback_for<P: Proxy, F: FnMut(EventCtx<D, P>) + Send + 'static>(
        &mut self,
        proxy: P,
        cb: F,
    ) {
        assert_ne!(
            P::INTERFACE,
            WlRegistry::INTERFACE,
            "attempt to set a callback for wl_registry"
        );

        let obj = self
            .object_mgr
            .get_object_mut(proxy.id())
            .expect("attempt to set a callback for a non-existing object");
        assert!(obj.is_alive, "attempt to set a callback for a dead object");

        obj.cb = Some(Self::make_generic_cb(cb));
    }

    /// Perform a blocking roundtrip.
    ///
    /// Flushes pending requests and receives until the server acknowledges
    /// the sync; events received in the meantime are queued for dispatch,
    /// never dropped.
    pub fn blocking_roundtrip(&mut self) -> Result<(), Error> {
        self.guard()?;
        let sync_cb = self.sync()?;
        self.flush(IoMode::Blocking)?;

        loop {
            match self.recv_event(IoMode::Blocking) {
                Ok(QueuedEvent::Message(m)) if m.header.object_id == sync_cb.id() => {
                    // Single-shot: `done` is a destructor event
                    if let Some(obj) = self.object_mgr.get_object_mut(sync_cb.id()) {
                        obj.is_alive = false;
                    }
                    self.msg_buffers_pool.reuse_args(m.args);
                    return Ok(());
                }
                Ok(other) => self.event_queue.push_back(other),
                Err(err) => return Err(self.fatal(err)),
            }
        }
    }

    #[doc(hidden)]
    pub fn alloc_msg_args(&mut self) -> Vec<ArgValue> {
        self.msg_buffers_pool.get_args()
    }

    /// Allocate a new object. The returned proxy must be sent in a request
    /// as a `new_id` argument.
    #[doc(hidden)]
    pub fn allocate_new_object<P: Proxy>(&mut self, version: u32) -> Result<P, Error> {
        let state = self.object_mgr.alloc_client_object(P::INTERFACE, version)?;
        Ok(P::new(state.object.id, version))
    }

    #[doc(hidden)]
    pub fn send_request(&mut self, iface: &'static Interface, request: Message) {
        let obj = self
            .object_mgr
            .get_object_mut(request.header.object_id)
            .expect("attempt to send a request for a non-existing object");
        assert!(obj.is_alive, "attempt to send a request for a dead object");
        let object = obj.object;

        // Destroy the object if the request is a destructor
        if iface.requests[request.header.opcode as usize].is_destructor {
            obj.is_alive = false;
        }

        if self.debug {
            eprintln!(
                "[waylink]  -> {:?}",
                DebugMessage::new(&request, false, object.interface)
            );
        }

        self.requests_queue.push_back(request);
    }

    fn guard(&self) -> Result<(), Error> {
        if self.closed {
            Err(Error::SocketClosed)
        } else {
            Ok(())
        }
    }

    /// Record a terminal failure: drop every object and refuse further use.
    fn fatal(&mut self, err: Error) -> Error {
        let transient =
            matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::WouldBlock);
        if !transient {
            self.closed = true;
            self.object_mgr.clear();
            self.event_queue.clear();
            self.requests_queue.clear();
        }
        err
    }

    fn recv_event(&mut self, mode: IoMode) -> Result<QueuedEvent, Error> {
        loop {
            let header = self.socket.peek_message_header(mode)?;

            let Some(obj) = self.object_mgr.get_object_mut(header.object_id) else {
                if self.strict {
                    return Err(Error::UnknownObject(header.object_id.as_u32()));
                }
                warn!(
                    "dropping event for unknown object {}",
                    header.object_id.as_u32()
                );
                self.socket.skip_message(header, mode)?;
                continue;
            };
            let object = obj.object;

            let Some(desc) = object.interface.events.get(header.opcode as usize) else {
                if self.strict {
                    return Err(Error::UnknownOpcode {
                        interface: object.interface.name,
                        opcode: header.opcode,
                    });
                }
                warn!("dropping unknown opcode {} on {:?}", header.opcode, object);
                self.socket.skip_message(header, mode)?;
                continue;
            };

            let event =
                self.socket
                    .recv_message(header, desc.signature, &mut self.msg_buffers_pool, mode)?;

            if self.debug {
                eprintln!(
                    "[waylink] {:?}",
                    DebugMessage::new(&event, true, object.interface)
                );
            }

            if event.header.object_id == ObjectId::DISPLAY {
                match WlDisplay::parse_event(event, 1, &mut self.msg_buffers_pool).unwrap() {
                    wl_display::Event::Error(err) => {
                        // Surface the protocol error as early as possible
                        return Err(Error::Protocol(ProtocolError {
                            object_id: err.object_id.as_u32(),
                            code: err.code,
                            message: err.message,
                        }));
                    }
                    wl_display::Event::DeleteId(id) => {
                        let id = NonZeroU32::new(id)
                            .map(ObjectId)
                            .ok_or(Error::Codec(RecvMessageError::UnexpectedNull))?;
                        return Ok(QueuedEvent::DeleteId(id));
                    }
                }
            }

            if event.header.object_id == self.registry.id() {
                let event = WlRegistry::parse_event(event, 1, &mut self.msg_buffers_pool).unwrap();
                match &event {
                    wl_registry::Event::Global(global) => {
                        if let Some(existing) =
                            self.globals.iter_mut().find(|g| g.name == global.name)
                        {
                            *existing = global.clone();
                        } else {
                            self.globals.push(global.clone());
                        }
                    }
                    wl_registry::Event::GlobalRemove(name) => {
                        if let Some(i) = self.globals.iter().position(|g| g.name == *name) {
                            self.globals.swap_remove(i);
                        }
                    }
                }
                return Ok(QueuedEvent::RegistryEvent(event));
            }

            // Register objects the server created through `new_id` event
            // arguments
            for (arg, arg_ty) in event.args.iter().zip(desc.signature) {
                if let ArgValue::NewId(id) = arg {
                    let ArgType::NewId(interface) = arg_ty else {
                        unreachable!()
                    };
                    self.object_mgr.register_server_object(Object {
                        id: *id,
                        interface,
                        version: object.version,
                    });
                }
            }

            return Ok(QueuedEvent::Message(event));
        }
    }

    /// Receive events from the Wayland socket into the internal queue.
    ///
    /// In [`Blocking`](IoMode::Blocking) mode this blocks until at least one
    /// event is read. In [`NonBlocking`](IoMode::NonBlocking) mode it reads
    /// until the socket would block, and propagates
    /// [`WouldBlock`](io::ErrorKind::WouldBlock) if nothing was received.
    pub fn recv_events(&mut self, mut mode: IoMode) -> Result<(), Error> {
        self.guard()?;
        let mut at_least_one = false;

        loop {
            let event = match self.recv_event(mode) {
                Ok(event) => event,
                Err(Error::Io(ref e))
                    if e.kind() == io::ErrorKind::WouldBlock && at_least_one =>
                {
                    return Ok(())
                }
                Err(err) => return Err(self.fatal(err)),
            };

            at_least_one = true;
            mode = IoMode::NonBlocking;
            self.event_queue.push_back(event);
        }
    }

    /// Send the queue of pending requests to the server.
    pub fn flush(&mut self, mode: IoMode) -> Result<(), Error> {
        self.guard()?;

        while let Some(msg) = self.requests_queue.pop_front() {
            if let Err(SendMessageError { msg, err }) =
                self.socket
                    .write_message(msg, &mut self.msg_buffers_pool, mode)
            {
                self.requests_queue.push_front(msg);
                let err = match err {
                    EncodeError::Io(io) => io.into(),
                    other => Error::Encode(other),
                };
                return Err(self.fatal(err));
            }
        }

        match self.socket.flush(mode) {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = err.into();
                Err(self.fatal(err))
            }
        }
    }

    /// Empty the queue of pending events, calling the callback (if set) for
    /// each event.
    ///
    /// # Panics
    ///
    /// Panics if called from the context of a registry callback.
    pub fn dispatch_events(&mut self, state: &mut D) {
        self.break_dispatch = false;

        while let Some(event) = self.event_queue.pop_front() {
            match event {
                QueuedEvent::DeleteId(id) => self.object_mgr.delete_client_object(id),
                QueuedEvent::RegistryEvent(event) => {
                    let mut registry_cbs = self
                        .registry_cbs
                        .take()
                        .expect("dispatch_events called from a registry callback");

                    for cb in &mut registry_cbs {
                        cb(self, state, &event);
                    }

                    self.registry_cbs = Some(registry_cbs);

                    if self.break_dispatch {
                        break;
                    }
                }
                QueuedEvent::Message(event) => {
                    let object = match self.object_mgr.get_object_mut(event.header.object_id) {
                        Some(obj) if obj.is_alive => obj,
                        // Events for unknown or dead objects are ignored
                        _ => continue,
                    };

                    // Move the callback out of the object to appease the
                    // borrow checker
                    let mut object_cb = object.cb.take();
                    let object = object.object;
                    let opcode = event.header.opcode;

                    if let Some(cb) = &mut object_cb {
                        cb(self, state, object, event);
                    }

                    if let Some(object) = self.object_mgr.get_object_mut(object.id) {
                        // Destroy the object if the event is a destructor
                        if object.object.interface.events[opcode as usize].is_destructor {
                            object.is_alive = false;
                        }

                        // Re-arm the callback unless it was replaced from
                        // within
                        if object.is_alive && object.cb.is_none() {
                            object.cb = object_cb;
                        }
                    }

                    if self.break_dispatch {
                        break;
                    }
                }
            }
        }
    }

    /// Block for one message, then dispatch the event queue.
    pub fn dispatch_one(&mut self, state: &mut D) -> Result<(), Error> {
        self.guard()?;
        match self.recv_event(IoMode::Blocking) {
            Ok(event) => self.event_queue.push_back(event),
            Err(err) => return Err(self.fatal(err)),
        }
        self.dispatch_events(state);
        Ok(())
    }

    /// Flush, receive and dispatch in a loop, until the connection closes or
    /// a callback calls [`break_dispatch_loop`](Self::break_dispatch_loop).
    pub fn run(&mut self, state: &mut D) -> Result<(), Error> {
        loop {
            self.flush(IoMode::Blocking)?;
            self.dispatch_one(state)?;
            if self.break_dispatch {
                return Ok(());
            }
        }
    }

    /// Call this from a callback to break the dispatch loop.
    ///
    /// Causes [`dispatch_events`](Self::dispatch_events) (and
    /// [`run`](Self::run)) to return; events after the current one stay in
    /// the queue.
    pub fn break_dispatch_loop(&mut self) {
        self.break_dispatch = true;
    }

    fn make_generic_cb<P: Proxy, F: FnMut(EventCtx<D, P>) + Send + 'static>(
        mut cb: F,
    ) -> GenericCallback<D> {
        // Note: if `F` does not capture anything, this `Box::new` will not
        // allocate.
        Box::new(move |conn, state, object, event| {
            let proxy: P = match object.try_into() {
                Ok(proxy) => proxy,
                Err(_) => {
                    warn!("callback invoked for object of wrong interface, ignoring");
                    return;
                }
            };
            let event = match P::parse_event(event, object.version, &mut conn.msg_buffers_pool) {
                Ok(event) => event,
                Err(_) => {
                    warn!("failed to parse event for {:?}, ignoring", object);
                    return;
                }
            };
            let ctx = EventCtx {
                conn,
                state,
                proxy,
                event,
            };
            cb(ctx);
        })
    }
}

#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
impl<D> Connection<D> {
    /// Async version of [`blocking_roundtrip`](Self::blocking_roundtrip).
    pub async fn async_roundtrip(&mut self) -> Result<(), Error> {
        self.guard()?;
        let sync_cb = self.sync()?;
        self.async_flush().await?;

        loop {
            match self.async_recv_event().await {
                Ok(QueuedEvent::Message(m)) if m.header.object_id == sync_cb.id() => {
                    if let Some(obj) = self.object_mgr.get_object_mut(sync_cb.id()) {
                        obj.is_alive = false;
                    }
                    self.msg_buffers_pool.reuse_args(m.args);
                    return Ok(());
                }
                Ok(other) => self.event_queue.push_back(other),
                Err(err) => return Err(self.fatal(err)),
            }
        }
    }

    async fn async_recv_event(&mut self) -> Result<QueuedEvent, Error> {
        let async_fd = match self.async_fd.take() {
            Some(fd) => fd,
            None => AsyncFd::new(self.as_raw_fd()).map_err(Error::Io)?,
        };

        loop {
            let mut fd_guard = async_fd.readable().await.map_err(Error::Io)?;
            match self.recv_event(IoMode::NonBlocking) {
                Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    fd_guard.clear_ready()
                }
                result => {
                    self.async_fd = Some(async_fd);
                    return result;
                }
            }
        }
    }

    /// Async version of [`recv_events`](Self::recv_events).
    pub async fn async_recv_events(&mut self) -> Result<(), Error> {
        self.guard()?;
        let event = match self.async_recv_event().await {
            Ok(event) => event,
            Err(err) => return Err(self.fatal(err)),
        };
        self.event_queue.push_back(event);

        loop {
            match self.recv_event(IoMode::NonBlocking) {
                Ok(event) => self.event_queue.push_back(event),
                Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(self.fatal(err)),
            }
        }
    }

    /// Async version of [`flush`](Self::flush).
    pub async fn async_flush(&mut self) -> Result<(), Error> {
        // Flushing often succeeds without waiting for writability
        match self.flush(IoMode::NonBlocking) {
            Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => (),
            result => return result,
        }

        let async_fd = match self.async_fd.take() {
            Some(fd) => fd,
            None => AsyncFd::new(self.as_raw_fd()).map_err(Error::Io)?,
        };

        loop {
            let mut fd_guard = async_fd.writable().await.map_err(Error::Io)?;
            match self.flush(IoMode::NonBlocking) {
                Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    fd_guard.clear_ready()
                }
                result => {
                    self.async_fd = Some(async_fd);
                    return result;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn connection_is_send() {
        assert_send::<Connection<()>>();
    }

    #[test]
    fn requests_are_queued_until_flush() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let mut conn = Connection::<()>::connect_to(local);
        // get_registry is queued by connect_to
        assert_eq!(conn.requests_queue.len(), 1);
        conn.sync().unwrap();
        assert_eq!(conn.requests_queue.len(), 2);
        conn.flush(IoMode::Blocking).unwrap();
        assert!(conn.requests_queue.is_empty());
    }

    #[test]
    fn closed_connection_rejects_calls() {
        let (local, remote) = UnixStream::pair().unwrap();
        let mut conn = Connection::<()>::connect_to(local);
        drop(remote);

        let err = conn.blocking_roundtrip().unwrap_err();
        assert!(matches!(err, Error::SocketClosed));
        // Terminal: every further call short-circuits
        assert!(matches!(
            conn.blocking_roundtrip().unwrap_err(),
            Error::SocketClosed
        ));
        assert!(matches!(
            conn.recv_events(IoMode::Blocking).unwrap_err(),
            Error::SocketClosed
        ));
    }
}
