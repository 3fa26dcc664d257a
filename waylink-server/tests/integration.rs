//! Client ↔ server integration tests.
//!
//! Each test wires a real `waylink_client::Connection` to a real
//! `waylink_server::Server` over a socketpair, so the full stack (proxies,
//! codec, FD passing, object tables, dispatch) is exercised on both sides.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::thread;

use waylink_client::object::{BadMessage, Object, Proxy, WrongObject};
use waylink_client::protocol::{WlCallback, WlCompositor};
use waylink_client::{Connection, Error};
use waylink_core::{
    ArgType, ArgValue, Interface, IoMode, Message, MessageBuffersPool, MessageDesc, MessageHeader,
    ObjectId,
};
use waylink_server::{ClientError, Hooks, ResourceKind, Server};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_server(name: &str) -> Server {
    let path = std::env::temp_dir().join(format!(
        "waylink-it-{}-{}.sock",
        std::process::id(),
        name
    ));
    Server::listen_at(path.as_os_str()).unwrap()
}

fn connect(
    server: Arc<Server>,
) -> (
    Connection<Vec<u32>>,
    thread::JoinHandle<Result<(), ClientError>>,
) {
    let (client_end, server_end) = UnixStream::pair().unwrap();
    let handle = thread::spawn(move || server.serve_stream(server_end));
    (Connection::connect_to(client_end), handle)
}

fn assert_idle<D>(conn: &mut Connection<D>) {
    match conn.recv_events(IoMode::NonBlocking) {
        Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        other => panic!("expected no pending messages, got {other:?}"),
    }
}

static WL_SHM_STUB: Interface = Interface {
    name: c"wl_shm",
    version: 2,
    requests: &[],
    events: &[],
};

#[test]
fn registry_enumeration_converges() {
    init_logging();
    let server = test_server("registry");
    server.add_compositor_global();
    server.add_global(&WL_SHM_STUB, 2, |_, _, _| ResourceKind::Generic);
    let server = Arc::new(server);

    let (mut conn, server_thread) = connect(server.clone());
    conn.blocking_roundtrip().unwrap();

    let mut advertised: Vec<(u32, String, u32)> = server
        .globals()
        .into_iter()
        .map(|(name, iface, version)| {
            (name, iface.name.to_string_lossy().into_owned(), version)
        })
        .collect();
    let mut seen: Vec<(u32, String, u32)> = conn
        .globals()
        .iter()
        .map(|g| (g.name, g.interface.to_string_lossy().into_owned(), g.version))
        .collect();
    advertised.sort();
    seen.sort();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen, advertised);

    // Nothing beyond bookkeeping is pending
    let mut state = Vec::new();
    let _ = conn.recv_events(IoMode::NonBlocking);
    conn.dispatch_events(&mut state);
    assert_idle(&mut conn);

    drop(conn);
    server_thread.join().unwrap().unwrap();
}

#[test]
fn global_remove_shrinks_the_view() {
    init_logging();
    let server = test_server("global-remove");
    server.add_compositor_global();
    let shm_name = server.add_global(&WL_SHM_STUB, 2, |_, _, _| ResourceKind::Generic);
    let server = Arc::new(server);

    let (mut conn, server_thread) = connect(server.clone());
    conn.blocking_roundtrip().unwrap();
    assert_eq!(conn.globals().len(), 2);

    assert!(server.remove_global(shm_name));
    conn.blocking_roundtrip().unwrap();
    assert_eq!(conn.globals().len(), 1);
    assert!(conn.globals().iter().all(|g| g.name != shm_name));

    drop(conn);
    server_thread.join().unwrap().unwrap();
}

#[test]
fn sync_callback_fires_exactly_once_and_id_is_reused() {
    init_logging();
    let server = Arc::new(test_server("sync"));
    let (mut conn, server_thread) = connect(server);

    let mut done_serials = Vec::new();

    let cb = conn.sync().unwrap();
    assert_eq!(cb.id().as_u32(), 3);
    conn.set_callback_for(cb, |ctx| {
        let waylink_client::protocol::wl_callback::Event::Done(serial) = ctx.event;
        ctx.state.push(serial);
    });

    conn.blocking_roundtrip().unwrap();
    conn.dispatch_events(&mut done_serials);
    assert_eq!(done_serials.len(), 1);

    // Drain the delete_id bookkeeping so both callback IDs are vacant again
    let _ = conn.recv_events(IoMode::NonBlocking);
    conn.dispatch_events(&mut done_serials);
    assert_eq!(done_serials.len(), 1, "done must fire exactly once");

    // The roundtrip callback used ID 4; it is free for reuse now
    let cb2 = conn.sync().unwrap();
    assert_eq!(cb2.id().as_u32(), 4);

    drop(conn);
    server_thread.join().unwrap().unwrap();
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum HookEvent {
    Created(u32),
    Committed(u32, u64),
    Destroyed(u32),
    Frame(u32),
}

fn recording_hooks(log: Arc<Mutex<Vec<HookEvent>>>) -> Hooks {
    let created = log.clone();
    let committed = log.clone();
    let destroyed = log.clone();
    let frame = log;
    Hooks {
        on_surface_created: Box::new(move |_, id| {
            created.lock().unwrap().push(HookEvent::Created(id.as_u32()))
        }),
        on_surface_commit: Box::new(move |_, id, state| {
            committed
                .lock()
                .unwrap()
                .push(HookEvent::Committed(id.as_u32(), state.commit_count))
        }),
        on_surface_destroyed: Box::new(move |_, id| {
            destroyed
                .lock()
                .unwrap()
                .push(HookEvent::Destroyed(id.as_u32()))
        }),
        schedule_frame_callback: Box::new(move |_, id| {
            frame.lock().unwrap().push(HookEvent::Frame(id.as_u32()))
        }),
    }
}

#[test]
fn surface_create_commit_destroy_fires_hooks_in_order() {
    init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut server = test_server("surface");
    server.set_hooks(recording_hooks(log.clone()));
    server.add_compositor_global();
    let server = Arc::new(server);

    let (mut conn, server_thread) = connect(server);
    conn.blocking_roundtrip().unwrap();

    let compositor: WlCompositor = conn.bind_singleton(6).unwrap();
    let surface = compositor.create_surface(&mut conn).unwrap();
    surface.attach(&mut conn, None, 0, 0);
    surface.damage(&mut conn, 0, 0, 64, 64);
    surface.commit(&mut conn);
    conn.blocking_roundtrip().unwrap();

    let id = surface.id().as_u32();
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[HookEvent::Created(id), HookEvent::Committed(id, 1)]
    );

    surface.destroy(&mut conn);
    conn.blocking_roundtrip().unwrap();
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[
            HookEvent::Created(id),
            HookEvent::Committed(id, 1),
            HookEvent::Destroyed(id),
        ]
    );

    drop(conn);
    server_thread.join().unwrap().unwrap();
}

#[test]
fn frame_callback_is_delivered() {
    init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut server = test_server("frame");
    server.set_hooks(recording_hooks(log.clone()));
    server.add_compositor_global();
    let server = Arc::new(server);

    let (mut conn, server_thread) = connect(server);
    conn.blocking_roundtrip().unwrap();

    let compositor: WlCompositor = conn.bind_singleton(6).unwrap();
    let surface = compositor.create_surface(&mut conn).unwrap();
    let frame_cb = surface.frame(&mut conn).unwrap();
    conn.set_callback_for(frame_cb, |ctx| {
        let waylink_client::protocol::wl_callback::Event::Done(timestamp) = ctx.event;
        ctx.state.push(timestamp);
    });

    let mut timestamps = Vec::new();
    conn.blocking_roundtrip().unwrap();
    conn.dispatch_events(&mut timestamps);

    assert_eq!(timestamps.len(), 1);
    assert!(log
        .lock()
        .unwrap()
        .contains(&HookEvent::Frame(frame_cb.id().as_u32())));

    drop(conn);
    server_thread.join().unwrap().unwrap();
}

#[test]
fn unknown_opcode_is_tolerated() {
    init_logging();
    let server = Arc::new({
        let server = test_server("bad-opcode");
        server.add_compositor_global();
        server
    });

    let (client_end, server_end) = UnixStream::pair().unwrap();
    let mut raw = client_end.try_clone().unwrap();
    let server_thread = {
        let server = server.clone();
        thread::spawn(move || server.serve_stream(server_end))
    };

    let mut conn = Connection::<Vec<u32>>::connect_to(client_end);
    conn.blocking_roundtrip().unwrap();

    // Hand-crafted wl_registry message with opcode 99 and no arguments
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&2u32.to_ne_bytes());
    bytes.extend_from_slice(&((8u32 << 16) | 99).to_ne_bytes());
    raw.write_all(&bytes).unwrap();

    // The connection survives and a subsequent bind works
    let compositor: WlCompositor = conn.bind_singleton(6).unwrap();
    let _surface = compositor.create_surface(&mut conn).unwrap();
    conn.blocking_roundtrip().unwrap();

    drop(conn);
    drop(raw);
    server_thread.join().unwrap().unwrap();
}

#[test]
fn strict_mode_reports_invalid_method() {
    init_logging();
    let mut server = test_server("strict");
    server.set_strict(true);
    server.add_compositor_global();
    let server = Arc::new(server);

    let (client_end, server_end) = UnixStream::pair().unwrap();
    let mut raw = client_end.try_clone().unwrap();
    let server_thread = {
        let server = server.clone();
        thread::spawn(move || server.serve_stream(server_end))
    };

    let mut conn = Connection::<Vec<u32>>::connect_to(client_end);
    conn.blocking_roundtrip().unwrap();

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&2u32.to_ne_bytes());
    bytes.extend_from_slice(&((8u32 << 16) | 99).to_ne_bytes());
    raw.write_all(&bytes).unwrap();

    let err = conn.blocking_roundtrip().unwrap_err();
    match err {
        Error::Protocol(protocol_error) => assert_eq!(protocol_error.code, 1),
        other => panic!("expected a protocol error, got {other:?}"),
    }

    assert!(matches!(
        server_thread.join().unwrap(),
        Err(ClientError::UnknownOpcode { .. })
    ));
}

static TEST_PIPE: Interface = Interface {
    name: c"test_pipe",
    version: 1,
    requests: &[MessageDesc {
        name: "send_fd",
        since: 1,
        is_destructor: false,
        signature: &[ArgType::Fd],
    }],
    events: &[],
};

#[derive(Clone, Copy)]
struct TestPipe {
    id: ObjectId,
    version: u32,
}

impl TryFrom<Object> for TestPipe {
    type Error = WrongObject;

    fn try_from(object: Object) -> Result<Self, WrongObject> {
        if object.interface == <Self as Proxy>::INTERFACE {
            Ok(Self {
                id: object.id,
                version: object.version,
            })
        } else {
            Err(WrongObject)
        }
    }
}

impl Proxy for TestPipe {
    type Event = ();

    const INTERFACE: &'static Interface = &TEST_PIPE;

    fn new(id: ObjectId, version: u32) -> Self {
        Self { id, version }
    }

    fn parse_event(
        _event: Message,
        _version: u32,
        _pool: &mut MessageBuffersPool,
    ) -> Result<(), BadMessage> {
        Err(BadMessage)
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn version(&self) -> u32 {
        self.version
    }
}

#[test]
fn fd_argument_reaches_the_server() {
    init_logging();
    let server = test_server("fd");
    server.add_global(&TEST_PIPE, 1, |_, _, _| ResourceKind::Generic);
    let server = Arc::new(server);

    let (mut conn, server_thread) = connect(server);
    conn.blocking_roundtrip().unwrap();

    let pipe_proxy: TestPipe = conn.bind_singleton(1).unwrap();

    // The transferred descriptor is one end of a local stream pair
    let (mut reader, mut writer) = UnixStream::pair().unwrap();
    writer.write_all(&[0x42]).unwrap();

    let mut args = conn.alloc_msg_args();
    args.push(ArgValue::Fd(writer.into()));
    conn.send_request(
        TestPipe::INTERFACE,
        Message {
            header: MessageHeader {
                object_id: pipe_proxy.id(),
                size: 0,
                opcode: 0,
            },
            args,
        },
    );

    // Once the roundtrip returns, the server has decoded the message and
    // dropped its copy of the descriptor
    conn.blocking_roundtrip().unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf).unwrap(), 1);
    assert_eq!(buf[0], 0x42);
    // Every write end is closed now, so the stream reports end-of-file,
    // proving the descriptor actually crossed the socket and was consumed
    assert_eq!(reader.read(&mut buf).unwrap(), 0);

    drop(conn);
    server_thread.join().unwrap().unwrap();
}

#[test]
fn disconnect_mid_roundtrip_is_terminal() {
    init_logging();
    let (client_end, server_end) = UnixStream::pair().unwrap();
    let mut conn = Connection::<Vec<u32>>::connect_to(client_end);

    // The "server" goes away without answering
    drop(server_end);

    assert!(matches!(
        conn.blocking_roundtrip().unwrap_err(),
        Error::SocketClosed
    ));
    assert!(matches!(
        conn.blocking_roundtrip().unwrap_err(),
        Error::SocketClosed
    ));
    assert!(matches!(
        conn.flush(IoMode::Blocking).unwrap_err(),
        Error::SocketClosed
    ));
}

#[test]
fn accept_loop_serves_concurrent_clients() {
    init_logging();
    let server = test_server("accept");
    server.add_compositor_global();
    let path = server.socket_path().to_path_buf();
    let server = Arc::new(server);

    {
        let server = server.clone();
        thread::spawn(move || {
            let _ = server.accept_loop();
        });
    }

    let clients: Vec<_> = (0..3)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let stream = UnixStream::connect(path).unwrap();
                let mut conn = Connection::<Vec<u32>>::connect_to(stream);
                conn.blocking_roundtrip().unwrap();

                let compositor: WlCompositor = conn.bind_singleton(6).unwrap();
                let surface = compositor.create_surface(&mut conn).unwrap();
                surface.commit(&mut conn);
                conn.blocking_roundtrip().unwrap();
                surface.id().as_u32()
            })
        })
        .collect();

    for client in clients {
        // Every client sees the same deterministic ID sequence in its own
        // connection
        assert_eq!(client.join().unwrap(), 4);
    }
}

#[test]
fn bind_version_mismatch_is_a_protocol_error() {
    init_logging();
    let server = test_server("bind-version");
    server.add_compositor_global();
    let server = Arc::new(server);

    let (mut conn, server_thread) = connect(server);
    conn.blocking_roundtrip().unwrap();

    let name = conn.globals()[0].name;
    let registry = conn.registry();
    // wl_compositor is advertised at version 6; asking for 7 must fail
    let _too_new: WlCompositor = registry.bind(&mut conn, name, 7).unwrap();

    match conn.blocking_roundtrip().unwrap_err() {
        Error::Protocol(protocol_error) => assert_eq!(protocol_error.code, 0),
        other => panic!("expected a protocol error, got {other:?}"),
    }

    assert!(matches!(
        server_thread.join().unwrap(),
        Err(ClientError::VersionMismatch { .. })
    ));

    // The failed connection is unusable from now on
    assert!(matches!(
        conn.blocking_roundtrip().unwrap_err(),
        Error::SocketClosed
    ));
}

#[test]
fn unused_callback_has_no_events() {
    // wl_callback sends nothing until sync is answered; a plain dispatch
    // cycle with no server messages leaves the queue untouched
    init_logging();
    let server = Arc::new(test_server("idle"));
    let (mut conn, server_thread) = connect(server);

    conn.blocking_roundtrip().unwrap();
    let _ = conn.recv_events(IoMode::NonBlocking);
    let mut state = Vec::new();
    conn.dispatch_events(&mut state);
    assert_idle(&mut conn);
    let _: WlCallback = conn.sync().unwrap();

    drop(conn);
    server_thread.join().unwrap().unwrap();
}
