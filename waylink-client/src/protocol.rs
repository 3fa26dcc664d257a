//! Typed proxies for the core protocol interfaces
//!
//! One module per interface, each with its proxy handle, request methods and
//! event enum. Interface descriptors live in
//! [`waylink_core::interfaces`].

use std::borrow::Cow;
use std::ffi::CString;
use std::num::NonZeroU32;

use waylink_core::{
    interfaces, ArgValue, Interface, Message, MessageBuffersPool, MessageHeader, ObjectId,
};

use crate::connection::Connection;
use crate::object::{BadMessage, Object, Proxy, WrongObject};
use crate::Error;

pub use wl_callback::WlCallback;
pub use wl_compositor::WlCompositor;
pub use wl_display::WlDisplay;
pub use wl_region::WlRegion;
pub use wl_registry::{GlobalArgs, WlRegistry};
pub use wl_surface::WlSurface;

/// The registry is created together with the connection and never destroyed,
/// so its ID is fixed: the first one after the display.
pub(crate) const REGISTRY_ID: ObjectId = ObjectId(unsafe { NonZeroU32::new_unchecked(2) });

macro_rules! proxy {
    ($name:ident, $interface:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            id: ObjectId,
            version: u32,
        }

        impl TryFrom<Object> for $name {
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

        impl Proxy for $name {
            type Event = Event;

            const INTERFACE: &'static Interface = $interface;

            fn new(id: ObjectId, version: u32) -> Self {
                Self { id, version }
            }

            fn parse_event(
                event: Message,
                version: u32,
                pool: &mut MessageBuffersPool,
            ) -> Result<Event, BadMessage> {
                parse_event(event, version, pool)
            }

            fn id(&self) -> ObjectId {
                self.id
            }

            fn version(&self) -> u32 {
                self.version
            }
        }
    };
}

fn request(object_id: ObjectId, opcode: u16, args: Vec<ArgValue>) -> Message {
    Message {
        // The size field is computed when the message hits the wire
        header: MessageHeader {
            object_id,
            size: 0,
            opcode,
        },
        args,
    }
}

pub mod wl_display {
    use super::*;

    pub(crate) const SYNC: u16 = 0;
    pub(crate) const GET_REGISTRY: u16 = 1;

    proxy!(WlDisplay, &interfaces::WL_DISPLAY);

    impl WlDisplay {
        pub const INSTANCE: Self = Self {
            id: ObjectId::DISPLAY,
            version: 1,
        };

        /// Ask the server for an acknowledgement of all prior requests.
        pub fn sync<D>(self, conn: &mut Connection<D>) -> Result<WlCallback, Error> {
            let cb: WlCallback = conn.allocate_new_object(1)?;
            let mut args = conn.alloc_msg_args();
            args.push(ArgValue::NewId(cb.id()));
            conn.send_request(Self::INTERFACE, request(self.id, SYNC, args));
            Ok(cb)
        }
    }

    #[derive(Debug)]
    pub enum Event {
        /// A fatal protocol error
        Error(ErrorArgs),
        /// A client-created object ID is free for reuse
        DeleteId(u32),
    }

    #[derive(Debug)]
    pub struct ErrorArgs {
        pub object_id: ObjectId,
        pub code: u32,
        pub message: CString,
    }

    fn parse_event(
        mut event: Message,
        _version: u32,
        pool: &mut MessageBuffersPool,
    ) -> Result<Event, BadMessage> {
        let parsed = {
            let mut args = event.args.drain(..);
            match event.header.opcode {
                0 => match (args.next(), args.next(), args.next(), args.next()) {
                    (
                        Some(ArgValue::Object(object_id)),
                        Some(ArgValue::Uint(code)),
                        Some(ArgValue::String(message)),
                        None,
                    ) => Ok(Event::Error(ErrorArgs {
                        object_id,
                        code,
                        message,
                    })),
                    _ => Err(BadMessage),
                },
                1 => match (args.next(), args.next()) {
                    (Some(ArgValue::Uint(id)), None) => Ok(Event::DeleteId(id)),
                    _ => Err(BadMessage),
                },
                _ => Err(BadMessage),
            }
        };
        pool.reuse_args(event.args);
        parsed
    }
}

pub mod wl_registry {
    use super::*;

    const BIND: u16 = 0;

    proxy!(WlRegistry, &interfaces::WL_REGISTRY);

    /// Arguments of the `global` event
    #[derive(Debug, Clone)]
    pub struct GlobalArgs {
        pub name: u32,
        pub interface: CString,
        pub version: u32,
    }

    impl GlobalArgs {
        /// Whether this global can be bound as a `P`
        pub fn is<P: Proxy>(&self) -> bool {
            P::INTERFACE.name == self.interface.as_c_str()
        }
    }

    impl WlRegistry {
        /// Bind the global `name` as an instance of `P` at `version`.
        pub fn bind<P: Proxy, D>(
            self,
            conn: &mut Connection<D>,
            name: u32,
            version: u32,
        ) -> Result<P, Error> {
            let new_object: P = conn.allocate_new_object(version)?;
            let mut args = conn.alloc_msg_args();
            args.push(ArgValue::Uint(name));
            args.push(ArgValue::AnyNewId(
                Cow::Borrowed(P::INTERFACE.name),
                version,
                new_object.id(),
            ));
            conn.send_request(Self::INTERFACE, request(self.id, BIND, args));
            Ok(new_object)
        }
    }

    #[derive(Debug)]
    pub enum Event {
        Global(GlobalArgs),
        GlobalRemove(u32),
    }

    fn parse_event(
        mut event: Message,
        _version: u32,
        pool: &mut MessageBuffersPool,
    ) -> Result<Event, BadMessage> {
        let parsed = {
            let mut args = event.args.drain(..);
            match event.header.opcode {
                0 => match (args.next(), args.next(), args.next(), args.next()) {
                    (
                        Some(ArgValue::Uint(name)),
                        Some(ArgValue::String(interface)),
                        Some(ArgValue::Uint(version)),
                        None,
                    ) => Ok(Event::Global(GlobalArgs {
                        name,
                        interface,
                        version,
                    })),
                    _ => Err(BadMessage),
                },
                1 => match (args.next(), args.next()) {
                    (Some(ArgValue::Uint(name)), None) => Ok(Event::GlobalRemove(name)),
                    _ => Err(BadMessage),
                },
                _ => Err(BadMessage),
            }
        };
        pool.reuse_args(event.args);
        parsed
    }
}

pub mod wl_callback {
    use super::*;

    proxy!(WlCallback, &interfaces::WL_CALLBACK);

    #[derive(Debug)]
    pub enum Event {
        /// Fired exactly once, after which the callback object is dead
        Done(u32),
    }

    fn parse_event(
        mut event: Message,
        _version: u32,
        pool: &mut MessageBuffersPool,
    ) -> Result<Event, BadMessage> {
        let parsed = {
            let mut args = event.args.drain(..);
            match event.header.opcode {
                0 => match (args.next(), args.next()) {
                    (Some(ArgValue::Uint(serial)), None) => Ok(Event::Done(serial)),
                    _ => Err(BadMessage),
                },
                _ => Err(BadMessage),
            }
        };
        pool.reuse_args(event.args);
        parsed
    }
}

pub mod wl_compositor {
    use super::*;

    const CREATE_SURFACE: u16 = 0;
    const CREATE_REGION: u16 = 1;

    proxy!(WlCompositor, &interfaces::WL_COMPOSITOR);

    impl WlCompositor {
        pub fn create_surface<D>(self, conn: &mut Connection<D>) -> Result<WlSurface, Error> {
            let surface: WlSurface = conn.allocate_new_object(self.version)?;
            let mut args = conn.alloc_msg_args();
            args.push(ArgValue::NewId(surface.id()));
            conn.send_request(Self::INTERFACE, request(self.id, CREATE_SURFACE, args));
            Ok(surface)
        }

        pub fn create_region<D>(self, conn: &mut Connection<D>) -> Result<WlRegion, Error> {
            let region: WlRegion = conn.allocate_new_object(self.version)?;
            let mut args = conn.alloc_msg_args();
            args.push(ArgValue::NewId(region.id()));
            conn.send_request(Self::INTERFACE, request(self.id, CREATE_REGION, args));
            Ok(region)
        }
    }

    #[derive(Debug)]
    pub enum Event {}

    fn parse_event(
        event: Message,
        _version: u32,
        pool: &mut MessageBuffersPool,
    ) -> Result<Event, BadMessage> {
        pool.reuse_args(event.args);
        Err(BadMessage)
    }
}

pub mod wl_surface {
    use super::*;

    const DESTROY: u16 = 0;
    const ATTACH: u16 = 1;
    const DAMAGE: u16 = 2;
    const FRAME: u16 = 3;
    const SET_OPAQUE_REGION: u16 = 4;
    const SET_INPUT_REGION: u16 = 5;
    const COMMIT: u16 = 6;

    proxy!(WlSurface, &interfaces::WL_SURFACE);

    impl WlSurface {
        pub fn destroy<D>(self, conn: &mut Connection<D>) {
            let args = conn.alloc_msg_args();
            conn.send_request(Self::INTERFACE, request(self.id, DESTROY, args));
        }

        /// Set the pending buffer. `None` removes the content on the next
        /// commit.
        pub fn attach<D>(
            self,
            conn: &mut Connection<D>,
            buffer: Option<ObjectId>,
            x: i32,
            y: i32,
        ) {
            let mut args = conn.alloc_msg_args();
            args.push(ArgValue::OptObject(buffer));
            args.push(ArgValue::Int(x));
            args.push(ArgValue::Int(y));
            conn.send_request(Self::INTERFACE, request(self.id, ATTACH, args));
        }

        pub fn damage<D>(self, conn: &mut Connection<D>, x: i32, y: i32, width: i32, height: i32) {
            let mut args = conn.alloc_msg_args();
            args.push(ArgValue::Int(x));
            args.push(ArgValue::Int(y));
            args.push(ArgValue::Int(width));
            args.push(ArgValue::Int(height));
            conn.send_request(Self::INTERFACE, request(self.id, DAMAGE, args));
        }

        /// Request a callback for the next time the compositor presents the
        /// surface.
        pub fn frame<D>(self, conn: &mut Connection<D>) -> Result<WlCallback, Error> {
            let cb: WlCallback = conn.allocate_new_object(1)?;
            let mut args = conn.alloc_msg_args();
            args.push(ArgValue::NewId(cb.id()));
            conn.send_request(Self::INTERFACE, request(self.id, FRAME, args));
            Ok(cb)
        }

        pub fn set_opaque_region<D>(self, conn: &mut Connection<D>, region: Option<WlRegion>) {
            let mut args = conn.alloc_msg_args();
            args.push(ArgValue::OptObject(region.map(|r| r.id())));
            conn.send_request(Self::INTERFACE, request(self.id, SET_OPAQUE_REGION, args));
        }

        pub fn set_input_region<D>(self, conn: &mut Connection<D>, region: Option<WlRegion>) {
            let mut args = conn.alloc_msg_args();
            args.push(ArgValue::OptObject(region.map(|r| r.id())));
            conn.send_request(Self::INTERFACE, request(self.id, SET_INPUT_REGION, args));
        }

        /// Atomically apply all pending state.
        pub fn commit<D>(self, conn: &mut Connection<D>) {
            let args = conn.alloc_msg_args();
            conn.send_request(Self::INTERFACE, request(self.id, COMMIT, args));
        }
    }

    #[derive(Debug)]
    pub enum Event {
        Enter(ObjectId),
        Leave(ObjectId),
        PreferredBufferScale(i32),
        PreferredBufferTransform(u32),
    }

    fn parse_event(
        mut event: Message,
        _version: u32,
        pool: &mut MessageBuffersPool,
    ) -> Result<Event, BadMessage> {
        let parsed = {
            let mut args = event.args.drain(..);
            match (event.header.opcode, args.next(), args.next()) {
                (0, Some(ArgValue::Object(output)), None) => Ok(Event::Enter(output)),
                (1, Some(ArgValue::Object(output)), None) => Ok(Event::Leave(output)),
                (2, Some(ArgValue::Int(scale)), None) => Ok(Event::PreferredBufferScale(scale)),
                (3, Some(ArgValue::Uint(transform)), None) => {
                    Ok(Event::PreferredBufferTransform(transform))
                }
                _ => Err(BadMessage),
            }
        };
        pool.reuse_args(event.args);
        parsed
    }
}

pub mod wl_region {
    use super::*;

    const DESTROY: u16 = 0;
    const ADD: u16 = 1;
    const SUBTRACT: u16 = 2;

    proxy!(WlRegion, &interfaces::WL_REGION);

    impl WlRegion {
        pub fn destroy<D>(self, conn: &mut Connection<D>) {
            let args = conn.alloc_msg_args();
            conn.send_request(Self::INTERFACE, request(self.id, DESTROY, args));
        }

        pub fn add<D>(self, conn: &mut Connection<D>, x: i32, y: i32, width: i32, height: i32) {
            let mut args = conn.alloc_msg_args();
            args.push(ArgValue::Int(x));
            args.push(ArgValue::Int(y));
            args.push(ArgValue::Int(width));
            args.push(ArgValue::Int(height));
            conn.send_request(Self::INTERFACE, request(self.id, ADD, args));
        }

        pub fn subtract<D>(
            self,
            conn: &mut Connection<D>,
            x: i32,
            y: i32,
            width: i32,
            height: i32,
        ) {
            let mut args = conn.alloc_msg_args();
            args.push(ArgValue::Int(x));
            args.push(ArgValue::Int(y));
            args.push(ArgValue::Int(width));
            args.push(ArgValue::Int(height));
            conn.send_request(Self::INTERFACE, request(self.id, SUBTRACT, args));
        }
    }

    #[derive(Debug)]
    pub enum Event {}

    fn parse_event(
        event: Message,
        _version: u32,
        pool: &mut MessageBuffersPool,
    ) -> Result<Event, BadMessage> {
        pool.reuse_args(event.args);
        Err(BadMessage)
    }
}
