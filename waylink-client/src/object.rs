//! Client side object representation

use std::fmt::{self, Debug};
use std::num::NonZeroU32;

use crate::connection::GenericCallback;

pub use waylink_core::ObjectId;
use waylink_core::{interfaces, Interface, Message, MessageBuffersPool};

/// A Wayland object.
///
/// The [`Debug`] representation is `<interface>@<id>v<version>`.
///
/// [`Eq`] is delegated to the object's ID: two different objects with the
/// same ID must not exist at the same time.
#[derive(Clone, Copy)]
pub struct Object {
    pub id: ObjectId,
    pub interface: &'static Interface,
    pub version: u32,
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Object {}

impl PartialEq<ObjectId> for Object {
    fn eq(&self, other: &ObjectId) -> bool {
        self.id == *other
    }
}

impl Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}v{}",
            self.interface.name.to_string_lossy(),
            self.id.as_u32(),
            self.version
        )
    }
}

#[doc(hidden)]
#[derive(Debug)]
pub struct BadMessage;

/// Error which may occur in `Proxy: TryFrom<Object>` conversion.
#[derive(Debug)]
pub struct WrongObject;

/// A typed handle to a Wayland object.
pub trait Proxy: TryFrom<Object, Error = WrongObject> + Copy {
    type Event;

    const INTERFACE: &'static Interface;

    #[doc(hidden)]
    fn new(id: ObjectId, version: u32) -> Self;

    #[doc(hidden)]
    fn parse_event(
        event: Message,
        version: u32,
        pool: &mut MessageBuffersPool,
    ) -> Result<Self::Event, BadMessage>;

    fn id(&self) -> ObjectId;

    fn version(&self) -> u32;
}

impl<P: Proxy> From<P> for Object {
    fn from(value: P) -> Self {
        Self {
            id: value.id(),
            interface: P::INTERFACE,
            version: value.version(),
        }
    }
}

/// The ID allocator hit the end of the client range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSpaceExhausted;

pub(crate) struct ObjectManager<D> {
    vacant_ids: Vec<ObjectId>,
    client_objects: Vec<Option<ObjectState<D>>>,
    server_objects: Vec<Option<ObjectState<D>>>,
}

pub(crate) struct ObjectState<D> {
    pub object: Object,
    pub is_alive: bool,
    pub cb: Option<GenericCallback<D>>,
}

impl<D> ObjectManager<D> {
    /// A fresh table holds the display (ID 1) and the registry (ID 2): both
    /// exist for the whole lifetime of a connection.
    pub fn new() -> Self {
        let mut this = Self {
            vacant_ids: Vec::new(),
            client_objects: Vec::with_capacity(16),
            server_objects: Vec::new(),
        };

        // Index 0 is the unused null slot
        this.client_objects.push(None);

        for (interface, id) in [
            (&interfaces::WL_DISPLAY, ObjectId::DISPLAY),
            (&interfaces::WL_REGISTRY, crate::protocol::REGISTRY_ID),
        ] {
            this.client_objects.push(Some(ObjectState {
                object: Object {
                    id,
                    interface,
                    version: 1,
                },
                is_alive: true,
                cb: None,
            }));
        }

        this
    }

    pub fn alloc_client_object(
        &mut self,
        interface: &'static Interface,
        version: u32,
    ) -> Result<&mut ObjectState<D>, IdSpaceExhausted> {
        let id = match self.vacant_ids.pop() {
            Some(id) => id,
            None => {
                let id = self.client_objects.len() as u32;
                if id > ObjectId::MAX_CLIENT.as_u32() {
                    return Err(IdSpaceExhausted);
                }
                self.client_objects.push(None);
                ObjectId(NonZeroU32::new(id).ok_or(IdSpaceExhausted)?)
            }
        };

        let slot = &mut self.client_objects[id.as_u32() as usize];
        debug_assert!(slot.is_none());

        Ok(slot.insert(ObjectState {
            object: Object {
                id,
                interface,
                version,
            },
            is_alive: true,
            cb: None,
        }))
    }

    /// Record an object announced by the server through a `new_id` event
    /// argument.
    pub fn register_server_object(&mut self, object: Object) -> &mut ObjectState<D> {
        debug_assert!(object.id.created_by_server());

        let index = object.id.as_index();
        while index >= self.server_objects.len() {
            self.server_objects.push(None);
        }

        self.server_objects[index].insert(ObjectState {
            object,
            is_alive: true,
            cb: None,
        })
    }

    pub fn get_object_mut(&mut self, id: ObjectId) -> Option<&mut ObjectState<D>> {
        let slot = if id.created_by_client() {
            self.client_objects.get_mut(id.as_u32() as usize)
        } else {
            self.server_objects.get_mut(id.as_index())
        };
        slot.and_then(Option::as_mut)
    }

    /// Free a client ID in response to `wl_display.delete_id`.
    pub fn delete_client_object(&mut self, id: ObjectId) {
        if let Some(slot) = self.client_objects.get_mut(id.as_u32() as usize) {
            if slot.take().is_some() {
                self.vacant_ids.push(id);
            }
        }
    }

    /// Drop every object record. Used when the connection dies.
    pub fn clear(&mut self) {
        self.vacant_ids.clear();
        self.client_objects.clear();
        self.server_objects.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_has_display_and_registry() {
        let mut mgr = ObjectManager::<()>::new();
        let display = mgr.get_object_mut(ObjectId::DISPLAY).unwrap();
        assert_eq!(display.object.interface.name, c"wl_display");
        assert!(mgr.get_object_mut(crate::protocol::REGISTRY_ID).is_some());
    }

    #[test]
    fn client_ids_are_monotonic() {
        let mut mgr = ObjectManager::<()>::new();
        let a = mgr
            .alloc_client_object(&interfaces::WL_CALLBACK, 1)
            .unwrap()
            .object
            .id;
        let b = mgr
            .alloc_client_object(&interfaces::WL_CALLBACK, 1)
            .unwrap()
            .object
            .id;
        assert!(b > a);
        assert!(a.created_by_client());
    }

    #[test]
    fn deleted_ids_are_reused() {
        let mut mgr = ObjectManager::<()>::new();
        let id = mgr
            .alloc_client_object(&interfaces::WL_CALLBACK, 1)
            .unwrap()
            .object
            .id;
        mgr.delete_client_object(id);
        assert!(mgr.get_object_mut(id).is_none());
        let next = mgr
            .alloc_client_object(&interfaces::WL_CALLBACK, 1)
            .unwrap()
            .object
            .id;
        assert_eq!(id, next);
    }
}
