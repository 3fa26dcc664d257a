//! Static descriptors of the core protocol interfaces
//!
//! The six interfaces a core runtime has to know about. `wl_display`,
//! `wl_registry` and `wl_callback` are frozen in the protocol and can never
//! change; the compositor trio is pinned at the versions this library
//! implements.

use crate::{ArgType, Interface, MessageDesc};

/// `wl_display` v1
pub static WL_DISPLAY: Interface = Interface {
    name: c"wl_display",
    version: 1,
    requests: &[
        MessageDesc {
            name: "sync",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::NewId(&WL_CALLBACK)],
        },
        MessageDesc {
            name: "get_registry",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::NewId(&WL_REGISTRY)],
        },
    ],
    events: &[
        MessageDesc {
            name: "error",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::Object, ArgType::Uint, ArgType::String],
        },
        MessageDesc {
            name: "delete_id",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::Uint],
        },
    ],
};

/// `wl_registry` v1
pub static WL_REGISTRY: Interface = Interface {
    name: c"wl_registry",
    version: 1,
    requests: &[MessageDesc {
        name: "bind",
        since: 1,
        is_destructor: false,
        signature: &[ArgType::Uint, ArgType::AnyNewId],
    }],
    events: &[
        MessageDesc {
            name: "global",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::Uint, ArgType::String, ArgType::Uint],
        },
        MessageDesc {
            name: "global_remove",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::Uint],
        },
    ],
};

/// `wl_callback` v1
pub static WL_CALLBACK: Interface = Interface {
    name: c"wl_callback",
    version: 1,
    requests: &[],
    events: &[MessageDesc {
        name: "done",
        since: 1,
        is_destructor: true,
        signature: &[ArgType::Uint],
    }],
};

/// `wl_compositor` v6
pub static WL_COMPOSITOR: Interface = Interface {
    name: c"wl_compositor",
    version: 6,
    requests: &[
        MessageDesc {
            name: "create_surface",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::NewId(&WL_SURFACE)],
        },
        MessageDesc {
            name: "create_region",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::NewId(&WL_REGION)],
        },
    ],
    events: &[],
};

/// `wl_surface` v6
pub static WL_SURFACE: Interface = Interface {
    name: c"wl_surface",
    version: 6,
    requests: &[
        MessageDesc {
            name: "destroy",
            since: 1,
            is_destructor: true,
            signature: &[],
        },
        MessageDesc {
            name: "attach",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::OptObject, ArgType::Int, ArgType::Int],
        },
        MessageDesc {
            name: "damage",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::Int, ArgType::Int, ArgType::Int, ArgType::Int],
        },
        MessageDesc {
            name: "frame",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::NewId(&WL_CALLBACK)],
        },
        MessageDesc {
            name: "set_opaque_region",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::OptObject],
        },
        MessageDesc {
            name: "set_input_region",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::OptObject],
        },
        MessageDesc {
            name: "commit",
            since: 1,
            is_destructor: false,
            signature: &[],
        },
        MessageDesc {
            name: "set_buffer_transform",
            since: 2,
            is_destructor: false,
            signature: &[ArgType::Int],
        },
        MessageDesc {
            name: "set_buffer_scale",
            since: 3,
            is_destructor: false,
            signature: &[ArgType::Int],
        },
        MessageDesc {
            name: "damage_buffer",
            since: 4,
            is_destructor: false,
            signature: &[ArgType::Int, ArgType::Int, ArgType::Int, ArgType::Int],
        },
        MessageDesc {
            name: "offset",
            since: 5,
            is_destructor: false,
            signature: &[ArgType::Int, ArgType::Int],
        },
    ],
    events: &[
        MessageDesc {
            name: "enter",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::Object],
        },
        MessageDesc {
            name: "leave",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::Object],
        },
        MessageDesc {
            name: "preferred_buffer_scale",
            since: 6,
            is_destructor: false,
            signature: &[ArgType::Int],
        },
        MessageDesc {
            name: "preferred_buffer_transform",
            since: 6,
            is_destructor: false,
            signature: &[ArgType::Uint],
        },
    ],
};

/// `wl_region` v1
pub static WL_REGION: Interface = Interface {
    name: c"wl_region",
    version: 1,
    requests: &[
        MessageDesc {
            name: "destroy",
            since: 1,
            is_destructor: true,
            signature: &[],
        },
        MessageDesc {
            name: "add",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::Int, ArgType::Int, ArgType::Int, ArgType::Int],
        },
        MessageDesc {
            name: "subtract",
            since: 1,
            is_destructor: false,
            signature: &[ArgType::Int, ArgType::Int, ArgType::Int, ArgType::Int],
        },
    ],
    events: &[],
};

/// Opcode of `wl_display.sync`
pub const WL_DISPLAY_SYNC: u16 = 0;
/// Opcode of `wl_display.get_registry`
pub const WL_DISPLAY_GET_REGISTRY: u16 = 1;
/// Opcode of `wl_display.error`
pub const WL_DISPLAY_ERROR: u16 = 0;
/// Opcode of `wl_display.delete_id`
pub const WL_DISPLAY_DELETE_ID: u16 = 1;

/// Look up a core interface by its advertised name
pub fn find_interface(name: &std::ffi::CStr) -> Option<&'static Interface> {
    [
        &WL_DISPLAY,
        &WL_REGISTRY,
        &WL_CALLBACK,
        &WL_COMPOSITOR,
        &WL_SURFACE,
        &WL_REGION,
    ]
    .into_iter()
    .find(|iface| iface.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_is_opcode_six() {
        // The surface request table must match the wire protocol numbering.
        assert_eq!(WL_SURFACE.requests[0].name, "destroy");
        assert!(WL_SURFACE.requests[0].is_destructor);
        assert_eq!(WL_SURFACE.requests[3].name, "frame");
        assert_eq!(WL_SURFACE.requests[6].name, "commit");
    }

    #[test]
    fn lookup_by_name() {
        assert!(find_interface(c"wl_compositor").is_some());
        assert!(find_interface(c"wl_pointer").is_none());
    }
}
