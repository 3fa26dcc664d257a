//! Human-readable message dumps for `WAYLAND_DEBUG` tracing

use std::fmt::{self, Debug, Formatter};
use std::os::fd::AsRawFd;

use crate::{ArgType, ArgValue, Interface, Message, ObjectId};

/// Formats a message as `iface@id.name(args)`, the way libwayland traces.
pub struct DebugMessage<'a> {
    message: &'a Message,
    is_event: bool,
    interface: &'static Interface,
}

impl<'a> DebugMessage<'a> {
    pub fn new(message: &'a Message, is_event: bool, interface: &'static Interface) -> Self {
        Self {
            message,
            is_event,
            interface,
        }
    }
}

impl Debug for DebugMessage<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let descs = if self.is_event {
            self.interface.events
        } else {
            self.interface.requests
        };
        let opcode = self.message.header.opcode;
        let name = descs
            .get(opcode as usize)
            .map_or("<unknown>", |desc| desc.name);

        write!(
            f,
            "{}@{}.{}(",
            self.interface.name.to_string_lossy(),
            self.message.header.object_id.as_u32(),
            name,
        )?;

        for (arg_i, arg) in self.message.args.iter().enumerate() {
            if arg_i != 0 {
                write!(f, ", ")?;
            }
            match arg {
                ArgValue::Int(x) => write!(f, "{x}")?,
                ArgValue::Uint(x) => write!(f, "{x}")?,
                ArgValue::Fixed(x) => write!(f, "{}", x.as_f64())?,
                ArgValue::Object(ObjectId(x)) | ArgValue::OptObject(Some(ObjectId(x))) => {
                    write!(f, "{x}")?
                }
                ArgValue::OptObject(None) | ArgValue::OptString(None) => write!(f, "null")?,
                ArgValue::NewId(id) => {
                    let new_id_iface = match descs
                        .get(opcode as usize)
                        .and_then(|desc| desc.signature.get(arg_i))
                    {
                        Some(ArgType::NewId(iface)) => iface.name.to_string_lossy(),
                        _ => "<unknown>".into(),
                    };
                    write!(f, "new id {}@{}", new_id_iface, id.as_u32())?
                }
                ArgValue::AnyNewId(iface, version, id) => write!(
                    f,
                    "new id {}@{}v{version}",
                    iface.to_string_lossy(),
                    id.as_u32(),
                )?,
                ArgValue::String(x) | ArgValue::OptString(Some(x)) => write!(f, "{x:?}")?,
                ArgValue::Array(_) => write!(f, "<array>")?,
                ArgValue::Fd(x) => write!(f, "fd {}", x.as_raw_fd())?,
            }
        }

        write!(f, ")")
    }
}
