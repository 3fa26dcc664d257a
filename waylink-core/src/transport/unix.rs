//! Wayland transport over unix domain socket
//!
//! This is the only transport method used in practice.

use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags};

use super::{Transport, FDS_IN_LEN, FDS_OUT_LEN};
use crate::IoMode;

impl Transport for UnixStream {
    fn pollable_fd(&self) -> RawFd {
        self.as_raw_fd()
    }

    fn send(&mut self, bytes: &[IoSlice], fds: &[OwnedFd], mode: IoMode) -> io::Result<usize> {
        let mut flags = MsgFlags::MSG_NOSIGNAL;
        if mode == IoMode::NonBlocking {
            flags |= MsgFlags::MSG_DONTWAIT;
        }

        let mut raw_fds = [0 as RawFd; FDS_OUT_LEN];
        for (slot, fd) in raw_fds.iter_mut().zip(fds) {
            *slot = fd.as_raw_fd();
        }

        let scm = [ControlMessage::ScmRights(&raw_fds[..fds.len()])];
        let cmsgs: &[ControlMessage] = if fds.is_empty() { &[] } else { &scm };

        let sent = socket::sendmsg::<()>(self.as_raw_fd(), bytes, cmsgs, flags, None)?;
        Ok(sent)
    }

    fn recv(
        &mut self,
        bytes: &mut [IoSliceMut],
        fds: &mut VecDeque<OwnedFd>,
        mode: IoMode,
    ) -> io::Result<usize> {
        let mut cmsg_space = nix::cmsg_space!([RawFd; FDS_IN_LEN]);

        let mut flags = MsgFlags::MSG_CMSG_CLOEXEC | MsgFlags::MSG_NOSIGNAL;
        if mode == IoMode::NonBlocking {
            flags |= MsgFlags::MSG_DONTWAIT;
        }

        let msg =
            socket::recvmsg::<()>(self.as_raw_fd(), bytes, Some(&mut cmsg_space), flags)?;

        for cmsg in msg.cmsgs() {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                for fd in received {
                    debug_assert_ne!(fd, -1);
                    // SAFETY: the kernel hands us a freshly installed
                    // descriptor which nothing else owns yet.
                    fds.push_back(unsafe { OwnedFd::from_raw_fd(fd) });
                }
            }
        }

        if msg.bytes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer disconnected",
            ));
        }

        Ok(msg.bytes)
    }
}
