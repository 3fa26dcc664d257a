//! Wayland transport methods
//!
//! [`BufferedSocket`] marshals and unmarshals messages over anything that
//! implements [`Transport`], which is usually
//! [`UnixStream`](std::os::unix::net::UnixStream).

use std::borrow::Cow;
use std::collections::VecDeque;
use std::ffi::CString;
use std::io::{self, IoSlice, IoSliceMut};
use std::num::NonZeroU32;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::ring_buffer::RingBuffer;
use crate::{
    ArgType, ArgValue, Fixed, IoMode, Message, MessageBuffersPool, MessageHeader, ObjectId,
};

mod unix;

pub const BYTES_OUT_LEN: usize = 4096;
pub const BYTES_IN_LEN: usize = BYTES_OUT_LEN * 2;
pub const FDS_OUT_LEN: usize = 28;
pub const FDS_IN_LEN: usize = FDS_OUT_LEN * 2;

/// A buffered Wayland socket
///
/// Handles message marshalling and unmarshalling, including the file
/// descriptor queues coupled to the byte stream.
pub struct BufferedSocket<T> {
    socket: T,
    bytes_in: RingBuffer,
    bytes_out: RingBuffer,
    fds_in: VecDeque<OwnedFd>,
    fds_out: VecDeque<OwnedFd>,
}

/// An abstraction over Wayland transport methods
pub trait Transport {
    fn pollable_fd(&self) -> RawFd;

    fn send(&mut self, bytes: &[IoSlice], fds: &[OwnedFd], mode: IoMode) -> io::Result<usize>;

    fn recv(
        &mut self,
        bytes: &mut [IoSliceMut],
        fds: &mut VecDeque<OwnedFd>,
        mode: IoMode,
    ) -> io::Result<usize>;
}

impl<T: Transport> AsRawFd for BufferedSocket<T> {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.pollable_fd()
    }
}

impl<T: Transport> From<T> for BufferedSocket<T> {
    fn from(socket: T) -> Self {
        Self {
            socket,
            bytes_in: RingBuffer::new(BYTES_IN_LEN),
            bytes_out: RingBuffer::new(BYTES_OUT_LEN),
            fds_in: VecDeque::new(),
            fds_out: VecDeque::new(),
        }
    }
}

/// A reason a message could not be encoded
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("io: {0}")]
    Io(io::Error),
    #[error("message does not fit in the wire size field")]
    MessageTooLarge,
    #[error("message has too many file descriptors")]
    TooManyFds,
}

/// An error occurred while sending a message
///
/// Ownership of the message is returned to the caller so it can be retried.
pub struct SendMessageError {
    pub msg: Message,
    pub err: EncodeError,
}

/// An error occurred while trying to receive a message
#[derive(Debug, thiserror::Error)]
pub enum RecvMessageError {
    #[error("io: {0}")]
    Io(io::Error),
    #[error("message has too many file descriptors")]
    TooManyFds,
    #[error("message is too large")]
    TooManyBytes,
    #[error("message contains unexpected null")]
    UnexpectedNull,
    #[error("message string is not nul-terminated valid utf-8")]
    BadString,
    #[error("message needs a file descriptor but none was queued")]
    MissingFd,
}

/// An error occurred while trying to peek a message header
#[derive(Debug, thiserror::Error)]
pub enum PeekHeaderError {
    #[error("io: {0}")]
    Io(io::Error),
    #[error("header has a null object id")]
    NullObject,
    #[error("header size is less than 8 or not a multiple of 4")]
    BadLength,
}

impl<T: Transport> BufferedSocket<T> {
    /// Write a single Wayland message into the internal buffer.
    ///
    /// Flushes the buffer if necessary. On failure, ownership of the message
    /// is returned. File descriptor arguments are queued and transferred to
    /// the peer on the next [`flush`](Self::flush).
    pub fn write_message(
        &mut self,
        msg: Message,
        msg_pool: &mut MessageBuffersPool,
        mode: IoMode,
    ) -> Result<(), SendMessageError> {
        let size = msg.size();
        let fds_cnt = msg.fd_count();

        if size > BYTES_OUT_LEN || size > u16::MAX as usize {
            return Err(SendMessageError {
                msg,
                err: EncodeError::MessageTooLarge,
            });
        }
        if fds_cnt > FDS_OUT_LEN {
            return Err(SendMessageError {
                msg,
                err: EncodeError::TooManyFds,
            });
        }

        // Make room in the buffers
        if size > self.bytes_out.writable_len() || fds_cnt + self.fds_out.len() > FDS_OUT_LEN {
            if let Err(err) = self.flush(mode) {
                return Err(SendMessageError {
                    msg,
                    err: EncodeError::Io(err),
                });
            }
        }

        // Header
        self.bytes_out.write_uint(msg.header.object_id.as_u32());
        self.bytes_out
            .write_uint((size as u32) << 16 | msg.header.opcode as u32);

        // Args
        let mut msg = msg;
        for arg in msg.args.drain(..) {
            match arg {
                ArgValue::Uint(x) => self.bytes_out.write_uint(x),
                ArgValue::Int(x) | ArgValue::Fixed(Fixed(x)) => self.bytes_out.write_int(x),
                ArgValue::Object(ObjectId(x))
                | ArgValue::OptObject(Some(ObjectId(x)))
                | ArgValue::NewId(ObjectId(x)) => self.bytes_out.write_uint(x.get()),
                ArgValue::OptObject(None) | ArgValue::OptString(None) => {
                    self.bytes_out.write_uint(0)
                }
                ArgValue::AnyNewId(iface, version, id) => {
                    self.send_array(iface.to_bytes_with_nul());
                    self.bytes_out.write_uint(version);
                    self.bytes_out.write_uint(id.as_u32());
                }
                ArgValue::String(string) | ArgValue::OptString(Some(string)) => {
                    self.send_array(string.to_bytes_with_nul())
                }
                ArgValue::Array(array) => self.send_array(&array),
                ArgValue::Fd(fd) => self.fds_out.push_back(fd),
            }
        }
        msg_pool.reuse_args(msg.args);
        Ok(())
    }

    /// Peek the next message header.
    ///
    /// Fills the internal buffer if needed and keeps the header in the
    /// buffer.
    pub fn peek_message_header(&mut self, mode: IoMode) -> Result<MessageHeader, PeekHeaderError> {
        while self.bytes_in.readable_len() < MessageHeader::SIZE {
            self.fill_incoming_buf(mode).map_err(PeekHeaderError::Io)?;
        }

        let mut raw = [0; MessageHeader::SIZE];
        self.bytes_in.peek_bytes(&mut raw);
        let object_id = u32::from_ne_bytes(raw[0..4].try_into().unwrap());
        let size_and_opcode = u32::from_ne_bytes(raw[4..8].try_into().unwrap());
        let size = ((size_and_opcode & 0xFFFF_0000) >> 16) as u16;

        if (size as usize) < MessageHeader::SIZE || size % 4 != 0 {
            return Err(PeekHeaderError::BadLength);
        }

        Ok(MessageHeader {
            object_id: ObjectId(NonZeroU32::new(object_id).ok_or(PeekHeaderError::NullObject)?),
            size,
            opcode: (size_and_opcode & 0x0000_FFFF) as u16,
        })
    }

    /// Receive the entire next message.
    ///
    /// Fills the internal buffer if needed. `header` must be the value
    /// returned by [`Self::peek_message_header`] right before calling this
    /// function. Exactly `header.size` bytes and one file descriptor per
    /// `fd` argument in the signature are consumed.
    pub fn recv_message(
        &mut self,
        header: MessageHeader,
        signature: &[ArgType],
        msg_pool: &mut MessageBuffersPool,
        mode: IoMode,
    ) -> Result<Message, RecvMessageError> {
        let fds_cnt = signature
            .iter()
            .filter(|arg| matches!(arg, ArgType::Fd))
            .count();
        if header.size as usize > BYTES_IN_LEN {
            return Err(RecvMessageError::TooManyBytes);
        }
        if fds_cnt > FDS_IN_LEN {
            return Err(RecvMessageError::TooManyFds);
        }
        while header.size as usize > self.bytes_in.readable_len() || fds_cnt > self.fds_in.len() {
            self.fill_incoming_buf(mode).map_err(RecvMessageError::Io)?;
        }

        // Consume header
        self.bytes_in.consume(MessageHeader::SIZE);

        let mut args = msg_pool.get_args();
        for arg_type in signature {
            let arg = match arg_type {
                ArgType::Int => ArgValue::Int(self.bytes_in.read_int()),
                ArgType::Uint => ArgValue::Uint(self.bytes_in.read_uint()),
                ArgType::Fixed => ArgValue::Fixed(Fixed(self.bytes_in.read_int())),
                ArgType::Object => ArgValue::Object(
                    self.bytes_in
                        .read_id()
                        .ok_or(RecvMessageError::UnexpectedNull)?,
                ),
                ArgType::OptObject => ArgValue::OptObject(self.bytes_in.read_id()),
                ArgType::NewId(_interface) => ArgValue::NewId(
                    self.bytes_in
                        .read_id()
                        .ok_or(RecvMessageError::UnexpectedNull)?,
                ),
                ArgType::AnyNewId => ArgValue::AnyNewId(
                    Cow::Owned(self.recv_string()?),
                    self.bytes_in.read_uint(),
                    self.bytes_in
                        .read_id()
                        .ok_or(RecvMessageError::UnexpectedNull)?,
                ),
                ArgType::String => ArgValue::String(self.recv_string()?),
                ArgType::OptString => ArgValue::OptString(match self.bytes_in.read_uint() {
                    0 => None,
                    len => Some(self.recv_string_with_len(len)?),
                }),
                ArgType::Array => ArgValue::Array(self.recv_array()),
                ArgType::Fd => ArgValue::Fd(
                    self.fds_in
                        .pop_front()
                        .ok_or(RecvMessageError::MissingFd)?,
                ),
            };
            args.push(arg);
        }

        Ok(Message { header, args })
    }

    /// Discard the body of the next message.
    ///
    /// Used to survive messages with an opcode the receiver does not know:
    /// the byte stream stays in sync, the connection stays open.
    pub fn skip_message(
        &mut self,
        header: MessageHeader,
        mode: IoMode,
    ) -> Result<(), RecvMessageError> {
        if header.size as usize > BYTES_IN_LEN {
            return Err(RecvMessageError::TooManyBytes);
        }
        while header.size as usize > self.bytes_in.readable_len() {
            self.fill_incoming_buf(mode).map_err(RecvMessageError::Io)?;
        }
        self.bytes_in.consume(header.size as usize);
        Ok(())
    }

    /// Flush all pending messages.
    ///
    /// All queued file descriptors are attached to the first `sendmsg` that
    /// carries bytes, as a single `SCM_RIGHTS` control message, and are
    /// closed on this side afterwards (ownership is transferred).
    pub fn flush(&mut self, mode: IoMode) -> io::Result<()> {
        while !self.bytes_out.is_empty() {
            let mut iov_buf = [IoSlice::new(&[]), IoSlice::new(&[])];
            let iov = self.bytes_out.readable_iov(&mut iov_buf);

            let sent = match self.socket.send(iov, self.fds_out.make_contiguous(), mode) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            self.bytes_out.consume(sent);
            self.fds_out.clear();
        }

        Ok(())
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.socket
    }

    /// Get a mutable reference to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.socket
    }

    fn fill_incoming_buf(&mut self, mode: IoMode) -> io::Result<()> {
        if self.bytes_in.is_full() {
            return Ok(());
        }

        let mut iov_buf = [IoSliceMut::new(&mut []), IoSliceMut::new(&mut [])];
        let iov = self.bytes_in.writable_iov(&mut iov_buf);

        let read = loop {
            match self.socket.recv(iov, &mut self.fds_in, mode) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.bytes_in.advance_head(read);

        Ok(())
    }

    fn send_array(&mut self, array: &[u8]) {
        let len = array.len() as u32;

        self.bytes_out.write_uint(len);
        self.bytes_out.write_bytes(array);

        let padding = ((4 - (len % 4)) % 4) as usize;
        self.bytes_out.write_bytes(&[0, 0, 0][..padding]);
    }

    fn recv_array(&mut self) -> Vec<u8> {
        let len = self.bytes_in.read_uint() as usize;

        let mut buf = vec![0; len];
        self.bytes_in.read_bytes(&mut buf);

        let padding = (4 - (len % 4)) % 4;
        self.bytes_in.consume(padding);

        buf
    }

    fn recv_string_with_len(&mut self, len: u32) -> Result<CString, RecvMessageError> {
        let mut buf = vec![0; len as usize];
        self.bytes_in.read_bytes(&mut buf);

        let padding = (4 - (len % 4)) % 4;
        self.bytes_in.consume(padding as usize);

        let string = CString::from_vec_with_nul(buf).map_err(|_| RecvMessageError::BadString)?;
        std::str::from_utf8(string.to_bytes()).map_err(|_| RecvMessageError::BadString)?;
        Ok(string)
    }

    fn recv_string(&mut self) -> Result<CString, RecvMessageError> {
        let len = self.bytes_in.read_uint();
        if len == 0 {
            Err(RecvMessageError::UnexpectedNull)
        } else {
            self.recv_string_with_len(len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    static SIGNATURE: &[ArgType] = &[
        ArgType::Uint,
        ArgType::Int,
        ArgType::Fixed,
        ArgType::String,
        ArgType::OptString,
        ArgType::Array,
        ArgType::Object,
        ArgType::OptObject,
    ];

    fn id(n: u32) -> ObjectId {
        ObjectId(NonZeroU32::new(n).unwrap())
    }

    fn msg(object_id: u32, opcode: u16, args: Vec<ArgValue>) -> Message {
        let mut msg = Message {
            header: MessageHeader {
                object_id: id(object_id),
                size: 0,
                opcode,
            },
            args,
        };
        msg.header.size = msg.size() as u16;
        msg
    }

    fn pair() -> (BufferedSocket<UnixStream>, BufferedSocket<UnixStream>) {
        let (a, b) = UnixStream::pair().unwrap();
        (BufferedSocket::from(a), BufferedSocket::from(b))
    }

    fn send_and_recv(
        msg_in: Message,
        signature: &[ArgType],
    ) -> Result<Message, RecvMessageError> {
        let (mut tx, mut rx) = pair();
        let mut pool = MessageBuffersPool::default();

        tx.write_message(msg_in, &mut pool, IoMode::Blocking)
            .map_err(|e| e.err)
            .unwrap();
        tx.flush(IoMode::Blocking).unwrap();

        let header = rx.peek_message_header(IoMode::Blocking).unwrap();
        rx.recv_message(header, signature, &mut pool, IoMode::Blocking)
    }

    #[test]
    fn round_trip_all_arg_kinds() {
        let sent = msg(
            42,
            7,
            vec![
                ArgValue::Uint(3),
                ArgValue::Int(-25),
                ArgValue::Fixed(Fixed::from(1.5f64)),
                ArgValue::String(CString::new("I like trains!").unwrap()),
                ArgValue::OptString(None),
                ArgValue::Array(vec![1, 2, 3, 4, 5]),
                ArgValue::Object(id(88)),
                ArgValue::OptObject(None),
            ],
        );
        let expected_size = sent.size();
        assert_eq!(expected_size % 4, 0);

        let received = send_and_recv(sent, SIGNATURE).unwrap();

        assert_eq!(received.header.object_id, id(42));
        assert_eq!(received.header.opcode, 7);
        assert_eq!(received.header.size as usize, expected_size);
        match &received.args[..] {
            [ArgValue::Uint(3), ArgValue::Int(-25), ArgValue::Fixed(f), ArgValue::String(s), ArgValue::OptString(None), ArgValue::Array(a), ArgValue::Object(o), ArgValue::OptObject(None)] =>
            {
                assert_eq!(*f, Fixed::from(1.5f64));
                assert_eq!(s.to_str().unwrap(), "I like trains!");
                assert_eq!(a, &[1, 2, 3, 4, 5]);
                assert_eq!(*o, id(88));
            }
            other => panic!("unexpected args: {other:?}"),
        }
    }

    #[test]
    fn header_only_message_has_no_args() {
        let received = send_and_recv(msg(1, 0, Vec::new()), &[]).unwrap();
        assert_eq!(received.header.size as usize, MessageHeader::SIZE);
        assert!(received.args.is_empty());
    }

    #[test]
    fn string_padding_boundary() {
        // len("wl_shell") + NUL = 9, padded to 12
        let sent = msg(
            2,
            0,
            vec![ArgValue::String(CString::new("wl_shell").unwrap())],
        );
        assert_eq!(sent.size(), 8 + 4 + 12);
        let received = send_and_recv(sent, &[ArgType::String]).unwrap();
        match &received.args[..] {
            [ArgValue::String(s)] => assert_eq!(s.to_str().unwrap(), "wl_shell"),
            other => panic!("unexpected args: {other:?}"),
        }
    }

    #[test]
    fn fd_passing_preserves_file_identity() {
        let (mut tx, mut rx) = pair();
        let mut pool = MessageBuffersPool::default();

        let file = std::fs::File::open("/dev/null").unwrap();
        let sent_stat = nix::sys::stat::fstat(file.as_raw_fd()).unwrap();

        tx.write_message(
            msg(3, 1, vec![ArgValue::Fd(file.into())]),
            &mut pool,
            IoMode::Blocking,
        )
        .map_err(|e| e.err)
        .unwrap();
        tx.flush(IoMode::Blocking).unwrap();

        let header = rx.peek_message_header(IoMode::Blocking).unwrap();
        let received = rx
            .recv_message(header, &[ArgType::Fd], &mut pool, IoMode::Blocking)
            .unwrap();

        match &received.args[..] {
            [ArgValue::Fd(fd)] => {
                let recv_stat = nix::sys::stat::fstat(fd.as_raw_fd()).unwrap();
                assert_eq!(sent_stat.st_dev, recv_stat.st_dev);
                assert_eq!(sent_stat.st_ino, recv_stat.st_ino);
            }
            other => panic!("unexpected args: {other:?}"),
        }
    }

    #[test]
    fn oversized_message_is_rejected() {
        let (mut tx, _rx) = pair();
        let mut pool = MessageBuffersPool::default();

        let err = tx
            .write_message(
                msg(1, 0, vec![ArgValue::Array(vec![0; BYTES_OUT_LEN])]),
                &mut pool,
                IoMode::Blocking,
            )
            .unwrap_err();
        assert!(matches!(err.err, EncodeError::MessageTooLarge));
        // Ownership of the message came back
        assert_eq!(err.msg.args.len(), 1);
    }

    #[test]
    fn bad_header_length_is_rejected() {
        let (mut tx, mut rx) = pair();
        // Hand-crafted header with size 6 (< 8)
        let raw: [u8; 8] = {
            let mut raw = [0; 8];
            raw[0..4].copy_from_slice(&1u32.to_ne_bytes());
            raw[4..8].copy_from_slice(&((6u32) << 16).to_ne_bytes());
            raw
        };
        use std::io::Write;
        tx.transport_mut().write_all(&raw).unwrap();

        let err = rx.peek_message_header(IoMode::Blocking).unwrap_err();
        assert!(matches!(err, PeekHeaderError::BadLength));
    }

    #[test]
    fn invalid_utf8_string_is_rejected() {
        let sent = msg(
            5,
            0,
            vec![ArgValue::String(
                CString::new(&b"\xff\xfe"[..]).unwrap(),
            )],
        );
        let err = send_and_recv(sent, &[ArgType::String]).unwrap_err();
        assert!(matches!(err, RecvMessageError::BadString));
    }

    #[test]
    fn skip_message_keeps_stream_in_sync() {
        let (mut tx, mut rx) = pair();
        let mut pool = MessageBuffersPool::default();

        tx.write_message(
            msg(4, 99, vec![ArgValue::Uint(1), ArgValue::Uint(2)]),
            &mut pool,
            IoMode::Blocking,
        )
        .map_err(|e| e.err)
        .unwrap();
        tx.write_message(msg(4, 0, vec![ArgValue::Int(7)]), &mut pool, IoMode::Blocking)
            .map_err(|e| e.err)
            .unwrap();
        tx.flush(IoMode::Blocking).unwrap();

        let header = rx.peek_message_header(IoMode::Blocking).unwrap();
        assert_eq!(header.opcode, 99);
        rx.skip_message(header, IoMode::Blocking).unwrap();

        let header = rx.peek_message_header(IoMode::Blocking).unwrap();
        assert_eq!(header.opcode, 0);
        let received = rx
            .recv_message(header, &[ArgType::Int], &mut pool, IoMode::Blocking)
            .unwrap();
        assert!(matches!(received.args[..], [ArgValue::Int(7)]));
    }
}
