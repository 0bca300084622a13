//! Framed, buffered Unix-socket transport with fd passing (spec §4.1, §6).
//!
//! Lifted from the teacher's `wayland_core::BufferedSocket` (itself a
//! from-scratch reimplementation of `original_source/wayland-server.c`'s
//! `wl_connection`), generalized so both a client and a server connection
//! can share it, and extended with the `AnyNewId` wire layout needed by
//! `wl_display.bind`.

use std::ffi::CString;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned};

use crate::error::{DecodeError, SendError};
use crate::interface::ArgType;
use crate::message::{ArgValue, Message, MessageHeader};
use crate::object::ObjectId;

pub const BYTES_OUT_LEN: usize = 4096;
pub const BYTES_IN_LEN: usize = BYTES_OUT_LEN * 2;
pub const FDS_OUT_LEN: usize = 28;
pub const FDS_IN_LEN: usize = FDS_OUT_LEN * 2;

/// The "mode" of an IO operation, following spec §4.1: `EAGAIN` is never
/// fatal, it just distinguishes whether the caller wants to block for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    Blocking,
    NonBlocking,
}

/// A buffered, fd-carrying duplex byte stream framed into wire messages.
pub struct BufferedSocket {
    socket: UnixStream,
    bytes_in: RingBuffer<BYTES_IN_LEN>,
    bytes_out: RingBuffer<BYTES_OUT_LEN>,
    fds_in: ArrayBuffer<RawFd, FDS_IN_LEN>,
    fds_out: ArrayBuffer<RawFd, FDS_OUT_LEN>,
}

impl AsRawFd for BufferedSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl Drop for BufferedSocket {
    /// Close any fds still sitting in the in/out rings when the connection
    /// goes away unflushed or mid-decode, so a dropped `BufferedSocket`
    /// never leaks descriptors (spec §4.1).
    fn drop(&mut self) {
        for fd in self.fds_in.get_readable() {
            let _ = nix::unistd::close(*fd);
        }
        for fd in self.fds_out.get_readable() {
            let _ = nix::unistd::close(*fd);
        }
    }
}

impl From<UnixStream> for BufferedSocket {
    fn from(socket: UnixStream) -> Self {
        Self {
            socket,
            bytes_in: RingBuffer::new(),
            bytes_out: RingBuffer::new(),
            fds_in: ArrayBuffer::new(),
            fds_out: ArrayBuffer::new(),
        }
    }
}

impl BufferedSocket {
    /// Queue a message for sending, flushing the buffer first if there
    /// isn't enough room. On failure, ownership of the message is handed
    /// back so the caller can retry later (spec §4.1 "on overflow the
    /// connection fails" only applies once flushing itself cannot make
    /// room, i.e. the peer isn't reading — that case surfaces as an IO
    /// error from `flush`, not a panic here).
    pub fn write_message(&mut self, msg: Message, mode: IoMode) -> Result<(), SendError> {
        let size = MessageHeader::WIRE_SIZE + msg.args.iter().map(ArgValue::wire_size).sum::<u16>();
        let fds_cnt = msg.args.iter().filter(|a| matches!(a, ArgValue::Fd(_))).count();

        assert!(size as usize <= BYTES_OUT_LEN, "message too large to ever fit in the out buffer");
        assert!(fds_cnt <= FDS_OUT_LEN, "message carries more fds than the out buffer can hold");

        if (size as usize) > self.bytes_out.writable_len() || fds_cnt > self.fds_out.get_writable().len()
        {
            if let Err(error) = self.flush(mode) {
                return Err(SendError { message: msg, error });
            }
        }

        self.bytes_out.write_uint(msg.header.object_id.as_u32());
        self.bytes_out
            .write_uint((size as u32) << 16 | msg.header.opcode as u32);

        for arg in msg.args {
            match arg {
                ArgValue::Uint(x) => self.bytes_out.write_uint(x),
                ArgValue::Int(x) => self.bytes_out.write_int(x),
                ArgValue::Fixed(f) => self.bytes_out.write_int(f.0),
                ArgValue::Object(id) | ArgValue::OptObject(Some(id)) | ArgValue::NewId(id) => {
                    self.bytes_out.write_uint(id.as_u32())
                }
                ArgValue::OptObject(None) | ArgValue::OptString(None) => self.bytes_out.write_uint(0),
                ArgValue::AnyNewId { interface, version, id } => {
                    self.send_array(interface.to_bytes_with_nul());
                    self.bytes_out.write_uint(version);
                    self.bytes_out.write_uint(id.as_u32());
                }
                ArgValue::String(s) | ArgValue::OptString(Some(s)) => {
                    self.send_array(s.to_bytes_with_nul())
                }
                ArgValue::Array(a) => self.send_array(&a),
                ArgValue::Fd(fd) => self.fds_out.write_one(fd.into_raw_fd()),
            }
        }

        Ok(())
    }

    /// Peek the 8-byte header of the next frame, reading more from the
    /// socket if fewer than 8 bytes are currently buffered.
    pub fn peek_message_header(&mut self, mode: IoMode) -> Result<MessageHeader, DecodeError> {
        while self.bytes_in.readable_len() < MessageHeader::WIRE_SIZE as usize {
            self.fill_incoming_buf(mode)?;
        }

        let mut raw = [0u8; MessageHeader::WIRE_SIZE as usize];
        self.bytes_in.peek_bytes(&mut raw);
        let object_id = u32::from_ne_bytes(raw[0..4].try_into().unwrap());
        let size_and_opcode = u32::from_ne_bytes(raw[4..8].try_into().unwrap());
        let size = ((size_and_opcode & 0xFFFF_0000) >> 16) as u16;

        if size % 4 != 0 || (size as usize) < MessageHeader::WIRE_SIZE as usize {
            return Err(DecodeError::Invalid("frame size is not 4-byte aligned"));
        }

        let object_id = ObjectId::new(object_id)
            .ok_or(DecodeError::Invalid("message header names the null object id"))?;

        Ok(MessageHeader {
            object_id,
            size,
            opcode: (size_and_opcode & 0x0000_FFFF) as u16,
        })
    }

    /// Decode the body of a frame whose header has already been peeked,
    /// according to `signature`. Consumes exactly `header.size` bytes
    /// (after blocking/spinning until they and any required fds are all
    /// buffered).
    pub fn recv_message(
        &mut self,
        header: MessageHeader,
        signature: &[ArgType],
        mode: IoMode,
    ) -> Result<Message, DecodeError> {
        let fds_cnt = signature.iter().filter(|a| matches!(a, ArgType::Fd)).count();

        if header.size as usize > BYTES_IN_LEN {
            return Err(DecodeError::Invalid("frame larger than the input buffer"));
        }
        if fds_cnt > FDS_IN_LEN {
            return Err(DecodeError::NoMemory);
        }

        while (header.size as usize) > self.bytes_in.readable_len()
            || fds_cnt > self.fds_in.get_readable().len()
        {
            self.fill_incoming_buf(mode)?;
        }

        self.bytes_in.move_tail(MessageHeader::WIRE_SIZE as usize);
        let body_len = header.size as usize - MessageHeader::WIRE_SIZE as usize;
        let readable_at_body_start = self.bytes_in.readable_len();

        let mut args = Vec::with_capacity(signature.len());
        for arg_type in signature {
            // Bytes left in *this* frame, not in the whole (possibly
            // multi-frame) in-ring -- a string/array length must fit inside
            // its own message, never spill into whatever frame follows it
            // (spec §8 "array length fitting in remaining size").
            let consumed = readable_at_body_start - self.bytes_in.readable_len();
            let needed = if matches!(arg_type, ArgType::Fd) { 0 } else { 4 };
            if consumed + needed > body_len {
                return Err(DecodeError::Invalid("message signature does not fit in the declared frame size"));
            }
            let remaining_in_frame = body_len - consumed;

            let value = match arg_type {
                ArgType::Int => ArgValue::Int(self.bytes_in.read_int()),
                ArgType::Uint => ArgValue::Uint(self.bytes_in.read_uint()),
                ArgType::Fixed => ArgValue::Fixed(crate::message::Fixed(self.bytes_in.read_int())),
                ArgType::Object => {
                    let id = self.read_id()?;
                    ArgValue::Object(id.ok_or(DecodeError::Invalid("null object id in non-nullable argument"))?)
                }
                ArgType::OptObject => ArgValue::OptObject(self.read_id()?),
                ArgType::NewId(_) => {
                    let id = self.read_id()?;
                    ArgValue::NewId(id.ok_or(DecodeError::Invalid("null id in new_id argument"))?)
                }
                ArgType::AnyNewId => {
                    let interface = self.recv_string(remaining_in_frame)?;
                    let version = self.bytes_in.read_uint();
                    let id = self
                        .read_id()?
                        .ok_or(DecodeError::Invalid("null id in new_id argument"))?;
                    ArgValue::AnyNewId { interface, version, id }
                }
                ArgType::String => ArgValue::String(self.recv_string(remaining_in_frame)?),
                ArgType::OptString => {
                    let len = self.bytes_in.read_uint();
                    if len == 0 {
                        ArgValue::OptString(None)
                    } else {
                        ArgValue::OptString(Some(self.recv_string_with_len(len, remaining_in_frame.saturating_sub(4))?))
                    }
                }
                ArgType::Array => ArgValue::Array(self.recv_array(remaining_in_frame)?),
                ArgType::Fd => {
                    let fd = self.fds_in.read_one();
                    if fd < 0 {
                        return Err(DecodeError::NoMemory);
                    }
                    ArgValue::Fd(unsafe { std::os::fd::OwnedFd::from_raw_fd(fd) })
                }
            };
            args.push(value);
        }

        Ok(Message { header, args })
    }

    /// Drain a frame's body without decoding it (spec §3 "messages
    /// targeting ZOMBIE are silently drained").
    pub fn consume_frame(&mut self, header: MessageHeader, mode: IoMode) -> Result<(), DecodeError> {
        while (header.size as usize) > self.bytes_in.readable_len() {
            self.fill_incoming_buf(mode)?;
        }
        self.bytes_in.move_tail(header.size as usize);
        Ok(())
    }

    pub fn flush(&mut self, mode: IoMode) -> io::Result<()> {
        if self.bytes_out.is_empty() && self.fds_out.get_readable().is_empty() {
            return Ok(());
        }

        let mut flags = socket::MsgFlags::MSG_NOSIGNAL;
        if mode == IoMode::NonBlocking {
            flags |= socket::MsgFlags::MSG_DONTWAIT;
        }

        let cmsg_storage;
        let cmsgs: &[ControlMessage] = match self.fds_out.get_readable() {
            [] => &[],
            fds => {
                cmsg_storage = [ControlMessage::ScmRights(fds)];
                &cmsg_storage
            }
        };

        let mut iov_buf = [IoSlice::new(&[]), IoSlice::new(&[])];
        let iov = self.bytes_out.get_readable_iov(&mut iov_buf);
        // A signal-interrupted send is retried transparently (spec §4.1
        // "EINTR retries"); it never reaches the caller as a connection error.
        let sent = loop {
            match socket::sendmsg::<()>(self.socket.as_raw_fd(), iov, cmsgs, flags, None) {
                Ok(n) => break n,
                Err(nix::Error::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        };

        for fd in self.fds_out.get_readable() {
            let _ = nix::unistd::close(*fd);
        }

        // A short write just leaves the remainder in bytes_out for the next
        // flush; fds are all-or-nothing per sendmsg call, so they always go
        // out whole alongside whatever bytes did.
        self.bytes_out.move_tail(sent);
        self.fds_out.clear();

        Ok(())
    }

    fn read_id(&mut self) -> Result<Option<ObjectId>, DecodeError> {
        Ok(ObjectId::new(self.bytes_in.read_uint()))
    }

    fn fill_incoming_buf(&mut self, mode: IoMode) -> Result<(), DecodeError> {
        self.fds_in.relocate();
        if self.bytes_in.is_full() && self.fds_in.get_writable().is_empty() {
            return Ok(());
        }

        let mut cmsg = nix::cmsg_space!([RawFd; FDS_OUT_LEN]);
        let mut flags = socket::MsgFlags::MSG_CMSG_CLOEXEC | socket::MsgFlags::MSG_NOSIGNAL;
        if mode == IoMode::NonBlocking {
            flags |= socket::MsgFlags::MSG_DONTWAIT;
        }

        let mut iov_buf = [IoSliceMut::new(&mut []), IoSliceMut::new(&mut [])];
        let iov = self.bytes_in.get_writeable_iov(&mut iov_buf);
        // Same EINTR-is-transparent contract as `flush` above.
        let msg = loop {
            match socket::recvmsg::<()>(self.socket.as_raw_fd(), iov, Some(&mut cmsg), flags) {
                Ok(msg) => break msg,
                Err(nix::Error::EINTR) => continue,
                Err(e) => return Err(DecodeError::Io(e.into())),
            }
        };

        for cmsg in msg.cmsgs() {
            if let ControlMessageOwned::ScmRights(fds) = cmsg {
                self.fds_in.extend(&fds);
            }
        }

        if msg.bytes == 0 {
            return Err(DecodeError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer disconnected",
            )));
        }

        self.bytes_in.move_head(msg.bytes);
        Ok(())
    }

    fn send_array(&mut self, array: &[u8]) {
        let len = array.len() as u32;
        self.bytes_out.write_uint(len);
        self.bytes_out.write_bytes(array);
        let padding = ((4 - (len % 4)) % 4) as usize;
        self.bytes_out.write_bytes(&[0, 0, 0][..padding]);
    }

    /// `remaining` is the byte budget left in the *current frame* (after its
    /// own 4-byte length prefix has already been read), not the whole in-ring.
    fn recv_array(&mut self, remaining: usize) -> Result<Vec<u8>, DecodeError> {
        let len = self.bytes_in.read_uint() as usize;
        if len > remaining.saturating_sub(4) {
            return Err(DecodeError::Invalid("array length exceeds remaining frame size"));
        }
        let mut buf = vec![0; len];
        self.bytes_in.read_bytes(&mut buf);
        let padding = (4 - (len % 4)) % 4;
        self.bytes_in.move_tail(padding);
        Ok(buf)
    }

    fn recv_string_with_len(&mut self, len: u32, remaining: usize) -> Result<CString, DecodeError> {
        let len = len as usize;
        if len == 0 || len > remaining {
            return Err(DecodeError::Invalid("string length exceeds remaining frame size"));
        }
        let mut buf = vec![0; len];
        self.bytes_in.read_bytes(&mut buf);
        let padding = (4 - (len % 4)) % 4;
        self.bytes_in.move_tail(padding);
        CString::from_vec_with_nul(buf)
            .map_err(|_| DecodeError::Invalid("string argument missing or misplaced NUL terminator"))
    }

    /// `remaining` is the byte budget left in the current frame, including
    /// this string's own 4-byte length prefix.
    fn recv_string(&mut self, remaining: usize) -> Result<CString, DecodeError> {
        let len = self.bytes_in.read_uint();
        self.recv_string_with_len(len, remaining.saturating_sub(4))
    }
}

/// A flat array used as a fixed-capacity FIFO queue (used for the fd rings,
/// which are small enough that a ring buffer's wraparound isn't worth it).
struct ArrayBuffer<T, const N: usize> {
    bytes: Box<[T; N]>,
    offset: usize,
    len: usize,
}

impl<T: Default + Copy, const N: usize> ArrayBuffer<T, N> {
    fn new() -> Self {
        Self { bytes: Box::new([T::default(); N]), offset: 0, len: 0 }
    }

    fn clear(&mut self) {
        self.offset = 0;
        self.len = 0;
    }

    fn get_writable(&mut self) -> &mut [T] {
        &mut self.bytes[(self.offset + self.len)..]
    }

    fn get_readable(&self) -> &[T] {
        &self.bytes[self.offset..][..self.len]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(self.offset + self.len + cnt <= N);
        self.len += cnt;
    }

    fn consume(&mut self, cnt: usize) {
        assert!(cnt <= self.len);
        self.offset += cnt;
        self.len -= cnt;
    }

    fn relocate(&mut self) {
        if self.len > 0 && self.offset > 0 {
            self.bytes.copy_within(self.offset..(self.offset + self.len), 0);
        }
        self.offset = 0;
    }

    fn write_one(&mut self, elem: T) {
        let writable = self.get_writable();
        assert!(!writable.is_empty(), "fd out buffer overflow");
        writable[0] = elem;
        self.advance(1);
    }

    /// Returns `-1` (never a valid fd) if the ring is empty, so callers
    /// that expected an fd but the wire had none can fail the frame
    /// instead of panicking (spec "FD exhaustion mid-decode fails the
    /// frame, not the connection").
    fn read_one(&mut self) -> T
    where
        T: PartialEq + From<i8>,
    {
        let readable = self.get_readable();
        if readable.is_empty() {
            return T::from(-1);
        }
        let elem = readable[0];
        self.consume(1);
        elem
    }

    fn extend(&mut self, src: &[T]) {
        let writable = &mut self.get_writable()[..src.len()];
        writable.copy_from_slice(src);
        self.advance(src.len());
    }
}

/// A byte ring buffer of fixed capacity `N`.
struct RingBuffer<const N: usize> {
    bytes: Box<[u8; N]>,
    offset: usize,
    len: usize,
}

impl<const N: usize> RingBuffer<N> {
    fn new() -> Self {
        Self { bytes: Box::new([0; N]), offset: 0, len: 0 }
    }

    fn move_head(&mut self, n: usize) {
        self.len += n;
    }

    fn move_tail(&mut self, n: usize) {
        self.offset = (self.offset + n) % N;
        self.len = self.len.checked_sub(n).expect("consumed more than was readable");
    }

    fn readable_len(&self) -> usize {
        self.len
    }

    fn writable_len(&self) -> usize {
        N - self.len
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn is_full(&self) -> bool {
        self.len == N
    }

    fn head(&self) -> usize {
        (self.offset + self.len) % N
    }

    fn write_bytes(&mut self, data: &[u8]) {
        assert!(self.writable_len() >= data.len(), "out buffer overflow");
        let head = self.head();
        if head + data.len() <= N {
            self.bytes[head..][..data.len()].copy_from_slice(data);
        } else {
            let size = N - head;
            let rest = data.len() - size;
            self.bytes[head..][..size].copy_from_slice(&data[..size]);
            self.bytes[..rest].copy_from_slice(&data[size..]);
        }
        self.move_head(data.len());
    }

    fn peek_bytes(&mut self, buf: &mut [u8]) {
        assert!(self.readable_len() >= buf.len());
        if self.offset + buf.len() <= N {
            buf.copy_from_slice(&self.bytes[self.offset..][..buf.len()]);
        } else {
            let size = N - self.offset;
            let rest = buf.len() - size;
            buf[..size].copy_from_slice(&self.bytes[self.offset..][..size]);
            buf[size..].copy_from_slice(&self.bytes[..rest]);
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8]) {
        self.peek_bytes(buf);
        self.move_tail(buf.len());
    }

    fn get_writeable_iov<'b, 'a: 'b>(
        &'a mut self,
        iov_buf: &'b mut [IoSliceMut<'a>; 2],
    ) -> &'b mut [IoSliceMut<'a>] {
        let head = self.head();
        if self.len == 0 {
            self.offset = 0;
            iov_buf[0] = IoSliceMut::new(&mut *self.bytes);
            &mut iov_buf[0..1]
        } else if head < self.offset {
            iov_buf[0] = IoSliceMut::new(&mut self.bytes[head..self.offset]);
            &mut iov_buf[0..1]
        } else if self.offset == 0 {
            iov_buf[0] = IoSliceMut::new(&mut self.bytes[head..N]);
            &mut iov_buf[0..1]
        } else {
            let (left, right) = self.bytes.split_at_mut(head);
            iov_buf[0] = IoSliceMut::new(right);
            iov_buf[1] = IoSliceMut::new(&mut left[..self.offset]);
            &mut iov_buf[0..2]
        }
    }

    fn get_readable_iov<'b, 'a: 'b>(&'a self, iov_buf: &'b mut [IoSlice<'a>; 2]) -> &'b [IoSlice<'a>] {
        let head = self.head();
        if self.offset < head {
            iov_buf[0] = IoSlice::new(&self.bytes[self.offset..head]);
            &iov_buf[0..1]
        } else if head == 0 {
            iov_buf[0] = IoSlice::new(&self.bytes[self.offset..]);
            &iov_buf[0..1]
        } else {
            let (left, right) = self.bytes.split_at(self.offset);
            iov_buf[0] = IoSlice::new(right);
            iov_buf[1] = IoSlice::new(&left[..head]);
            &iov_buf[0..2]
        }
    }

    fn write_int(&mut self, val: i32) {
        self.write_bytes(&val.to_ne_bytes());
    }

    fn write_uint(&mut self, val: u32) {
        self.write_bytes(&val.to_ne_bytes());
    }

    fn read_int(&mut self) -> i32 {
        let mut buf = [0; 4];
        self.read_bytes(&mut buf);
        i32::from_ne_bytes(buf)
    }

    fn read_uint(&mut self) -> u32 {
        let mut buf = [0; 4];
        self.read_bytes(&mut buf);
        u32::from_ne_bytes(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_wraps_around() {
        let mut rb: RingBuffer<8> = RingBuffer::new();
        rb.write_bytes(&[1, 2, 3, 4, 5, 6]);
        let mut out = [0; 4];
        rb.read_bytes(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
        rb.write_bytes(&[7, 8, 9, 10]); // wraps past the end of the backing array
        let mut out2 = [0; 6];
        rb.read_bytes(&mut out2);
        assert_eq!(out2, [5, 6, 7, 8, 9, 10]);
        assert!(rb.is_empty());
    }

    #[test]
    fn round_trip_int_uint() {
        let mut rb: RingBuffer<64> = RingBuffer::new();
        rb.write_int(-42);
        rb.write_uint(0xDEAD_BEEF);
        assert_eq!(rb.read_int(), -42);
        assert_eq!(rb.read_uint(), 0xDEAD_BEEF);
    }

    /// A string whose bytes contain a NUL before the final terminator must
    /// be rejected, not silently truncated (spec §8 boundary behaviours).
    /// `CString` can't construct such a value itself, so the frame is
    /// hand-assembled and written with a raw `write_all`.
    #[test]
    fn string_with_embedded_nul_is_rejected() {
        use std::io::Write;
        let (mut raw_peer, sock_side) = UnixStream::pair().unwrap();
        let mut sock = BufferedSocket::from(sock_side);

        let string_bytes: &[u8] = b"ab\0cd\0"; // interior NUL at index 2, terminator at index 5
        let len = string_bytes.len() as u32;
        let padding = (4 - (len as usize % 4)) % 4;
        let mut body = Vec::new();
        body.extend_from_slice(&len.to_ne_bytes());
        body.extend_from_slice(string_bytes);
        body.extend(std::iter::repeat(0u8).take(padding));
        let size = MessageHeader::WIRE_SIZE as usize + body.len();

        let mut frame = Vec::new();
        frame.extend_from_slice(&1u32.to_ne_bytes());
        frame.extend_from_slice(&(((size as u32) << 16) | 0u32).to_ne_bytes());
        frame.extend_from_slice(&body);
        raw_peer.write_all(&frame).unwrap();

        let header = sock.peek_message_header(IoMode::Blocking).unwrap();
        assert_eq!(header.size as usize, size);
        let err = sock.recv_message(header, &[ArgType::String], IoMode::Blocking).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
    }

    /// A signature that declares more fd arguments than the input ring can
    /// ever hold fails the decode outright, without touching the socket
    /// (spec §8 "FD exhaustion mid-decode fails the frame, not the
    /// connection").
    #[test]
    fn fd_signature_exceeding_capacity_fails_without_blocking() {
        let (peer, sock_side) = UnixStream::pair().unwrap();
        drop(peer); // no reader/writer on the other end: any real I/O here would error or hang
        let mut sock = BufferedSocket::from(sock_side);

        let header = MessageHeader { object_id: ObjectId::DISPLAY, size: MessageHeader::WIRE_SIZE, opcode: 0 };
        let huge_sig = vec![ArgType::Fd; FDS_IN_LEN + 1];
        let err = sock.recv_message(header, &huge_sig, IoMode::Blocking).unwrap_err();
        assert!(matches!(err, DecodeError::NoMemory));
    }

    /// In `NonBlocking` mode, decoding a frame whose body hasn't fully
    /// arrived yet must defer (return `WouldBlock`) rather than decode
    /// garbage, and must succeed once the rest of the bytes land (spec §8
    /// "oversized/straddling frames must defer processing until complete").
    #[test]
    fn nonblocking_decode_defers_until_frame_is_complete() {
        use std::io::Write;
        let (mut raw_peer, sock_side) = UnixStream::pair().unwrap();
        let mut sock = BufferedSocket::from(sock_side);

        let s = CString::new("hello, this is a long enough string to span a few bytes").unwrap();
        let bytes = s.to_bytes_with_nul();
        let len = bytes.len() as u32;
        let padding = (4 - (len as usize % 4)) % 4;
        let mut body = Vec::new();
        body.extend_from_slice(&len.to_ne_bytes());
        body.extend_from_slice(bytes);
        body.extend(std::iter::repeat(0u8).take(padding));
        let size = MessageHeader::WIRE_SIZE as usize + body.len();

        let mut frame = Vec::new();
        frame.extend_from_slice(&1u32.to_ne_bytes());
        frame.extend_from_slice(&(((size as u32) << 16) | 0u32).to_ne_bytes());
        frame.extend_from_slice(&body);

        raw_peer.write_all(&frame[..10]).unwrap(); // header plus two body bytes only
        let header = sock.peek_message_header(IoMode::NonBlocking).unwrap();
        let err = sock.recv_message(header, &[ArgType::String], IoMode::NonBlocking).unwrap_err();
        assert!(matches!(err, DecodeError::Io(e) if e.kind() == io::ErrorKind::WouldBlock));

        raw_peer.write_all(&frame[10..]).unwrap();
        let msg = sock.recv_message(header, &[ArgType::String], IoMode::NonBlocking).unwrap();
        assert!(matches!(&msg.args[..], [ArgValue::String(decoded)] if decoded.as_c_str() == s.as_c_str()));
    }

    /// A mandatory (non-optional) string argument with a zero-length prefix
    /// has nowhere to put its own NUL terminator and must be rejected, not
    /// decoded as an empty string (spec §8 boundary behaviours).
    #[test]
    fn zero_length_string_argument_is_rejected() {
        use std::io::Write;
        let (mut raw_peer, sock_side) = UnixStream::pair().unwrap();
        let mut sock = BufferedSocket::from(sock_side);

        let body = 0u32.to_ne_bytes(); // length prefix only, no bytes follow
        let size = MessageHeader::WIRE_SIZE as usize + body.len();

        let mut frame = Vec::new();
        frame.extend_from_slice(&1u32.to_ne_bytes());
        frame.extend_from_slice(&(((size as u32) << 16) | 0u32).to_ne_bytes());
        frame.extend_from_slice(&body);
        raw_peer.write_all(&frame).unwrap();

        let header = sock.peek_message_header(IoMode::Blocking).unwrap();
        let err = sock.recv_message(header, &[ArgType::String], IoMode::Blocking).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
    }

    /// A frame whose declared size isn't a multiple of 4 can never be
    /// followed by a correctly aligned next header, so it's rejected at the
    /// header-peek stage rather than left to desync the whole stream (spec
    /// §8 boundary behaviours).
    #[test]
    fn misaligned_frame_size_is_rejected() {
        use std::io::Write;
        let (mut raw_peer, sock_side) = UnixStream::pair().unwrap();
        let mut sock = BufferedSocket::from(sock_side);

        let size = MessageHeader::WIRE_SIZE as u32 + 1; // not a multiple of 4
        let mut frame = Vec::new();
        frame.extend_from_slice(&1u32.to_ne_bytes());
        frame.extend_from_slice(&((size << 16) | 0u32).to_ne_bytes());
        raw_peer.write_all(&frame).unwrap();

        let err = sock.peek_message_header(IoMode::Blocking).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
    }
}
