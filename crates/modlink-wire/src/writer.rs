use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::error::{Result, WireError};
use crate::packet::{Packet, MAX_PACKET_SIZE};

/// Writes complete packets to any `Write` stream.
pub struct PacketWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> PacketWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
        }
    }

    /// Encode and write one packet (blocking).
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.buf.clear();
        packet.encode(&mut self.buf);

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::decode_packet;
    use crate::reader::PacketReader;

    #[test]
    fn write_then_decode() {
        let packet = Packet::new(11, 1, 7, true, &b"payload"[..]).unwrap();
        let mut writer = PacketWriter::new(Vec::new());
        writer.write_packet(&packet).unwrap();

        let mut buf = BytesMut::from(writer.into_inner().as_slice());
        let decoded = decode_packet(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn short_writes_complete_the_packet() {
        let packet = Packet::new(12, 2, 8, true, &b"chunked"[..]).unwrap();
        let mut writer = PacketWriter::new(OneBytePerWrite(Vec::new()));
        writer.write_packet(&packet).unwrap();

        let mut buf = BytesMut::from(writer.into_inner().0.as_slice());
        let decoded = decode_packet(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn roundtrip_over_pipe() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = PacketWriter::new(left);
        let mut reader = PacketReader::new(right);

        let packet = Packet::new(13, 1, 9, true, &b"ping"[..]).unwrap();
        writer.write_packet(&packet).unwrap();

        let got = reader.read_packet().unwrap();
        assert_eq!(got, packet);
    }

    struct OneBytePerWrite(Vec<u8>);

    impl Write for OneBytePerWrite {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            self.0.push(buf[0]);
            Ok(1)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
