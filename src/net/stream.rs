//! Socket stream filters.
//!
//! A [`FrameReader`]/[`FrameWriter`] pair wraps one direction of a socket.
//! Before the key exchange they pass bytes through untouched; once a cipher
//! is installed every subsequent byte is transparently de/encrypted. Callers
//! above (framing, forwarding, dispatcher sends) never know the difference.
//!
//! Reads are deliberately unbuffered: a read-ahead buffer could slurp bytes
//! that were produced before the cipher handover and decode them with the
//! wrong stream state.

use std::io::{Read, Write};
use std::net::TcpStream;

use crate::crypto::{StreamDecryptor, StreamEncryptor, SECRET_LEN};

/// Reading side of one direction, with an optional decryption filter.
pub struct FrameReader {
    inner: TcpStream,
    decryptor: Option<StreamDecryptor>,
}

impl FrameReader {
    /// Wrap a connected socket.
    pub fn new(inner: TcpStream) -> Self {
        Self {
            inner,
            decryptor: None,
        }
    }

    /// Decrypt every byte read from here on.
    pub fn install_cipher(&mut self, secret: &[u8; SECRET_LEN]) {
        self.decryptor = Some(StreamDecryptor::new(secret));
    }
}

impl Read for FrameReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(decryptor) = &mut self.decryptor {
            decryptor.decrypt(&mut buf[..n]);
        }
        Ok(n)
    }
}

/// Writing side of one direction, with an optional encryption filter.
pub struct FrameWriter {
    inner: TcpStream,
    encryptor: Option<StreamEncryptor>,
}

impl FrameWriter {
    /// Wrap a connected socket.
    pub fn new(inner: TcpStream) -> Self {
        Self {
            inner,
            encryptor: None,
        }
    }

    /// Encrypt every byte written from here on.
    pub fn install_cipher(&mut self, secret: &[u8; SECRET_LEN]) {
        self.encryptor = Some(StreamEncryptor::new(secret));
    }
}

impl Write for FrameWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.encryptor {
            None => self.inner.write(buf),
            Some(encryptor) => {
                let mut ciphertext = buf.to_vec();
                encryptor.encrypt(&mut ciphertext);
                // all-or-nothing: a partial write would desync the cipher
                self.inner.write_all(&ciphertext)?;
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let a = TcpStream::connect(addr).unwrap();
        let (b, _) = listener.accept().unwrap();
        (a, b)
    }

    #[test]
    fn test_cipher_handover_mid_stream() {
        let secret = [0x42u8; SECRET_LEN];
        let (near, far) = socket_pair();

        let mut writer = FrameWriter::new(near);
        let mut reader = FrameReader::new(far);

        writer.write_all(b"plain").unwrap();
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"plain");

        writer.install_cipher(&secret);
        reader.install_cipher(&secret);

        writer.write_all(b"sealed bytes").unwrap();
        let mut buf = [0u8; 12];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"sealed bytes");
    }

    #[test]
    fn test_ciphertext_differs_on_the_wire() {
        let secret = [0x42u8; SECRET_LEN];
        let (near, far) = socket_pair();

        let mut writer = FrameWriter::new(near);
        writer.install_cipher(&secret);
        writer.write_all(b"sealed").unwrap();

        let mut raw = far;
        let mut buf = [0u8; 6];
        raw.read_exact(&mut buf).unwrap();
        assert_ne!(&buf, b"sealed");
    }
}
