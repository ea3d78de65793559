//! First-byte protocol classification

use tokio::io::{AsyncRead, AsyncReadExt};

use super::peek::Rewind;
use crate::error::SniffError;

/// TLS record content type for handshake messages.
pub const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Wire protocol guessed from the first byte of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tls,
    Plain,
}

/// Read one byte through a peek and decide whether the client speaks TLS.
///
/// The byte stays in `stream` for the next stage.
pub async fn classify<T>(stream: &mut Rewind<T>) -> Result<Protocol, SniffError>
where
    T: AsyncRead + Unpin,
{
    let mut peek = stream.peek();
    let mut first = [0u8; 1];
    let n = peek.read(&mut first).await.map_err(SniffError::from_read)?;
    if n == 0 {
        return Err(SniffError::Eof);
    }

    Ok(if first[0] == TLS_HANDSHAKE_RECORD {
        Protocol::Tls
    } else {
        Protocol::Plain
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_byte_is_tls() {
        let mut stream = Rewind::new(&[0x16u8, 0x03, 0x01][..]);
        assert_eq!(classify(&mut stream).await.unwrap(), Protocol::Tls);
        assert_eq!(stream.buffered(), 1);
    }

    #[tokio::test]
    async fn test_other_bytes_are_plain() {
        for first in [b'G', 0x00, 0x15, 0x17, 0xff] {
            let data = [first, b'x'];
            let mut stream = Rewind::new(&data[..]);
            assert_eq!(classify(&mut stream).await.unwrap(), Protocol::Plain);
        }
    }

    #[tokio::test]
    async fn test_empty_input_fails() {
        let mut stream = Rewind::new(&b""[..]);
        assert!(matches!(classify(&mut stream).await, Err(SniffError::Eof)));
    }
}
