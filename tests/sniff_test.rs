//! Sniffing never alters the byte stream

mod common;

use tokio::io::AsyncReadExt;
use tokio_test::io::Builder;

use transocks::sniff::{sniff, Rewind};
use transocks::SniffError;

async fn drain<T: tokio::io::AsyncRead + Unpin>(mut stream: Rewind<T>) -> Vec<u8> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn test_tls_bytes_preserved_across_fragmented_reads() {
    let mut data = common::client_hello_record(Some("www.example.net"));
    data.extend_from_slice(&[0x17, 0x03, 0x03, 0x00, 0x02, 0xaa, 0xbb]);

    let mut builder = Builder::new();
    for chunk in data.chunks(7) {
        builder.read(chunk);
    }
    let mut stream = Rewind::new(builder.build());

    let outcome = sniff(&mut stream).await.unwrap();
    assert!(outcome.is_tls);
    assert_eq!(outcome.hostname.as_deref(), Some("www.example.net"));
    assert_eq!(drain(stream).await, data);
}

#[tokio::test]
async fn test_tls_without_sni() {
    let data = common::client_hello_record(None);
    let mut stream = Rewind::new(&data[..]);

    let outcome = sniff(&mut stream).await.unwrap();
    assert!(outcome.is_tls);
    assert_eq!(outcome.hostname, None);
    assert_eq!(drain(stream).await, data);
}

#[tokio::test]
async fn test_http_bytes_preserved_across_fragmented_reads() {
    let data = b"GET /index.html HTTP/1.1\r\nUser-Agent: test\r\nHost: www.example.org\r\n\r\nPIPELINED".to_vec();

    let mut builder = Builder::new();
    for chunk in data.chunks(5) {
        builder.read(chunk);
    }
    let mut stream = Rewind::new(builder.build());

    let outcome = sniff(&mut stream).await.unwrap();
    assert!(!outcome.is_tls);
    assert_eq!(outcome.hostname.as_deref(), Some("www.example.org"));
    assert_eq!(drain(stream).await, data);
}

#[tokio::test]
async fn test_arbitrary_input_preserved_on_failure() {
    let inputs: [&[u8]; 4] = [
        b"SSH-2.0-OpenSSH_9.6\r\n",
        b"\x16\x03\x01",
        b"\x16\x03\x01\x00\x04\x02\x00\x00\x00",
        b"\x00\xff\x10garbage",
    ];

    for data in inputs {
        let mut stream = Rewind::new(data);
        assert!(sniff(&mut stream).await.is_err(), "{:?}", data);
        assert_eq!(drain(stream).await, data);
    }
}

#[tokio::test]
async fn test_empty_connection() {
    let mut stream = Rewind::new(&b""[..]);
    assert!(matches!(sniff(&mut stream).await, Err(SniffError::Eof)));
}
