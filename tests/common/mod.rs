//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use transocks::destination::{Destination, OriginalDst};
use transocks::dialer::Dialer;

/// A complete TLS record carrying a ClientHello.
pub fn client_hello_record(server_name: Option<&str>) -> Vec<u8> {
    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x5a; 32]);
    body.push(0);
    body.extend_from_slice(&[0x00, 0x04, 0x13, 0x01, 0x13, 0x02]);
    body.extend_from_slice(&[0x01, 0x00]);

    let mut exts = Vec::new();
    if let Some(name) = server_name {
        let name = name.as_bytes();
        let list_len = name.len() + 3;
        exts.extend_from_slice(&[0x00, 0x00]);
        exts.extend_from_slice(&((list_len + 2) as u16).to_be_bytes());
        exts.extend_from_slice(&(list_len as u16).to_be_bytes());
        exts.push(0x00);
        exts.extend_from_slice(&(name.len() as u16).to_be_bytes());
        exts.extend_from_slice(name);
    }
    body.extend_from_slice(&(exts.len() as u16).to_be_bytes());
    body.extend_from_slice(&exts);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

/// Connected loopback pair: (client side, accepted side).
pub async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client.unwrap(), accepted.unwrap().0)
}

/// Echo server that answers every connection, echoing until EOF and then
/// closing its write side.
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.into_split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
                let _ = wr.shutdown().await;
            });
        }
    });
    addr
}

/// Server that accepts connections and keeps them open without a word.
pub async fn spawn_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Dials a fixed address regardless of destination, recording what was asked.
pub struct RecordingDialer {
    target: SocketAddr,
    seen: Mutex<Vec<String>>,
}

impl RecordingDialer {
    pub fn new(target: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            target,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialer for RecordingDialer {
    async fn dial(&self, dest: &Destination) -> transocks::Result<TcpStream> {
        self.seen.lock().unwrap().push(dest.to_string());
        Ok(TcpStream::connect(self.target).await?)
    }
}

/// Dialer whose proxy is always unreachable.
pub struct FailingDialer {
    pub calls: Mutex<usize>,
}

impl FailingDialer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(0),
        })
    }
}

#[async_trait]
impl Dialer for FailingDialer {
    async fn dial(&self, _dest: &Destination) -> transocks::Result<TcpStream> {
        *self.calls.lock().unwrap() += 1;
        Err(anyhow::anyhow!("proxy unreachable"))
    }
}

/// Dialer whose proxy never answers.
pub struct HangingDialer {
    pub calls: Mutex<usize>,
}

impl HangingDialer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(0),
        })
    }
}

#[async_trait]
impl Dialer for HangingDialer {
    async fn dial(&self, _dest: &Destination) -> transocks::Result<TcpStream> {
        *self.calls.lock().unwrap() += 1;
        std::future::pending().await
    }
}

/// Original-destination lookup with a fixed answer.
pub struct StaticOriginalDst(pub SocketAddr);

impl OriginalDst for StaticOriginalDst {
    fn original_dst(&self, _stream: &TcpStream) -> io::Result<SocketAddr> {
        Ok(self.0)
    }
}

/// Read until EOF, treating a reset as EOF.
pub async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return out,
            Ok(n) => out.extend_from_slice(&buf[..n]),
        }
    }
}
