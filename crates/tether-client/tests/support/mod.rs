//! Scripted mock gateway for integration tests.
//!
//! Each test binds one [`Gateway`] per configured server and drives the
//! server side of the protocol explicitly: accept, answer (or reject) the
//! key exchange, answer the logon, then exchange sealed messages. Heartbeats
//! arrive interleaved with everything else, so scripts reading for a
//! specific message use [`GatewayConn::recv_non_heartbeat`].

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use tether_client::ServerAddr;
use tether_core::message::RESULT_OK;
use tether_core::{FrameCodec, LogonResponse, Message, MsgKind};
use tether_crypto::test_support;
use tether_crypto::ChannelCipher;

/// One listening mock server.
pub struct Gateway {
    listener: TcpListener,
    addr: ServerAddr,
}

impl Gateway {
    /// Bind on an ephemeral localhost port.
    pub async fn bind() -> Gateway {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Gateway {
            listener,
            addr: ServerAddr::new("127.0.0.1", port),
        }
    }

    /// The address to put in the client's server list.
    pub fn addr(&self) -> ServerAddr {
        self.addr.clone()
    }

    /// Wait for the next client connection.
    pub async fn accept(&self) -> GatewayConn {
        let (stream, _) = self.listener.accept().await.unwrap();
        GatewayConn {
            framed: Framed::new(stream, FrameCodec::default()),
            cipher: None,
        }
    }
}

/// One accepted connection, scripted step by step.
pub struct GatewayConn {
    framed: Framed<TcpStream, FrameCodec>,
    cipher: Option<ChannelCipher>,
}

impl GatewayConn {
    /// Read the key-exchange request and accept it.
    pub async fn accept_handshake(&mut self) {
        let request = self.recv().await;
        assert_eq!(request.kind, MsgKind::HandshakeRequest);
        let accepted = test_support::accept(&request).unwrap();
        self.send_plain(&accepted.result).await;
        self.cipher = Some(accepted.cipher);
    }

    /// Read the key-exchange request and reject it with `code`.
    pub async fn reject_handshake(&mut self, code: u32) {
        let request = self.recv().await;
        assert_eq!(request.kind, MsgKind::HandshakeRequest);
        self.send_plain(&test_support::reject(code)).await;
    }

    /// Read the logon request and grant it.
    pub async fn accept_logon(&mut self, heartbeat_interval: Duration, assigned_id: u64) {
        let logon = self.recv().await;
        assert_eq!(logon.kind, MsgKind::Logon);
        let response = LogonResponse {
            result: RESULT_OK,
            heartbeat_interval,
            assigned_id,
        };
        self.send(&Message::new(MsgKind::LogonResponse, response.encode()))
            .await;
    }

    /// Read the logon request and refuse it with `code`.
    pub async fn reject_logon(&mut self, code: u32) {
        let logon = self.recv().await;
        assert_eq!(logon.kind, MsgKind::Logon);
        let response = LogonResponse {
            result: code,
            heartbeat_interval: Duration::from_secs(30),
            assigned_id: 0,
        };
        self.send(&Message::new(MsgKind::LogonResponse, response.encode()))
            .await;
    }

    /// Accept handshake and logon in one go, with a long heartbeat interval
    /// so keepalives stay out of the script's way.
    pub async fn establish(&mut self, assigned_id: u64) {
        self.accept_handshake().await;
        self.accept_logon(Duration::from_secs(30), assigned_id).await;
    }

    /// Read one message, opening it if the channel is encrypted.
    pub async fn recv(&mut self) -> Message {
        let frame = self
            .framed
            .next()
            .await
            .expect("connection closed by client")
            .unwrap();
        let payload = match &self.cipher {
            Some(cipher) => cipher.open(&frame).unwrap(),
            None => frame,
        };
        Message::parse(payload).unwrap()
    }

    /// Read messages until one that is not a heartbeat arrives.
    pub async fn recv_non_heartbeat(&mut self) -> Message {
        loop {
            let msg = self.recv().await;
            if msg.kind != MsgKind::Heartbeat {
                return msg;
            }
        }
    }

    /// Send a message, sealing it if the channel is encrypted.
    pub async fn send(&mut self, msg: &Message) {
        let payload = match &self.cipher {
            Some(cipher) => cipher.seal(&msg.encode()).unwrap(),
            None => msg.encode(),
        };
        self.framed.send(payload).await.unwrap();
    }

    async fn send_plain(&mut self, msg: &Message) {
        self.framed.send(msg.encode()).await.unwrap();
    }

    /// Send raw bytes as one frame, bypassing the cipher.
    pub async fn send_raw(&mut self, payload: Bytes) {
        self.framed.send(payload).await.unwrap();
    }

    /// Reply to a request with the same kind and `body`.
    pub async fn reply(&mut self, request: &Message, body: Bytes) {
        let response = Message::new(request.kind, body).with_target_job(request.source_job);
        self.send(&response).await;
    }
}

/// A client config with test-sized timing knobs.
pub fn test_config(servers: Vec<ServerAddr>) -> tether_client::ClientConfig {
    tether_client::ClientConfig {
        servers,
        handshake_timeout: Duration::from_secs(5),
        job_timeout: Duration::from_secs(5),
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(400),
        ..Default::default()
    }
}
