//! Minimal WebSocket client over TCP.
//!
//! Just enough of RFC 6455 to talk to the relay: the upgrade handshake,
//! masked outbound frames, fragment reassembly, ping replies and close.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    ReadHalf, Take, WriteHalf,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{DeviceError, DeviceResult};

pub const OP_CONTINUATION: u8 = 0x0;
pub const OP_TEXT: u8 = 0x1;
pub const OP_BINARY: u8 = 0x2;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;
/// Status line plus headers of the upgrade response.
const MAX_RESPONSE_HEAD: u64 = 8 * 1024;

/// A complete message from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Binary(Bytes),
    Text(String),
}

pub type SharedWriter<W> = Arc<Mutex<WsWriter<W>>>;
pub type TcpReader = WsReader<ReadHalf<BufReader<TcpStream>>, WriteHalf<BufReader<TcpStream>>>;
pub type TcpWriter = SharedWriter<WriteHalf<BufReader<TcpStream>>>;

/// Opens a `ws://` URL.
pub async fn connect(url: &str) -> DeviceResult<(TcpReader, TcpWriter)> {
    let (host, path) = split_url(url)?;
    let address = if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:80")
    };
    let stream = TcpStream::connect(&address).await?;
    stream.set_nodelay(true)?;
    handshake(stream, host, path).await
}

fn split_url(url: &str) -> DeviceResult<(&str, &str)> {
    let rest = url
        .strip_prefix("ws://")
        .ok_or_else(|| DeviceError::Handshake(format!("unsupported url '{url}', expected ws://")))?;
    let (host, path) = match rest.find('/') {
        Some(at) => rest.split_at(at),
        None => (rest, "/"),
    };
    if host.is_empty() {
        return Err(DeviceError::Handshake(format!("missing host in '{url}'")));
    }
    Ok((host, path))
}

/// Performs the HTTP upgrade on an open stream and splits it.
pub async fn handshake<S>(
    stream: S,
    host: &str,
    path: &str,
) -> DeviceResult<(WsReader<ReadHalf<BufReader<S>>, WriteHalf<BufReader<S>>>, SharedWriter<WriteHalf<BufReader<S>>>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = BASE64.encode(rand::random::<[u8; 16]>());
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    );

    let mut stream = BufReader::new(stream);
    stream.get_mut().write_all(request.as_bytes()).await?;
    stream.get_mut().flush().await?;

    let mut head = (&mut stream).take(MAX_RESPONSE_HEAD);
    let status = read_head_line(&mut head).await?;
    if status.split_whitespace().nth(1) != Some("101") {
        return Err(DeviceError::Handshake(format!(
            "unexpected response '{}'",
            status.trim_end()
        )));
    }
    loop {
        let line = read_head_line(&mut head).await?;
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    let (read_half, write_half) = tokio::io::split(stream);
    let writer = Arc::new(Mutex::new(WsWriter { inner: write_half }));
    let reader = WsReader {
        inner: read_half,
        writer: writer.clone(),
    };
    Ok((reader, writer))
}

async fn read_head_line<R>(head: &mut Take<R>) -> DeviceResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    head.read_line(&mut line).await?;
    if line.ends_with('\n') {
        return Ok(line);
    }
    if head.limit() == 0 {
        return Err(DeviceError::Handshake(format!(
            "upgrade response exceeds {MAX_RESPONSE_HEAD} bytes"
        )));
    }
    Err(DeviceError::Handshake("connection closed during upgrade".into()))
}

/// Encodes one frame with FIN set. Client frames must pass a mask.
pub fn encode_frame(opcode: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(0x80 | (opcode & 0x0f));
    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    match payload.len() {
        len if len < 126 => out.push(mask_bit | len as u8),
        len if len <= u16::MAX as usize => {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }
    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        }
        None => out.extend_from_slice(payload),
    }
    out
}

pub struct WsWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> WsWriter<W> {
    pub async fn send_binary(&mut self, data: &[u8]) -> DeviceResult<()> {
        self.send_frame(OP_BINARY, data).await
    }

    pub async fn send_text(&mut self, text: &str) -> DeviceResult<()> {
        self.send_frame(OP_TEXT, text.as_bytes()).await
    }

    pub async fn send_frame(&mut self, opcode: u8, payload: &[u8]) -> DeviceResult<()> {
        let frame = encode_frame(opcode, payload, Some(rand::random()));
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Sends a close frame and shuts the write side down.
    pub async fn close(&mut self) -> DeviceResult<()> {
        self.send_frame(OP_CLOSE, &[]).await?;
        self.inner.shutdown().await?;
        Ok(())
    }
}

pub struct WsReader<R, W> {
    inner: R,
    writer: SharedWriter<W>,
}

struct Frame {
    fin: bool,
    opcode: u8,
    payload: Vec<u8>,
}

impl<R, W> WsReader<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// The next complete message, or `None` once the connection is over.
    ///
    /// Read errors end the sequence as well.
    pub async fn next(&mut self) -> Option<Incoming> {
        match self.read_message().await {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "WebSocket read failed.");
                None
            }
        }
    }

    async fn read_message(&mut self) -> DeviceResult<Option<Incoming>> {
        let mut partial: Option<(u8, Vec<u8>)> = None;
        loop {
            let frame = self.read_frame().await?;
            match frame.opcode {
                OP_PING => {
                    self.writer.lock().await.send_frame(OP_PONG, &frame.payload).await?;
                }
                OP_PONG => {}
                OP_CLOSE => {
                    debug!("Relay sent close frame.");
                    return Ok(None);
                }
                OP_CONTINUATION => {
                    let Some((_, buffer)) = partial.as_mut() else {
                        return Err(DeviceError::Protocol("continuation without a start".into()));
                    };
                    if buffer.len() + frame.payload.len() > MAX_MESSAGE_LEN {
                        return Err(DeviceError::Protocol("message too large".into()));
                    }
                    buffer.extend_from_slice(&frame.payload);
                    if frame.fin {
                        if let Some((opcode, data)) = partial.take() {
                            return finish(opcode, data).map(Some);
                        }
                    }
                }
                OP_TEXT | OP_BINARY if frame.fin => return finish(frame.opcode, frame.payload).map(Some),
                OP_TEXT | OP_BINARY => partial = Some((frame.opcode, frame.payload)),
                other => return Err(DeviceError::Protocol(format!("unknown opcode {other:#x}"))),
            }
        }
    }

    async fn read_frame(&mut self) -> DeviceResult<Frame> {
        let mut head = [0u8; 2];
        self.inner.read_exact(&mut head).await?;
        let fin = head[0] & 0x80 != 0;
        let opcode = head[0] & 0x0f;
        let masked = head[1] & 0x80 != 0;
        let len = match head[1] & 0x7f {
            126 => u64::from(self.inner.read_u16().await?),
            127 => self.inner.read_u64().await?,
            len => u64::from(len),
        };
        let len = usize::try_from(len)
            .ok()
            .filter(|len| *len <= MAX_MESSAGE_LEN)
            .ok_or_else(|| DeviceError::Protocol(format!("frame of {len} bytes")))?;

        let mask = if masked {
            let mut key = [0u8; 4];
            self.inner.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };
        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        if let Some(key) = mask {
            payload.iter_mut().enumerate().for_each(|(i, b)| *b ^= key[i % 4]);
        }
        Ok(Frame { fin, opcode, payload })
    }
}

fn finish(opcode: u8, data: Vec<u8>) -> DeviceResult<Incoming> {
    if opcode == OP_TEXT {
        String::from_utf8(data)
            .map(Incoming::Text)
            .map_err(|_| DeviceError::Protocol("text frame is not UTF-8".into()))
    } else {
        Ok(Incoming::Binary(Bytes::from(data)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};

    /// Accepts the upgrade on the server end of a duplex pipe.
    pub(crate) async fn accept(server: &mut DuplexStream) -> String {
        let mut request = Vec::new();
        while !request.ends_with(b"\r\n\r\n") {
            request.push(server.read_u8().await.unwrap());
        }
        server
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n")
            .await
            .unwrap();
        String::from_utf8(request).unwrap()
    }

    /// Reads one masked client frame from the server end.
    pub(crate) async fn read_client_frame(server: &mut DuplexStream) -> (u8, Vec<u8>) {
        let head = [server.read_u8().await.unwrap(), server.read_u8().await.unwrap()];
        assert_ne!(head[1] & 0x80, 0, "client frames must be masked");
        let len = match head[1] & 0x7f {
            126 => server.read_u16().await.unwrap() as usize,
            127 => server.read_u64().await.unwrap() as usize,
            len => len as usize,
        };
        let mut key = [0u8; 4];
        server.read_exact(&mut key).await.unwrap();
        let mut payload = vec![0u8; len];
        server.read_exact(&mut payload).await.unwrap();
        payload.iter_mut().enumerate().for_each(|(i, b)| *b ^= key[i % 4]);
        (head[0] & 0x0f, payload)
    }

    #[test]
    fn frame_length_forms() {
        assert_eq!(encode_frame(OP_BINARY, &[0; 125], None)[1], 125);
        let medium = encode_frame(OP_BINARY, &[0; 126], None);
        assert_eq!(&medium[1..4], &[126, 0, 126]);
        let large = encode_frame(OP_BINARY, &vec![0; 70_000], None);
        assert_eq!(large[1], 127);
        assert_eq!(&large[2..10], &70_000u64.to_be_bytes());
        assert_eq!(large.len(), 10 + 70_000);
    }

    #[test]
    fn masked_frames_xor_payload() {
        let frame = encode_frame(OP_TEXT, b"abcd", Some([1, 2, 3, 4]));
        assert_eq!(frame[0], 0x81);
        assert_eq!(frame[1], 0x84);
        assert_eq!(&frame[2..6], &[1, 2, 3, 4]);
        assert_eq!(&frame[6..], &[b'a' ^ 1, b'b' ^ 2, b'c' ^ 3, b'd' ^ 4]);
    }

    #[test]
    fn splits_urls() {
        assert_eq!(split_url("ws://10.0.0.2:8765/").unwrap(), ("10.0.0.2:8765", "/"));
        assert_eq!(split_url("ws://relay.local").unwrap(), ("relay.local", "/"));
        assert_eq!(split_url("ws://h:1/a/b").unwrap(), ("h:1", "/a/b"));
        assert!(split_url("wss://secure/").is_err());
    }

    #[tokio::test]
    async fn handshake_sends_key_and_checks_status() {
        let (client, mut server) = duplex(4096);
        let accepting = tokio::spawn(async move {
            let request = accept(&mut server).await;
            (request, server)
        });
        let (_reader, _writer) = handshake(client, "relay:8765", "/").await.unwrap();
        let (request, _server) = accepting.await.unwrap();

        assert!(request.starts_with("GET / HTTP/1.1\r\n"));
        assert!(request.contains("Host: relay:8765\r\n"));
        let key = request
            .lines()
            .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
            .unwrap();
        assert_eq!(BASE64.decode(key).unwrap().len(), 16);
    }

    #[tokio::test]
    async fn handshake_rejects_other_status() {
        let (client, mut server) = duplex(4096);
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let _ = server.read(&mut buf).await;
            server
                .write_all(b"HTTP/1.1 404 Not Found\r\n\r\n")
                .await
                .unwrap();
        });
        let err = handshake(client, "relay", "/").await.err().unwrap();
        assert!(matches!(err, DeviceError::Handshake(_)));
    }

    #[tokio::test]
    async fn handshake_caps_response_headers() {
        let (client, mut server) = duplex(4096);
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let _ = server.read(&mut buf).await;
            let mut response = b"HTTP/1.1 101 Switching Protocols\r\n".to_vec();
            for i in 0..400 {
                response.extend_from_slice(format!("X-Filler-{i}: aaaaaaaaaaaaaaaa\r\n").as_bytes());
            }
            // The client stops reading once the cap is hit.
            let _ = server.write_all(&response).await;
        });
        let err = handshake(client, "relay", "/").await.err().unwrap();
        assert!(matches!(err, DeviceError::Handshake(ref msg) if msg.contains("exceeds")));
    }

    #[tokio::test]
    async fn reassembles_fragments_and_answers_pings() {
        let (client, mut server) = duplex(1 << 16);
        let server_task = tokio::spawn(async move {
            accept(&mut server).await;
            // "hello " + "world" as a fragmented text message with a ping between.
            server.write_all(&[0x01, 6]).await.unwrap();
            server.write_all(b"hello ").await.unwrap();
            server.write_all(&encode_frame(OP_PING, b"p", None)).await.unwrap();
            server.write_all(&[0x80, 5]).await.unwrap();
            server.write_all(b"world").await.unwrap();
            server.write_all(&encode_frame(OP_BINARY, &[1, 2, 3], Some([9, 9, 9, 9]))).await.unwrap();
            server.write_all(&encode_frame(OP_CLOSE, &[], None)).await.unwrap();
            read_client_frame(&mut server).await
        });

        let (mut reader, _writer) = handshake(client, "relay", "/").await.unwrap();
        assert_eq!(reader.next().await, Some(Incoming::Text("hello world".into())));
        assert_eq!(reader.next().await, Some(Incoming::Binary(Bytes::from_static(&[1, 2, 3]))));
        assert_eq!(reader.next().await, None);

        let (opcode, payload) = server_task.await.unwrap();
        assert_eq!(opcode, OP_PONG);
        assert_eq!(payload, b"p");
    }

    #[tokio::test]
    async fn outbound_frames_are_masked() {
        let (client, mut server) = duplex(1 << 16);
        let server_task = tokio::spawn(async move {
            accept(&mut server).await;
            let first = read_client_frame(&mut server).await;
            let second = read_client_frame(&mut server).await;
            (first, second)
        });
        let (_reader, writer) = handshake(client, "relay", "/").await.unwrap();
        writer.lock().await.send_binary(&[7; 300]).await.unwrap();
        writer.lock().await.send_text("{\"type\":\"text\"}").await.unwrap();

        let (first, second) = server_task.await.unwrap();
        assert_eq!(first, (OP_BINARY, vec![7; 300]));
        assert_eq!(second, (OP_TEXT, b"{\"type\":\"text\"}".to_vec()));
    }

    #[tokio::test]
    async fn read_error_ends_the_sequence() {
        let (client, mut server) = duplex(4096);
        let server_task = tokio::spawn(async move {
            accept(&mut server).await;
            server.write_all(&[0x82, 10, 1, 2]).await.unwrap();
        });
        let (mut reader, _writer) = handshake(client, "relay", "/").await.unwrap();
        server_task.await.unwrap();
        assert_eq!(reader.next().await, None);
    }
}
