//! Shared helpers: a scripted mock FTP server over local TCP, plus a
//! small in-memory sink for downloads.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use ftpkit::{DirectFtpConnectionProvider, FtpClient, FtpClientConfig, UpstreamAddr};

pub struct MockControl {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MockControl {
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        MockControl {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
    }

    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "client closed the control connection early");
        line.trim_end().to_string()
    }

    pub async fn expect(&mut self, expected: &str) {
        let line = self.read_line().await;
        assert_eq!(line, expected);
    }

    pub async fn expect_prefix(&mut self, prefix: &str) -> String {
        let line = self.read_line().await;
        assert!(
            line.starts_with(prefix),
            "expected line starting with {prefix:?}, got {line:?}"
        );
        line
    }

    /// Read lines answering NOOP echoes until nothing arrives for a
    /// while, returns how many were seen.
    pub async fn answer_noops(&mut self, window: std::time::Duration) -> usize {
        let mut count = 0;
        loop {
            match tokio::time::timeout(window, self.read_line()).await {
                Ok(line) => {
                    assert_eq!(line, "NOOP");
                    self.send("200 NOOP ok").await;
                    count += 1;
                }
                Err(_) => return count,
            }
        }
    }
}

pub async fn spawn_control_server<F, Fut>(script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(MockControl) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(MockControl::new(stream)).await;
    });
    (addr, handle)
}

pub async fn data_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// `220` + FEAT negotiation, the start of every session.
pub async fn greet(ctl: &mut MockControl, features: &[&str]) {
    greet_with(ctl, "220 mock ftp ready", features).await;
}

pub async fn greet_with(ctl: &mut MockControl, welcome: &str, features: &[&str]) {
    ctl.send(welcome).await;
    ctl.expect("FEAT").await;
    if features.is_empty() {
        ctl.send("502 no features").await;
    } else {
        ctl.send("211-Features:").await;
        for feature in features {
            ctl.send(&format!(" {feature}")).await;
        }
        ctl.send("211 End").await;
    }
}

pub type TestClient = FtpClient<DirectFtpConnectionProvider, TcpStream, io::Error, ()>;

pub async fn connect_client(addr: SocketAddr, config: FtpClientConfig) -> TestClient {
    let server = UpstreamAddr::from_ip_and_port(addr.ip(), addr.port());
    FtpClient::connect_to(
        server,
        DirectFtpConnectionProvider::new(),
        &(),
        &Arc::new(config),
    )
    .await
    .map_err(|(e, _)| e)
    .unwrap()
}

/// In-memory download sink.
#[derive(Default)]
pub struct VecSink(pub Vec<u8>);

impl AsyncWrite for VecSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().0.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
