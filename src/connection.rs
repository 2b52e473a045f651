/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::error::Error;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use socket2::{Domain, SockRef, Socket, TcpKeepalive, Type};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use g3_types::net::{Host, UpstreamAddr};

/// Socket factory for one client.
///
/// Proxying and TLS live behind this trait: `secure_connection` is the
/// "activate TLS on an already connected socket" primitive and has to
/// hand back a stream of the same type, usually via an enum or trait
/// object stream.
#[async_trait]
pub trait FtpConnectionProvider<T: AsyncRead + AsyncWrite, E: Error, UD> {
    async fn new_control_connection(
        &mut self,
        upstream: &UpstreamAddr,
        user_data: &UD,
    ) -> Result<T, E>;

    async fn new_data_connection(
        &mut self,
        server_addr: &UpstreamAddr,
        user_data: &UD,
    ) -> Result<T, E>;

    /// accept the inbound connection of an active mode transfer
    async fn accept_data_connection(
        &mut self,
        listener: &TcpListener,
        user_data: &UD,
    ) -> Result<T, E>;

    async fn secure_connection(
        &mut self,
        stream: T,
        server_name: &Host,
        user_data: &UD,
    ) -> Result<T, E>;

    /// local address of the control connection, needed for EPRT / PORT
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn proxy_in_use(&self) -> bool {
        false
    }
}

/// Plain TCP provider without proxy or TLS support.
#[derive(Default)]
pub struct DirectFtpConnectionProvider {
    local_addr: Option<SocketAddr>,
}

impl DirectFtpConnectionProvider {
    pub fn new() -> Self {
        DirectFtpConnectionProvider::default()
    }

    async fn resolve(addr: &UpstreamAddr) -> io::Result<SocketAddr> {
        match addr.host() {
            Host::Ip(ip) => Ok(SocketAddr::new(*ip, addr.port())),
            Host::Domain(domain) => {
                let domain: &str = domain.as_ref();
                tokio::net::lookup_host((domain, addr.port()))
                    .await?
                    .next()
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::NotFound, "no address resolved")
                    })
            }
        }
    }

    async fn connect(addr: &UpstreamAddr) -> io::Result<TcpStream> {
        let peer = Self::resolve(addr).await?;
        let domain = match peer {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        // tokio sockets expose no keepalive setup, build via socket2 first
        let raw = Socket::new(domain, Type::STREAM, None)?;
        raw.set_nonblocking(true)?;
        raw.set_tcp_keepalive(&TcpKeepalive::new())?;
        let socket = TcpSocket::from_std_stream(std::net::TcpStream::from(raw));
        socket.connect(peer).await
    }
}

#[async_trait]
impl FtpConnectionProvider<TcpStream, io::Error, ()> for DirectFtpConnectionProvider {
    async fn new_control_connection(
        &mut self,
        upstream: &UpstreamAddr,
        _user_data: &(),
    ) -> Result<TcpStream, io::Error> {
        let stream = Self::connect(upstream).await?;
        self.local_addr = stream.local_addr().ok();
        Ok(stream)
    }

    async fn new_data_connection(
        &mut self,
        server_addr: &UpstreamAddr,
        _user_data: &(),
    ) -> Result<TcpStream, io::Error> {
        Self::connect(server_addr).await
    }

    async fn accept_data_connection(
        &mut self,
        listener: &TcpListener,
        _user_data: &(),
    ) -> Result<TcpStream, io::Error> {
        let (stream, _peer) = listener.accept().await?;
        SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new())?;
        Ok(stream)
    }

    async fn secure_connection(
        &mut self,
        _stream: TcpStream,
        _server_name: &Host,
        _user_data: &(),
    ) -> Result<TcpStream, io::Error> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "tls is not supported by the direct provider",
        ))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}
