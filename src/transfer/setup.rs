/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::{SocketAddr, SocketAddrV4};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use g3_types::net::UpstreamAddr;

use super::{FtpDataChannel, FtpDataChannelMode, FtpTransferCommand};
use crate::control::FtpTransferStart;
use crate::error::{FtpCommandError, FtpFilePreTransferStatus, FtpTransferSetupError};
use crate::log_msg;
use crate::{FtpClient, FtpConnectionProvider};

impl<CP, S, E, UD> FtpClient<CP, S, E, UD>
where
    CP: FtpConnectionProvider<S, E, UD>,
    S: AsyncRead + AsyncWrite + Unpin,
    E: std::error::Error,
{
    /// Negotiate a data connection, issue REST and the transfer command,
    /// and bind the preliminary reply to the returned channel.
    pub(crate) async fn open_data_channel(
        &mut self,
        command: &FtpTransferCommand,
        restart: u64,
        known_size: Option<u64>,
        user_data: &UD,
    ) -> Result<FtpDataChannel<S>, FtpTransferSetupError> {
        self.ensure_connected()
            .map_err(FtpTransferSetupError::RawCommandError)?;
        let mode = self.effective_data_mode();
        if mode.is_active() {
            self.open_active_data_channel(mode, command, restart, known_size, user_data)
                .await
        } else {
            self.open_passive_data_channel(mode, command, restart, known_size, user_data)
                .await
        }
    }

    /// IPv6 local endpoints silently upgrade the IPv4-only modes.
    fn effective_data_mode(&self) -> FtpDataChannelMode {
        let mode = self.config.data.mode;
        let local_is_v6 = self
            .conn_provider
            .local_addr()
            .map(|addr| addr.is_ipv6())
            .unwrap_or(false);
        if local_is_v6 {
            match mode {
                FtpDataChannelMode::Pasv | FtpDataChannelMode::PasvEx => FtpDataChannelMode::Epsv,
                FtpDataChannelMode::Port => FtpDataChannelMode::Eprt,
                other => other,
            }
        } else {
            mode
        }
    }

    fn local_is_v4(&self) -> bool {
        self.conn_provider
            .local_addr()
            .map(|addr| addr.is_ipv4())
            .unwrap_or(true)
    }

    async fn open_passive_data_channel(
        &mut self,
        mode: FtpDataChannelMode,
        command: &FtpTransferCommand,
        restart: u64,
        known_size: Option<u64>,
        user_data: &UD,
    ) -> Result<FtpDataChannel<S>, FtpTransferSetupError> {
        let max_attempts = self.config.data.passive_max_attempts.max(1);
        let mut peer = None;
        for _attempt in 0..max_attempts {
            let addr = self.request_passive_endpoint(mode, command).await?;
            if self.config.data.blocked_ports.contains(&addr.port()) {
                log_msg!("skipped blocked passive port {}", addr.port());
                continue;
            }
            peer = Some(addr);
            break;
        }
        let Some(peer) = peer else {
            return Err(FtpTransferSetupError::PassivePortsExhausted(max_attempts));
        };

        let stream = match tokio::time::timeout(
            self.config.data.connect_timeout,
            self.conn_provider.new_data_connection(&peer, user_data),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(_)) => return Err(FtpTransferSetupError::DataTransferNotConnected),
            Err(_) => return Err(FtpTransferSetupError::DataTransferConnectTimeout),
        };

        self.send_restart_if_needed(restart, known_size).await?;
        match self.control.start_transfer(command).await? {
            FtpTransferStart::Proceed(reply) => {
                let stream = self.secure_data_stream(stream, user_data).await?;
                Ok(FtpDataChannel::new(stream, reply))
            }
            FtpTransferStart::EmptyDirectory => Ok(FtpDataChannel::empty()),
            FtpTransferStart::Rejected(reply) => Err(self.map_rejected_start(command, reply)),
        }
    }

    /// One passive endpoint request, honoring the EPSV-unsupported latch
    /// and the PASV NAT workarounds.
    async fn request_passive_endpoint(
        &mut self,
        mode: FtpDataChannelMode,
        command: &FtpTransferCommand,
    ) -> Result<UpstreamAddr, FtpTransferSetupError> {
        let try_epsv = match mode {
            FtpDataChannelMode::Epsv => true,
            FtpDataChannelMode::AutoPassive => {
                !self.session.epsv_unsupported()
                    && (self.server_feature.support_epsv() || self.config.always_try_epsv)
            }
            _ => false,
        };
        if try_epsv {
            match self.control.request_epsv_port().await {
                Ok(port) => {
                    // never use the hostname here: a DNS round robin may
                    // resolve the data connection to another server
                    let mut addr = self.server.clone();
                    addr.set_port(port);
                    return Ok(addr);
                }
                Err(e) => {
                    if matches!(mode, FtpDataChannelMode::AutoPassive)
                        && self.local_is_v4()
                        && e.is_negative_reply()
                    {
                        self.session.set_epsv_unsupported();
                        log_msg!("EPSV unsupported by {}, falling back to PASV", self.server);
                    } else {
                        return Err(e.into());
                    }
                }
            }
        }

        if !self.local_is_v4() {
            return Err(FtpTransferSetupError::PasvNotAvailable);
        }

        if self.server_feature.support_pre_transfer() {
            match self.control.pre_transfer(&command.command_line()).await? {
                FtpFilePreTransferStatus::Proceed => {}
                FtpFilePreTransferStatus::Invalid => {
                    log_msg!("invalid pre transfer for {}", command.command_line());
                }
            }
        }

        let parsed = self.control.request_pasv_addr().await?;
        let substitute = matches!(mode, FtpDataChannelMode::PasvEx)
            || (super::endpoint::is_private_peer_ip(parsed.ip())
                && !self.conn_provider.proxy_in_use());
        let addr = if substitute {
            let mut addr = self.server.clone();
            addr.set_port(parsed.port());
            addr
        } else {
            UpstreamAddr::from_ip_and_port(parsed.ip(), parsed.port())
        };
        Ok(addr)
    }

    async fn open_active_data_channel(
        &mut self,
        mode: FtpDataChannelMode,
        command: &FtpTransferCommand,
        restart: u64,
        known_size: Option<u64>,
        user_data: &UD,
    ) -> Result<FtpDataChannel<S>, FtpTransferSetupError> {
        let Some(local) = self.conn_provider.local_addr() else {
            return Err(FtpTransferSetupError::ActiveModeUnavailable);
        };
        let listener = TcpListener::bind(SocketAddr::new(local.ip(), 0))
            .await
            .map_err(FtpTransferSetupError::DataListenFailed)?;
        let bound = listener
            .local_addr()
            .map_err(FtpTransferSetupError::DataListenFailed)?;

        if matches!(mode, FtpDataChannelMode::Port) {
            self.control.request_port(require_v4(bound)?).await?;
        } else {
            match self.control.request_eprt(bound).await {
                Ok(_) => {}
                Err(e) => {
                    if matches!(mode, FtpDataChannelMode::AutoActive)
                        && bound.is_ipv4()
                        && e.is_permanent_negative_reply()
                    {
                        log_msg!("EPRT unsupported by {}, falling back to PORT", self.server);
                        self.control.request_port(require_v4(bound)?).await?;
                    } else {
                        return Err(e.into());
                    }
                }
            }
        }

        self.send_restart_if_needed(restart, known_size).await?;
        match self.control.start_transfer(command).await? {
            FtpTransferStart::Proceed(reply) => {
                let stream = match tokio::time::timeout(
                    self.config.data.connect_timeout,
                    self.conn_provider
                        .accept_data_connection(&listener, user_data),
                )
                .await
                {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(_)) => return Err(FtpTransferSetupError::DataTransferNotConnected),
                    Err(_) => return Err(FtpTransferSetupError::DataTransferConnectTimeout),
                };
                let stream = self.secure_data_stream(stream, user_data).await?;
                Ok(FtpDataChannel::new(stream, reply))
            }
            FtpTransferStart::EmptyDirectory => Ok(FtpDataChannel::empty()),
            FtpTransferStart::Rejected(reply) => Err(self.map_rejected_start(command, reply)),
        }
    }

    async fn send_restart_if_needed(
        &mut self,
        restart: u64,
        known_size: Option<u64>,
    ) -> Result<(), FtpTransferSetupError> {
        if restart == 0 {
            return Ok(());
        }
        // some SOCKS proxies misreport the restart offset by one, skip
        // the no-op REST instead of tripping over it
        if self.conn_provider.proxy_in_use() && known_size == Some(restart) {
            return Ok(());
        }
        if !self.server_feature.support_rest_stream() {
            return Err(FtpTransferSetupError::RawCommandError(
                FtpCommandError::CommandNotImplemented(crate::FtpCommand::REST),
            ));
        }
        self.control.request_restart(restart).await?;
        Ok(())
    }

    async fn secure_data_stream(
        &mut self,
        stream: S,
        user_data: &UD,
    ) -> Result<S, FtpTransferSetupError> {
        if !self.session.data_encryption_active() {
            return Ok(stream);
        }
        match self
            .conn_provider
            .secure_connection(stream, self.server.host(), user_data)
            .await
        {
            Ok(secured) => Ok(secured),
            Err(_) => {
                self.session.set_ftps_failure();
                Err(FtpTransferSetupError::DataTlsSetupFailed)
            }
        }
    }

    fn map_rejected_start(
        &self,
        command: &FtpTransferCommand,
        reply: crate::FtpReply,
    ) -> FtpTransferSetupError {
        if self.handler.is_file_missing_reply(&reply) {
            FtpTransferSetupError::FileUnavailable
        } else {
            FtpTransferSetupError::RawCommandError(FtpCommandError::from_negative_reply(
                command.command(),
                reply.code(),
            ))
        }
    }
}

fn require_v4(addr: SocketAddr) -> Result<SocketAddrV4, FtpTransferSetupError> {
    match addr {
        SocketAddr::V4(v4) => Ok(v4),
        SocketAddr::V6(_) => Err(FtpTransferSetupError::ActiveModeUnavailable),
    }
}
