/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use g3_types::auth::{Password, Username};

use crate::config::FtpControlConfig;
use crate::error::{
    FtpAuthStatus, FtpCommandError, FtpFilePreTransferStatus, FtpTransferServerError,
};
use crate::log_msg;
use crate::transfer::{endpoint, FtpTransferCommand, FtpTransferType};
use crate::FtpServerFeature;

mod command;
mod response;
pub(crate) mod time_val;

pub use command::FtpCommand;
pub use response::{FtpReply, FtpReplyCategory};

const MAX_STALE_DRAIN_BYTES: usize = 65536;

/// Outcome of issuing the transfer command on the control channel.
#[derive(Debug)]
pub(crate) enum FtpTransferStart {
    /// preliminary 1xx received, data follows
    Proceed(FtpReply),
    /// `NLST` on an empty directory, no data and no end reply will follow
    EmptyDirectory,
    /// a final negative reply instead of a preliminary one
    Rejected(FtpReply),
}

pub(crate) struct FtpControlChannel<T> {
    stream: Option<BufReader<T>>,
    config: FtpControlConfig,
    last_command: Option<Instant>,
}

impl<T> FtpControlChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(stream: T, config: FtpControlConfig) -> Self {
        FtpControlChannel {
            stream: Some(BufReader::with_capacity(config.max_line_len, stream)),
            config,
            last_command: None,
        }
    }

    pub(super) fn stream_mut(&mut self) -> Option<&mut BufReader<T>> {
        self.stream.as_mut()
    }

    /// take the raw stream out, e.g. to wrap it in TLS after AUTH
    pub(crate) fn take_stream(&mut self) -> Option<T> {
        self.stream.take().map(|s| s.into_inner())
    }

    pub(crate) fn set_stream(&mut self, stream: T) {
        self.stream = Some(BufReader::with_capacity(self.config.max_line_len, stream));
    }

    pub(crate) fn close(&mut self) {
        self.stream = None;
    }

    #[inline]
    pub(crate) fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// time since the last command write, which is what keep-alive
    /// injection decisions are based on
    pub(crate) fn control_idle_time(&self) -> Option<Duration> {
        self.last_command.map(|t| t.elapsed())
    }

    async fn write_command_raw(&mut self, line: &str) -> Result<(), FtpCommandError> {
        #[cfg(feature = "log-raw-io")]
        crate::debug::log_cmd(line);

        let stream = self
            .stream
            .as_mut()
            .ok_or(FtpCommandError::NotConnected)?;
        let mut buf = Vec::<u8>::with_capacity(line.len() + 2);
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(b"\r\n");
        stream
            .write_all(&buf)
            .await
            .map_err(FtpCommandError::SendFailed)?;
        stream.flush().await.map_err(FtpCommandError::SendFailed)?;
        self.last_command = Some(Instant::now());
        Ok(())
    }

    async fn exchange(
        &mut self,
        cmd: FtpCommand,
        line: &str,
    ) -> Result<FtpReply, FtpCommandError> {
        if self.config.drain_stale_data {
            let _ = self.drain_stale_data(self.config.stale_data_timeout).await;
        }
        self.write_command_raw(line).await?;
        let reply = self.timed_read_reply(cmd.as_str()).await?;
        if reply.code() == 421 {
            self.close();
            return Err(FtpCommandError::ServiceNotAvailable);
        }
        Ok(reply)
    }

    /// Discard bytes left over from broken prior operations. Returns how
    /// many bytes were thrown away.
    pub(crate) async fn drain_stale_data(&mut self, window: Duration) -> Result<usize, io::Error> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };
        let mut drained = 0usize;
        while drained < MAX_STALE_DRAIN_BYTES {
            let len = match tokio::time::timeout(window, stream.fill_buf()).await {
                Ok(Ok(buf)) => buf.len(),
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            };
            if len == 0 {
                break;
            }
            stream.consume(len);
            drained += len;
        }
        if drained > 0 {
            log_msg!("drained {} stale bytes from the control connection", drained);
        }
        Ok(drained)
    }

    /// Read replies until the welcome line. 1xx marks like `120` are
    /// skipped, the caller checks the final code.
    pub(crate) async fn wait_greetings(&mut self) -> Result<FtpReply, FtpCommandError> {
        loop {
            let reply = self.timed_read_reply("greetings").await?;
            match reply.category() {
                FtpReplyCategory::PositivePreliminary => continue,
                _ => {
                    if reply.code() == 421 {
                        self.close();
                        return Err(FtpCommandError::ServiceNotAvailable);
                    }
                    return Ok(reply);
                }
            }
        }
    }

    pub(crate) async fn check_server_feature(
        &mut self,
    ) -> Result<FtpServerFeature, FtpCommandError> {
        let reply = self.exchange(FtpCommand::FEAT, "FEAT").await?;
        match reply.code() {
            211 => {
                let mut feature = FtpServerFeature::default();
                for line in reply.info_lines().iter().skip(1) {
                    feature.parse_and_set(line.trim());
                }
                Ok(feature)
            }
            500 | 502 => Ok(FtpServerFeature::default()),
            code => Err(FtpCommandError::from_negative_reply(FtpCommand::FEAT, code)),
        }
    }

    pub(crate) async fn set_use_utf8(&mut self) -> Result<(), FtpCommandError> {
        let reply = self.exchange(FtpCommand::OPTS, "OPTS UTF8 ON").await?;
        if reply.is_positive() {
            Ok(())
        } else {
            Err(FtpCommandError::from_negative_reply(
                FtpCommand::OPTS,
                reply.code(),
            ))
        }
    }

    pub(crate) async fn send_username(
        &mut self,
        name: Option<&Username>,
    ) -> Result<FtpAuthStatus, FtpCommandError> {
        let name = name.map(|v| v.as_original()).unwrap_or("anonymous");
        let reply = self
            .exchange(FtpCommand::USER, &format!("USER {name}"))
            .await?;
        match reply.code() {
            230 | 232 => Ok(FtpAuthStatus::LoggedIn),
            331 => Ok(FtpAuthStatus::NeedPassword),
            332 => Ok(FtpAuthStatus::NeedAccount),
            530 => Ok(FtpAuthStatus::NotLoggedIn),
            code => Err(FtpCommandError::from_negative_reply(FtpCommand::USER, code)),
        }
    }

    pub(crate) async fn send_password(
        &mut self,
        pass: Option<&Password>,
    ) -> Result<FtpAuthStatus, FtpCommandError> {
        let pass = pass.map(|v| v.as_original()).unwrap_or("anonymous@");
        let reply = self
            .exchange(FtpCommand::PASS, &format!("PASS {pass}"))
            .await?;
        match reply.code() {
            230 | 232 => Ok(FtpAuthStatus::LoggedIn),
            331 => Ok(FtpAuthStatus::NeedPassword),
            332 => Ok(FtpAuthStatus::NeedAccount),
            530 => Ok(FtpAuthStatus::NotLoggedIn),
            code => Err(FtpCommandError::from_negative_reply(FtpCommand::PASS, code)),
        }
    }

    pub(crate) async fn send_quit(&mut self) -> Result<FtpReply, FtpCommandError> {
        let reply = self.exchange(FtpCommand::QUIT, "QUIT").await?;
        self.close();
        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(FtpCommandError::from_negative_reply(
                FtpCommand::QUIT,
                reply.code(),
            ))
        }
    }

    pub(crate) async fn send_noop(&mut self) -> Result<(), FtpCommandError> {
        let reply = self.exchange(FtpCommand::NOOP, "NOOP").await?;
        if reply.is_positive() {
            Ok(())
        } else {
            Err(FtpCommandError::from_negative_reply(
                FtpCommand::NOOP,
                reply.code(),
            ))
        }
    }

    /// Write a NOOP without waiting for the echo. The caller is expected
    /// to drain the queued `200` echoes before the next real reply.
    pub(crate) async fn inject_noop(&mut self) -> Result<(), FtpCommandError> {
        self.write_command_raw("NOOP").await
    }

    pub(crate) async fn request_transfer_type(
        &mut self,
        ttype: FtpTransferType,
    ) -> Result<(), FtpCommandError> {
        let reply = self
            .exchange(
                FtpCommand::TYPE,
                &format!("TYPE {}", ttype.command_argument()),
            )
            .await?;
        if matches!(reply.category(), FtpReplyCategory::PositiveCompletion) {
            Ok(())
        } else {
            Err(FtpCommandError::from_negative_reply(
                FtpCommand::TYPE,
                reply.code(),
            ))
        }
    }

    pub(crate) async fn request_pwd(&mut self) -> Result<String, FtpCommandError> {
        let reply = self.exchange(FtpCommand::PWD, "PWD").await?;
        if reply.code() != 257 {
            return Err(FtpCommandError::from_negative_reply(
                FtpCommand::PWD,
                reply.code(),
            ));
        }
        let msg = reply.message();
        let start = msg
            .find('"')
            .ok_or(FtpCommandError::InvalidReplySyntax(FtpCommand::PWD, 257))?;
        let end = msg
            .rfind('"')
            .filter(|end| *end > start)
            .ok_or(FtpCommandError::InvalidReplySyntax(FtpCommand::PWD, 257))?;
        Ok(msg[start + 1..end].replace("\"\"", "\""))
    }

    pub(crate) async fn change_dir(&mut self, path: &str) -> Result<(), FtpCommandError> {
        let reply = self
            .exchange(FtpCommand::CWD, &format!("CWD {path}"))
            .await?;
        if matches!(reply.category(), FtpReplyCategory::PositiveCompletion) {
            Ok(())
        } else {
            Err(FtpCommandError::from_negative_reply(
                FtpCommand::CWD,
                reply.code(),
            ))
        }
    }

    pub(crate) async fn request_size(
        &mut self,
        path: &str,
    ) -> Result<Option<u64>, FtpCommandError> {
        let reply = self
            .exchange(FtpCommand::SIZE, &format!("SIZE {path}"))
            .await?;
        match reply.code() {
            213 => reply
                .message()
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| FtpCommandError::InvalidReplySyntax(FtpCommand::SIZE, 213)),
            550 => Ok(None),
            code => Err(FtpCommandError::from_negative_reply(FtpCommand::SIZE, code)),
        }
    }

    pub(crate) async fn request_mtime(
        &mut self,
        path: &str,
    ) -> Result<Option<DateTime<Utc>>, FtpCommandError> {
        let reply = self
            .exchange(FtpCommand::MDTM, &format!("MDTM {path}"))
            .await?;
        match reply.code() {
            213 => match time_val::parse_from_str(reply.message().trim()) {
                Some(dt) => Ok(Some(dt)),
                None => Err(FtpCommandError::InvalidReplySyntax(FtpCommand::MDTM, 213)),
            },
            550 => Ok(None),
            code => Err(FtpCommandError::from_negative_reply(FtpCommand::MDTM, code)),
        }
    }

    pub(crate) async fn send_site(&mut self, args: &str) -> Result<FtpReply, FtpCommandError> {
        self.exchange(FtpCommand::SITE, &format!("SITE {args}"))
            .await
    }

    pub(crate) async fn abort_transfer(&mut self) -> Result<(), FtpCommandError> {
        let reply = self.exchange(FtpCommand::ABOR, "ABOR").await?;
        match reply.code() {
            225 | 226 => Ok(()),
            426 => {
                // the aborted transfer error comes first, its end reply follows
                let reply = self.timed_read_reply("ABOR").await?;
                match reply.code() {
                    225 | 226 => Ok(()),
                    code => Err(FtpCommandError::UnexpectedReplyCode(FtpCommand::ABOR, code)),
                }
            }
            code => Err(FtpCommandError::from_negative_reply(FtpCommand::ABOR, code)),
        }
    }

    pub(crate) async fn request_auth_tls(&mut self) -> Result<(), FtpCommandError> {
        let reply = self.exchange(FtpCommand::AUTH, "AUTH TLS").await?;
        match reply.code() {
            234 | 334 => Ok(()),
            code => Err(FtpCommandError::from_negative_reply(FtpCommand::AUTH, code)),
        }
    }

    pub(crate) async fn request_pbsz_zero(&mut self) -> Result<(), FtpCommandError> {
        let reply = self.exchange(FtpCommand::PBSZ, "PBSZ 0").await?;
        if matches!(reply.category(), FtpReplyCategory::PositiveCompletion) {
            Ok(())
        } else {
            Err(FtpCommandError::from_negative_reply(
                FtpCommand::PBSZ,
                reply.code(),
            ))
        }
    }

    pub(crate) async fn request_prot(&mut self, private: bool) -> Result<(), FtpCommandError> {
        let level = if private { "P" } else { "C" };
        let reply = self
            .exchange(FtpCommand::PROT, &format!("PROT {level}"))
            .await?;
        if matches!(reply.category(), FtpReplyCategory::PositiveCompletion) {
            Ok(())
        } else {
            Err(FtpCommandError::from_negative_reply(
                FtpCommand::PROT,
                reply.code(),
            ))
        }
    }

    pub(crate) async fn pre_transfer(
        &mut self,
        command_line: &str,
    ) -> Result<FtpFilePreTransferStatus, FtpCommandError> {
        let reply = self
            .exchange(FtpCommand::PRET, &format!("PRET {command_line}"))
            .await?;
        match reply.category() {
            FtpReplyCategory::PositiveCompletion => Ok(FtpFilePreTransferStatus::Proceed),
            FtpReplyCategory::TransientNegative | FtpReplyCategory::PermanentNegative => {
                Ok(FtpFilePreTransferStatus::Invalid)
            }
            _ => Err(FtpCommandError::PreTransferFailed(
                FtpCommand::PRET,
                reply.code(),
            )),
        }
    }

    pub(crate) async fn request_restart(&mut self, position: u64) -> Result<(), FtpCommandError> {
        let reply = self
            .exchange(FtpCommand::REST, &format!("REST {position}"))
            .await?;
        if reply.code() == 350 {
            Ok(())
        } else {
            Err(FtpCommandError::from_negative_reply(
                FtpCommand::REST,
                reply.code(),
            ))
        }
    }

    pub(crate) async fn request_epsv_port(&mut self) -> Result<u16, FtpCommandError> {
        let reply = self.exchange(FtpCommand::EPSV, "EPSV").await?;
        if reply.code() != 229 {
            return Err(FtpCommandError::from_negative_reply(
                FtpCommand::EPSV,
                reply.code(),
            ));
        }
        match endpoint::parse_epsv_reply(reply.message()) {
            Some(port) => Ok(port),
            // some servers answer 229 with a PASV style payload
            None => endpoint::parse_pasv_reply(reply.message())
                .map(|sa| sa.port())
                .ok_or(FtpCommandError::InvalidReplySyntax(FtpCommand::EPSV, 229)),
        }
    }

    pub(crate) async fn request_pasv_addr(&mut self) -> Result<SocketAddr, FtpCommandError> {
        let reply = self.exchange(FtpCommand::PASV, "PASV").await?;
        if reply.code() != 227 {
            return Err(FtpCommandError::from_negative_reply(
                FtpCommand::PASV,
                reply.code(),
            ));
        }
        endpoint::parse_pasv_reply(reply.message())
            .ok_or(FtpCommandError::InvalidReplySyntax(FtpCommand::PASV, 227))
    }

    pub(crate) async fn request_eprt(&mut self, local: SocketAddr) -> Result<(), FtpCommandError> {
        let line = match local {
            SocketAddr::V4(v4) => format!("EPRT |1|{}|{}|", v4.ip(), v4.port()),
            SocketAddr::V6(v6) => format!("EPRT |2|{}|{}|", v6.ip(), v6.port()),
        };
        let reply = self.exchange(FtpCommand::EPRT, &line).await?;
        if matches!(reply.category(), FtpReplyCategory::PositiveCompletion) {
            Ok(())
        } else {
            Err(FtpCommandError::from_negative_reply(
                FtpCommand::EPRT,
                reply.code(),
            ))
        }
    }

    pub(crate) async fn request_port(
        &mut self,
        local: SocketAddrV4,
    ) -> Result<(), FtpCommandError> {
        let ip = local.ip().octets();
        let port = local.port();
        let line = format!(
            "PORT {},{},{},{},{},{}",
            ip[0],
            ip[1],
            ip[2],
            ip[3],
            port >> 8,
            port & 0xff
        );
        let reply = self.exchange(FtpCommand::PORT, &line).await?;
        if matches!(reply.category(), FtpReplyCategory::PositiveCompletion) {
            Ok(())
        } else {
            Err(FtpCommandError::from_negative_reply(
                FtpCommand::PORT,
                reply.code(),
            ))
        }
    }

    pub(crate) async fn start_transfer(
        &mut self,
        command: &FtpTransferCommand,
    ) -> Result<FtpTransferStart, FtpCommandError> {
        let reply = self
            .exchange(command.command(), &command.command_line())
            .await?;
        match reply.category() {
            FtpReplyCategory::PositivePreliminary => Ok(FtpTransferStart::Proceed(reply)),
            _ => {
                if command.is_nlst()
                    && reply.code() == 550
                    && reply.message().trim() == "No files found."
                {
                    // empty directory quirk: no data and no end reply follow
                    Ok(FtpTransferStart::EmptyDirectory)
                } else {
                    Ok(FtpTransferStart::Rejected(reply))
                }
            }
        }
    }

    pub(crate) fn classify_transfer_end(
        cmd: FtpCommand,
        reply: &FtpReply,
    ) -> Result<(), FtpTransferServerError> {
        match reply.code() {
            226 | 250 => Ok(()),
            110 => Err(FtpTransferServerError::RestartNeeded),
            425 => Err(FtpTransferServerError::DataTransferNotEstablished),
            426 => Err(FtpTransferServerError::DataTransferLost),
            450 | 451 => Err(FtpTransferServerError::ServerFailed),
            452 | 552 => Err(FtpTransferServerError::ExceededStorageAllocation),
            551 => Err(FtpTransferServerError::PageTypeUnknown),
            code => Err(FtpTransferServerError::UnexpectedEndReplyCode(cmd, code)),
        }
    }

    pub(crate) async fn wait_transfer_end(
        &mut self,
        cmd: FtpCommand,
    ) -> Result<(), FtpTransferServerError> {
        let reply = self.read_reply().await?;
        Self::classify_transfer_end(cmd, &reply)
    }
}
