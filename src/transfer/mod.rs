/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::control::{FtpCommand, FtpReply};

pub(crate) mod endpoint;
mod line;
mod retrieve;
mod setup;
mod store;

pub use line::FtpLineDataReceiver;
pub(crate) use line::FtpLineDataTransfer;

/// How the data connection endpoint is negotiated.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FtpDataChannelMode {
    /// EPSV, with fallback to PASV on IPv4
    #[default]
    AutoPassive,
    Epsv,
    Pasv,
    /// PASV, but always connect to the control channel host
    PasvEx,
    /// EPRT, with fallback to PORT on IPv4
    AutoActive,
    Eprt,
    Port,
}

impl FtpDataChannelMode {
    pub(crate) fn is_active(&self) -> bool {
        matches!(
            self,
            FtpDataChannelMode::AutoActive | FtpDataChannelMode::Eprt | FtpDataChannelMode::Port
        )
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FtpTransferType {
    Ascii,
    #[default]
    Image,
}

impl FtpTransferType {
    pub(crate) fn command_argument(&self) -> &'static str {
        match self {
            FtpTransferType::Ascii => "A",
            FtpTransferType::Image => "I",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum FtpTransferCommand {
    Retrieve(String),
    Store(String),
    Append(String),
    List(Option<String>),
    Nlst(Option<String>),
}

impl FtpTransferCommand {
    pub(crate) fn command(&self) -> FtpCommand {
        match self {
            FtpTransferCommand::Retrieve(_) => FtpCommand::RETR,
            FtpTransferCommand::Store(_) => FtpCommand::STOR,
            FtpTransferCommand::Append(_) => FtpCommand::APPE,
            FtpTransferCommand::List(_) => FtpCommand::LIST,
            FtpTransferCommand::Nlst(_) => FtpCommand::NLST,
        }
    }

    pub(crate) fn command_line(&self) -> String {
        match self {
            FtpTransferCommand::Retrieve(path) => format!("RETR {path}"),
            FtpTransferCommand::Store(path) => format!("STOR {path}"),
            FtpTransferCommand::Append(path) => format!("APPE {path}"),
            FtpTransferCommand::List(None) => "LIST".to_string(),
            FtpTransferCommand::List(Some(path)) => format!("LIST {path}"),
            FtpTransferCommand::Nlst(None) => "NLST".to_string(),
            FtpTransferCommand::Nlst(Some(path)) => format!("NLST {path}"),
        }
    }

    pub(crate) fn is_nlst(&self) -> bool {
        matches!(self, FtpTransferCommand::Nlst(_))
    }
}

/// Per-call transfer parameters.
#[derive(Clone, Default)]
pub struct FtpTransferOptions {
    /// restart offset, zero means from the beginning
    pub offset: u64,
    /// skips the server side SIZE lookup when set
    pub known_size: Option<u64>,
    pub transfer_type: FtpTransferType,
    pub cancel: CancellationToken,
}

/// What a finished transfer amounted to. Server-side failures are an
/// outcome, not an error: the session stays usable.
#[derive(Debug)]
pub enum FtpTransferOutcome {
    Completed { bytes: u64 },
    FileUnavailable,
    Failed { bytes: u64, reply: FtpReply },
}

impl FtpTransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FtpTransferOutcome::Completed { .. })
    }

    pub fn bytes(&self) -> u64 {
        match self {
            FtpTransferOutcome::Completed { bytes } => *bytes,
            FtpTransferOutcome::FileUnavailable => 0,
            FtpTransferOutcome::Failed { bytes, .. } => *bytes,
        }
    }
}

/// The ephemeral data connection of one transfer.
///
/// It is born with the preliminary 1xx reply of its transfer command and
/// lives until the transfer ends. Whoever closes it has to read exactly
/// one end reply from the control channel, except for the NLST
/// empty-directory case which carries no stream at all.
pub struct FtpDataChannel<S> {
    stream: Option<S>,
    preliminary: Option<FtpReply>,
    read_bytes: u64,
    write_bytes: u64,
    expect_end_reply: bool,
}

impl<S> FtpDataChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(stream: S, preliminary: FtpReply) -> Self {
        FtpDataChannel {
            stream: Some(stream),
            preliminary: Some(preliminary),
            read_bytes: 0,
            write_bytes: 0,
            expect_end_reply: true,
        }
    }

    pub(crate) fn empty() -> Self {
        FtpDataChannel {
            stream: None,
            preliminary: None,
            read_bytes: 0,
            write_bytes: 0,
            expect_end_reply: false,
        }
    }

    pub fn preliminary_reply(&self) -> Option<&FtpReply> {
        self.preliminary.as_ref()
    }

    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.read_bytes
    }

    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.write_bytes
    }

    pub(crate) fn expects_end_reply(&self) -> bool {
        self.expect_end_reply
    }

    pub(crate) async fn read_chunk(
        &mut self,
        buf: &mut [u8],
        read_timeout: Duration,
    ) -> io::Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };
        match tokio::time::timeout(read_timeout, stream.read(buf)).await {
            Ok(Ok(n)) => {
                self.read_bytes += n as u64;
                Ok(n)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "data read timed out",
            )),
        }
    }

    pub(crate) async fn write_chunk(
        &mut self,
        buf: &[u8],
        write_timeout: Duration,
    ) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no data stream",
            ));
        };
        match tokio::time::timeout(write_timeout, stream.write_all(buf)).await {
            Ok(Ok(_)) => {
                self.write_bytes += buf.len() as u64;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "data write timed out",
            )),
        }
    }

    /// signal EOF to the server, uploads need this before the end reply
    pub(crate) async fn finish_write(&mut self) -> io::Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    pub(crate) fn into_stream(mut self) -> Option<S> {
        self.stream.take()
    }
}

pub(crate) fn transfer_chunk_size(
    chunk_size: usize,
    rate_limit: u64,
    resolution: Duration,
) -> usize {
    if rate_limit == 0 {
        return chunk_size.max(1);
    }
    let window = rate_limit as u128 * resolution.as_millis() / 1000;
    (window as usize).clamp(1, chunk_size.max(1))
}

/// Paces a chunk loop to a bytes-per-second target.
pub(crate) struct RatePacer {
    rate_limit: u64,
    resolution: Duration,
    window_start: Instant,
    window_bytes: u64,
}

impl RatePacer {
    pub(crate) fn new(rate_limit: u64, resolution: Duration) -> Self {
        RatePacer {
            rate_limit,
            resolution,
            window_start: Instant::now(),
            window_bytes: 0,
        }
    }

    /// Account for `n` transferred bytes, returning the deficit to sleep
    /// before the next chunk. Accounting resets when the caller drifted
    /// past the expected elapsed time by more than the resolution.
    pub(crate) fn on_bytes(&mut self, n: u64, now: Instant) -> Option<Duration> {
        self.window_bytes += n;
        let expected =
            Duration::from_secs_f64(self.window_bytes as f64 / self.rate_limit as f64);
        let elapsed = now.saturating_duration_since(self.window_start);
        if expected > elapsed {
            Some(expected - elapsed)
        } else {
            if elapsed > expected + self.resolution {
                self.window_start = now;
                self.window_bytes = 0;
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_unlimited() {
        assert_eq!(transfer_chunk_size(65536, 0, Duration::from_millis(200)), 65536);
    }

    #[test]
    fn chunk_size_rate_limited() {
        // 10 KB/s at 200ms resolution gives 2 KB windows
        assert_eq!(
            transfer_chunk_size(65536, 10240, Duration::from_millis(200)),
            2048
        );
        // never larger than the configured chunk size
        assert_eq!(
            transfer_chunk_size(4096, 1 << 30, Duration::from_millis(200)),
            4096
        );
        // never zero
        assert_eq!(transfer_chunk_size(65536, 1, Duration::from_millis(200)), 1);
    }

    #[test]
    fn pacer_sleeps_when_ahead() {
        let mut pacer = RatePacer::new(1000, Duration::from_millis(200));
        let start = pacer.window_start;
        // 1000 bytes in zero elapsed time wants a full second of sleep
        let deficit = pacer.on_bytes(1000, start).unwrap();
        assert!(deficit >= Duration::from_millis(990));
    }

    #[test]
    fn pacer_resets_after_drift() {
        let mut pacer = RatePacer::new(1000, Duration::from_millis(200));
        let start = pacer.window_start;
        // 100 bytes expected to take 100ms, seen after 500ms: drifted
        assert!(pacer.on_bytes(100, start + Duration::from_millis(500)).is_none());
        assert_eq!(pacer.window_bytes, 0);
    }

    #[test]
    fn transfer_command_lines() {
        assert_eq!(
            FtpTransferCommand::Retrieve("a b.txt".to_string()).command_line(),
            "RETR a b.txt"
        );
        assert_eq!(FtpTransferCommand::Nlst(None).command_line(), "NLST");
        assert_eq!(
            FtpTransferCommand::List(Some("/pub".to_string())).command_line(),
            "LIST /pub"
        );
    }
}
