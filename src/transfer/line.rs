/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use g3_io_ext::LimitedBufReadExt;

use super::{FtpDataChannel, FtpTransferCommand};
use crate::config::FtpTransferConfig;
use crate::control::FtpCommand;
use crate::error::{FtpFileListError, FtpFileRetrieveStartError, FtpLineDataReadError};
use crate::{FtpClient, FtpConnectionProvider};

/// Sink for the lines of a LIST or NLST data stream.
#[async_trait]
pub trait FtpLineDataReceiver: Send {
    async fn recv_line(&mut self, line: &str);

    /// checked after each line, a true stops the transfer
    fn should_return_early(&self) -> bool {
        false
    }
}

#[async_trait]
impl FtpLineDataReceiver for Vec<String> {
    async fn recv_line(&mut self, line: &str) {
        self.push(line.trim_end().to_string());
    }
}

pub(crate) struct FtpLineDataTransfer<S> {
    stream: BufReader<S>,
    max_line_len: usize,
    max_entries: usize,
}

impl<S> FtpLineDataTransfer<S>
where
    S: AsyncRead + Unpin,
{
    pub(crate) fn new(stream: S, config: &FtpTransferConfig) -> Self {
        FtpLineDataTransfer {
            stream: BufReader::new(stream),
            max_line_len: config.list_max_line_len,
            max_entries: config.list_max_entries,
        }
    }

    pub(crate) async fn read_to_end<R>(mut self, receiver: &mut R) -> Result<(), FtpLineDataReadError>
    where
        R: FtpLineDataReceiver,
    {
        let mut buf = Vec::<u8>::with_capacity(self.max_line_len);
        for _entry in 0..self.max_entries {
            buf.clear();
            let (found, len) = self
                .stream
                .limited_read_until(b'\n', self.max_line_len, &mut buf)
                .await?;
            if len == 0 {
                return Ok(());
            }
            if !found && len >= self.max_line_len {
                return Err(FtpLineDataReadError::LineTooLong(len));
            }
            let line =
                std::str::from_utf8(&buf).map_err(|_| FtpLineDataReadError::UnsupportedEncoding)?;
            receiver.recv_line(line).await;
            if receiver.should_return_early() {
                return Err(FtpLineDataReadError::AbortedByCallback);
            }
            if !found {
                // final line without a terminator
                return Ok(());
            }
        }
        Err(FtpLineDataReadError::TooManyLines)
    }
}

impl<CP, S, E, UD> FtpClient<CP, S, E, UD>
where
    CP: FtpConnectionProvider<S, E, UD>,
    S: AsyncRead + AsyncWrite + Unpin,
    E: std::error::Error,
{
    /// Open the data connection of a `LIST`.
    pub async fn list_directory_start(
        &mut self,
        path: Option<&str>,
        user_data: &UD,
    ) -> Result<FtpDataChannel<S>, FtpFileRetrieveStartError> {
        self.ensure_connected()
            .map_err(FtpFileRetrieveStartError::from)?;
        self.use_ascii_transfer().await?;
        let channel = self
            .open_data_channel(
                &FtpTransferCommand::List(path.map(str::to_string)),
                0,
                None,
                user_data,
            )
            .await?;
        Ok(channel)
    }

    /// Stream the listing lines into `receiver`, racing the data EOF
    /// against the end reply on the control channel.
    pub async fn list_directory_receive<R>(
        &mut self,
        channel: FtpDataChannel<S>,
        receiver: &mut R,
    ) -> Result<(), FtpFileListError>
    where
        R: FtpLineDataReceiver,
    {
        self.finish_line_transfer(channel, FtpCommand::LIST, receiver)
            .await
    }

    /// `NLST`, collecting the bare names. An empty directory comes back
    /// as an empty list, even on servers that answer it with an error
    /// reply instead of an empty data stream.
    pub async fn list_directory_names(
        &mut self,
        path: Option<&str>,
        user_data: &UD,
    ) -> Result<Vec<String>, FtpFileListError> {
        self.ensure_connected()
            .map_err(|e| FtpFileListError::StartFailed(e.into()))?;
        self.use_ascii_transfer()
            .await
            .map_err(|e| FtpFileListError::StartFailed(e.into()))?;
        let channel = self
            .open_data_channel(
                &FtpTransferCommand::Nlst(path.map(str::to_string)),
                0,
                None,
                user_data,
            )
            .await
            .map_err(|e| FtpFileListError::StartFailed(e.into()))?;
        let mut lines = Vec::new();
        self.finish_line_transfer(channel, FtpCommand::NLST, &mut lines)
            .await?;
        Ok(lines)
    }

    async fn finish_line_transfer<R>(
        &mut self,
        channel: FtpDataChannel<S>,
        cmd: FtpCommand,
        receiver: &mut R,
    ) -> Result<(), FtpFileListError>
    where
        R: FtpLineDataReceiver,
    {
        let expects_end = channel.expects_end_reply();
        let Some(stream) = channel.into_stream() else {
            // the NLST empty-directory quirk carries no stream at all
            return Ok(());
        };
        if !expects_end {
            return Ok(());
        }
        let transfer_config = self.config.transfer;

        tokio::pin! {
            let transfer_fut =
                FtpLineDataTransfer::new(stream, &transfer_config).read_to_end(receiver);
        }

        tokio::select! {
            biased;

            data = &mut transfer_fut => {
                tokio::time::timeout(
                    transfer_config.end_wait_timeout,
                    self.control.wait_transfer_end(cmd),
                )
                .await
                .map_err(|_| FtpFileListError::TimeoutToWaitEndReply)??;
                data?;
            }
            r = self.control.wait_transfer_end(cmd) => {
                if let Err(e) = r {
                    return Err(FtpFileListError::ServerReportedError(e));
                }
                tokio::time::timeout(transfer_config.end_wait_timeout, transfer_fut)
                    .await
                    .map_err(|_| FtpFileListError::TimeoutToWaitDataEof)??;
            }
            _ = tokio::time::sleep(transfer_config.list_all_timeout) => {
                return Err(FtpFileListError::TimeoutToWaitDataEof);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_lines() {
        let data: &[u8] = b"file-a\r\nfile-b\r\nfile-c";
        let mut lines = Vec::new();
        FtpLineDataTransfer::new(data, &FtpTransferConfig::default())
            .read_to_end(&mut lines)
            .await
            .unwrap();
        assert_eq!(lines, ["file-a", "file-b", "file-c"]);
    }

    #[tokio::test]
    async fn empty_stream() {
        let data: &[u8] = b"";
        let mut lines = Vec::new();
        FtpLineDataTransfer::new(data, &FtpTransferConfig::default())
            .read_to_end(&mut lines)
            .await
            .unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn too_many_entries() {
        let data: Vec<u8> = b"x\r\n".repeat(8);
        let mut config = FtpTransferConfig::default();
        config.list_max_entries = 4;
        let mut lines = Vec::new();
        let r = FtpLineDataTransfer::new(data.as_slice(), &config)
            .read_to_end(&mut lines)
            .await;
        assert!(matches!(r, Err(FtpLineDataReadError::TooManyLines)));
    }
}
