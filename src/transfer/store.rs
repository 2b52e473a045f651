/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::path::Path;
use std::time::Instant;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite};

use super::retrieve::is_resumable_io_error;
use super::{
    transfer_chunk_size, FtpDataChannel, FtpTransferCommand, FtpTransferOptions,
    FtpTransferOutcome, RatePacer,
};
use crate::control::FtpCommand;
use crate::error::{FtpFileStoreError, FtpFileStoreStartError, FtpTransferSetupError};
use crate::log_msg;
use crate::{FtpClient, FtpConnectionProvider};

/// Local byte source of an upload. Only the file flavor can be wound
/// back for a resume.
enum StoreSource<'a, R: AsyncRead + Unpin + ?Sized> {
    Reader(&'a mut R),
    File(File),
}

impl<'a, R> StoreSource<'a, R>
where
    R: AsyncRead + Unpin + ?Sized,
{
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StoreSource::Reader(reader) => reader.read(buf).await,
            StoreSource::File(file) => file.read(buf).await,
        }
    }

    async fn rewind_to(&mut self, offset: u64) -> io::Result<bool> {
        match self {
            StoreSource::Reader(_) => Ok(false),
            StoreSource::File(file) => {
                file.seek(io::SeekFrom::Start(offset)).await?;
                Ok(true)
            }
        }
    }
}

impl<CP, S, E, UD> FtpClient<CP, S, E, UD>
where
    CP: FtpConnectionProvider<S, E, UD>,
    S: AsyncRead + AsyncWrite + Unpin,
    E: std::error::Error,
{
    /// Open the data connection of a `STOR` and hand the raw stream to
    /// the caller.
    pub async fn store_file_start(
        &mut self,
        path: &str,
        user_data: &UD,
    ) -> Result<FtpDataChannel<S>, FtpFileStoreStartError> {
        if path.trim().is_empty() {
            return Err(FtpFileStoreStartError::InvalidFilePath);
        }
        self.ensure_connected()
            .map_err(FtpFileStoreStartError::from)?;
        self.use_binary_transfer().await?;
        let channel = self
            .open_data_channel(
                &FtpTransferCommand::Store(path.to_string()),
                0,
                None,
                user_data,
            )
            .await?;
        Ok(channel)
    }

    pub async fn wait_store_end_reply(&mut self) -> Result<(), FtpFileStoreError> {
        match tokio::time::timeout(
            self.config.transfer.end_wait_timeout,
            self.control.wait_transfer_end(FtpCommand::STOR),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(FtpFileStoreError::TimeoutToWaitEndReply),
        }
    }

    /// Upload from a reader with `STOR`. Transport faults propagate, a
    /// plain reader cannot be wound back for a resume.
    pub async fn store_file<R>(
        &mut self,
        path: &str,
        source: &mut R,
        opts: &FtpTransferOptions,
        progress: Option<&mut (dyn FnMut(u64, Option<u64>) + Send)>,
        user_data: &UD,
    ) -> Result<FtpTransferOutcome, FtpFileStoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut source = StoreSource::Reader(source);
        self.store_file_inner(path, &mut source, false, opts, progress, user_data)
            .await
    }

    /// Upload a local file with `STOR`, resuming over transport faults
    /// from the size the server reports.
    pub async fn store_file_from_path(
        &mut self,
        path: &str,
        local_path: &Path,
        opts: &FtpTransferOptions,
        progress: Option<&mut (dyn FnMut(u64, Option<u64>) + Send)>,
        user_data: &UD,
    ) -> Result<FtpTransferOutcome, FtpFileStoreError> {
        let mut file = File::open(local_path)
            .await
            .map_err(FtpFileStoreError::LocalIoFailed)?;
        if opts.offset > 0 {
            file.seek(io::SeekFrom::Start(opts.offset))
                .await
                .map_err(FtpFileStoreError::LocalIoFailed)?;
        }
        let mut source: StoreSource<'_, File> = StoreSource::File(file);
        self.store_file_inner(path, &mut source, false, opts, progress, user_data)
            .await
    }

    /// Upload from a reader with `APPE`: the server appends, so neither
    /// REST nor resume applies.
    pub async fn append_file<R>(
        &mut self,
        path: &str,
        source: &mut R,
        opts: &FtpTransferOptions,
        progress: Option<&mut (dyn FnMut(u64, Option<u64>) + Send)>,
        user_data: &UD,
    ) -> Result<FtpTransferOutcome, FtpFileStoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut source = StoreSource::Reader(source);
        self.store_file_inner(path, &mut source, true, opts, progress, user_data)
            .await
    }

    async fn store_file_inner<R>(
        &mut self,
        path: &str,
        source: &mut StoreSource<'_, R>,
        append: bool,
        opts: &FtpTransferOptions,
        mut progress: Option<&mut (dyn FnMut(u64, Option<u64>) + Send)>,
        user_data: &UD,
    ) -> Result<FtpTransferOutcome, FtpFileStoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if path.trim().is_empty() {
            return Err(FtpFileStoreStartError::InvalidFilePath.into());
        }
        self.ensure_connected()
            .map_err(|e| FtpFileStoreError::StartFailed(e.into()))?;
        self.set_transfer_type(opts.transfer_type)
            .await
            .map_err(|e| FtpFileStoreError::StartFailed(e.into()))?;

        let start_offset = if append { 0 } else { opts.offset };
        let mut offset = start_offset;
        let mut pending_noops = 0usize;
        let mut resume_attempts = 0usize;

        let chunk_size = transfer_chunk_size(
            self.config.transfer.chunk_size,
            self.config.transfer.rate_limit,
            self.config.transfer.rate_resolution,
        );
        let mut buf = vec![0u8; chunk_size];

        loop {
            if opts.cancel.is_cancelled() {
                return Err(FtpFileStoreError::Canceled);
            }
            let command = if append {
                FtpTransferCommand::Append(path.to_string())
            } else {
                FtpTransferCommand::Store(path.to_string())
            };
            let mut channel = match self
                .open_data_channel(&command, offset, None, user_data)
                .await
            {
                Ok(channel) => channel,
                Err(FtpTransferSetupError::FileUnavailable) => {
                    return Ok(FtpTransferOutcome::FileUnavailable);
                }
                Err(e) => return Err(FtpFileStoreError::StartFailed(e.into())),
            };

            let mut pacer = (self.config.transfer.rate_limit > 0).then(|| {
                RatePacer::new(
                    self.config.transfer.rate_limit,
                    self.config.transfer.rate_resolution,
                )
            });

            let io_result: io::Result<()> = loop {
                let read = tokio::select! {
                    biased;
                    _ = opts.cancel.cancelled() => break Err(io::Error::other("canceled")),
                    r = source.read_chunk(&mut buf) => r,
                };
                let nr = match read {
                    Ok(n) => n,
                    Err(e) => {
                        drop(channel);
                        let _ = self.reconcile_transfer_end(&mut pending_noops, true).await;
                        return Err(FtpFileStoreError::LocalIoFailed(e));
                    }
                };
                if nr == 0 {
                    break channel.finish_write().await;
                }
                if let Err(e) = channel
                    .write_chunk(&buf[..nr], self.config.data.read_timeout)
                    .await
                {
                    break Err(e);
                }
                offset += nr as u64;
                if let Some(observer) = progress.as_mut() {
                    observer(offset - start_offset, None);
                }
                self.maybe_inject_noop(&mut pending_noops).await;
                if let Some(pacer) = pacer.as_mut() {
                    if let Some(deficit) = pacer.on_bytes(nr as u64, Instant::now()) {
                        tokio::select! {
                            biased;
                            _ = opts.cancel.cancelled() => {}
                            _ = tokio::time::sleep(deficit) => {}
                        }
                    }
                }
            };

            match io_result {
                Ok(_) => {
                    let expects_end = channel.expects_end_reply();
                    drop(channel);
                    let bytes = offset - start_offset;
                    if !expects_end {
                        return Ok(FtpTransferOutcome::Completed { bytes });
                    }
                    let final_reply =
                        self.reconcile_transfer_end(&mut pending_noops, false).await?;
                    return Ok(self.end_reply_outcome(final_reply, bytes));
                }
                Err(e) => {
                    drop(channel);
                    let _ = self.reconcile_transfer_end(&mut pending_noops, true).await;
                    if opts.cancel.is_cancelled() {
                        return Err(FtpFileStoreError::Canceled);
                    }
                    if append
                        || !is_resumable_io_error(&e)
                        || resume_attempts >= self.config.transfer.max_resume_attempts
                        || !self.server_feature.support_rest_stream()
                        || !self.server_feature.support_file_size()
                    {
                        return Err(FtpFileStoreError::DataWriteFailed(e));
                    }
                    // only the server knows how much of the upload it kept
                    let Some(server_size) = self.control.request_size(path).await.ok().flatten()
                    else {
                        return Err(FtpFileStoreError::DataWriteFailed(e));
                    };
                    match source.rewind_to(server_size).await {
                        Ok(true) => {
                            offset = server_size;
                            resume_attempts += 1;
                            log_msg!(
                                "resuming store of {} at offset {}, attempt {}",
                                path,
                                offset,
                                resume_attempts
                            );
                        }
                        Ok(false) => return Err(FtpFileStoreError::DataWriteFailed(e)),
                        Err(le) => return Err(FtpFileStoreError::LocalIoFailed(le)),
                    }
                }
            }
        }
    }
}
