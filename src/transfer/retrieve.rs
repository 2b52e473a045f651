/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::path::Path;
use std::time::Instant;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use super::{
    transfer_chunk_size, FtpDataChannel, FtpTransferCommand, FtpTransferOptions,
    FtpTransferOutcome, FtpTransferType, RatePacer,
};
use crate::control::{FtpCommand, FtpReply, FtpReplyCategory};
use crate::error::{
    FtpFileRetrieveError, FtpFileRetrieveStartError, FtpReplyError, FtpTransferSetupError,
};
use crate::log_msg;
use crate::{FtpClient, FtpConnectionProvider};

/// Transport faults worth a REST + reopen instead of giving up.
pub(crate) fn is_resumable_io_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WriteZero
    )
}

/// Local byte sink of a download. The file flavor is opened on the
/// first non-empty chunk so that zero length downloads do not leave
/// files around unless explicitly asked for.
enum RetrieveSink<'a, W: AsyncWrite + Unpin + ?Sized> {
    Writer(&'a mut W),
    LazyFile {
        target: &'a Path,
        start_offset: u64,
        file: Option<File>,
    },
}

async fn open_sink_file(path: &Path, offset: u64) -> io::Result<File> {
    if offset > 0 {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)
            .await?;
        file.seek(io::SeekFrom::Start(offset)).await?;
        Ok(file)
    } else {
        File::create(path).await
    }
}

impl<'a, W> RetrieveSink<'a, W>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            RetrieveSink::Writer(writer) => writer.write_all(buf).await,
            RetrieveSink::LazyFile {
                target,
                start_offset,
                file,
            } => {
                if file.is_none() {
                    *file = Some(open_sink_file(target, *start_offset).await?);
                }
                let Some(file) = file.as_mut() else {
                    return Err(io::Error::other("sink file not open"));
                };
                file.write_all(buf).await
            }
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            RetrieveSink::Writer(writer) => writer.flush().await,
            RetrieveSink::LazyFile { file, .. } => match file.as_mut() {
                Some(file) => file.flush().await,
                None => Ok(()),
            },
        }
    }

    async fn ensure_created(&mut self) -> io::Result<()> {
        if let RetrieveSink::LazyFile {
            target,
            start_offset,
            file,
        } = self
        {
            if file.is_none() {
                *file = Some(open_sink_file(target, *start_offset).await?);
            }
        }
        Ok(())
    }
}

impl<CP, S, E, UD> FtpClient<CP, S, E, UD>
where
    CP: FtpConnectionProvider<S, E, UD>,
    S: AsyncRead + AsyncWrite + Unpin,
    E: std::error::Error,
{
    /// Open the data connection of a `RETR` and hand the raw stream to
    /// the caller, together with the size reported by the server.
    pub async fn retrieve_file_start(
        &mut self,
        path: &str,
        offset: Option<u64>,
        user_data: &UD,
    ) -> Result<(FtpDataChannel<S>, Option<u64>), FtpFileRetrieveStartError> {
        if path.trim().is_empty() {
            return Err(FtpFileRetrieveStartError::InvalidFilePath);
        }
        self.ensure_connected()
            .map_err(FtpFileRetrieveStartError::from)?;
        self.use_binary_transfer().await?;

        let file_transfer_size = if self.server_feature.support_file_size() {
            self.control.request_size(path).await?
        } else {
            None
        };

        let channel = self
            .open_data_channel(
                &FtpTransferCommand::Retrieve(path.to_string()),
                offset.unwrap_or(0),
                file_transfer_size,
                user_data,
            )
            .await?;
        Ok((channel, file_transfer_size))
    }

    pub async fn wait_retrieve_end_reply(&mut self) -> Result<(), FtpFileRetrieveError> {
        match tokio::time::timeout(
            self.config.transfer.end_wait_timeout,
            self.control.wait_transfer_end(FtpCommand::RETR),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(FtpFileRetrieveError::TimeoutToWaitEndReply),
        }
    }

    /// Download `path` into `sink`, resuming over transport faults.
    ///
    /// Server side failures come back as an [`FtpTransferOutcome`], the
    /// control session stays usable either way.
    pub async fn retrieve_file<W>(
        &mut self,
        path: &str,
        sink: &mut W,
        opts: &FtpTransferOptions,
        progress: Option<&mut (dyn FnMut(u64, Option<u64>) + Send)>,
        user_data: &UD,
    ) -> Result<FtpTransferOutcome, FtpFileRetrieveError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut sink = RetrieveSink::Writer(sink);
        self.retrieve_file_inner(path, &mut sink, opts, progress, user_data)
            .await
    }

    /// Like [`retrieve_file`](Self::retrieve_file), writing to a local
    /// file that is only created once data actually arrives.
    pub async fn retrieve_file_to_path(
        &mut self,
        path: &str,
        local_path: &Path,
        opts: &FtpTransferOptions,
        progress: Option<&mut (dyn FnMut(u64, Option<u64>) + Send)>,
        user_data: &UD,
    ) -> Result<FtpTransferOutcome, FtpFileRetrieveError> {
        let mut sink: RetrieveSink<'_, File> = RetrieveSink::LazyFile {
            target: local_path,
            start_offset: opts.offset,
            file: None,
        };
        let outcome = self
            .retrieve_file_inner(path, &mut sink, opts, progress, user_data)
            .await?;
        if let FtpTransferOutcome::Completed { bytes: 0 } = outcome {
            if self.config.transfer.download_zero_byte_files {
                sink.ensure_created()
                    .await
                    .map_err(FtpFileRetrieveError::LocalIoFailed)?;
            }
        }
        Ok(outcome)
    }

    async fn retrieve_file_inner<W>(
        &mut self,
        path: &str,
        sink: &mut RetrieveSink<'_, W>,
        opts: &FtpTransferOptions,
        mut progress: Option<&mut (dyn FnMut(u64, Option<u64>) + Send)>,
        user_data: &UD,
    ) -> Result<FtpTransferOutcome, FtpFileRetrieveError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if path.trim().is_empty() {
            return Err(FtpFileRetrieveStartError::InvalidFilePath.into());
        }
        self.ensure_connected()
            .map_err(|e| FtpFileRetrieveError::StartFailed(e.into()))?;
        self.set_transfer_type(opts.transfer_type)
            .await
            .map_err(|e| FtpFileRetrieveError::StartFailed(e.into()))?;

        let known_size = match opts.known_size {
            Some(size) => Some(size),
            None => {
                if self.server_feature.support_file_size() {
                    self.control.request_size(path).await.ok().flatten()
                } else {
                    None
                }
            }
        };

        // in ASCII mode the byte count on the wire differs from the
        // stored size, and some server families always require it
        let read_to_end = known_size.is_none()
            || matches!(opts.transfer_type, FtpTransferType::Ascii)
            || self.handler.always_read_to_end();

        let start_offset = opts.offset;
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
                return Err(FtpFileRetrieveError::Canceled);
            }
            let mut channel = match self
                .open_data_channel(
                    &FtpTransferCommand::Retrieve(path.to_string()),
                    offset,
                    known_size,
                    user_data,
                )
                .await
            {
                Ok(channel) => channel,
                Err(FtpTransferSetupError::FileUnavailable) => {
                    return Ok(FtpTransferOutcome::FileUnavailable);
                }
                Err(e) => return Err(FtpFileRetrieveError::StartFailed(e.into())),
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
                    r = channel.read_chunk(&mut buf, self.config.data.read_timeout) => r,
                };
                let nr = match read {
                    Ok(n) => n,
                    Err(e) => break Err(e),
                };
                if nr == 0 {
                    if read_to_end || known_size.map_or(true, |len| offset >= len) {
                        break Ok(());
                    }
                    break Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "data connection closed before the known file size",
                    ));
                }
                if let Err(e) = sink.write_all(&buf[..nr]).await {
                    drop(channel);
                    let _ = self.reconcile_transfer_end(&mut pending_noops, true).await;
                    return Err(FtpFileRetrieveError::LocalIoFailed(e));
                }
                offset += nr as u64;
                if let Some(observer) = progress.as_mut() {
                    observer(offset - start_offset, known_size);
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
                    sink.flush()
                        .await
                        .map_err(FtpFileRetrieveError::LocalIoFailed)?;
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
                        let _ = sink.flush().await;
                        return Err(FtpFileRetrieveError::Canceled);
                    }
                    if !is_resumable_io_error(&e)
                        || resume_attempts >= self.config.transfer.max_resume_attempts
                    {
                        return Err(FtpFileRetrieveError::DataReadFailed(e));
                    }
                    if offset > 0 && !self.server_feature.support_rest_stream() {
                        return Err(FtpFileRetrieveError::DataReadFailed(e));
                    }
                    resume_attempts += 1;
                    log_msg!(
                        "resuming retrieve of {} at offset {}, attempt {}",
                        path,
                        offset,
                        resume_attempts
                    );
                }
            }
        }
    }

    pub(crate) fn end_reply_outcome(
        &self,
        final_reply: Option<FtpReply>,
        bytes: u64,
    ) -> FtpTransferOutcome {
        match final_reply {
            // absorbed post-transfer silence counts as done
            None => FtpTransferOutcome::Completed { bytes },
            Some(reply) => match reply.category() {
                FtpReplyCategory::TransientNegative | FtpReplyCategory::PermanentNegative => {
                    if self.handler.is_file_missing_reply(&reply) {
                        FtpTransferOutcome::FileUnavailable
                    } else {
                        FtpTransferOutcome::Failed { bytes, reply }
                    }
                }
                _ => FtpTransferOutcome::Completed { bytes },
            },
        }
    }

    /// Inject a keep-alive NOOP when the control channel has been idle
    /// past the configured interval.
    pub(crate) async fn maybe_inject_noop(&mut self, pending_noops: &mut usize) {
        let interval = self.config.transfer.noop_interval;
        if interval.is_zero() {
            return;
        }
        let idle = self.control.control_idle_time().unwrap_or_default();
        if idle < interval {
            return;
        }
        match self.control.inject_noop().await {
            Ok(_) => *pending_noops += 1,
            Err(e) => log_msg!("failed to inject keep-alive: {}", e),
        }
    }

    /// Drain pending NOOP echoes, read the end reply of the finished
    /// transfer, then briefly drain stale data for late echoes. Timeouts
    /// and a closed control connection are absorbed: some servers close
    /// cleanly without a final reply.
    pub(crate) async fn reconcile_transfer_end(
        &mut self,
        pending_noops: &mut usize,
        best_effort: bool,
    ) -> Result<Option<FtpReply>, FtpReplyError> {
        let wait = self.config.transfer.end_wait_timeout;
        let mut final_reply = None;
        while *pending_noops > 0 {
            match self
                .control
                .read_reply_with_timeout("transfer-end", wait)
                .await
            {
                Ok(reply) => {
                    if reply.code() == 200 && reply.message().to_uppercase().contains("NOOP") {
                        *pending_noops -= 1;
                    } else {
                        final_reply = Some(reply);
                        break;
                    }
                }
                Err(e) if e.is_closed_or_timeout() => {
                    *pending_noops = 0;
                    break;
                }
                Err(e) => {
                    if best_effort {
                        return Ok(None);
                    }
                    return Err(e);
                }
            }
        }
        if final_reply.is_none() {
            match self
                .control
                .read_reply_with_timeout("transfer-end", wait)
                .await
            {
                Ok(reply) => final_reply = Some(reply),
                Err(e) if e.is_closed_or_timeout() => {}
                Err(e) => {
                    if best_effort {
                        return Ok(None);
                    }
                    return Err(e);
                }
            }
        }
        let _ = self
            .control
            .drain_stale_data(self.config.control.stale_data_timeout)
            .await;
        Ok(final_reply)
    }
}
