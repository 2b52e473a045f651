/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

use super::command::FtpCommandError;
use super::transfer::{FtpLineDataReadError, FtpTransferServerError, FtpTransferSetupError};
use crate::error::FtpReplyError;

#[derive(Debug)]
pub(crate) enum FtpFilePreTransferStatus {
    Proceed,
    Invalid,
}

#[derive(Debug, Error)]
pub enum FtpFileStatError {
    #[error("raw command error: {0}")]
    RawCommandError(FtpCommandError),
    #[error("service not available")]
    ServiceNotAvailable,
    #[error("feature unavailable")]
    FeatUnavailable,
    #[error("file unavailable")]
    FileUnavailable,
}

impl From<FtpCommandError> for FtpFileStatError {
    fn from(e: FtpCommandError) -> Self {
        match e {
            FtpCommandError::ServiceNotAvailable => FtpFileStatError::ServiceNotAvailable,
            _ => FtpFileStatError::RawCommandError(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum FtpFileRetrieveStartError {
    #[error("invalid file path")]
    InvalidFilePath,
    #[error("data transfer setup error: {0}")]
    TransferSetupFailed(FtpTransferSetupError),
    #[error("command error: {0}")]
    CommandError(FtpCommandError),
    #[error("service not available")]
    ServiceNotAvailable,
    #[error("file unavailable")]
    FileUnavailable,
}

impl From<FtpCommandError> for FtpFileRetrieveStartError {
    fn from(e: FtpCommandError) -> Self {
        match e {
            FtpCommandError::ServiceNotAvailable => FtpFileRetrieveStartError::ServiceNotAvailable,
            _ => FtpFileRetrieveStartError::CommandError(e),
        }
    }
}

impl From<FtpTransferSetupError> for FtpFileRetrieveStartError {
    fn from(e: FtpTransferSetupError) -> Self {
        match e {
            FtpTransferSetupError::ServiceNotAvailable => {
                FtpFileRetrieveStartError::ServiceNotAvailable
            }
            FtpTransferSetupError::FileUnavailable => FtpFileRetrieveStartError::FileUnavailable,
            _ => FtpFileRetrieveStartError::TransferSetupFailed(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum FtpFileStoreStartError {
    #[error("invalid file path")]
    InvalidFilePath,
    #[error("data transfer setup error: {0}")]
    TransferSetupFailed(FtpTransferSetupError),
    #[error("command error: {0}")]
    CommandError(FtpCommandError),
    #[error("service not available")]
    ServiceNotAvailable,
    #[error("file unavailable")]
    FileUnavailable,
}

impl From<FtpCommandError> for FtpFileStoreStartError {
    fn from(e: FtpCommandError) -> Self {
        match e {
            FtpCommandError::ServiceNotAvailable => FtpFileStoreStartError::ServiceNotAvailable,
            _ => FtpFileStoreStartError::CommandError(e),
        }
    }
}

impl From<FtpTransferSetupError> for FtpFileStoreStartError {
    fn from(e: FtpTransferSetupError) -> Self {
        match e {
            FtpTransferSetupError::ServiceNotAvailable => {
                FtpFileStoreStartError::ServiceNotAvailable
            }
            FtpTransferSetupError::FileUnavailable => FtpFileStoreStartError::FileUnavailable,
            _ => FtpFileStoreStartError::TransferSetupFailed(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum FtpFileListError {
    #[error("start failed: {0}")]
    StartFailed(FtpFileRetrieveStartError),
    #[error("server reported error: {0}")]
    ServerReportedError(#[from] FtpTransferServerError),
    #[error("timeout to wait end reply")]
    TimeoutToWaitEndReply,
    #[error("timeout to wait data eof")]
    TimeoutToWaitDataEof,
    #[error("data read failed: {0}")]
    DataReadFailed(#[from] FtpLineDataReadError),
}

impl From<FtpFileRetrieveStartError> for FtpFileListError {
    fn from(e: FtpFileRetrieveStartError) -> Self {
        FtpFileListError::StartFailed(e)
    }
}

#[derive(Debug, Error)]
pub enum FtpFileRetrieveError {
    #[error("start failed: {0}")]
    StartFailed(FtpFileRetrieveStartError),
    #[error("server reported error: {0}")]
    ServerReportedError(FtpTransferServerError),
    #[error("timeout to wait end reply")]
    TimeoutToWaitEndReply,
    #[error("control read error: {0}")]
    ControlReadError(#[from] FtpReplyError),
    #[error("data read failed: {0:?}")]
    DataReadFailed(io::Error),
    #[error("local io failed: {0:?}")]
    LocalIoFailed(io::Error),
    #[error("canceled")]
    Canceled,
}

impl From<FtpFileRetrieveStartError> for FtpFileRetrieveError {
    fn from(e: FtpFileRetrieveStartError) -> Self {
        FtpFileRetrieveError::StartFailed(e)
    }
}

impl From<FtpTransferServerError> for FtpFileRetrieveError {
    fn from(e: FtpTransferServerError) -> Self {
        if let FtpTransferServerError::RecvFailed(e) = e {
            FtpFileRetrieveError::ControlReadError(e)
        } else {
            FtpFileRetrieveError::ServerReportedError(e)
        }
    }
}

#[derive(Debug, Error)]
pub enum FtpFileStoreError {
    #[error("start failed: {0}")]
    StartFailed(FtpFileStoreStartError),
    #[error("server reported error: {0}")]
    ServerReportedError(FtpTransferServerError),
    #[error("timeout to wait end reply")]
    TimeoutToWaitEndReply,
    #[error("control read error: {0}")]
    ControlReadError(#[from] FtpReplyError),
    #[error("data write failed: {0:?}")]
    DataWriteFailed(io::Error),
    #[error("local io failed: {0:?}")]
    LocalIoFailed(io::Error),
    #[error("canceled")]
    Canceled,
}

impl From<FtpFileStoreStartError> for FtpFileStoreError {
    fn from(e: FtpFileStoreStartError) -> Self {
        FtpFileStoreError::StartFailed(e)
    }
}

impl From<FtpTransferServerError> for FtpFileStoreError {
    fn from(e: FtpTransferServerError) -> Self {
        if let FtpTransferServerError::RecvFailed(e) = e {
            FtpFileStoreError::ControlReadError(e)
        } else {
            FtpFileStoreError::ServerReportedError(e)
        }
    }
}
