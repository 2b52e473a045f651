/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod client;
mod config;
mod connection;
mod control;
mod debug;
mod error;
mod feature;
mod handler;
mod session;
mod transfer;

pub use client::FtpClient;
pub use config::{FtpClientConfig, FtpControlConfig, FtpDataChannelConfig, FtpTransferConfig};
pub use connection::{DirectFtpConnectionProvider, FtpConnectionProvider};
pub use control::{FtpCommand, FtpReply, FtpReplyCategory};
pub use debug::{FTP_DEBUG_LOG_LEVEL, FTP_DEBUG_LOG_TARGET};
pub use error::{
    FtpCommandError, FtpConnectError, FtpFileListError, FtpFileRetrieveError,
    FtpFileRetrieveStartError, FtpFileStatError, FtpFileStoreError, FtpFileStoreStartError,
    FtpLineDataReadError, FtpReplyError, FtpSessionOpenError, FtpTransferServerError,
    FtpTransferSetupError,
};
pub use handler::{FtpGenericServerHandler, FtpServerHandler, FtpZosServerHandler};
pub use transfer::{
    FtpDataChannel, FtpDataChannelMode, FtpLineDataReceiver, FtpTransferOptions,
    FtpTransferOutcome, FtpTransferType,
};

pub use g3_types::auth::{Password, Username};
pub use g3_types::net::{Host, UpstreamAddr};
pub use tokio_util::sync::CancellationToken;

use control::FtpControlChannel;
use feature::FtpServerFeature;
use session::FtpSessionState;
