/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

use super::FtpReplyError;
use crate::control::FtpCommand;

#[derive(Debug, Error)]
pub enum FtpCommandError {
    #[error("no control connection")]
    NotConnected,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("unable to send command: {0:?}")]
    SendFailed(io::Error),
    #[error("unable to recv reply: {0}")]
    RecvFailed(#[from] FtpReplyError),
    #[error("service not available")]
    ServiceNotAvailable,
    #[error("{0} syntax rejected by server")]
    RejectedCommandSyntax(FtpCommand),
    #[error("command {0} is not implemented by server")]
    CommandNotImplemented(FtpCommand),
    #[error("parameter is not implemented for command {0}")]
    ParameterNotImplemented(FtpCommand),
    #[error("bad sequence of command {0}")]
    BadCommandSequence(FtpCommand),
    #[error("unexpected reply code ({0} -> {1})")]
    UnexpectedReplyCode(FtpCommand, u16),
    #[error("invalid reply {1} syntax to command {0}")]
    InvalidReplySyntax(FtpCommand, u16),
    #[error("pre transfer failed for command {0} with reply code {1}")]
    PreTransferFailed(FtpCommand, u16),
}

impl FtpCommandError {
    pub(crate) fn from_negative_reply(cmd: FtpCommand, code: u16) -> Self {
        match code {
            500 | 502 => FtpCommandError::CommandNotImplemented(cmd),
            501 => FtpCommandError::RejectedCommandSyntax(cmd),
            503 => FtpCommandError::BadCommandSequence(cmd),
            504 => FtpCommandError::ParameterNotImplemented(cmd),
            _ => FtpCommandError::UnexpectedReplyCode(cmd, code),
        }
    }

    /// the server answered, with a 4xx or 5xx reply
    pub(crate) fn is_negative_reply(&self) -> bool {
        match self {
            FtpCommandError::RejectedCommandSyntax(_)
            | FtpCommandError::CommandNotImplemented(_)
            | FtpCommandError::ParameterNotImplemented(_)
            | FtpCommandError::BadCommandSequence(_) => true,
            FtpCommandError::UnexpectedReplyCode(_, code) => (400..600).contains(code),
            _ => false,
        }
    }

    /// the server answered, with a 5xx reply
    pub(crate) fn is_permanent_negative_reply(&self) -> bool {
        match self {
            FtpCommandError::RejectedCommandSyntax(_)
            | FtpCommandError::CommandNotImplemented(_)
            | FtpCommandError::ParameterNotImplemented(_)
            | FtpCommandError::BadCommandSequence(_) => true,
            FtpCommandError::UnexpectedReplyCode(_, code) => (500..600).contains(code),
            _ => false,
        }
    }
}
