/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;

use super::FtpCommandError;

#[derive(Debug)]
pub(crate) enum FtpAuthStatus {
    LoggedIn,
    NeedPassword,
    NeedAccount,
    NotLoggedIn,
}

#[derive(Debug, Error)]
pub enum FtpSessionOpenError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("account is needed")]
    AccountIsNeeded,
    #[error("raw command error: {0}")]
    RawCommandError(FtpCommandError),
    #[error("service not available")]
    ServiceNotAvailable,
}

impl From<FtpCommandError> for FtpSessionOpenError {
    fn from(e: FtpCommandError) -> Self {
        match e {
            FtpCommandError::ServiceNotAvailable => FtpSessionOpenError::ServiceNotAvailable,
            _ => FtpSessionOpenError::RawCommandError(e),
        }
    }
}
