/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use crate::control::FtpReply;

/// Server-family capability hooks.
///
/// A concrete handler is selected from the welcome message at connect
/// time. The defaults fit the common unix style servers, families with
/// known quirks override individual methods.
pub trait FtpServerHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// consume the data socket until remote close even when the file
    /// size is known
    fn always_read_to_end(&self) -> bool {
        false
    }

    /// SITE commands to issue right after the welcome message
    fn post_connect_site_commands(&self) -> &[&'static str] {
        &[]
    }

    /// phrases marking a negative reply as "the file does not exist"
    fn file_missing_phrases(&self) -> &[&'static str] {
        &[
            "no such file",
            "not found",
            "no files found",
            "does not exist",
            "failed to open file",
        ]
    }

    fn is_file_missing_reply(&self, reply: &FtpReply) -> bool {
        if !matches!(reply.code(), 450 | 550) {
            return false;
        }
        let msg = reply.message().to_lowercase();
        self.file_missing_phrases()
            .iter()
            .any(|phrase| msg.contains(phrase))
    }
}

pub struct FtpGenericServerHandler;

impl FtpServerHandler for FtpGenericServerHandler {
    fn name(&self) -> &'static str {
        "generic"
    }
}

/// IBM z/OS keeps the reported size in records, not bytes, so transfers
/// have to run until the server closes the data connection.
pub struct FtpZosServerHandler;

impl FtpServerHandler for FtpZosServerHandler {
    fn name(&self) -> &'static str {
        "z/OS"
    }

    fn always_read_to_end(&self) -> bool {
        true
    }
}

pub(crate) fn select_server_handler(greeting: &str) -> Arc<dyn FtpServerHandler> {
    if greeting.contains("z/OS") {
        Arc::new(FtpZosServerHandler)
    } else {
        Arc::new(FtpGenericServerHandler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_selection() {
        assert_eq!(select_server_handler("220 FTP server ready").name(), "generic");
        assert_eq!(
            select_server_handler("220-FTPD1 IBM FTP CS V2R4 at host, z/OS").name(),
            "z/OS"
        );
    }

    #[test]
    fn file_missing_detection() {
        let handler = FtpGenericServerHandler;
        let reply = FtpReply::synthetic(550, "foo: No such file or directory");
        assert!(handler.is_file_missing_reply(&reply));
        let reply = FtpReply::synthetic(550, "Permission denied");
        assert!(!handler.is_file_missing_reply(&reply));
        let reply = FtpReply::synthetic(226, "not found");
        assert!(!handler.is_file_missing_reply(&reply));
    }
}
