/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use crate::transfer::FtpTransferType;

/// Per control-connection latches. All of this resets with a fresh
/// connection, none of it is process wide.
pub(crate) struct FtpSessionState {
    connected: bool,
    /// last TYPE accepted by the server, None right after connect
    transfer_type: Option<FtpTransferType>,
    /// when set, the next type request is sent even if the type matches
    force_retype: bool,
    /// flips false to true at most once per connection
    epsv_unsupported: bool,
    cached_pwd: Option<String>,
    data_encryption: bool,
    ftps_failure: bool,
}

impl FtpSessionState {
    pub(crate) fn new(data_encryption: bool) -> Self {
        FtpSessionState {
            connected: true,
            transfer_type: None,
            // the first transfer after connect always re-asserts TYPE
            force_retype: true,
            epsv_unsupported: false,
            cached_pwd: None,
            data_encryption,
            ftps_failure: false,
        }
    }

    #[inline]
    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn set_disconnected(&mut self) {
        self.connected = false;
    }

    pub(crate) fn need_type_command(&self, ttype: FtpTransferType) -> bool {
        self.force_retype || self.transfer_type != Some(ttype)
    }

    pub(crate) fn note_type_accepted(&mut self, ttype: FtpTransferType) {
        self.transfer_type = Some(ttype);
        self.force_retype = false;
    }

    #[inline]
    pub(crate) fn current_transfer_type(&self) -> Option<FtpTransferType> {
        self.transfer_type
    }

    #[inline]
    pub(crate) fn epsv_unsupported(&self) -> bool {
        self.epsv_unsupported
    }

    pub(crate) fn set_epsv_unsupported(&mut self) {
        self.epsv_unsupported = true;
    }

    pub(crate) fn cached_pwd(&self) -> Option<&str> {
        self.cached_pwd.as_deref()
    }

    pub(crate) fn set_cached_pwd(&mut self, path: String) {
        self.cached_pwd = Some(path);
    }

    pub(crate) fn invalidate_cached_pwd(&mut self) {
        self.cached_pwd = None;
    }

    pub(crate) fn set_data_encryption(&mut self, enable: bool) {
        self.data_encryption = enable;
    }

    /// whether the factory should wrap the next data connection in TLS
    pub(crate) fn data_encryption_active(&self) -> bool {
        self.data_encryption && !self.ftps_failure
    }

    pub(crate) fn set_ftps_failure(&mut self) {
        self.ftps_failure = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_latch() {
        let mut session = FtpSessionState::new(false);
        // fresh connection always re-asserts TYPE
        assert!(session.need_type_command(FtpTransferType::Image));
        session.note_type_accepted(FtpTransferType::Image);
        assert!(!session.need_type_command(FtpTransferType::Image));
        assert!(session.need_type_command(FtpTransferType::Ascii));
        session.note_type_accepted(FtpTransferType::Ascii);
        assert_eq!(
            session.current_transfer_type(),
            Some(FtpTransferType::Ascii)
        );
    }

    #[test]
    fn ftps_failure_latch() {
        let mut session = FtpSessionState::new(false);
        assert!(!session.data_encryption_active());
        session.set_data_encryption(true);
        assert!(session.data_encryption_active());
        session.set_ftps_failure();
        assert!(!session.data_encryption_active());
    }

    #[test]
    fn encryption_seeded_from_config() {
        let session = FtpSessionState::new(true);
        assert!(session.data_encryption_active());
    }
}
