/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeSet;
use std::time::Duration;

use crate::transfer::FtpDataChannelMode;

const MAXIMUM_LIST_ALL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FtpClientConfig {
    pub control: FtpControlConfig,
    pub transfer: FtpTransferConfig,
    pub data: FtpDataChannelConfig,
    pub connect_timeout: Duration,
    pub greeting_timeout: Duration,
    pub always_try_epsv: bool,
}

impl Default for FtpClientConfig {
    fn default() -> Self {
        FtpClientConfig {
            control: FtpControlConfig::default(),
            transfer: FtpTransferConfig::default(),
            data: FtpDataChannelConfig::default(),
            connect_timeout: Duration::from_secs(30),
            greeting_timeout: Duration::from_secs(10),
            always_try_epsv: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FtpControlConfig {
    pub max_line_len: usize,
    pub max_multi_lines: usize,
    pub command_timeout: Duration,
    /// discard bytes left over from broken prior operations before each new command
    pub drain_stale_data: bool,
    pub stale_data_timeout: Duration,
}

impl Default for FtpControlConfig {
    fn default() -> Self {
        FtpControlConfig {
            max_line_len: 2048,
            max_multi_lines: 128,
            command_timeout: Duration::from_secs(10),
            drain_stale_data: false,
            stale_data_timeout: Duration::from_millis(20),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FtpDataChannelConfig {
    pub mode: FtpDataChannelMode,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// how many passive endpoints to request before giving up on blocked ports
    pub passive_max_attempts: usize,
    pub blocked_ports: BTreeSet<u16>,
    /// ask the provider to activate TLS on data connections from the
    /// start of the session, without waiting for a PROT negotiation
    pub encryption: bool,
}

impl Default for FtpDataChannelConfig {
    fn default() -> Self {
        FtpDataChannelConfig {
            mode: FtpDataChannelMode::default(),
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(15),
            passive_max_attempts: 4,
            blocked_ports: BTreeSet::new(),
            encryption: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FtpTransferConfig {
    pub end_wait_timeout: Duration,
    pub chunk_size: usize,
    /// inject a NOOP on the control channel when it has been idle this long, zero disables
    pub noop_interval: Duration,
    /// bytes per second, zero means unlimited
    pub rate_limit: u64,
    pub rate_resolution: Duration,
    pub max_resume_attempts: usize,
    pub download_zero_byte_files: bool,
    pub list_max_entries: usize,
    pub list_max_line_len: usize,
    pub(crate) list_all_timeout: Duration,
}

impl Default for FtpTransferConfig {
    fn default() -> Self {
        FtpTransferConfig {
            end_wait_timeout: Duration::from_secs(2),
            chunk_size: 65536,
            noop_interval: Duration::ZERO,
            rate_limit: 0,
            rate_resolution: Duration::from_millis(200),
            max_resume_attempts: 5,
            download_zero_byte_files: false,
            list_max_entries: 1024,
            list_max_line_len: 2048,
            list_all_timeout: Duration::from_secs(120),
        }
    }
}

impl FtpTransferConfig {
    pub fn set_list_all_timeout(&mut self, timeout: Duration) {
        self.list_all_timeout = timeout.min(MAXIMUM_LIST_ALL_TIMEOUT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = FtpClientConfig::default();
        assert!(config.always_try_epsv);
        assert_eq!(config.control.max_line_len, 2048);
        assert_eq!(config.transfer.rate_limit, 0);
        assert!(config.data.blocked_ports.is_empty());
        assert!(!config.data.encryption);
    }

    #[test]
    fn list_all_timeout_is_capped() {
        let mut config = FtpTransferConfig::default();
        config.set_list_all_timeout(Duration::from_secs(3600));
        assert_eq!(config.list_all_timeout, MAXIMUM_LIST_ALL_TIMEOUT);
    }
}
