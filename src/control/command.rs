/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
pub enum FtpCommand {
    USER,
    PASS,
    QUIT,
    NOOP,
    TYPE,
    FEAT,
    OPTS,
    PWD,
    CWD,
    SIZE,
    MDTM,
    SITE,
    AUTH,
    PBSZ,
    PROT,
    PASV,
    EPSV,
    PORT,
    EPRT,
    PRET,
    REST,
    RETR,
    STOR,
    APPE,
    LIST,
    NLST,
    ABOR,
}

impl FtpCommand {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            FtpCommand::USER => "USER",
            FtpCommand::PASS => "PASS",
            FtpCommand::QUIT => "QUIT",
            FtpCommand::NOOP => "NOOP",
            FtpCommand::TYPE => "TYPE",
            FtpCommand::FEAT => "FEAT",
            FtpCommand::OPTS => "OPTS",
            FtpCommand::PWD => "PWD",
            FtpCommand::CWD => "CWD",
            FtpCommand::SIZE => "SIZE",
            FtpCommand::MDTM => "MDTM",
            FtpCommand::SITE => "SITE",
            FtpCommand::AUTH => "AUTH",
            FtpCommand::PBSZ => "PBSZ",
            FtpCommand::PROT => "PROT",
            FtpCommand::PASV => "PASV",
            FtpCommand::EPSV => "EPSV",
            FtpCommand::PORT => "PORT",
            FtpCommand::EPRT => "EPRT",
            FtpCommand::PRET => "PRET",
            FtpCommand::REST => "REST",
            FtpCommand::RETR => "RETR",
            FtpCommand::STOR => "STOR",
            FtpCommand::APPE => "APPE",
            FtpCommand::LIST => "LIST",
            FtpCommand::NLST => "NLST",
            FtpCommand::ABOR => "ABOR",
        }
    }
}

impl fmt::Display for FtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
