/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

#[derive(Default)]
pub(crate) struct FtpServerFeature {
    utf8_path: bool,
    file_size: bool,
    file_mtime: bool,
    rest_stream: bool,
    pre_transfer: bool,
    machine_list: bool,
    extended_passive: bool,
    auth_tls: bool,
    protection_buffer: bool,
    protection_level: bool,
}

impl FtpServerFeature {
    pub(crate) fn parse_and_set(&mut self, s: &str) {
        let (f, v) = s.split_once(' ').unwrap_or((s, ""));
        match f.to_lowercase().as_str() {
            "utf8" => self.utf8_path = true,
            "size" => self.file_size = true,
            "mdtm" => self.file_mtime = true,
            "rest" => {
                if v.to_lowercase().eq("stream") {
                    self.rest_stream = true;
                }
            }
            "pret" => self.pre_transfer = true,
            "mlst" => self.machine_list = true,
            "epsv" => self.extended_passive = true,
            "auth" => {
                let v = v.to_lowercase();
                if v.contains("tls") || v.contains("ssl") {
                    self.auth_tls = true;
                }
            }
            "pbsz" => self.protection_buffer = true,
            "prot" => self.protection_level = true,
            _ => {}
        }
    }

    #[inline]
    pub(crate) fn support_utf8_path(&self) -> bool {
        self.utf8_path
    }

    #[inline]
    pub(crate) fn support_file_size(&self) -> bool {
        self.file_size
    }

    #[inline]
    pub(crate) fn support_file_mtime(&self) -> bool {
        self.file_mtime
    }

    #[inline]
    pub(crate) fn support_rest_stream(&self) -> bool {
        self.rest_stream
    }

    #[inline]
    pub(crate) fn support_pre_transfer(&self) -> bool {
        self.pre_transfer
    }

    #[inline]
    pub(crate) fn support_machine_list(&self) -> bool {
        self.machine_list
    }

    #[inline]
    pub(crate) fn support_epsv(&self) -> bool {
        self.extended_passive
    }

    #[inline]
    pub(crate) fn support_auth_tls(&self) -> bool {
        self.auth_tls
    }

    #[inline]
    pub(crate) fn support_data_protection(&self) -> bool {
        self.protection_buffer && self.protection_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_feat_lines() {
        let mut feature = FtpServerFeature::default();
        for line in [
            "UTF8",
            "REST STREAM",
            "SIZE",
            "MDTM",
            "PRET",
            "MLST type*;size*;modify*;",
            "EPSV",
            "AUTH TLS",
            "PBSZ",
            "PROT",
        ] {
            feature.parse_and_set(line);
        }
        assert!(feature.support_utf8_path());
        assert!(feature.support_rest_stream());
        assert!(feature.support_file_size());
        assert!(feature.support_file_mtime());
        assert!(feature.support_pre_transfer());
        assert!(feature.support_machine_list());
        assert!(feature.support_epsv());
        assert!(feature.support_auth_tls());
        assert!(feature.support_data_protection());
    }

    #[test]
    fn rest_without_stream() {
        let mut feature = FtpServerFeature::default();
        feature.parse_and_set("REST");
        assert!(!feature.support_rest_stream());
    }
}
