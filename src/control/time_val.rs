/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

/// Parse an RFC 3659 time-val (`YYYYMMDDHHMMSS[.sss]`), as sent in MDTM
/// replies and MLSx facts.
pub(crate) fn parse_from_str(s: &str) -> Option<DateTime<Utc>> {
    let (main, frac) = match s.split_once('.') {
        Some((m, f)) => (m, Some(f)),
        None => (s, None),
    };
    let naive = NaiveDateTime::parse_from_str(main, "%Y%m%d%H%M%S").ok()?;
    let mut dt = naive.and_utc();
    if let Some(frac) = frac {
        if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let mut nanos: i64 = frac.parse().ok()?;
        for _ in frac.len()..9 {
            nanos *= 10;
        }
        dt = dt + TimeDelta::nanoseconds(nanos);
    }
    Some(dt)
}
