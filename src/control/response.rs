/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use tokio::io::{AsyncRead, AsyncWrite};

use g3_io_ext::LimitedBufReadExt;

use super::FtpControlChannel;
use crate::error::FtpReplyError;

/// RFC 959 reply class, taken from the first digit of the reply code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FtpReplyCategory {
    PositivePreliminary,
    PositiveCompletion,
    PositiveIntermediate,
    TransientNegative,
    PermanentNegative,
    /// RFC 2228 protected reply
    Protected,
}

impl FtpReplyCategory {
    fn of_code(code: u16) -> Self {
        match code / 100 {
            1 => FtpReplyCategory::PositivePreliminary,
            2 => FtpReplyCategory::PositiveCompletion,
            3 => FtpReplyCategory::PositiveIntermediate,
            4 => FtpReplyCategory::TransientNegative,
            5 => FtpReplyCategory::PermanentNegative,
            6 => FtpReplyCategory::Protected,
            _ => unreachable!("reply codes are validated to 100..700 before use"),
        }
    }
}

/// One folded server reply.
///
/// For a multi-line reply all lines are kept in order, and the line that
/// terminated multi-line mode (`DDD<space>` at column 0) is the primary
/// message.
#[derive(Clone, Debug)]
pub struct FtpReply {
    code: u16,
    lines: Vec<String>,
}

macro_rules! char_to_u16 {
    ($c:expr) => {
        ($c - b'0') as u16
    };
}

fn parse_reply_code(line: &[u8]) -> Result<u16, FtpReplyError> {
    if line.len() < 4 {
        return Err(FtpReplyError::InvalidLineFormat);
    }
    if !line[0].is_ascii_digit() || !line[1].is_ascii_digit() || !line[2].is_ascii_digit() {
        return Err(FtpReplyError::InvalidLineFormat);
    }
    let code = char_to_u16!(line[0]) * 100 + char_to_u16!(line[1]) * 10 + char_to_u16!(line[2]);
    if !(100..700).contains(&code) {
        return Err(FtpReplyError::InvalidReplyCode(code));
    }
    Ok(code)
}

impl FtpReply {
    pub(crate) fn synthetic(code: u16, message: &str) -> Self {
        FtpReply {
            code,
            lines: vec![message.to_string()],
        }
    }

    #[inline]
    pub fn code(&self) -> u16 {
        self.code
    }

    #[inline]
    pub fn category(&self) -> FtpReplyCategory {
        FtpReplyCategory::of_code(self.code)
    }

    /// 2xx or 3xx
    pub fn is_positive(&self) -> bool {
        matches!(
            self.category(),
            FtpReplyCategory::PositiveCompletion | FtpReplyCategory::PositiveIntermediate
        )
    }

    /// the line that ended the reply
    pub fn message(&self) -> &str {
        self.lines.last().map(|s| s.as_str()).unwrap_or_default()
    }

    /// continuation lines of a multi-line reply, in order
    pub fn info_lines(&self) -> &[String] {
        match self.lines.len() {
            0 | 1 => &[],
            n => &self.lines[..n - 1],
        }
    }

    pub(crate) fn parse_single_line(line: &[u8]) -> Result<Self, FtpReplyError> {
        let code = parse_reply_code(line)?;
        let msg = std::str::from_utf8(&line[4..]).map_err(|_| FtpReplyError::LineIsNotUtf8)?;
        Ok(FtpReply {
            code,
            lines: vec![msg.trim_end().to_string()],
        })
    }

    pub(crate) fn get_multi_line_parser(
        line: &[u8],
        max_lines: usize,
    ) -> Result<FtpMultiLineParser, FtpReplyError> {
        let code = parse_reply_code(line)?;
        let end_prefix = [line[0], line[1], line[2], b' '];
        let mut lines = Vec::<String>::with_capacity(max_lines.min(16));
        let msg = std::str::from_utf8(&line[4..]).map_err(|_| FtpReplyError::LineIsNotUtf8)?;
        lines.push(msg.trim_end().to_string());
        Ok(FtpMultiLineParser {
            code,
            end_prefix,
            lines,
        })
    }
}

pub(crate) struct FtpMultiLineParser {
    code: u16,
    end_prefix: [u8; 4],
    lines: Vec<String>,
}

impl FtpMultiLineParser {
    /// Returns true when the fed line ended the reply. Only a line that
    /// begins with the opening code followed by a space terminates; stray
    /// blank lines and reused code digits inside continuation text are
    /// kept as continuation lines.
    pub(crate) fn feed_line(&mut self, line: &[u8]) -> Result<bool, FtpReplyError> {
        if line.starts_with(&self.end_prefix) {
            let msg =
                std::str::from_utf8(&line[4..]).map_err(|_| FtpReplyError::LineIsNotUtf8)?;
            self.lines.push(msg.trim_end().to_string());
            Ok(true)
        } else {
            let msg = std::str::from_utf8(line).map_err(|_| FtpReplyError::LineIsNotUtf8)?;
            // do not trim whitespace at beginning
            self.lines.push(msg.trim_end().to_string());
            Ok(false)
        }
    }

    pub(crate) fn finish(self) -> FtpReply {
        FtpReply {
            code: self.code,
            lines: self.lines,
        }
    }
}

impl<T> FtpControlChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    async fn read_first_line(&mut self, buf: &mut Vec<u8>) -> Result<(), FtpReplyError> {
        buf.clear();

        let max_line_len = self.config.max_line_len;
        let stream = self.stream_mut().ok_or(FtpReplyError::ConnectionClosed)?;
        let (found, len) = stream
            .limited_read_until(b'\n', max_line_len, buf)
            .await
            .map_err(FtpReplyError::ReadFailed)?;
        match len {
            0 => Err(FtpReplyError::ConnectionClosed),
            1..=4 => {
                // at least <code><sep>\n

                #[cfg(feature = "log-raw-io")]
                crate::debug::log_rsp(unsafe { std::str::from_utf8_unchecked(buf).trim_end() });

                Err(FtpReplyError::InvalidLineFormat)
            }
            _ => {
                #[cfg(feature = "log-raw-io")]
                crate::debug::log_rsp(unsafe { std::str::from_utf8_unchecked(buf).trim_end() });

                if !found {
                    Err(FtpReplyError::LineTooLong)
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn read_extra_line(&mut self, buf: &mut Vec<u8>) -> Result<(), FtpReplyError> {
        buf.clear();

        let max_line_len = self.config.max_line_len;
        let stream = self.stream_mut().ok_or(FtpReplyError::ConnectionClosed)?;
        let (found, len) = stream
            .limited_read_until(b'\n', max_line_len, buf)
            .await
            .map_err(FtpReplyError::ReadFailed)?;
        match len {
            0 => Err(FtpReplyError::ConnectionClosed),
            _ => {
                #[cfg(feature = "log-raw-io")]
                crate::debug::log_rsp(unsafe { std::str::from_utf8_unchecked(buf).trim_end() });

                if !found {
                    Err(FtpReplyError::LineTooLong)
                } else {
                    Ok(())
                }
            }
        }
    }

    pub(crate) async fn read_reply(&mut self) -> Result<FtpReply, FtpReplyError> {
        let mut buf = Vec::<u8>::with_capacity(self.config.max_line_len);
        self.read_first_line(&mut buf).await?;

        match buf[3] {
            b' ' => FtpReply::parse_single_line(&buf),
            b'-' => {
                let mut ml_parser =
                    FtpReply::get_multi_line_parser(&buf, self.config.max_multi_lines)?;
                for _i in 0..self.config.max_multi_lines {
                    self.read_extra_line(&mut buf).await?;
                    let end = ml_parser.feed_line(&buf)?;
                    if end {
                        return Ok(ml_parser.finish());
                    }
                }
                Err(FtpReplyError::TooManyLines)
            }
            _ => Err(FtpReplyError::InvalidLineFormat),
        }
    }

    pub(crate) async fn timed_read_reply(
        &mut self,
        stage: &'static str,
    ) -> Result<FtpReply, FtpReplyError> {
        match tokio::time::timeout(self.config.command_timeout, self.read_reply()).await {
            Ok(r) => r,
            Err(_) => Err(FtpReplyError::ReadTimedOut(stage)),
        }
    }

    pub(crate) async fn read_reply_with_timeout(
        &mut self,
        stage: &'static str,
        timeout: std::time::Duration,
    ) -> Result<FtpReply, FtpReplyError> {
        match tokio::time::timeout(timeout, self.read_reply()).await {
            Ok(r) => r,
            Err(_) => Err(FtpReplyError::ReadTimedOut(stage)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FtpControlConfig;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn single_line() {
        let reply = FtpReply::parse_single_line(b"220 mock server ready\r\n").unwrap();
        assert_eq!(reply.code(), 220);
        assert_eq!(reply.category(), FtpReplyCategory::PositiveCompletion);
        assert!(reply.is_positive());
        assert_eq!(reply.message(), "mock server ready");
        assert!(reply.info_lines().is_empty());
    }

    #[test]
    fn invalid_first_line() {
        assert!(matches!(
            FtpReply::parse_single_line(b"hi there\r\n"),
            Err(FtpReplyError::InvalidLineFormat)
        ));
        assert!(matches!(
            FtpReply::parse_single_line(b"059 nope\r\n"),
            Err(FtpReplyError::InvalidReplyCode(59))
        ));
    }

    #[test]
    fn protected_category() {
        let reply = FtpReply::parse_single_line(b"631 xxxx\r\n").unwrap();
        assert_eq!(reply.category(), FtpReplyCategory::Protected);
        assert!(!reply.is_positive());
    }

    #[test]
    fn multi_line_folding() {
        let mut parser = FtpReply::get_multi_line_parser(b"211-Features:\r\n", 16).unwrap();
        assert!(!parser.feed_line(b" SIZE\r\n").unwrap());
        // blank continuation line is kept, not rejected
        assert!(!parser.feed_line(b"\r\n").unwrap());
        // a reused code without the space separator does not terminate
        assert!(!parser.feed_line(b"211-note\r\n").unwrap());
        assert!(parser.feed_line(b"211 End\r\n").unwrap());
        let reply = parser.finish();
        assert_eq!(reply.code(), 211);
        assert_eq!(reply.message(), "End");
        assert_eq!(reply.info_lines().len(), 4);
        assert_eq!(reply.info_lines()[1], "");
    }

    async fn reply_of(text: &'static str) -> Result<FtpReply, FtpReplyError> {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut channel = FtpControlChannel::new(client, FtpControlConfig::default());
        server.write_all(text.as_bytes()).await.unwrap();
        drop(server);
        channel.read_reply().await
    }

    #[tokio::test]
    async fn read_single_reply() {
        let reply = reply_of("200 Ok\r\n").await.unwrap();
        assert_eq!(reply.code(), 200);
        assert_eq!(reply.message(), "Ok");
    }

    #[tokio::test]
    async fn read_multi_line_reply() {
        let reply = reply_of("229-Entering\r\n229 Extended Passive Mode (|||6446|)\r\n")
            .await
            .unwrap();
        assert_eq!(reply.code(), 229);
        assert_eq!(reply.message(), "Extended Passive Mode (|||6446|)");
    }

    #[tokio::test]
    async fn read_closed() {
        assert!(matches!(
            reply_of("").await,
            Err(FtpReplyError::ConnectionClosed)
        ));
    }
}
