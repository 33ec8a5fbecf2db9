//! Incremental FTP reply parser (RFC 959 §4.2).
//!
//! The control channel feeds raw bytes in whatever chunks the socket
//! yields; the parser buffers a residual partial line and emits complete
//! `FtpResponse` values in wire order. Multi-line replies open with
//! `NNN-` and close only on a line starting with the same code followed
//! by a space.

use crate::error::{FtpError, FtpResult};
use crate::types::{Charset, FtpResponse};

/// Streaming reply parser. Total — it never blocks or reads.
pub struct ReplyParser {
    charset: Charset,
    residual: Vec<u8>,
    block: Option<OpenBlock>,
}

struct OpenBlock {
    code: u16,
    lines: Vec<String>,
}

impl ReplyParser {
    pub fn new(charset: Charset) -> Self {
        Self {
            charset,
            residual: Vec::new(),
            block: None,
        }
    }

    /// Consume a chunk of bytes and return every response it completes,
    /// in order. Bytes of a trailing partial line are kept as residual
    /// for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> FtpResult<Vec<FtpResponse>> {
        self.residual.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(pos) = self.residual.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.residual.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(resp) = self.push_line(self.charset.decode(&line))? {
                out.push(resp);
            }
        }
        Ok(out)
    }

    /// Bytes received but not yet part of a complete line.
    pub fn residual(&self) -> &[u8] {
        &self.residual
    }

    /// Whether a multi-line block is currently open.
    pub fn in_block(&self) -> bool {
        self.block.is_some()
    }

    fn push_line(&mut self, line: String) -> FtpResult<Option<FtpResponse>> {
        if let Some(mut block) = self.block.take() {
            let terminates = closes_block(&line, block.code);
            block.lines.push(line);
            if terminates {
                return Ok(Some(FtpResponse {
                    code: block.code,
                    lines: block.lines,
                }));
            }
            self.block = Some(block);
            return Ok(None);
        }

        let (code, opens_block) = parse_head(&line)?;
        if opens_block {
            self.block = Some(OpenBlock {
                code,
                lines: vec![line],
            });
            Ok(None)
        } else {
            Ok(Some(FtpResponse {
                code,
                lines: vec![line],
            }))
        }
    }
}

/// Parse the reply code of a line that is not inside a multi-line block.
/// Returns the code and whether the line opens a multi-line block.
fn parse_head(line: &str) -> FtpResult<(u16, bool)> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(|b| b.is_ascii_digit()) {
        return Err(FtpError::protocol_error(format!(
            "Malformed reply line: '{}'",
            line
        )));
    }

    let code = (bytes[0] - b'0') as u16 * 100
        + (bytes[1] - b'0') as u16 * 10
        + (bytes[2] - b'0') as u16;

    // Valid codes are 1xx-5xx with the second digit 0-5 (RFC 959 §4.2.1).
    if !(b'1'..=b'5').contains(&bytes[0]) || bytes[1] > b'5' {
        return Err(FtpError::protocol_error(format!(
            "Reply code out of range: {}",
            code
        )));
    }

    match bytes.get(3) {
        Some(b'-') => Ok((code, true)),
        Some(b' ') | None => Ok((code, false)),
        Some(_) => Err(FtpError::protocol_error(format!(
            "Malformed reply line: '{}'",
            line
        ))),
    }
}

/// A block opened with `NNN-` terminates on a line starting `NNN `.
fn closes_block(line: &str, code: u16) -> bool {
    let bytes = line.as_bytes();
    if bytes.len() < 4 || bytes[3] != b' ' {
        return false;
    }
    let digits = [
        b'0' + (code / 100) as u8,
        b'0' + (code / 10 % 10) as u8,
        b'0' + (code % 10) as u8,
    ];
    bytes[..3] == digits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut ReplyParser, bytes: &[u8]) -> Vec<FtpResponse> {
        parser.feed(bytes).expect("parse")
    }

    #[test]
    fn single_line_reply() {
        let mut parser = ReplyParser::new(Charset::Utf8);
        let out = feed_all(&mut parser, b"200 Command okay\r\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, 200);
        assert_eq!(out[0].message(), "Command okay");
        assert!(parser.residual().is_empty());
    }

    #[test]
    fn multiline_greeting() {
        let mut parser = ReplyParser::new(Charset::Utf8);
        let out = feed_all(&mut parser, b"220-Welcome\r\n220 Ready\r\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, 220);
        assert!(out[0].is_multiline());
        assert_eq!(out[0].message(), "Welcome\n Ready");
    }

    #[test]
    fn different_code_prefix_does_not_terminate() {
        let mut parser = ReplyParser::new(Charset::Utf8);
        let out = feed_all(&mut parser, b"220-first\r\n226 not the end\r\n220 done\r\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, 220);
        assert_eq!(out[0].lines.len(), 3);
        assert_eq!(out[0].lines[1], "226 not the end");
    }

    #[test]
    fn continuation_whitespace_preserved() {
        let mut parser = ReplyParser::new(Charset::Utf8);
        let out = feed_all(&mut parser, b"211-Features:\r\n MLSD\r\n211 End\r\n");
        assert_eq!(out[0].lines[1], " MLSD");
    }

    #[test]
    fn tolerates_bare_lf() {
        let mut parser = ReplyParser::new(Charset::Utf8);
        let out = feed_all(&mut parser, b"220 hello\n331 user ok\n");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].code, 220);
        assert_eq!(out[1].code, 331);
    }

    #[test]
    fn round_trip_at_every_split_boundary() {
        let wire = b"220-Welcome\r\n220 Ready\r\n331 Password required\r\n226 Done\r\n";
        for split in 0..=wire.len() {
            let mut parser = ReplyParser::new(Charset::Utf8);
            let mut out = feed_all(&mut parser, &wire[..split]);
            out.extend(feed_all(&mut parser, &wire[split..]));
            let codes: Vec<u16> = out.iter().map(|r| r.code).collect();
            assert_eq!(codes, vec![220, 331, 226], "split at {}", split);
            assert!(parser.residual().is_empty(), "split at {}", split);
        }
    }

    #[test]
    fn byte_at_a_time() {
        let wire = b"150 Opening\r\n226-stats\r\n226 Transfer complete\r\n";
        let mut parser = ReplyParser::new(Charset::Utf8);
        let mut out = Vec::new();
        for b in wire.iter() {
            out.extend(feed_all(&mut parser, std::slice::from_ref(b)));
        }
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].code, 150);
        assert_eq!(out[1].code, 226);
    }

    #[test]
    fn rejects_out_of_range_code() {
        let mut parser = ReplyParser::new(Charset::Utf8);
        assert!(parser.feed(b"678 nope\r\n").is_err());

        let mut parser = ReplyParser::new(Charset::Utf8);
        assert!(parser.feed(b"290 second digit too high\r\n").is_err());
    }

    #[test]
    fn rejects_non_numeric_head() {
        let mut parser = ReplyParser::new(Charset::Utf8);
        assert!(parser.feed(b"oops\r\n").is_err());
    }

    #[test]
    fn keeps_partial_line_as_residual() {
        let mut parser = ReplyParser::new(Charset::Utf8);
        let out = feed_all(&mut parser, b"226 Trans");
        assert!(out.is_empty());
        assert_eq!(parser.residual(), b"226 Trans");
        let out = feed_all(&mut parser, b"fer complete\r\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message(), "Transfer complete");
    }
}
