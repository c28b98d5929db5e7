use crate::{ShelflistError, ShelflistResult};

/// A borrowed view over one CDXJ record: `SURT SP TIMESTAMP [SP JSON]`.
///
/// The JSON body, when present, is kept as raw bytes. Records that merely
/// pass through the engine are never re-encoded, so third-party bodies stay
/// byte-exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdxjLine<'a> {
    pub surt: &'a [u8],
    pub timestamp: &'a [u8],
    pub json: Option<&'a [u8]>,
}

impl<'a> CdxjLine<'a> {
    /// Split a line on its first two spaces. The trailing newline (if any)
    /// is not part of the record.
    pub fn parse(line: &'a [u8]) -> ShelflistResult<CdxjLine<'a>> {
        let line = trim_line_end(line);

        let first_space = line
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| malformed(line))?;

        let (surt, rest) = line.split_at(first_space);
        let rest = &rest[1..];

        if surt.is_empty() || rest.is_empty() {
            return Err(malformed(line));
        }

        match rest.iter().position(|&b| b == b' ') {
            Some(second_space) => {
                let (timestamp, json) = rest.split_at(second_space);
                Ok(CdxjLine {
                    surt,
                    timestamp,
                    json: Some(&json[1..]),
                })
            }
            None => Ok(CdxjLine {
                surt,
                timestamp: rest,
                json: None,
            }),
        }
    }

    /// Assemble a `\n`-terminated line. The JSON body is emitted verbatim.
    pub fn format(&self) -> Vec<u8> {
        let json_len = self.json.map_or(0, |j| j.len() + 1);
        let mut out = Vec::with_capacity(self.surt.len() + self.timestamp.len() + json_len + 2);

        out.extend_from_slice(self.surt);
        out.push(b' ');
        out.extend_from_slice(self.timestamp);

        if let Some(json) = self.json {
            out.push(b' ');
            out.extend_from_slice(json);
        }

        out.push(b'\n');
        out
    }
}

fn malformed(line: &[u8]) -> ShelflistError {
    ShelflistError::MalformedRecord(String::from_utf8_lossy(line).into_owned())
}

/// The `SURT SP TIMESTAMP` prefix of a line, without allocating. Lines with
/// fewer than two fields fall back to the whole (trimmed) line, so that a
/// legacy row still yields a usable index key.
pub fn key_prefix(line: &[u8]) -> &[u8] {
    let line = trim_line_end(line);

    let Some(first_space) = line.iter().position(|&b| b == b' ') else {
        return line;
    };

    match line[first_space + 1..].iter().position(|&b| b == b' ') {
        Some(second_space) => &line[..first_space + 1 + second_space],
        None => line,
    }
}

/// The whole line up to (not including) the line terminator. Byte order on
/// these keys coincides with `(SURT, TIMESTAMP, JSON)` order because the
/// first two fields are space-free.
pub fn sort_key(line: &[u8]) -> &[u8] {
    trim_line_end(line)
}

/// The SURT field alone: everything before the first space.
pub fn surt_key(line: &[u8]) -> &[u8] {
    let line = trim_line_end(line);
    match line.iter().position(|&b| b == b' ') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}
