use std::{
    collections::BTreeMap,
    io,
    iter::Peekable,
    str::Chars,
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::transport::Transport;

/// A transport that records every payload it's given.
#[derive(Default)]
pub struct RecordingTransport {
    payloads: Mutex<Vec<Vec<u8>>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingTransport {
    /// Creates a transport that fails every send.
    pub fn failing() -> Self {
        RecordingTransport { fail: true, ..Default::default() }
    }

    /// Creates a transport that takes the given time to send each payload.
    pub fn slow(delay: Duration) -> Self {
        RecordingTransport { delay: Some(delay), ..Default::default() }
    }

    /// Returns every payload sent so far, in order.
    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().iter().map(|p| String::from_utf8(p.clone()).expect("payload is not UTF-8")).collect()
    }

    /// Returns every line sent so far, in order, across all payloads.
    pub fn lines(&self) -> Vec<String> {
        self.payloads().iter().flat_map(|p| split_lines(p)).collect()
    }

    /// Waits until at least `count` payloads have been sent, or the timeout elapses.
    pub fn wait_for_payloads(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.payloads.lock().len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.payloads.lock().len() >= count
    }
}

impl Transport for RecordingTransport {
    fn transmit(&self, payload: &[u8]) -> io::Result<usize> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        self.payloads.lock().push(payload.to_vec());
        Ok(payload.len())
    }
}

/// Splits a payload into lines, ignoring newlines inside quoted string fields.
pub fn split_lines(payload: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = payload.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                current.extend(chars.next());
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\n' if !in_quotes => lines.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    lines.push(current);
    lines
}

/// A single line of line protocol, split into its parts.
#[derive(Debug)]
pub struct ParsedLine {
    pub measurement: String,

    /// Unescaped tag keys and values.
    pub tags: BTreeMap<String, String>,

    /// Unescaped field keys, mapped to their raw encoded values.
    pub fields: BTreeMap<String, String>,

    pub timestamp: Option<i64>,
}

/// Parses a single line of line protocol.
pub fn parse_line(line: &str) -> Result<ParsedLine, String> {
    let mut chars = line.chars().peekable();

    let measurement = read_escaped(&mut chars, &[',', ' ']);
    if measurement.is_empty() {
        return Err("empty measurement".to_owned());
    }

    let mut tags = BTreeMap::new();
    if chars.peek() == Some(&',') {
        chars.next();
        loop {
            let key = read_escaped(&mut chars, &['=']);
            if chars.next() != Some('=') {
                return Err(format!("tag `{key}` has no value"));
            }
            let value = read_escaped(&mut chars, &[',', ' ']);
            tags.insert(key, value);
            match chars.next() {
                Some(',') => continue,
                Some(' ') => break,
                _ => return Err("line ended after tags".to_owned()),
            }
        }
    } else if chars.next() != Some(' ') {
        return Err("line ended after measurement".to_owned());
    }

    let mut fields = BTreeMap::new();
    loop {
        let key = read_escaped(&mut chars, &['=']);
        if chars.next() != Some('=') {
            return Err(format!("field `{key}` has no value"));
        }
        fields.insert(key, read_field_value(&mut chars)?);
        match chars.next() {
            Some(',') => continue,
            Some(' ') | None => break,
            Some(c) => return Err(format!("unexpected `{c}` after field value")),
        }
    }

    let rest: String = chars.collect();
    let timestamp = if rest.is_empty() {
        None
    } else {
        Some(rest.parse::<i64>().map_err(|e| format!("invalid timestamp `{rest}`: {e}"))?)
    };

    Ok(ParsedLine { measurement, tags, fields, timestamp })
}

fn read_escaped(chars: &mut Peekable<Chars<'_>>, terminators: &[char]) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if terminators.contains(&c) {
            break;
        }
        chars.next();
        if c == '\\' {
            out.extend(chars.next());
        } else {
            out.push(c);
        }
    }
    out
}

fn read_field_value(chars: &mut Peekable<Chars<'_>>) -> Result<String, String> {
    let mut out = String::new();
    if chars.peek() == Some(&'"') {
        out.extend(chars.next());
        loop {
            match chars.next() {
                Some('\\') => {
                    out.push('\\');
                    out.extend(chars.next());
                }
                Some('"') => {
                    out.push('"');
                    return Ok(out);
                }
                Some(c) => out.push(c),
                None => return Err("unterminated string field".to_owned()),
            }
        }
    }

    while let Some(&c) = chars.peek() {
        if c == ',' || c == ' ' {
            break;
        }
        out.push(c);
        chars.next();
    }
    if out.is_empty() {
        return Err("empty field value".to_owned());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{parse_line, split_lines};

    #[test]
    fn parses_full_line() {
        let parsed = parse_line("cpu\\ load,host=web\\,01,region=us value=0.5,ok=true,msg=\"a, b\" 1556813561098000000")
            .unwrap();
        assert_eq!(parsed.measurement, "cpu load");
        assert_eq!(parsed.tags["host"], "web,01");
        assert_eq!(parsed.fields["value"], "0.5");
        assert_eq!(parsed.fields["msg"], "\"a, b\"");
        assert_eq!(parsed.timestamp, Some(1_556_813_561_098_000_000));

        assert!(parse_line("cpu").is_err());
        assert!(parse_line("cpu value=").is_err());
    }

    #[test]
    fn splits_outside_quotes() {
        assert_eq!(split_lines("a v=1i\nb s=\"x\ny\""), vec!["a v=1i", "b s=\"x\ny\""]);
    }
}
