//! Line protocol encoding.
//!
//! A point is encoded as `measurement[,tag=value...] field=value[,field=value...][ timestamp]`. Encoding never fails:
//! reserved characters are escaped, and anything line protocol cannot carry at all was already rejected when the
//! point was built.

use crate::point::{FieldValue, Point};

const MEASUREMENT_SPECIAL: &[u8] = b", \\";
const KEY_SPECIAL: &[u8] = b",= \\";
const STRING_SPECIAL: &[u8] = b"\"\\";

/// Destination for encoded bytes.
///
/// This lets the same encoding routine either write into a buffer or simply count how many bytes it would have
/// written, so that a point's length can be measured before it is committed to a payload.
trait Output {
    fn put(&mut self, bytes: &[u8]);

    fn put_byte(&mut self, byte: u8) {
        self.put(&[byte]);
    }
}

impl Output for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }

    fn put_byte(&mut self, byte: u8) {
        self.push(byte);
    }
}

#[derive(Default)]
struct LenCounter(usize);

impl Output for LenCounter {
    fn put(&mut self, bytes: &[u8]) {
        self.0 += bytes.len();
    }
}

/// Encodes points into line protocol.
///
/// Global tags, typically taken from the client configuration, are appended to every point. When a point already
/// carries a tag with the same key, the point's own value wins.
#[derive(Clone, Debug, Default)]
pub struct LineEncoder {
    global_tags: Vec<(String, String)>,
}

impl LineEncoder {
    /// Creates a new `LineEncoder` with the given global tags.
    ///
    /// Tags with an empty key or value are discarded, and duplicate keys keep their first value.
    pub fn new<I, K, V>(global_tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut tags: Vec<(String, String)> = Vec::new();
        for (key, value) in global_tags {
            let (key, value) = (key.into(), value.into());
            if key.is_empty() || value.is_empty() || tags.iter().any(|(k, _)| *k == key) {
                continue;
            }
            tags.push((key, value));
        }
        tags.sort_by(|a, b| a.0.cmp(&b.0));

        Self { global_tags: tags }
    }

    /// Returns the global tags applied to every point.
    pub fn global_tags(&self) -> &[(String, String)] {
        &self.global_tags
    }

    /// Appends the encoded point to `buf`.
    pub fn encode(&self, point: &Point, buf: &mut Vec<u8>) {
        self.write_point(point, buf);
    }

    /// Encodes the point into a freshly allocated buffer.
    pub fn encode_to_vec(&self, point: &Point) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len(point));
        self.write_point(point, &mut buf);
        buf
    }

    /// Returns the exact number of bytes [`encode`](Self::encode) would write for `point`, without allocating.
    pub fn encoded_len(&self, point: &Point) -> usize {
        let mut counter = LenCounter::default();
        self.write_point(point, &mut counter);
        counter.0
    }

    fn write_point<O: Output>(&self, point: &Point, out: &mut O) {
        write_escaped(out, point.measurement(), MEASUREMENT_SPECIAL);

        let global_tags = self
            .global_tags
            .iter()
            .filter(|(k, _)| !point.has_tag(k))
            .map(|(k, v)| (k.as_str(), v.as_str()));
        for (key, value) in point.tags().chain(global_tags) {
            out.put_byte(b',');
            write_escaped(out, key, KEY_SPECIAL);
            out.put_byte(b'=');
            write_escaped(out, value, KEY_SPECIAL);
        }

        let mut int_writer = itoa::Buffer::new();
        let mut float_writer = ryu::Buffer::new();
        let mut first = true;
        for (key, value) in point.fields() {
            out.put_byte(if first { b' ' } else { b',' });
            first = false;

            write_escaped(out, key, KEY_SPECIAL);
            out.put_byte(b'=');
            match value {
                FieldValue::Integer(v) => {
                    out.put(int_writer.format(*v).as_bytes());
                    out.put_byte(b'i');
                }
                FieldValue::Float(v) => out.put(float_writer.format_finite(*v).as_bytes()),
                FieldValue::Boolean(v) => out.put(if *v { b"true" } else { b"false" }),
                FieldValue::String(v) => {
                    out.put_byte(b'"');
                    write_escaped(out, v, STRING_SPECIAL);
                    out.put_byte(b'"');
                }
            }
        }

        if let Some(timestamp) = point.timestamp() {
            out.put_byte(b' ');
            out.put(int_writer.format(timestamp).as_bytes());
        }
    }
}

fn write_escaped<O: Output>(out: &mut O, value: &str, special: &[u8]) {
    let bytes = value.as_bytes();
    let mut start = 0;
    for (idx, &byte) in bytes.iter().enumerate() {
        // Line breaks terminate a line no matter how they're escaped, so outside of quoted strings they're written as
        // an escaped space instead.
        let is_line_break = (byte == b'\n' || byte == b'\r') && special != STRING_SPECIAL;
        if !is_line_break && !special.contains(&byte) {
            continue;
        }

        out.put(&bytes[start..idx]);
        out.put_byte(b'\\');
        out.put_byte(if is_line_break { b' ' } else { byte });
        start = idx + 1;
    }
    out.put(&bytes[start..]);
}

#[cfg(test)]
mod tests {
    use proptest::{collection::btree_map, prelude::*};

    use super::LineEncoder;
    use crate::{
        point::{Point, GUID_TAG},
        test_util::parse_line,
    };

    fn encode(encoder: &LineEncoder, point: &Point) -> String {
        String::from_utf8(encoder.encode_to_vec(point)).unwrap()
    }

    fn without_guid(line: &str) -> String {
        // The guid is always a 36-character UUID, so cut it out of the encoded line.
        let start = line.find(GUID_TAG).unwrap();
        let end = start + GUID_TAG.len() + 1 + 36;
        format!("{}{}", &line[..start], &line[end..])
    }

    #[test]
    fn field_types() {
        let encoder = LineEncoder::default();
        let point = Point::builder("requests")
            .field("count", 5)
            .field("ratio", 0.5)
            .field("ok", true)
            .field("msg", "hi")
            .build()
            .unwrap();

        assert_eq!(
            without_guid(&encode(&encoder, &point)),
            "requests, count=5i,msg=\"hi\",ok=true,ratio=0.5"
        );
    }

    #[test]
    fn tags_and_timestamp() {
        let encoder = LineEncoder::default();
        let point = Point::builder("cpu")
            .field("value", 42.0)
            .tag("region", "us")
            .tag("host", "web01")
            .timestamp_nanos(1_556_813_561_098_000_000)
            .build()
            .unwrap();

        assert_eq!(
            without_guid(&encode(&encoder, &point)),
            "cpu,,host=web01,region=us value=42.0 1556813561098000000"
        );
    }

    #[test]
    fn escaping() {
        let encoder = LineEncoder::default();
        let point = Point::builder("my measurement,x")
            .field("field key", "say \"hi\" \\o/")
            .tag("tag=key", "value, with spaces")
            .tag("path", "c:\\temp")
            .build()
            .unwrap();

        let line = without_guid(&encode(&encoder, &point));
        let (series, fields) = line.split_once(" field").unwrap();
        assert_eq!(series, "my\\ measurement\\,x,,path=c:\\\\temp,tag\\=key=value\\,\\ with\\ spaces");
        assert_eq!(fields, "\\ key=\"say \\\"hi\\\" \\\\o/\"");
    }

    #[test]
    fn line_breaks_never_split_a_line() {
        let encoder = LineEncoder::default();
        let point = Point::builder("multi\nline")
            .field("text", "a\nb")
            .tag("t", "x\r\ny")
            .build()
            .unwrap();

        let line = encode(&encoder, &point);
        let parsed = parse_line(&line).unwrap();
        assert_eq!(parsed.measurement, "multi line");
        assert_eq!(parsed.tags["t"], "x  y");
        assert_eq!(parsed.fields["text"], "\"a\nb\"");
    }

    #[test]
    fn global_tags() {
        let encoder = LineEncoder::new([("env", "prod"), ("region", "eu"), ("", "skip"), ("env", "dup")]);
        assert_eq!(encoder.global_tags().len(), 2);

        let point = Point::builder("m").field("v", 1).tag("region", "us").build().unwrap();
        let parsed = parse_line(&encode(&encoder, &point)).unwrap();

        assert_eq!(parsed.tags["env"], "prod");
        assert_eq!(parsed.tags["region"], "us");
        assert_eq!(parsed.tags.len(), 3);
    }

    #[test]
    fn encoded_len_matches() {
        let encoder = LineEncoder::new([("dc", "ams1")]);
        let point = Point::builder("disk usage")
            .field("used", 123_456_789)
            .field("pct", 12.75)
            .field("label", "root \"fs\"")
            .tag("mount", "/var, /tmp")
            .timestamp_nanos(1)
            .build()
            .unwrap();

        assert_eq!(encoder.encoded_len(&point), encoder.encode_to_vec(&point).len());
    }

    proptest! {
        #[test]
        fn parse_roundtrip(
            measurement in "[a-z ,=\\\\]{1,16}",
            tags in btree_map("[a-z ,=]{1,8}", "[a-zA-Z0-9 ,=\\\\]{1,12}", 0..4),
            ints in btree_map("[a-z ,=]{1,8}", any::<i64>(), 1..4),
            text in "[ -~]{0,24}",
        ) {
            let mut builder = Point::builder(measurement.clone()).field("zz_text", text.clone()).tags(tags.clone());
            for (k, v) in &ints {
                builder = builder.field(k.clone(), *v);
            }
            let point = builder.build().unwrap();

            let encoder = LineEncoder::default();
            let line = encode(&encoder, &point);
            prop_assert_eq!(encoder.encoded_len(&point), line.len());

            let parsed = parse_line(&line).unwrap();
            prop_assert_eq!(parsed.measurement, measurement);
            prop_assert!(parsed.tags.contains_key(GUID_TAG));
            for (k, v) in &tags {
                prop_assert_eq!(&parsed.tags[k], v);
            }
            prop_assert_eq!(parsed.tags.len(), tags.len() + 1);
            for (k, v) in &ints {
                prop_assert_eq!(&parsed.fields[k], &format!("{v}i"));
            }
            prop_assert_eq!(parse_string_field(&parsed.fields["zz_text"]), text);
        }
    }

    fn parse_string_field(raw: &str) -> String {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::new();
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                out.extend(chars.next());
            } else {
                out.push(c);
            }
        }
        out
    }
}
