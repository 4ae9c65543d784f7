use std::vec::Drain;

use crate::{encoder::LineEncoder, point::Point};

/// Smallest payload that can hold a valid point: `m,__guid=<uuid> f=0i`.
pub(crate) const SMALLEST_VALID_PAYLOAD_LEN: usize = 1 + 1 + 6 + 1 + 36 + 1 + 4;

/// Result of writing a single point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteResult {
    /// The point was added to the current payload.
    Written,

    /// The point was larger than the maximum payload length, and was placed in a payload of its own.
    Oversized,
}

/// Writes points into newline-delimited payloads that respect a maximum payload length.
///
/// Line protocol is newline delimited, so multiple points can be sent in a single datagram and split apart by the
/// collector. Each point is encoded into a scratch buffer first, which gives its exact length before it's committed:
/// if appending it would push the current payload over the limit, the current payload is finalized and a new one is
/// started.
///
/// A point that exceeds the limit on its own is never dropped. It's placed into a payload by itself, which is then
/// finalized immediately so nothing else gets appended to it.
pub(crate) struct PayloadWriter {
    max_payload_len: usize,
    encoder: LineEncoder,
    payloads_buf: Vec<u8>,
    offsets: Vec<usize>,
    points_buf: Vec<usize>,
    point_buf: Vec<u8>,
    current_points: usize,
}

impl PayloadWriter {
    /// Creates a new `PayloadWriter` with the given maximum payload length.
    pub fn new(max_payload_len: usize, encoder: LineEncoder) -> Self {
        // `SenderConfig::validate` rejects this too; a writer built any other way must still hold at least one point.
        assert!(
            max_payload_len >= SMALLEST_VALID_PAYLOAD_LEN,
            "maximum payload length must be at least {SMALLEST_VALID_PAYLOAD_LEN} bytes to hold any point",
        );

        Self {
            max_payload_len,
            encoder,
            payloads_buf: Vec::new(),
            offsets: Vec::new(),
            points_buf: Vec::new(),
            point_buf: Vec::new(),
            current_points: 0,
        }
    }

    fn last_offset(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Returns the number of bytes in the current, unfinalized payload.
    fn current_payload_len(&self) -> usize {
        self.payloads_buf.len() - self.last_offset()
    }

    /// Returns `true` if there is a partially-filled payload that hasn't been finalized yet.
    pub fn has_partial(&self) -> bool {
        self.current_payload_len() != 0
    }

    /// Returns `true` if there are finalized payloads waiting to be sent.
    pub fn has_ready(&self) -> bool {
        !self.offsets.is_empty()
    }

    /// Finalizes the current payload.
    ///
    /// If the current payload is empty, this method does nothing.
    fn finalize_current_payload(&mut self) {
        if self.current_payload_len() == 0 {
            return;
        }

        self.offsets.push(self.payloads_buf.len());
        self.points_buf.push(self.current_points);
        self.current_points = 0;
    }

    /// Writes a point into the current payload.
    pub fn write_point(&mut self, point: &Point) -> WriteResult {
        self.point_buf.clear();
        self.encoder.encode(point, &mut self.point_buf);
        let point_len = self.point_buf.len();

        if point_len > self.max_payload_len {
            self.finalize_current_payload();
            self.payloads_buf.extend_from_slice(&self.point_buf);
            self.current_points = 1;
            self.finalize_current_payload();
            return WriteResult::Oversized;
        }

        // Points are joined with a newline, so anything after the first point in a payload costs one extra byte.
        let current_payload_len = self.current_payload_len();
        let separator_len = usize::from(current_payload_len != 0);
        if current_payload_len + separator_len + point_len > self.max_payload_len {
            self.finalize_current_payload();
        } else if separator_len != 0 {
            self.payloads_buf.push(b'\n');
        }

        self.payloads_buf.extend_from_slice(&self.point_buf);
        self.current_points += 1;
        WriteResult::Written
    }

    /// Returns a consuming iterator over all finalized payloads.
    ///
    /// The current payload, if any, is left in place so that more points can be appended to it.
    pub fn ready_payloads(&mut self) -> Payloads<'_> {
        Payloads::new(&mut self.payloads_buf, &mut self.offsets, &mut self.points_buf)
    }

    /// Returns a consuming iterator over all payloads written by this writer, including the current one.
    ///
    /// The writer is empty once the iterator is dropped.
    pub fn payloads(&mut self) -> Payloads<'_> {
        self.finalize_current_payload();
        self.ready_payloads()
    }
}

/// A finalized payload.
pub(crate) struct Payload<'a> {
    /// Encoded, newline-joined points.
    pub bytes: &'a [u8],

    /// Number of points in the payload.
    pub points: usize,
}

/// Iterator over the finalized payloads of a `PayloadWriter`.
///
/// When dropped, all finalized payloads are removed from the writer whether or not they were consumed, and any
/// unfinalized bytes are moved to the front of the buffer.
pub(crate) struct Payloads<'a> {
    payloads_buf: &'a mut Vec<u8>,
    end: usize,
    start: usize,
    offsets: Drain<'a, usize>,
    points: Drain<'a, usize>,
}

impl<'a> Payloads<'a> {
    fn new(
        payloads_buf: &'a mut Vec<u8>,
        offsets: &'a mut Vec<usize>,
        points: &'a mut Vec<usize>,
    ) -> Self {
        let end = offsets.last().copied().unwrap_or(0);
        Self { payloads_buf, end, start: 0, offsets: offsets.drain(..), points: points.drain(..) }
    }

    /// Returns the number of remaining payloads.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns the next payload.
    ///
    /// If there are no more payloads, `None` is returned.
    pub fn next_payload(&mut self) -> Option<Payload<'_>> {
        let offset = self.offsets.next()?;
        let points = self.points.next().unwrap_or(0);

        let bytes = &self.payloads_buf[self.start..offset];
        self.start = offset;

        Some(Payload { bytes, points })
    }
}

impl Drop for Payloads<'_> {
    fn drop(&mut self) {
        self.payloads_buf.drain(..self.end);
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec as arb_vec, prelude::*};

    use super::{PayloadWriter, WriteResult, SMALLEST_VALID_PAYLOAD_LEN};
    use crate::{encoder::LineEncoder, point::Point, test_util::parse_line};

    fn point(measurement: &str, value: i64) -> Point {
        Point::builder(measurement).field("value", value).build().unwrap()
    }

    fn collect(writer: &mut PayloadWriter) -> Vec<(String, usize)> {
        let mut payloads = writer.payloads();
        let mut out = Vec::new();
        while let Some(payload) = payloads.next_payload() {
            out.push((String::from_utf8(payload.bytes.to_vec()).unwrap(), payload.points));
        }
        out
    }

    #[test]
    fn smallest_payload_fits_smallest_point() {
        let point = Point::builder("m").field("f", 0).build().unwrap();
        assert_eq!(LineEncoder::default().encoded_len(&point), SMALLEST_VALID_PAYLOAD_LEN);
    }

    #[test]
    fn joins_points_with_newlines() {
        let mut writer = PayloadWriter::new(8192, LineEncoder::default());
        for i in 0..3 {
            assert_eq!(writer.write_point(&point("m", i)), WriteResult::Written);
        }

        let payloads = collect(&mut writer);
        assert_eq!(payloads.len(), 1);

        let (body, points) = &payloads[0];
        assert_eq!(*points, 3);
        assert!(!body.ends_with('\n'));

        let values: Vec<_> =
            body.split('\n').map(|line| parse_line(line).unwrap().fields["value"].clone()).collect();
        assert_eq!(values, vec!["0i", "1i", "2i"]);
    }

    #[test]
    fn splits_at_limit() {
        let encoder = LineEncoder::default();
        let point_len = encoder.encoded_len(&point("m", 1));

        // Room for exactly two points and their separator.
        let mut writer = PayloadWriter::new(2 * point_len + 1, encoder);
        for i in 1..=5 {
            writer.write_point(&point("m", i));
        }
        assert!(writer.has_ready());
        assert!(writer.has_partial());

        let payloads = collect(&mut writer);
        let points: Vec<_> = payloads.iter().map(|(_, n)| *n).collect();
        assert_eq!(points, vec![2, 2, 1]);
        for (body, _) in &payloads {
            assert!(body.len() <= 2 * point_len + 1);
        }
        assert!(!writer.has_partial());
        assert!(!writer.has_ready());
    }

    #[test]
    fn oversized_point_is_sent_alone() {
        let mut writer = PayloadWriter::new(SMALLEST_VALID_PAYLOAD_LEN, LineEncoder::default());
        let big = Point::builder("big").field("text", "x".repeat(256)).build().unwrap();

        assert_eq!(writer.write_point(&Point::builder("m").field("f", 0).build().unwrap()), WriteResult::Written);
        assert_eq!(writer.write_point(&big), WriteResult::Oversized);
        assert_eq!(writer.write_point(&Point::builder("m").field("f", 1).build().unwrap()), WriteResult::Written);

        let payloads = collect(&mut writer);
        let points: Vec<_> = payloads.iter().map(|(_, n)| *n).collect();
        assert_eq!(points, vec![1, 1, 1]);
        assert!(payloads[1].0.starts_with("big,"));
        assert!(payloads[1].0.len() > SMALLEST_VALID_PAYLOAD_LEN);
    }

    #[test]
    fn ready_payloads_keep_partial() {
        let encoder = LineEncoder::default();
        let point_len = encoder.encoded_len(&point("m", 1));
        let mut writer = PayloadWriter::new(point_len, encoder);

        writer.write_point(&point("m", 1));
        writer.write_point(&point("m", 2));

        {
            let mut ready = writer.ready_payloads();
            assert_eq!(ready.len(), 1);
            let payload = ready.next_payload().unwrap();
            assert_eq!(parse_line(std::str::from_utf8(payload.bytes).unwrap()).unwrap().fields["value"], "1i");
        }

        assert!(!writer.has_ready());
        assert!(writer.has_partial());

        let payloads = collect(&mut writer);
        assert_eq!(payloads.len(), 1);
        assert_eq!(parse_line(&payloads[0].0).unwrap().fields["value"], "2i");
    }

    #[test]
    fn unconsumed_payloads_are_cleared() {
        let mut writer = PayloadWriter::new(8192, LineEncoder::default());
        writer.write_point(&point("m", 1));
        drop(writer.payloads());

        assert!(!writer.has_ready());
        assert!(!writer.has_partial());
        assert!(collect(&mut writer).is_empty());
    }

    proptest! {
        #[test]
        fn property_test_gauntlet(
            payload_limit in SMALLEST_VALID_PAYLOAD_LEN..2048usize,
            inputs in arb_vec(("[a-z]{1,24}", "[ -~]{0,160}"), 1..128),
        ) {
            let mut writer = PayloadWriter::new(payload_limit, LineEncoder::new([("env", "test")]));
            let mut oversized = 0;
            for (measurement, text) in &inputs {
                let point = Point::builder(measurement.as_str()).field("text", text.as_str()).build().unwrap();
                if writer.write_point(&point) == WriteResult::Oversized {
                    oversized += 1;
                }
            }

            let mut payloads = writer.payloads();
            let mut points_emitted = 0;
            let mut oversized_emitted = 0;
            while let Some(payload) = payloads.next_payload() {
                let lines = std::str::from_utf8(payload.bytes).unwrap().split('\n').count();
                prop_assert_eq!(lines, payload.points);

                if payload.bytes.len() > payload_limit {
                    prop_assert_eq!(payload.points, 1);
                    oversized_emitted += 1;
                }
                points_emitted += payload.points;
            }

            prop_assert_eq!(points_emitted, inputs.len());
            prop_assert_eq!(oversized_emitted, oversized);
        }
    }
}
