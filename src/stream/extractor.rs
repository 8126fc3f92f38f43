//! Incremental JPEG frame extraction
//!
//! Reassembles discrete JPEG frames from a raw byte stream delivered in
//! arbitrary chunk boundaries (a capture subprocess's stdout). Bytes are
//! accumulated until a complete SOI..EOI span is present, validated, and
//! emitted. Emission order always matches stream order.

use bytes::{Bytes, BytesMut};

use super::frame::{Frame, FrameLimits, EOI, SOI};

/// Extraction counters, surfaced through the session status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    pub frames_extracted: u64,
    pub frames_discarded: u64,
    pub overflows: u64,
}

/// Incremental JPEG frame parser
///
/// One extractor per capture attempt. Feed raw chunks in stream order and
/// drain the returned iterator; frames left unconsumed stay buffered for
/// the next call. Results are identical regardless of how the stream is
/// split into chunks.
#[derive(Debug)]
pub struct FrameExtractor {
    buf: BytesMut,
    limits: FrameLimits,
    stats: ExtractorStats,
}

impl FrameExtractor {
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            buf: BytesMut::new(),
            limits,
            stats: ExtractorStats::default(),
        }
    }

    /// Append a chunk and return an iterator draining completed frames.
    ///
    /// If accumulating the chunk would exceed the buffer cap, everything
    /// buffered is dropped (the chunk included), one overflow is counted,
    /// and reassembly resumes with the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> ExtractedFrames<'_> {
        if self.buf.len() + chunk.len() > self.limits.max_buffer_bytes {
            tracing::warn!(
                buffered = self.buf.len(),
                incoming = chunk.len(),
                cap = self.limits.max_buffer_bytes,
                "Frame assembly buffer overflow, discarding"
            );
            self.buf.clear();
            self.stats.overflows += 1;
        } else {
            self.buf.extend_from_slice(chunk);
        }
        ExtractedFrames { extractor: self }
    }

    /// Bytes currently held for an incomplete frame
    pub fn buffered_bytes(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> ExtractorStats {
        self.stats
    }

    /// Position of the first `FF xx` marker at or after `from`
    fn find_marker(haystack: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
        if haystack.len() < from + 2 {
            return None;
        }
        haystack[from..]
            .windows(2)
            .position(|w| w == marker)
            .map(|p| p + from)
    }
}

/// Draining iterator returned by [`FrameExtractor::feed`]
///
/// Lazy: each `next()` scans for at most one frame. Dropping the iterator
/// leaves any remaining complete frames buffered.
pub struct ExtractedFrames<'a> {
    extractor: &'a mut FrameExtractor,
}

impl Iterator for ExtractedFrames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let ex = &mut *self.extractor;
        loop {
            let Some(start) = FrameExtractor::find_marker(&ex.buf, 0, SOI) else {
                // Desynchronized: nothing before the next frame start is
                // useful. A lone trailing 0xFF may be the first byte of a
                // start marker split across chunks, so it is kept.
                if ex.buf.last() == Some(&0xFF) {
                    let keep_from = ex.buf.len() - 1;
                    let _ = ex.buf.split_to(keep_from);
                } else {
                    ex.buf.clear();
                }
                return None;
            };

            if start > 0 {
                // Drop garbage preceding the frame start
                let _ = ex.buf.split_to(start);
            }

            let Some(end) = FrameExtractor::find_marker(&ex.buf, 2, EOI) else {
                // Partial frame, wait for more data
                return None;
            };

            let candidate: Bytes = ex.buf.split_to(end + 2).freeze();
            match Frame::from_jpeg(candidate, &ex.limits) {
                Some(frame) => {
                    ex.stats.frames_extracted += 1;
                    return Some(frame);
                }
                None => {
                    // Malformed or out of bounds: skip past it quietly
                    ex.stats.frames_discarded += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Limits small enough to exercise bounds without megabyte payloads
    fn small_limits() -> FrameLimits {
        FrameLimits {
            max_buffer_bytes: 64 * 1024,
            min_frame_bytes: 10,
            max_frame_bytes: 1024,
        }
    }

    fn jpeg_bytes(len: usize, fill: u8) -> Vec<u8> {
        assert!(len >= 4);
        let mut data = vec![fill; len];
        data[0] = 0xFF;
        data[1] = 0xD8;
        data[len - 2] = 0xFF;
        data[len - 1] = 0xD9;
        data
    }

    fn drain(ex: &mut FrameExtractor, chunk: &[u8]) -> Vec<Frame> {
        ex.feed(chunk).collect()
    }

    #[test]
    fn extracts_single_frame_from_single_chunk() {
        let mut ex = FrameExtractor::new(small_limits());
        let frame = jpeg_bytes(120, 0xAB);

        let got = drain(&mut ex, &frame);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data(), &frame[..]);
        assert_eq!(ex.buffered_bytes(), 0);
    }

    #[test]
    fn results_independent_of_chunk_boundaries() {
        // Garbage, two frames, garbage between and after, split at every
        // possible position; the extracted sequence must never change.
        let mut stream = vec![0x00, 0x11, 0xFF, 0x22];
        let frame_a = jpeg_bytes(37, 0xA1);
        let frame_b = jpeg_bytes(52, 0xB2);
        stream.extend_from_slice(&frame_a);
        stream.extend_from_slice(&[0xDE, 0xAD]);
        stream.extend_from_slice(&frame_b);
        stream.extend_from_slice(&[0xFF]);

        let mut whole = FrameExtractor::new(small_limits());
        let expected = drain(&mut whole, &stream);
        assert_eq!(expected.len(), 2);
        assert_eq!(expected[0].data(), &frame_a[..]);
        assert_eq!(expected[1].data(), &frame_b[..]);

        for split in 0..=stream.len() {
            let mut ex = FrameExtractor::new(small_limits());
            let mut got = drain(&mut ex, &stream[..split]);
            got.extend(drain(&mut ex, &stream[split..]));
            assert_eq!(got, expected, "split at {split} changed the result");
        }
    }

    #[test]
    fn retains_lone_trailing_ff_while_desynchronized() {
        let mut ex = FrameExtractor::new(small_limits());

        // Garbage ending exactly between the FF and D8 of a start marker
        assert!(drain(&mut ex, &[0x01, 0x02, 0x03, 0xFF]).is_empty());
        assert_eq!(ex.buffered_bytes(), 1);

        let mut rest = jpeg_bytes(40, 0xCC);
        rest.remove(0); // the 0xFF is already buffered
        let got = drain(&mut ex, &rest);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].len(), 40);
    }

    #[test]
    fn clears_garbage_without_start_marker() {
        let mut ex = FrameExtractor::new(small_limits());
        assert!(drain(&mut ex, &[0x10, 0x20, 0x30, 0x40]).is_empty());
        assert_eq!(ex.buffered_bytes(), 0);
    }

    #[test]
    fn partial_frame_carries_across_feeds() {
        let mut ex = FrameExtractor::new(small_limits());
        let frame = jpeg_bytes(120, 0x55);

        // Cut mid-frame: no emission yet, partial bytes retained
        assert!(drain(&mut ex, &frame[..70]).is_empty());
        assert_eq!(ex.buffered_bytes(), 70);

        let got = drain(&mut ex, &frame[70..]);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data(), &frame[..]);
    }

    #[test]
    fn embedded_start_marker_stays_inside_candidate() {
        // Two start markers before the first end marker: the candidate
        // spans from the first start to the first end.
        let mut frame = jpeg_bytes(60, 0x77);
        frame[20] = 0xFF;
        frame[21] = 0xD8;

        let mut ex = FrameExtractor::new(small_limits());
        let got = drain(&mut ex, &frame);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data(), &frame[..]);
    }

    #[test]
    fn undersized_candidate_discarded_scan_continues() {
        let mut ex = FrameExtractor::new(small_limits());
        let mut stream = vec![0xFF, 0xD8, 0xFF, 0xD9]; // 4 bytes, below minimum
        let valid = jpeg_bytes(30, 0x99);
        stream.extend_from_slice(&valid);

        let got = drain(&mut ex, &stream);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data(), &valid[..]);
        assert_eq!(ex.stats().frames_discarded, 1);
        assert_eq!(ex.stats().frames_extracted, 1);
    }

    #[test]
    fn oversized_candidate_discarded() {
        let mut ex = FrameExtractor::new(small_limits());
        let too_big = jpeg_bytes(2000, 0x42); // above max_frame_bytes

        assert!(drain(&mut ex, &too_big).is_empty());
        assert_eq!(ex.stats().frames_discarded, 1);
    }

    #[test]
    fn overflow_discards_buffer_and_counts() {
        // Default cap is 10 MiB; a start marker followed by 11 MiB of
        // filler must overflow, leave the buffer empty, and emit nothing.
        let mut ex = FrameExtractor::new(FrameLimits::default());
        let mut stream = vec![0xFF, 0xD8];
        stream.extend(std::iter::repeat(0u8).take(11 * 1024 * 1024));

        assert!(drain(&mut ex, &stream).is_empty());
        assert_eq!(ex.stats().overflows, 1);
        assert_eq!(ex.buffered_bytes(), 0);
        assert_eq!(ex.stats().frames_extracted, 0);
    }

    #[test]
    fn overflow_applies_across_accumulated_chunks() {
        let limits = FrameLimits {
            max_buffer_bytes: 100,
            min_frame_bytes: 10,
            max_frame_bytes: 90,
        };
        let mut ex = FrameExtractor::new(limits);

        // A start marker then filler fed in small chunks past the cap
        assert!(drain(&mut ex, &[0xFF, 0xD8]).is_empty());
        for _ in 0..4 {
            assert!(drain(&mut ex, &[0u8; 30]).is_empty());
        }
        assert_eq!(ex.stats().overflows, 1);

        // Reassembly recovers with the next complete frame
        let frame = jpeg_bytes(50, 0x33);
        let got = drain(&mut ex, &frame);
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn unconsumed_frames_persist_until_next_feed() {
        let mut ex = FrameExtractor::new(small_limits());
        let frame_a = jpeg_bytes(30, 0x01);
        let frame_b = jpeg_bytes(30, 0x02);
        let mut stream = frame_a.clone();
        stream.extend_from_slice(&frame_b);

        let first = ex.feed(&stream).next();
        assert_eq!(first.unwrap().data(), &frame_a[..]);

        // Iterator dropped after one frame; the second is still there
        let got = drain(&mut ex, &[]);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data(), &frame_b[..]);
    }

    #[test]
    fn empty_chunk_is_a_noop() {
        let mut ex = FrameExtractor::new(small_limits());
        let frame = jpeg_bytes(40, 0x88);
        assert!(drain(&mut ex, &frame[..20]).is_empty());
        let buffered = ex.buffered_bytes();

        assert!(drain(&mut ex, &[]).is_empty());
        assert_eq!(ex.buffered_bytes(), buffered);
    }
}
