//! JPEG frame data structures

use bytes::Bytes;

/// JPEG start-of-image marker (SOI)
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker (EOI)
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Structural limits for frame assembly and validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Assembly buffer cap; exceeding it discards all buffered bytes
    pub max_buffer_bytes: usize,
    /// Smallest plausible JPEG frame
    pub min_frame_bytes: usize,
    /// Largest accepted JPEG frame
    pub max_frame_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 10 * 1024 * 1024,
            min_frame_bytes: 100,
            max_frame_bytes: 5 * 1024 * 1024,
        }
    }
}

/// A validated JPEG frame
///
/// `from_jpeg` is the sole constructor. Holding a `Frame` guarantees the
/// payload starts with SOI, ends with EOI, and its length lies within the
/// limits it was validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Validate and wrap JPEG bytes; `None` if the payload fails the check
    pub fn from_jpeg(data: Bytes, limits: &FrameLimits) -> Option<Self> {
        if Self::is_valid_jpeg(&data, limits) {
            Some(Self { data })
        } else {
            None
        }
    }

    /// Structural JPEG check: SOI prefix, EOI suffix, length within bounds
    pub fn is_valid_jpeg(data: &[u8], limits: &FrameLimits) -> bool {
        data.len() >= limits.min_frame_bytes
            && data.len() <= limits.max_frame_bytes
            && data.starts_with(&SOI)
            && data.ends_with(&EOI)
    }

    /// Get frame data as a byte slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get frame data as Bytes (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Get data length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg_bytes(len: usize) -> Bytes {
        assert!(len >= 4);
        let mut data = vec![0u8; len];
        data[0] = 0xFF;
        data[1] = 0xD8;
        data[len - 2] = 0xFF;
        data[len - 1] = 0xD9;
        Bytes::from(data)
    }

    #[test]
    fn accepts_well_formed_jpeg() {
        let limits = FrameLimits::default();
        let frame = Frame::from_jpeg(jpeg_bytes(200), &limits).unwrap();
        assert_eq!(frame.len(), 200);
        assert!(frame.data().starts_with(&SOI));
        assert!(frame.data().ends_with(&EOI));
    }

    #[test]
    fn rejects_missing_markers() {
        let limits = FrameLimits::default();

        let mut no_soi = jpeg_bytes(200).to_vec();
        no_soi[0] = 0x00;
        assert!(Frame::from_jpeg(Bytes::from(no_soi), &limits).is_none());

        let mut no_eoi = jpeg_bytes(200).to_vec();
        no_eoi[199] = 0x00;
        assert!(Frame::from_jpeg(Bytes::from(no_eoi), &limits).is_none());
    }

    #[test]
    fn rejects_out_of_bounds_lengths() {
        let limits = FrameLimits {
            max_buffer_bytes: 1024,
            min_frame_bytes: 100,
            max_frame_bytes: 500,
        };

        assert!(Frame::from_jpeg(jpeg_bytes(99), &limits).is_none());
        assert!(Frame::from_jpeg(jpeg_bytes(100), &limits).is_some());
        assert!(Frame::from_jpeg(jpeg_bytes(500), &limits).is_some());
        assert!(Frame::from_jpeg(jpeg_bytes(501), &limits).is_none());
    }
}
