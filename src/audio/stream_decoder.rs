//! Frame-oriented decoder trait for the playback pipeline.

/// Result of one decode attempt over the accumulation buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Bytes of input the parsed frame occupied. 0 means no frame was found
    /// (more input is needed).
    pub frame_bytes: usize,
    /// Decoded samples per channel. 0 for metadata/padding frames.
    pub samples: usize,
    pub channels: u32,
    pub sample_rate: u32,
}

impl FrameInfo {
    pub fn parsed(&self) -> bool {
        self.frame_bytes > 0
    }
}

/// A streaming decoder that converts one compressed frame at a time into
/// interleaved i16 PCM.
///
/// Implementations keep their inter-frame state (bit reservoir etc.) between
/// calls; [`reset`](FrameDecoder::reset) reinitializes it for a new stream.
pub trait FrameDecoder: Send {
    fn reset(&mut self);

    /// Parse and decode the first frame found in `input`, writing
    /// interleaved samples to `pcm`.
    fn decode_frame(&mut self, input: &[u8], pcm: &mut [i16]) -> FrameInfo;

    /// Size of the `pcm` slice (in i16 samples) that any frame fits into.
    fn max_frame_samples(&self) -> usize;
}
