//! Canonical 44-byte RIFF/WAVE header for linear PCM.

pub const WAV_HEADER_LEN: usize = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    pub fn mono16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// Build the header for a payload of `data_len` bytes.
///
/// For streamed uploads `data_len` is the declared upper bound, not the
/// number of bytes that will actually follow.
pub fn build_header(fmt: &WavFormat, data_len: u32) -> [u8; WAV_HEADER_LEN] {
    let mut h = [0u8; WAV_HEADER_LEN];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&data_len.saturating_add(WAV_HEADER_LEN as u32 - 8).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&1u16.to_le_bytes()); // linear PCM
    h[22..24].copy_from_slice(&fmt.channels.to_le_bytes());
    h[24..28].copy_from_slice(&fmt.sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&fmt.byte_rate().to_le_bytes());
    h[32..34].copy_from_slice(&fmt.block_align().to_le_bytes());
    h[34..36].copy_from_slice(&fmt.bits_per_sample.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_len.to_le_bytes());
    h
}

/// Declared payload length of a header built by [`build_header`].
pub fn declared_len(header: &[u8]) -> Option<u32> {
    if header.len() < WAV_HEADER_LEN || &header[36..40] != b"data" {
        return None;
    }
    Some(u32::from_le_bytes([header[40], header[41], header[42], header[43]]))
}
