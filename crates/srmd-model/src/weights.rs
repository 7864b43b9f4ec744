//! Reader for ncnn's `.bin` weight stream.
//!
//! Weight blobs are prefixed by a 4-byte storage flag; bias blobs are raw
//! little-endian `f32` with no flag.  Payloads are padded to 4 bytes.

use std::path::Path;

use half::f16;
use srmd_core::error::{EngineError, Result};

/// IEEE half precision payload.
pub const TAG_F16: u32 = 0x0130_6B47;
/// Per-channel int8 payload (needs calibration scales; not supported).
pub const TAG_INT8: u32 = 0x000D_4B38;
/// Raw `f32` payload written by newer converters.
pub const TAG_F32: u32 = 0x0002_C056;

/// Entries in the 8-bit quantization table.
const QUANT_TABLE_LEN: usize = 256;

#[inline]
fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Sequential cursor over a `.bin` file.
pub struct WeightReader<'a> {
    data: &'a [u8],
    offset: usize,
    path: &'a Path,
}

impl<'a> WeightReader<'a> {
    pub fn new(data: &'a [u8], path: &'a Path) -> Self {
        Self {
            data,
            offset: 0,
            path,
        }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(EngineError::parse(
                self.path,
                format!(
                    "truncated weights: {what} needs {len} bytes at offset {}, {} left",
                    self.offset,
                    self.remaining()
                ),
            ));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// `count` raw little-endian floats with no storage flag (bias blobs).
    pub fn read_raw(&mut self, count: usize) -> Result<Vec<f32>> {
        let bytes = self.take(count * 4, "raw f32 blob")?;
        Ok(decode_f32(bytes))
    }

    /// `count` weights preceded by a storage flag.
    pub fn read_weights(&mut self, count: usize) -> Result<Vec<f32>> {
        let flag = self.take(4, "storage flag")?;
        let tag = u32::from_le_bytes([flag[0], flag[1], flag[2], flag[3]]);

        match tag {
            TAG_F16 => {
                let bytes = self.take(align4(count * 2), "f16 blob")?;
                Ok(bytes[..count * 2]
                    .chunks_exact(2)
                    .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
                    .collect())
            }
            TAG_INT8 => Err(EngineError::parse(
                self.path,
                format!("int8 weight storage at offset {} is not supported", self.offset - 4),
            )),
            TAG_F32 => self.read_raw(count),
            0 => self.read_raw(count),
            _ => {
                let table = decode_f32(self.take(QUANT_TABLE_LEN * 4, "quantization table")?);
                let indices = self.take(align4(count), "quantized indices")?;
                Ok(indices[..count]
                    .iter()
                    .map(|&i| table[i as usize])
                    .collect())
            }
        }
    }
}

fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> &'static Path {
        Path::new("w.bin")
    }

    #[test]
    fn reads_raw_and_flagged_f32() {
        let mut bytes = 0u32.to_le_bytes().to_vec();
        bytes.extend([1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()));
        bytes.extend(0.25f32.to_le_bytes());
        let mut reader = WeightReader::new(&bytes, path());
        assert_eq!(reader.read_weights(2).unwrap(), vec![1.5, -2.0]);
        assert_eq!(reader.read_raw(1).unwrap(), vec![0.25]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn reads_f16_with_padding() {
        let mut bytes = TAG_F16.to_le_bytes().to_vec();
        for v in [1.0f32, 0.5, -3.0] {
            bytes.extend(f16::from_f32(v).to_le_bytes());
        }
        bytes.extend([0, 0]);
        bytes.extend(7.0f32.to_le_bytes());
        let mut reader = WeightReader::new(&bytes, path());
        assert_eq!(reader.read_weights(3).unwrap(), vec![1.0, 0.5, -3.0]);
        assert_eq!(reader.read_raw(1).unwrap(), vec![7.0]);
    }

    #[test]
    fn reads_quantized_table() {
        let mut bytes = vec![1, 0, 0, 0];
        bytes.extend((0..256).flat_map(|i| (i as f32 * 0.5).to_le_bytes()));
        bytes.extend([4, 0, 255, 0]);
        let mut reader = WeightReader::new(&bytes, path());
        assert_eq!(reader.read_weights(3).unwrap(), vec![2.0, 0.0, 127.5]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn rejects_int8_and_truncation() {
        let bytes = TAG_INT8.to_le_bytes().to_vec();
        assert!(WeightReader::new(&bytes, path()).read_weights(1).is_err());

        let mut bytes = 0u32.to_le_bytes().to_vec();
        bytes.extend(1.0f32.to_le_bytes());
        let err = WeightReader::new(&bytes, path()).read_weights(2).unwrap_err();
        assert!(err.to_string().contains("truncated"), "{err}");
    }
}
