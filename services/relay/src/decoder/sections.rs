use super::DecodeError;
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Uncompressed size covered by one chunk
pub const CHUNK_SIZE: usize = 0x2000;

/// Upper bound for size-prefixed sections
const MAX_SECTION_SIZE: usize = 64 * 1024 * 1024;

/// Reader of `checksum:u32, chunk_count:u32` sections, each chunk being
/// `length:u32, bytes` and zlib-compressed when shorter than its share.
pub struct SectionReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SectionReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Whether all input has been consumed
    #[cfg(test)]
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        let bytes = self.data.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a section of known uncompressed size
    pub fn section(&mut self, name: &'static str, size: usize) -> Result<Vec<u8>, DecodeError> {
        let _checksum = self.read_u32()?;
        let chunk_count = self.read_u32()? as usize;

        let max_chunks = size.div_ceil(CHUNK_SIZE).max(1);
        if chunk_count > max_chunks {
            return Err(DecodeError::corrupt(
                name,
                format!("{} chunks for {} bytes", chunk_count, size),
            ));
        }

        let mut out = Vec::with_capacity(size);
        for _ in 0..chunk_count {
            let length = self.read_u32()? as usize;
            let chunk = self.take(length)?;
            let expected = (size - out.len()).min(CHUNK_SIZE);

            if length < expected {
                inflate_chunk(name, chunk, expected, &mut out)?;
            } else if length == expected {
                out.extend_from_slice(chunk);
            } else {
                return Err(DecodeError::corrupt(
                    name,
                    format!("chunk of {} bytes exceeds remaining {}", length, expected),
                ));
            }
        }

        if out.len() != size {
            return Err(DecodeError::corrupt(
                name,
                format!("expected {} bytes, got {}", size, out.len()),
            ));
        }

        Ok(out)
    }

    /// Read a section whose size is stored in a preceding 4-byte section
    pub fn sized_section(&mut self, name: &'static str) -> Result<Vec<u8>, DecodeError> {
        let size_data = self.section(name, 4)?;
        let size = u32::from_le_bytes([size_data[0], size_data[1], size_data[2], size_data[3]]) as usize;
        if size > MAX_SECTION_SIZE {
            return Err(DecodeError::corrupt(
                name,
                format!("declared size {} is too large", size),
            ));
        }
        self.section(name, size)
    }
}

fn inflate_chunk(
    name: &'static str,
    chunk: &[u8],
    expected: usize,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let start = out.len();
    ZlibDecoder::new(chunk)
        .take(expected as u64 + 1)
        .read_to_end(out)
        .map_err(|e| DecodeError::corrupt(name, format!("bad compressed chunk: {}", e)))?;

    let inflated = out.len() - start;
    if inflated != expected {
        return Err(DecodeError::corrupt(
            name,
            format!("chunk inflated to {} bytes, expected {}", inflated, expected),
        ));
    }
    Ok(())
}
