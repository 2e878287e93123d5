use crate::error::{EngineError, Result};
use crate::protocol::compression::Codec;
use crate::protocol::encoder::{HEADER_SIZE, MAGIC, NULL_CELL, VERSION};
use crate::protocol::row_set::{ColumnDesc, RowSet};

/// Parses result buffers produced by `ResultEncoder`. Bindings ship their
/// own decoder; this one backs the engine's tests and the metrics accessor.
pub struct ResultDecoder;

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| EngineError::Protocol("buffer truncated".to_string()))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl ResultDecoder {
    pub fn decode(buffer: &[u8]) -> Result<RowSet> {
        if buffer.len() < HEADER_SIZE {
            return Err(EngineError::Protocol(format!(
                "buffer too short for header: {} bytes",
                buffer.len()
            )));
        }

        let mut header = Reader::new(buffer);
        let magic = header.u32()?;
        if magic != MAGIC {
            return Err(EngineError::Protocol(format!(
                "bad magic: expected 0x{:08X}, got 0x{:08X}",
                MAGIC, magic
            )));
        }
        let version = header.u16()?;
        if version != VERSION {
            return Err(EngineError::Protocol(format!(
                "unsupported protocol version: {}",
                version
            )));
        }
        let column_count = header.u32()? as usize;
        let row_count = header.u32()? as usize;
        let payload_size = header.u32()? as usize;
        let codec = Codec::from_wire(header.u8()?)
            .map_err(|e| EngineError::Protocol(e.to_string()))?;

        if buffer.len() != HEADER_SIZE + payload_size {
            return Err(EngineError::Protocol(format!(
                "payload size mismatch: header says {}, buffer has {}",
                payload_size,
                buffer.len() - HEADER_SIZE
            )));
        }

        let payload = codec.decompress(&buffer[HEADER_SIZE..])?;
        let mut r = Reader::new(&payload);

        let mut rows = RowSet::new();
        for _ in 0..column_count {
            let name_len = r.u16()? as usize;
            let name = std::str::from_utf8(r.take(name_len)?)
                .map_err(|_| EngineError::Protocol("column name is not UTF-8".to_string()))?
                .to_string();
            let sql_type = r.u16()? as i16;
            let nullable = r.u8()? != 0;
            let declared_size = r.u32()?;
            rows.columns.push(ColumnDesc {
                name,
                sql_type,
                nullable,
                declared_size,
            });
        }

        for _ in 0..row_count {
            let mut row = Vec::with_capacity(column_count);
            for _ in 0..column_count {
                let len = r.u32()?;
                if len == NULL_CELL {
                    row.push(None);
                } else {
                    row.push(Some(r.take(len as usize)?.to_vec()));
                }
            }
            rows.rows.push(row);
        }

        Ok(rows)
    }
}
