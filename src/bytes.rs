//! Big-endian readers and writers for class file structures.

use crate::error::ClassReadError;

pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    /// Skips the switch padding that follows the opcode at `opcode_offset`.
    pub(crate) fn align4(&mut self, opcode_offset: usize) -> Result<(), ClassReadError> {
        let padding = (4 - ((opcode_offset + 1) % 4)) % 4;
        self.read_bytes(padding)?;
        Ok(())
    }

    pub(crate) fn read_u1(&mut self) -> Result<u8, ClassReadError> {
        if self.pos >= self.data.len() {
            return Err(ClassReadError::UnexpectedEof);
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub(crate) fn read_i1(&mut self) -> Result<i8, ClassReadError> {
        Ok(self.read_u1()? as i8)
    }

    pub(crate) fn read_u2(&mut self) -> Result<u16, ClassReadError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_i2(&mut self) -> Result<i16, ClassReadError> {
        Ok(self.read_u2()? as i16)
    }

    pub(crate) fn read_u4(&mut self) -> Result<u32, ClassReadError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_i4(&mut self) -> Result<i32, ClassReadError> {
        Ok(self.read_u4()? as i32)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u64, ClassReadError> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ClassReadError> {
        if self.pos + len > self.data.len() {
            return Err(ClassReadError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Reads a `u2` count followed by that many `u2` values.
    pub(crate) fn read_u2_table(&mut self) -> Result<Vec<u16>, ClassReadError> {
        let count = self.read_u2()? as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_u2()?);
        }
        Ok(values)
    }
}

pub(crate) fn write_u1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub(crate) fn write_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u8(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_i1(out: &mut Vec<u8>, value: i8) {
    out.push(value as u8);
}

pub(crate) fn write_i2(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_i4(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_i2_at(out: &mut [u8], pos: usize, value: i16) {
    out[pos..pos + 2].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_i4_at(out: &mut [u8], pos: usize, value: i32) {
    out[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
}

/// Pads with zeros so that the operand following a switch opcode written
/// at `opcode_offset` starts on a four byte boundary.
pub(crate) fn write_switch_padding(out: &mut Vec<u8>, opcode_offset: usize) {
    let padding = (4 - ((opcode_offset + 1) % 4)) % 4;
    out.extend(std::iter::repeat(0).take(padding));
}

/// Writes an attribute header followed by its content.
pub(crate) fn write_attribute_with_info(out: &mut Vec<u8>, name_index: u16, info: &[u8]) {
    write_u2(out, name_index);
    write_u4(out, info.len() as u32);
    out.extend_from_slice(info);
}
