// AMF Writer
// AMF0/AMF3 primitives used by the FLV muxer

use bytes::BufMut;

pub const AMF_NUMBER: u8 = 0x00;
pub const AMF_BOOLEAN: u8 = 0x01;
pub const AMF_STRING: u8 = 0x02;
pub const AMF_OBJECT: u8 = 0x03;
pub const AMF_ECMA_ARRAY: u8 = 0x08;
pub const AMF_OBJECT_END: u8 = 0x09;
pub const AMF_STRICT_ARRAY: u8 = 0x0A;
pub const AMF_AVMPLUS: u8 = 0x11;
pub const AMF3_BYTE_ARRAY: u8 = 0x0C;

/// Write a big-endian 24-bit value (upper byte discarded)
pub fn put_u24<B: BufMut>(buf: &mut B, value: u32) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}

/// Length-prefixed UTF-8 with no type marker (object keys)
pub fn put_key<B: BufMut>(buf: &mut B, key: &str) {
    let bytes = key.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    buf.put_u16(len as u16);
    buf.put_slice(&bytes[..len]);
}

/// AMF0 string value: marker + length-prefixed UTF-8
pub fn put_string<B: BufMut>(buf: &mut B, value: &str) {
    buf.put_u8(AMF_STRING);
    put_key(buf, value);
}

/// AMF0 number value: marker + IEEE-754 big-endian double
pub fn put_number<B: BufMut>(buf: &mut B, value: f64) {
    buf.put_u8(AMF_NUMBER);
    buf.put_f64(value);
}

pub fn put_bool<B: BufMut>(buf: &mut B, value: bool) {
    buf.put_u8(AMF_BOOLEAN);
    buf.put_u8(value as u8);
}

pub fn put_number_entry<B: BufMut>(buf: &mut B, key: &str, value: f64) {
    put_key(buf, key);
    put_number(buf, value);
}

pub fn put_bool_entry<B: BufMut>(buf: &mut B, key: &str, value: bool) {
    put_key(buf, key);
    put_bool(buf, value);
}

pub fn put_string_entry<B: BufMut>(buf: &mut B, key: &str, value: &str) {
    put_key(buf, key);
    put_string(buf, value);
}

/// Empty key followed by the object-end marker
pub fn put_object_end<B: BufMut>(buf: &mut B) {
    put_u24(buf, AMF_OBJECT_END as u32);
}

/// AMF3 variable-length 29-bit integer
pub fn put_u29<B: BufMut>(buf: &mut B, value: u32) {
    if value <= 0x7F {
        buf.put_u8(value as u8);
    } else if value <= 0x3FFF {
        buf.put_u8((0x80 | (value >> 7)) as u8);
        buf.put_u8((value & 0x7F) as u8);
    } else if value <= 0x1F_FFFF {
        buf.put_u8((0x80 | (value >> 14)) as u8);
        buf.put_u8((0x80 | ((value >> 7) & 0x7F)) as u8);
        buf.put_u8((value & 0x7F) as u8);
    } else {
        buf.put_u8((0x80 | (value >> 22)) as u8);
        buf.put_u8((0x80 | ((value >> 15) & 0x7F)) as u8);
        buf.put_u8((0x80 | ((value >> 8) & 0x7F)) as u8);
        buf.put_u8((value & 0xFF) as u8);
    }
}

/// AMF3 byte-array length: U29 with the inline-value flag set
pub fn put_u29b_value<B: BufMut>(buf: &mut B, value: u32) {
    put_u29(buf, 1 | ((value & 0x0FFF_FFFF) << 1));
}
