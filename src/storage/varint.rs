//! Base-128 varints with the continuation flag in each byte's high bit.
//!
//! Signed values go through a zig-zag transform first so that small negative
//! numbers stay short. This is the framing used by stored rows and by the
//! serialized scan filter.

use std::io::{self, Read, Write};

const MAX_VARINT_BYTES: usize = 10;

pub fn write_uvarint<W: Write + ?Sized>(w: &mut W, mut value: u64) -> io::Result<()> {
    let mut buf = [0u8; MAX_VARINT_BYTES];
    let mut n = 0;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf[n] = byte;
            n += 1;
            break;
        }
        buf[n] = byte | 0x80;
        n += 1;
    }
    w.write_all(&buf[..n])
}

pub fn read_uvarint<R: Read + ?Sized>(r: &mut R) -> io::Result<u64> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_BYTES {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)?;
        let byte = byte[0];
        if i == MAX_VARINT_BYTES - 1 && byte > 0x01 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint overflows 64 bits",
            ));
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "varint longer than 10 bytes",
    ))
}

pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn write_svarint<W: Write + ?Sized>(w: &mut W, value: i64) -> io::Result<()> {
    write_uvarint(w, zigzag_encode(value))
}

pub fn read_svarint<R: Read + ?Sized>(r: &mut R) -> io::Result<i64> {
    read_uvarint(r).map(zigzag_decode)
}

/// Read a uvarint that is used as a length or count
pub fn read_len<R: Read + ?Sized>(r: &mut R) -> io::Result<usize> {
    let value = read_uvarint(r)?;
    usize::try_from(value)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "length does not fit usize"))
}

/// Write a uvarint length prefix followed by the bytes
pub fn write_bytes<W: Write + ?Sized>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_uvarint(w, bytes.len() as u64)?;
    w.write_all(bytes)
}

pub fn read_bytes<R: Read + ?Sized>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = read_len(r)?;
    read_vec(r, len)
}

/// Read exactly `len` bytes, growing the buffer only as bytes arrive
pub fn read_vec<R: Read + ?Sized>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    Read::take(&mut *r, len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, found {}", len, buf.len()),
        ));
    }
    Ok(buf)
}
