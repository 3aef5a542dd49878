//! Read / write float stacks as raw little-endian binary.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

pub fn write(data: &[f32], path: &Path) -> std::io::Result<()> {
    let mut buf = BufWriter::new(File::create(path)?);
    for v in data {
        buf.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

pub fn read(path: &Path) -> std::io::Result<Vec<f32>> {
    let mut buf = BufReader::new(File::open(path)?);
    let mut bytes = Vec::new();
    buf.read_to_end(&mut bytes)?;
    Ok(bytes.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect())
}

/// Raw detector counts are two bytes per pixel.
pub fn read_u16(path: &Path) -> std::io::Result<Vec<u16>> {
    let mut buf = BufReader::new(File::open(path)?);
    let mut bytes = Vec::new();
    buf.read_to_end(&mut bytes)?;
    Ok(bytes.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_io_roundtrip() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stack.raw");

        let original = vec![1.23f32, -4.56, 7.89e4, 0.0];
        write(&original, &path)?;
        let reloaded = read(&path)?;

        assert_eq!(original, reloaded);
        Ok(())
    }

    #[test]
    fn u16_counts_decode_two_bytes_per_pixel() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("counts.raw");

        let counts: Vec<u16> = vec![0, 1, 1000, 65535];
        let bytes: Vec<u8> = counts.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&path, bytes)?;

        assert_eq!(read_u16(&path)?, counts);
        Ok(())
    }
}
