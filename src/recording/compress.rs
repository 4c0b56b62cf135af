//! Artifact compression
//!
//! Recordings are streamed through gzip into a sibling file; the raw
//! artifact is left untouched so a failed archive never loses data.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

/// Gzip `src` into `dst`, returning the compressed size in bytes
///
/// Blocking: call from `spawn_blocking`.
pub fn gzip_file(src: &Path, dst: &Path) -> io::Result<u64> {
    let input = File::open(src)?;
    let output = File::create(dst)?;

    let mut reader = BufReader::new(input);
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());

    io::copy(&mut reader, &mut encoder)?;
    let writer = encoder.finish()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(file.metadata()?.len())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    #[test]
    fn test_gzip_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("session");
        let dst = dir.path().join("session.gz");

        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 7) as u8).collect();
        std::fs::write(&src, &payload).unwrap();

        let compressed_len = gzip_file(&src, &dst).unwrap();
        assert!(compressed_len > 0);
        // Heavily repetitive input compresses well
        assert!(compressed_len < payload.len() as u64 / 2);

        let mut decoder = GzDecoder::new(File::open(&dst).unwrap());
        let mut restored = Vec::new();
        decoder.read_to_end(&mut restored).unwrap();
        assert_eq!(restored, payload);

        // The raw artifact is untouched
        assert_eq!(std::fs::read(&src).unwrap(), payload);
    }

    #[test]
    fn test_missing_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = gzip_file(&dir.path().join("absent"), &dir.path().join("out.gz"));
        assert!(err.is_err());
    }
}
