//! Content hashing, MIME sniffing, and the error taxonomy shared by the
//! analyzer, executor, and diagnostic service.

use std::io::{self, Read};

use ntt_types::{BlobId, ErrorType};
use once_cell::sync::OnceCell;

/// Bytes retained from the start of the stream for MIME sniffing.
/// `infer` only looks at the first few hundred bytes of any format it
/// knows about, so this comfortably covers every container it recognizes.
const SNIFF_LEN: usize = 512;

/// Wraps any `Read` and, in one pass, maintains a running BLAKE3 digest and
/// retains the first [`SNIFF_LEN`] bytes for MIME sniffing. Used by the
/// analyzer to copy+hash a source file in a single read with no second
/// pass over the data.
pub struct HashingReader<R> {
    inner: R,
    hasher: blake3::Hasher,
    sniff: Vec<u8>,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        HashingReader {
            inner,
            hasher: blake3::Hasher::new(),
            sniff: Vec::with_capacity(SNIFF_LEN),
        }
    }

    /// Consumes the reader's state, producing the final hash and best-effort
    /// MIME type. Call only after the underlying reader has been fully
    /// drained (e.g. via `io::copy`).
    pub fn finish(self) -> (BlobId, Option<String>) {
        let digest = self.hasher.finalize();
        let hash = BlobId::from_bytes(*digest.as_bytes());
        let mime = sniff_mime(&self.sniff);
        (hash, mime)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            if self.sniff.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - self.sniff.len()).min(n);
                self.sniff.extend_from_slice(&buf[..take]);
            }
        }
        Ok(n)
    }
}

/// Best-effort MIME sniff from magic bytes. Never fails the copy: an
/// unrecognized or truncated sample just yields `None`.
pub fn sniff_mime(sample: &[u8]) -> Option<String> {
    infer::get(sample).map(|kind| kind.mime_type().to_string())
}

fn empty_hash_cell() -> &'static BlobId {
    static EMPTY: OnceCell<BlobId> = OnceCell::new();
    EMPTY.get_or_init(|| BlobId::from_bytes(*blake3::hash(&[]).as_bytes()))
}

/// The pinned content hash of the empty file, computed once from BLAKE3 of
/// zero bytes rather than transcribed as a literal.
pub fn empty_hash() -> BlobId {
    *empty_hash_cell()
}

/// Classifies an I/O error into the five-class error taxonomy (spec §4.1).
/// Matches on both the structured `ErrorKind` and, where `ErrorKind` is too
/// coarse (e.g. `ENAMETOOLONG` and `EIO` both surface as `Other` on some
/// platforms), the raw OS error number and message text.
pub fn classify(err: &io::Error) -> ErrorType {
    match err.kind() {
        io::ErrorKind::NotFound => return ErrorType::PathError,
        io::ErrorKind::PermissionDenied => return ErrorType::PermissionError,
        _ => {}
    }

    // ENAMETOOLONG, EIO, EACCES: Linux errno values that `ErrorKind` does not
    // distinguish from `Other` on all platforms, so they're matched as raw
    // OS error numbers rather than pulled in via a libc-constants dependency.
    if let Some(code) = err.raw_os_error() {
        match code {
            36 => return ErrorType::PathError,  // ENAMETOOLONG
            5 => return ErrorType::IoError,     // EIO
            13 => return ErrorType::PermissionError, // EACCES
            _ => {}
        }
    }

    classify_str(&err.to_string())
}

/// Fallback classification from free text: subprocess output, kernel log
/// lines, or any message that did not arrive as a structured `io::Error`.
/// Implements the signal table in spec §4.1 over substring matches.
pub fn classify_str(message: &str) -> ErrorType {
    let lower = message.to_ascii_lowercase();

    if lower.contains("beyond end of device") || lower.contains("beyond eof") {
        return ErrorType::IoError;
    }
    if lower.contains("input/output error") {
        return ErrorType::IoError;
    }
    if lower.contains("no such file or directory") {
        return ErrorType::PathError;
    }
    if lower.contains("file name too long") {
        return ErrorType::PathError;
    }
    if lower.contains("permission denied") {
        return ErrorType::PermissionError;
    }
    ErrorType::Unknown
}

/// Hash mismatch between a pre-hash (read once, e.g. for dedup pre-check)
/// and a post-hash (computed during the authoritative copy) is always
/// `hash_error`: the taxonomy's one condition with no OS signal behind it.
pub fn classify_hash_mismatch() -> ErrorType {
    ErrorType::HashError
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_hash_is_stable_and_matches_blake3_of_empty_input() {
        let h1 = empty_hash();
        let h2 = empty_hash();
        assert_eq!(h1, h2);
        assert_eq!(h1, BlobId::from_bytes(*blake3::hash(&[]).as_bytes()));
    }

    #[test]
    fn hashing_reader_matches_direct_blake3_hash() {
        let data = b"hello\n".repeat(100);
        let mut reader = HashingReader::new(Cursor::new(&data[..]));
        let mut sink = Vec::new();
        io::copy(&mut reader, &mut sink).unwrap();
        let (hash, _mime) = reader.finish();
        assert_eq!(hash, BlobId::from_bytes(*blake3::hash(&data).as_bytes()));
    }

    #[test]
    fn hashing_reader_sniffs_mime_from_first_bytes() {
        let png_magic: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
        let mut body = png_magic.to_vec();
        body.extend_from_slice(&[0u8; 64]);
        let mut reader = HashingReader::new(Cursor::new(&body[..]));
        let mut sink = Vec::new();
        io::copy(&mut reader, &mut sink).unwrap();
        let (_hash, mime) = reader.finish();
        assert_eq!(mime.as_deref(), Some("image/png"));
    }

    #[test]
    fn classify_str_matches_spec_signal_table() {
        assert_eq!(classify_str("No such file or directory"), ErrorType::PathError);
        assert_eq!(classify_str("File name too long"), ErrorType::PathError);
        assert_eq!(classify_str("Input/output error"), ErrorType::IoError);
        assert_eq!(classify_str("read beyond EOF of device"), ErrorType::IoError);
        assert_eq!(classify_str("Permission denied"), ErrorType::PermissionError);
        assert_eq!(classify_str("something totally unexpected"), ErrorType::Unknown);
    }

    #[test]
    fn classify_maps_not_found_and_permission_denied_kinds() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "enoent");
        assert_eq!(classify(&not_found), ErrorType::PathError);

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "eacces");
        assert_eq!(classify(&denied), ErrorType::PermissionError);
    }

    #[test]
    fn classify_falls_back_to_message_text_for_opaque_errors() {
        let io_err = io::Error::other("Input/output error reading sector 4096");
        assert_eq!(classify(&io_err), ErrorType::IoError);
    }
}
