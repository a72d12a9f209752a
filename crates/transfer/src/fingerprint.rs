//! Content fingerprints from sparse file samples.
//!
//! A fingerprint is a list of CRC-32 values, one per sample window, taken
//! at roughly evenly spaced offsets. It identifies a file across sessions
//! independently of its name or location. It is a checksum, not a
//! cryptographic hash: distinct files may collide.
//!
//! Windows are summed with CRC-32 (`crc32fast`) rather than Adler-32, and
//! the storage key is the lowercase hex of each value's little-endian
//! bytes. Keys are only ever compared against keys this crate produced.

use std::fmt;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use tracing::debug;

use crate::{FileHandle, TransferError, UploadPolicy};

/// Sampled checksum values of a file. Empty means "not resumable".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u32>);

impl Fingerprint {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn checksums(&self) -> &[u32] {
        &self.0
    }

    /// Storage key: hex of every checksum's little-endian bytes. Empty for
    /// an empty fingerprint.
    pub fn key(&self) -> String {
        let bytes: Vec<u8> = self.0.iter().flat_map(|c| c.to_le_bytes()).collect();
        hex::encode(bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Fingerprints `file`, collapsing any I/O failure into an empty
/// fingerprint.
pub fn fingerprint(file: &FileHandle, policy: &UploadPolicy) -> Fingerprint {
    match try_fingerprint(file, policy) {
        Ok(fp) => fp,
        Err(e) => {
            debug!(path = %file.path().display(), error = %e, "fingerprint unavailable");
            Fingerprint::empty()
        }
    }
}

/// Fingerprints `file`.
///
/// Files smaller than `fingerprint_min_file_size` get an empty fingerprint.
/// Window `i` starts at `i * length / windows` and covers at most
/// `min(length / windows, fingerprint_max_window)` bytes; each window is
/// checksummed with a fresh hasher over the bytes actually read.
pub fn try_fingerprint(
    file: &FileHandle,
    policy: &UploadPolicy,
) -> Result<Fingerprint, TransferError> {
    let length = file.length();
    let windows = policy.fingerprint_windows;
    if windows == 0 || length < policy.fingerprint_min_file_size {
        return Ok(Fingerprint::empty());
    }

    let window_size = (length / windows).min(policy.fingerprint_max_window) as usize;
    let mut buf = vec![0u8; window_size];
    let mut sums = Vec::with_capacity(windows as usize);
    let mut f = std::fs::File::open(file.path())?;

    for index in 0..windows {
        let offset = (index as u128 * length as u128 / windows as u128) as u64;
        f.seek(SeekFrom::Start(offset))?;
        let n = read_window(&mut f, &mut buf)?;
        if n == 0 {
            break;
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf[..n]);
        sums.push(hasher.finalize());
    }

    Ok(Fingerprint(sums))
}

/// Fills `buf` as far as the reader allows; returns the bytes read.
fn read_window(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn small_policy() -> UploadPolicy {
        UploadPolicy {
            fingerprint_windows: 4,
            fingerprint_max_window: 8,
            fingerprint_min_file_size: 16,
            ..UploadPolicy::default()
        }
    }

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", &patterned(100));
        let handle = FileHandle::open(&path).unwrap();

        let f1 = fingerprint(&handle, &small_policy());
        let f2 = fingerprint(&handle, &small_policy());
        assert_eq!(f1, f2);
        assert_eq!(f1.checksums().len(), 4);
        assert_eq!(f1.key().len(), 4 * 8);
    }

    #[test]
    fn fingerprint_ignores_name_and_location() {
        let dir = TempDir::new().unwrap();
        let data = patterned(100);
        let a = create_test_file(dir.path(), "a.bin", &data);
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let b = create_test_file(&dir.path().join("sub"), "renamed.dat", &data);

        let fa = fingerprint(&FileHandle::open(&a).unwrap(), &small_policy());
        let fb = fingerprint(&FileHandle::open(&b).unwrap(), &small_policy());
        assert_eq!(fa, fb);
    }

    #[test]
    fn windows_are_sampled_at_scaled_offsets() {
        let dir = TempDir::new().unwrap();
        let data = patterned(100);
        let path = create_test_file(dir.path(), "a.bin", &data);
        let fp = fingerprint(&FileHandle::open(&path).unwrap(), &small_policy());

        // length 100, 4 windows: offsets 0, 25, 50, 75; window = min(25, 8).
        let expected: Vec<u32> = [0usize, 25, 50, 75]
            .iter()
            .map(|&o| crc32fast::hash(&data[o..o + 8]))
            .collect();
        assert_eq!(fp.checksums(), expected.as_slice());
    }

    #[test]
    fn change_inside_a_window_changes_fingerprint() {
        let dir = TempDir::new().unwrap();
        let data = patterned(100);
        let mut changed = data.clone();
        changed[51] ^= 0xFF;
        let a = create_test_file(dir.path(), "a.bin", &data);
        let b = create_test_file(dir.path(), "b.bin", &changed);

        let fa = fingerprint(&FileHandle::open(&a).unwrap(), &small_policy());
        let fb = fingerprint(&FileHandle::open(&b).unwrap(), &small_policy());
        assert_ne!(fa, fb);
    }

    #[test]
    fn small_file_has_empty_fingerprint() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "tiny.bin", b"short");
        let fp = fingerprint(&FileHandle::open(&path).unwrap(), &small_policy());
        assert!(fp.is_empty());
        assert_eq!(fp.key(), "");
    }

    #[test]
    fn default_policy_skips_files_under_one_mebibyte() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", &patterned(100_000));
        let fp = fingerprint(&FileHandle::open(&path).unwrap(), &UploadPolicy::default());
        assert!(fp.is_empty());
    }

    #[test]
    fn default_policy_samples_fifty_windows() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "big.bin", &patterned(2 * 1024 * 1024));
        let fp = fingerprint(&FileHandle::open(&path).unwrap(), &UploadPolicy::default());
        assert_eq!(fp.checksums().len(), 50);
    }

    #[test]
    fn vanished_file_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", &patterned(100));
        let handle = FileHandle::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(try_fingerprint(&handle, &small_policy()).is_err());
        assert!(fingerprint(&handle, &small_policy()).is_empty());
    }

    #[test]
    fn truncated_file_honors_short_reads() {
        let dir = TempDir::new().unwrap();
        let data = patterned(100);
        let path = create_test_file(dir.path(), "a.bin", &data);
        let handle = FileHandle::open(&path).unwrap();
        // Shrink after open: the last window reads only 3 bytes.
        std::fs::write(&path, &data[..78]).unwrap();

        let fp = try_fingerprint(&handle, &small_policy()).unwrap();
        assert_eq!(fp.checksums().len(), 4);
        assert_eq!(fp.checksums()[3], crc32fast::hash(&data[75..78]));
    }
}
