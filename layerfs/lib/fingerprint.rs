use std::io;

use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use tracing::debug;
use typed_path::Utf8UnixPath;

use crate::{walk_dir, FileSystem, FsError, FsResult, ModeType, WalkAction};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The prefix of fingerprints produced by [`fingerprint`].
pub const FINGERPRINT_PREFIX: &str = "h1:";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes a stable content digest of every regular file in `fs`.
///
/// The digest is compatible with Go's `dirhash.Hash1`: the SHA-256 of each file's content is
/// written as `"<hex>  <path>\n"` into a summary, in byte order of the paths, and the result is
/// `h1:` followed by the base64 SHA-256 of that summary. Directories and symlinks do not take
/// part, so two trees with the same file contents at the same paths always match.
///
/// ## Errors
///
/// Returns an error if:
/// - Walking or reading `fs` fails
/// - A file path contains a newline
///
/// ## Examples
///
/// ```
/// use layerfs::{fingerprint, MemoryFileSystem};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut fs = MemoryFileSystem::new();
/// fs.create_file("a/b.txt", "hello\n")?;
/// fs.create_file("c", "")?;
///
/// assert_eq!(fingerprint(&fs)?, "h1:ndG5qWhxOIaE7CTCkqQr+GJA4MHCGg/D3GYPdTS4HuQ=");
/// # Ok(())
/// # }
/// ```
pub fn fingerprint(fs: &dyn FileSystem) -> FsResult<String> {
    let mut files = Vec::new();
    walk_dir(fs, Utf8UnixPath::new(""), &mut |path, entry| {
        if entry.get_kind() == ModeType::File {
            files.push(path.to_string());
        }
        Ok(WalkAction::Continue)
    })?;
    files.sort();

    let mut summary = Sha256::new();
    for file in &files {
        if file.contains('\n') {
            return Err(FsError::InvalidFileName(file.clone()));
        }

        let mut hasher = Sha256::new();
        io::copy(&mut fs.open(Utf8UnixPath::new(file))?, &mut hasher)?;
        summary.update(format!("{}  {}\n", hex::encode(hasher.finalize()), file));
    }

    debug!(files = files.len(), "fingerprinted file system");
    Ok(format!(
        "{FINGERPRINT_PREFIX}{}",
        STANDARD.encode(summary.finalize())
    ))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
