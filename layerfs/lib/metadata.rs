use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use getset::{CopyGetters, Getters};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

// File type bits
const S_IFMT: u32 = 0o170000; // bit mask for the file type bit field
const S_IFSOCK: u32 = 0o140000; // socket
const S_IFLNK: u32 = 0o120000; // symbolic link
const S_IFREG: u32 = 0o100000; // regular file
const S_IFBLK: u32 = 0o060000; // block device
const S_IFDIR: u32 = 0o040000; // directory
const S_IFCHR: u32 = 0o020000; // character device
const S_IFIFO: u32 = 0o010000; // fifo

// Permission mask, including setuid, setgid and sticky bits
const S_IPERM: u32 = 0o7777;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Metadata for an entry in a layer or in a merged file system.
///
/// Holds the Unix metadata that survives in image layers:
/// - File mode (type and permissions)
/// - File size
/// - Last modification timestamp
/// - User ID
/// - Group ID
#[derive(Debug, Clone, CopyGetters, Getters, PartialEq, Eq)]
pub struct Metadata {
    /// The mode of the file, combining file type and permissions
    #[getset(get_copy = "pub with_prefix")]
    mode: Mode,

    /// Size of the file in bytes
    #[getset(get_copy = "pub with_prefix")]
    size: u64,

    /// When the file was last modified
    #[getset(get = "pub with_prefix")]
    modified_at: DateTime<Utc>,

    /// User ID of the file owner
    #[getset(get_copy = "pub with_prefix")]
    uid: u64,

    /// Group ID of the file group
    #[getset(get_copy = "pub with_prefix")]
    gid: u64,
}

/// A Unix-style file mode that combines file type and permission bits.
///
/// ```text
/// Bits  Description
/// ----  -----------
/// 15-12 File type (S_IFMT)
/// 11-9  setuid, setgid, sticky
/// 8-0   user, group and other rwx permissions
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(u32);

/// The type of an entry in the file system.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeType {
    /// Regular file
    File = S_IFREG,

    /// Directory
    Directory = S_IFDIR,

    /// Symbolic link
    Symlink = S_IFLNK,

    /// Named pipe
    Fifo = S_IFIFO,

    /// Character device
    CharDevice = S_IFCHR,

    /// Block device
    BlockDevice = S_IFBLK,

    /// Unix domain socket
    Socket = S_IFSOCK,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Metadata {
    /// Creates a new Metadata instance with the default permissions for `entity_type`, root
    /// ownership and a zero (Unix epoch) modification time.
    ///
    /// ## Examples
    /// ```rust
    /// use layerfs::{Metadata, ModeType};
    ///
    /// let metadata = Metadata::new(ModeType::File);
    /// assert_eq!(metadata.get_size(), 0);
    /// assert_eq!(metadata.get_type(), Some(ModeType::File));
    /// ```
    pub fn new(entity_type: ModeType) -> Self {
        Self {
            mode: Mode::new(entity_type),
            size: 0,
            modified_at: DateTime::<Utc>::UNIX_EPOCH,
            uid: 0,
            gid: 0,
        }
    }

    /// Gets the file type from the mode.
    ///
    /// Returns `None` if the file type bits don't match any known type.
    pub fn get_type(&self) -> Option<ModeType> {
        self.mode.get_type()
    }

    /// Returns `true` if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.get_type() == Some(ModeType::Directory)
    }

    /// Returns `true` if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.get_type() == Some(ModeType::File)
    }

    /// Returns `true` if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.get_type() == Some(ModeType::Symlink)
    }

    /// Sets the mode, keeping only the type and permission bits.
    pub fn set_mode(&mut self, mode: impl Into<Mode>) {
        self.mode = mode.into();
    }

    /// Replaces the permission bits of the mode.
    pub fn set_permissions(&mut self, permissions: u32) {
        self.mode.set_permissions(permissions);
    }

    /// Sets the size of the file.
    ///
    /// ## Examples
    /// ```rust
    /// use layerfs::{Metadata, ModeType};
    ///
    /// let mut metadata = Metadata::new(ModeType::File);
    /// metadata.set_size(100);
    /// assert_eq!(metadata.get_size(), 100);
    /// ```
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Sets the last modification time from seconds since the Unix epoch.
    pub fn set_modified_secs(&mut self, secs: i64) {
        self.modified_at = Utc
            .timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    }

    /// Sets the last modification time.
    pub fn set_modified_at(&mut self, time: DateTime<Utc>) {
        self.modified_at = time;
    }

    /// Sets the user ID of the file owner.
    pub fn set_uid(&mut self, uid: u64) {
        self.uid = uid;
    }

    /// Sets the group ID of the file group.
    pub fn set_gid(&mut self, gid: u64) {
        self.gid = gid;
    }
}

impl Mode {
    /// Creates a new Mode with appropriate default permissions based on the file type.
    ///
    /// Default permissions are:
    /// - Directories: 755 (rwxr-xr-x)
    /// - Symlinks: 777 (rwxrwxrwx)
    /// - Everything else: 644 (rw-r--r--)
    pub fn new(entity_type: ModeType) -> Self {
        let default_perms = match entity_type {
            ModeType::Directory => 0o755,
            ModeType::Symlink => 0o777,
            _ => 0o644,
        };
        Self((entity_type as u32) | default_perms)
    }

    /// Gets the file type portion of the mode
    pub fn get_type(&self) -> Option<ModeType> {
        match self.0 & S_IFMT {
            S_IFREG => Some(ModeType::File),
            S_IFDIR => Some(ModeType::Directory),
            S_IFLNK => Some(ModeType::Symlink),
            S_IFIFO => Some(ModeType::Fifo),
            S_IFCHR => Some(ModeType::CharDevice),
            S_IFBLK => Some(ModeType::BlockDevice),
            S_IFSOCK => Some(ModeType::Socket),
            _ => None,
        }
    }

    /// Sets the file type portion of the mode
    pub fn set_type(&mut self, entity_type: ModeType) {
        self.0 &= !S_IFMT;
        self.0 |= entity_type as u32;
    }

    /// Gets the permission portion of the mode
    pub fn get_permissions(&self) -> u32 {
        self.0 & S_IPERM
    }

    /// Sets the permission portion of the mode
    pub fn set_permissions(&mut self, perms: u32) {
        self.0 &= !S_IPERM;
        self.0 |= perms & S_IPERM;
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<ModeType> for Mode {
    fn from(entity_type: ModeType) -> Self {
        Self::new(entity_type)
    }
}

impl From<u32> for Mode {
    fn from(mode: u32) -> Self {
        Self(mode & (S_IFMT | S_IPERM))
    }
}

impl From<Mode> for u32 {
    fn from(mode: Mode) -> Self {
        mode.0
    }
}

impl fmt::Display for ModeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            ModeType::File => "-",
            ModeType::Directory => "d",
            ModeType::Symlink => "l",
            ModeType::Fifo => "p",
            ModeType::CharDevice => "c",
            ModeType::BlockDevice => "b",
            ModeType::Socket => "s",
        };
        write!(f, "{c}")
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get_type() {
            Some(t) => write!(f, "{t}")?,
            None => write!(f, "?")?,
        }

        let perms = self.get_permissions();
        for shift in [6, 3, 0] {
            let bits = (perms >> shift) & 0o7;
            write!(
                f,
                "{}{}{}",
                if bits & 0o4 != 0 { "r" } else { "-" },
                if bits & 0o2 != 0 { "w" } else { "-" },
                if bits & 0o1 != 0 { "x" } else { "-" },
            )?;
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_type_roundtrip() {
        for t in [
            ModeType::File,
            ModeType::Directory,
            ModeType::Symlink,
            ModeType::Fifo,
            ModeType::CharDevice,
            ModeType::BlockDevice,
            ModeType::Socket,
        ] {
            assert_eq!(Mode::new(t).get_type(), Some(t));
        }
    }

    #[test]
    fn test_mode_defaults_and_display() {
        assert_eq!(Mode::new(ModeType::File).to_string(), "-rw-r--r--");
        assert_eq!(Mode::new(ModeType::Directory).to_string(), "drwxr-xr-x");
        assert_eq!(Mode::new(ModeType::Symlink).to_string(), "lrwxrwxrwx");
    }

    #[test]
    fn test_mode_from_raw_bits() {
        let mode = Mode::from(0o100755);
        assert_eq!(mode.get_type(), Some(ModeType::File));
        assert_eq!(mode.get_permissions(), 0o755);

        let mut mode = Mode::from(0o040700);
        mode.set_permissions(0o1777);
        assert_eq!(mode.get_type(), Some(ModeType::Directory));
        assert_eq!(u32::from(mode), 0o041777);
    }

    #[test]
    fn test_metadata_setters() {
        let mut metadata = Metadata::new(ModeType::File);
        metadata.set_size(12);
        metadata.set_uid(1000);
        metadata.set_gid(100);
        metadata.set_modified_secs(1_700_000_000);

        assert!(metadata.is_file());
        assert_eq!(metadata.get_size(), 12);
        assert_eq!(metadata.get_uid(), 1000);
        assert_eq!(metadata.get_gid(), 100);
        assert_eq!(metadata.get_modified_at().timestamp(), 1_700_000_000);
    }
}
