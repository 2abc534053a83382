//! Object storage abstraction for the slowest tier.
//!
//! [`ObjectStore`] is the seam for a bucket-style store (S3 or compatible).
//! [`LocalObjectStore`] maps a bucket onto a directory, which is what the
//! cache uses when `s3_config.root` points at local or mounted storage.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tore_core::{hash_hex, CacheError, CacheLevel, CacheResult, S3Config};

/// Minimal bucket operations needed by the object tier.
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any existing object.
    fn put_object(&self, key: &str, bytes: &[u8]) -> CacheResult<()>;

    /// Read an object, or `None` if it does not exist.
    fn get_object(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Delete an object. Returns whether it existed.
    fn delete_object(&self, key: &str) -> CacheResult<bool>;

    /// Keys of every object under this store's prefix.
    fn list_objects(&self) -> CacheResult<Vec<String>>;

    /// Size of an object in bytes.
    fn object_len(&self, key: &str) -> CacheResult<Option<u64>> {
        Ok(self.get_object(key)?.map(|bytes| bytes.len() as u64))
    }
}

fn io_err(e: &io::Error) -> CacheError {
    CacheError::io(CacheLevel::Object, e)
}

/// Directory-backed bucket: `<root>/<bucket>/<prefix>/<sha256(key)>`.
///
/// Object names are fixed-length digests, so keys of any length fit the
/// file-name limit. Each file starts with `[key_len u32 LE][key]` so
/// [`list_objects`](ObjectStore::list_objects) can recover the keys.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    dir: PathBuf,
}

const DIGEST_HEX_LEN: usize = 64;

impl LocalObjectStore {
    /// Open (creating if needed) the directory for `config`.
    pub fn open(config: &S3Config) -> CacheResult<Self> {
        let mut dir = config.root.join(&config.bucket);
        let prefix = config.prefix.trim_matches('/');
        if !prefix.is_empty() {
            dir = dir.join(prefix);
        }
        fs::create_dir_all(&dir).map_err(|e| CacheError::Connection {
            level: CacheLevel::Object,
            reason: format!("cannot open bucket directory {}: {}", dir.display(), e),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.dir.join(hash_hex(key.as_bytes()))
    }

    /// Read the key header of an open object and leave the reader at the
    /// payload. Returns the stored key and the header length.
    fn read_header(reader: &mut impl Read) -> io::Result<(String, u64)> {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len) as usize;
        let mut key = vec![0u8; len];
        reader.read_exact(&mut key)?;
        let key = String::from_utf8(key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok((key, 4 + len as u64))
    }

    /// Open the object stored for `key`, checking its header matches.
    fn open_object(&self, key: &str) -> CacheResult<Option<(fs::File, u64)>> {
        let mut file = match fs::File::open(self.object_path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&e)),
        };
        let (stored, header_len) = Self::read_header(&mut file).map_err(|e| io_err(&e))?;
        if stored != key {
            return Err(CacheError::Backend {
                level: CacheLevel::Object,
                reason: format!("object for {} holds key {}", key, stored),
            });
        }
        Ok(Some((file, header_len)))
    }
}

impl ObjectStore for LocalObjectStore {
    fn put_object(&self, key: &str, bytes: &[u8]) -> CacheResult<()> {
        let key_len = u32::try_from(key.len()).map_err(|_| CacheError::KeyTooLong {
            level: CacheLevel::Object,
            len: key.len(),
            max: u32::MAX as usize,
        })?;
        let path = self.object_path(key);
        // Write-then-rename so readers never see a partial object.
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| io_err(&e))?;
        file.write_all(&key_len.to_le_bytes()).map_err(|e| io_err(&e))?;
        file.write_all(key.as_bytes()).map_err(|e| io_err(&e))?;
        file.write_all(bytes).map_err(|e| io_err(&e))?;
        file.sync_all().map_err(|e| io_err(&e))?;
        fs::rename(&tmp, &path).map_err(|e| io_err(&e))?;
        Ok(())
    }

    fn get_object(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let Some((mut file, _)) = self.open_object(key)? else {
            return Ok(None);
        };
        let mut payload = Vec::new();
        file.read_to_end(&mut payload).map_err(|e| io_err(&e))?;
        Ok(Some(payload))
    }

    fn delete_object(&self, key: &str) -> CacheResult<bool> {
        match fs::remove_file(self.object_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&e)),
        }
    }

    fn list_objects(&self) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| io_err(&e))? {
            let entry = entry.map_err(|e| io_err(&e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Skips in-flight temp files and anything not written by this store.
            if name.len() != DIGEST_HEX_LEN || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
                continue;
            }
            let Ok(mut file) = fs::File::open(entry.path()) else {
                continue;
            };
            if let Ok((key, _)) = Self::read_header(&mut file) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn object_len(&self, key: &str) -> CacheResult<Option<u64>> {
        let Some((file, header_len)) = self.open_object(key)? else {
            return Ok(None);
        };
        let len = file.metadata().map_err(|e| io_err(&e))?.len();
        Ok(Some(len.saturating_sub(header_len)))
    }
}
