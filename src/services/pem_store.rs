//! PEM persistence
//!
//! Two write styles are provided:
//! - [`FilePemWriter`] always replaces the destination (used by the manager)
//! - [`ContentAwarePemStore`] skips the write when the destination already
//!   holds the same bytes and refuses input that is not a PEM block (used by
//!   the remote agent)
//!
//! Both create missing parent directories and replace the destination through
//! a temporary sibling file and a rename, so readers never observe a partially
//! written file. Files holding a private key are created with mode 0600 on Unix.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pem::{EncodeConfig, LineEnding, Pem};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::utils::{PkiError, PkiResult};

/// PEM tag of X.509 certificates
pub const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Writes a PEM block to a path, replacing any existing content
pub trait PemWriter: Send + Sync {
    fn write_pem(&self, block: &Pem, path: &Path) -> PkiResult<()>;
}

/// Outcome of a content-aware store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

/// Persists raw PEM bytes, skipping identical content
pub trait PemStore: Send + Sync {
    fn store_pem(&self, data: &[u8], path: &Path) -> PkiResult<WriteOutcome>;
}

/// Lists the candidate files of a watched directory
pub trait DirectoryLister: Send + Sync {
    fn list_files(&self, dir: &Path) -> PkiResult<Vec<PathBuf>>;
}

/// Always-overwrite filesystem writer
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePemWriter;

impl PemWriter for FilePemWriter {
    fn write_pem(&self, block: &Pem, path: &Path) -> PkiResult<()> {
        let encoded = encode_pem(block);
        replace_file(path, encoded.as_bytes(), is_private_key(block))
    }
}

/// Content-aware filesystem store
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentAwarePemStore;

impl PemStore for ContentAwarePemStore {
    fn store_pem(&self, data: &[u8], path: &Path) -> PkiResult<WriteOutcome> {
        let current = fs::read(path).ok();
        let current_digest = current.as_deref().map(digest);

        if current_digest.is_some() && current_digest == Some(digest(data)) {
            debug!("Content of {:?} unchanged, skipping write", path);
            return Ok(WriteOutcome::Unchanged);
        }

        let block = pem::parse(data).map_err(|_| PkiError::InvalidPemBlock)?;
        let encoded = encode_pem(&block);

        if current_digest.is_some() && current_digest == Some(digest(encoded.as_bytes())) {
            debug!("Content of {:?} unchanged, skipping write", path);
            return Ok(WriteOutcome::Unchanged);
        }

        replace_file(path, encoded.as_bytes(), is_private_key(&block))?;
        Ok(WriteOutcome::Written)
    }
}

/// Lists non-directory entries, sorted by path
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDirectoryLister;

impl DirectoryLister for FsDirectoryLister {
    fn list_files(&self, dir: &Path) -> PkiResult<Vec<PathBuf>> {
        let read_dir_err = |source| PkiError::ReadDir {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_dir_err)? {
            let entry = entry.map_err(read_dir_err)?;
            let file_type = entry.file_type().map_err(read_dir_err)?;
            if !file_type.is_dir() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Encode a PEM block with LF line endings
pub fn encode_pem(block: &Pem) -> String {
    pem::encode_config(block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

fn is_private_key(block: &Pem) -> bool {
    block.tag().ends_with("PRIVATE KEY")
}

fn digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Create the parent directory of `path` if it does not exist
pub fn ensure_parent_dir(path: &Path) -> PkiResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            fs::create_dir_all(parent).map_err(|source| PkiError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn replace_file(path: &Path, contents: &[u8], private: bool) -> PkiResult<()> {
    ensure_parent_dir(path)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix: u64 = rand::thread_rng().gen();
    let tmp_path = path.with_file_name(format!(".{}.{:016x}.tmp", file_name, suffix));

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(if private { 0o600 } else { 0o644 });
    }
    #[cfg(not(unix))]
    let _ = private;

    let file = options.open(&tmp_path).map_err(|source| PkiError::CreateFile {
        path: path.to_path_buf(),
        source,
    })?;

    if let Err(source) = write_and_rename(file, contents, &tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(PkiError::WriteFile {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

fn write_and_rename(mut file: File, contents: &[u8], tmp_path: &Path, path: &Path) -> io::Result<()> {
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, path)
}

/// Summary of a certificate read back from disk
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub der: Vec<u8>,
    pub not_after: DateTime<Utc>,
    pub common_name: Option<String>,
    pub is_ca: bool,
}

/// Read and parse the PEM certificate at `path`
pub fn load_certificate(path: &Path) -> PkiResult<StoredCertificate> {
    let data = fs::read(path).map_err(|source| PkiError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_certificate_pem(&data)
}

/// Parse the first PEM block of `data` as an X.509 certificate
pub fn parse_certificate_pem(data: &[u8]) -> PkiResult<StoredCertificate> {
    let block = pem::parse(data).map_err(|_| PkiError::InvalidPemBlock)?;
    if block.tag() != CERTIFICATE_TAG {
        return Err(PkiError::InvalidPemBlock);
    }

    let der = block.into_contents();
    let (not_after, common_name, is_ca) = {
        let (_, cert) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| PkiError::ParseCertificate(e.to_string()))?;
        let timestamp = cert.validity().not_after.timestamp();
        let not_after = DateTime::<Utc>::from_timestamp(timestamp, 0).ok_or_else(|| {
            PkiError::ParseCertificate(format!("not after out of range: {}", timestamp))
        })?;
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        (not_after, common_name, cert.is_ca())
    };

    Ok(StoredCertificate {
        der,
        not_after,
        common_name,
        is_ca,
    })
}
