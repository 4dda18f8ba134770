//! SHA-256 checksums of snapshot files

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{IoContext, VaultResult};

const CHUNK_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of everything `reader` yields
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Lowercase hex SHA-256 of the file at `path`
pub fn sha256_file(path: &Path) -> VaultResult<String> {
    let file = File::open(path).at(path)?;
    sha256_reader(file).at(path)
}
