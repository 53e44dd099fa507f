//! Post-write sanity check.

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::TransferError;

/// Size of the head and tail blocks read back after a transfer.
const CHECK_BLOCK: u64 = 64 * 1024;

/// Confirm the file at `path` holds `written` bytes and that its first and
/// last blocks can be read back. Returns the on-disk size.
pub async fn verify_file(path: &Path, written: u64) -> Result<u64, TransferError> {
    let meta = fs::metadata(path)
        .await
        .map_err(|e| TransferError::Corrupt(format!("cannot stat {}: {}", path.display(), e)))?;
    let len = meta.len();

    if len == 0 {
        return Err(TransferError::Corrupt("file is empty".to_string()));
    }
    if len != written {
        return Err(TransferError::Corrupt(format!(
            "wrote {} bytes but found {} on disk",
            written, len
        )));
    }

    let corrupt = |e: std::io::Error| TransferError::Corrupt(format!("read-back failed: {}", e));
    let mut file = fs::File::open(path).await.map_err(corrupt)?;

    let block = CHECK_BLOCK.min(len) as usize;
    let mut buf = vec![0u8; block];
    file.read_exact(&mut buf).await.map_err(corrupt)?;

    if len > CHECK_BLOCK {
        file.seek(SeekFrom::Start(len - CHECK_BLOCK))
            .await
            .map_err(corrupt)?;
        file.read_exact(&mut buf).await.map_err(corrupt)?;
    }

    Ok(len)
}
