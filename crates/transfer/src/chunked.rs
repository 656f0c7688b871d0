use std::io::Write;

use crate::DEFAULT_BLOCK_SIZE;

/// Writes `data` to `writer` in fixed-size blocks and flushes it.
///
/// If `block_size` is 0, [`DEFAULT_BLOCK_SIZE`] (100 KiB) is used. Returns the
/// number of bytes written.
pub fn write_blocks<W: Write + ?Sized>(
    writer: &mut W,
    data: &[u8],
    block_size: usize,
) -> std::io::Result<u64> {
    let block_size = if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    };

    let mut written: u64 = 0;
    for block in data.chunks(block_size) {
        writer.write_all(block)?;
        written += block.len() as u64;
    }
    writer.flush()?;
    Ok(written)
}
