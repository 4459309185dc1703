//! Sentinel framing for the stack's local and overlay TCP streams.
//!
//! Every record is wrapped in the two-byte markers `!&` and `!#`. The
//! markers carry no length; the record between them is self-describing, so
//! receivers parse the record directly off the stream and then check the
//! trailer. A reader that finds garbage resynchronizes by scanning forward
//! for the next `!&`.

use std::io::Result;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const FRAME_BEGIN: &[u8; 2] = b"!&";
pub const FRAME_END: &[u8; 2] = b"!#";

/// Scans the stream until a `!&` marker has been consumed.
///
/// Returns `Err(UnexpectedEof)` when the stream closes first.
pub async fn sync_to_frame<R>(r: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut state = 0usize;
    let mut byte = [0u8; 1];
    loop {
        r.read_exact(&mut byte).await?;
        state = match (state, byte[0]) {
            (0, b'!') => 1,
            (1, b'&') => return Ok(()),
            (1, b'!') => 1,
            _ => 0,
        };
    }
}

/// Reads the two trailer bytes; `true` iff they are the `!#` marker.
pub async fn read_trailer<R>(r: &mut R) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut trailer = [0u8; 2];
    r.read_exact(&mut trailer).await?;
    Ok(&trailer == FRAME_END)
}

/// Writes `!&`, the record, `!#` as a single buffer and flushes.
pub async fn write_frame<W>(w: &mut W, record: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(record.len() + 4);
    buf.put_slice(FRAME_BEGIN);
    buf.put_slice(record);
    buf.put_slice(FRAME_END);
    w.write_all(&buf).await?;
    w.flush().await
}
