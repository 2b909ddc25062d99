//! Length prefixed frames over any async byte stream.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Align8, Deserialize, Serialize};

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// The largest frame a receiver accepts, a longer prefix means the stream is corrupt.
pub const MAX_FRAME_LEN: usize = u32::MAX as usize;

/// The sending end of a framed stream.
pub struct OnoSender<W: AsyncWrite + Unpin> {
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(crate) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends `msg` as a single frame.
    ///
    /// The frame is the big endian length, the bytes `msg` serializes into the scratch buffer
    /// and then its borrowed tail, if any.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { tx, buf } = self;

        buf.clear();
        let tail = msg.serialize(buf);
        let len = buf.len() + tail.map_or(0, <[u8]>::len);

        tx.write_all(&(len as LenType).to_be_bytes()).await?;
        tx.write_all(buf).await?;
        if let Some(tail) = tail {
            tx.write_all(tail).await?;
        }

        tx.flush().await
    }
}

/// The receiving end of a framed stream.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(crate) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits for the next frame and decodes it.
    ///
    /// # Arguments
    /// * `buf` - Scratch space the frame is read into, the returned `T` may borrow from it.
    ///
    /// # Returns
    /// The decoded value, or an `InvalidData` error if the frame is too long or malformed.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align8,
    {
        let mut prefix = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut prefix).await?;

        let len = LenType::from_be_bytes(prefix) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds the limit of {MAX_FRAME_LEN}"),
            ));
        }

        buf.clear();
        buf.resize(len.div_ceil(size_of::<B>()), bytemuck::Zeroable::zeroed());

        let frame = &mut bytemuck::cast_slice_mut::<B, u8>(buf)[..len];
        self.rx.read_exact(frame).await?;

        T::deserialize(frame)
    }
}

/// Wraps both halves of a stream into a framed channel.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
