use crate::{constants::Readable, error::Error, Result};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Positioned random-access adapter over a [`Readable`].
///
/// The total source length is captured once at construction; chain walks
/// use it to bound their iteration budgets.
pub(crate) struct ByteSource<R> {
    inner: R,
    len: u64,
}

impl<R: Readable> ByteSource<R> {
    pub(crate) async fn new(mut inner: R) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0)).await?;
        Ok(Self { inner, len })
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Fill `buf` from `offset`. A source that cannot supply every byte
    /// yields `ShortRead`; the buffer contents are then unspecified and
    /// never handed to callers.
    pub(crate) async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset)).await?;
        let mut done = 0;
        while done < buf.len() {
            let read = self.inner.read(&mut buf[done..]).await?;
            if read == 0 {
                return Err(Error::ShortRead {
                    offset,
                    wanted: buf.len(),
                    got: done,
                });
            }
            done += read;
        }
        Ok(())
    }
}
