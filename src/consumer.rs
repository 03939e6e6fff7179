//! Consumers for materialized streams.
//!
//! The extractor hands each stream to a [`SinkFactory`]; the factory may
//! skip the stream or return a [`StreamSink`] that receives the bytes in
//! chain order. A sink returning [`Error::Aborted`] cancels the whole
//! extraction.

use crate::{error::Error, property::Property, Result};
use log::debug;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// A per-stream byte sink: append-only writes and a terminal close.
///
/// `close` is called exactly once on every exit path, including short
/// reads and short writes mid-stream.
pub trait StreamSink {
    /// Append `data` to the stream. A sink that can only take part of
    /// it should report [`Error::ShortWrite`]; either way an error here
    /// abandons the stream.
    fn write(&mut self, data: &[u8]) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Produces a sink per extracted stream.
pub trait SinkFactory {
    type Sink: StreamSink;

    /// Open a sink for the stream named `name`. Returning `Ok(None)`
    /// skips the stream without failing the extraction.
    fn open(&mut self, name: &str, property: &Property) -> Result<Option<Self::Sink>>;
}

/// The default consumer: one regular file per stream under a directory.
pub struct DirSinkFactory {
    dir: PathBuf,
}

impl DirSinkFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SinkFactory for DirSinkFactory {
    type Sink = FileSink;

    fn open(&mut self, name: &str, _property: &Property) -> Result<Option<FileSink>> {
        let path = self.dir.join(name);
        debug!("writing stream to {}", path.display());
        Ok(Some(FileSink {
            file: File::create(path)?,
        }))
    }
}

pub struct FileSink {
    file: File,
}

impl StreamSink for FileSink {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        self.file.flush().map_err(Error::from)
    }
}
