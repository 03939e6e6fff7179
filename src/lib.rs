//! Reader for the OLE2 Compound File Binary Format, the container used
//! by legacy MS Office documents and many other structured-storage
//! files.
//!
//! [`Ole2Extractor`] enumerates the streams embedded in a compound
//! document and reconstructs each one by walking its block allocation
//! chain, delivering the bytes to a caller-supplied consumer. It does
//! not interpret stream contents; telling VBA macros apart from
//! ordinary streams is a job for whatever sits downstream.

pub mod constants;
mod endian;
mod fat;
mod header;
mod property;
mod source;

pub mod consumer;
pub mod error;

pub type Result<T> = std::result::Result<T, Error>;

pub use constants::Readable;
pub use consumer::{DirSinkFactory, FileSink, SinkFactory, StreamSink};
pub use error::Error;
pub use header::Ole2Header;
pub use property::{NodeColor, Property, PropertyType};

use derivative::Derivative;
use log::{debug, error, warn};
use property::RawProperty;
use source::ByteSource;

/// Decoder for one OLE2 container.
///
/// Owns the source handle, the parsed header and the derived decode
/// state; two concurrent extractions need two extractors. Nothing is
/// process-global.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Ole2Extractor<R> {
    #[derivative(Debug = "ignore")]
    source: ByteSource<R>,
    header: Ole2Header,
    /// First big block of the mini-stream, learned from the root entry
    /// while the property directory is scanned. -1 until then.
    sbat_root_start: i32,
    /// Counter backing synthesized names for nameless streams.
    anonymous_streams: u32,
}

impl Ole2Extractor<tokio::fs::File> {
    #[cfg(feature = "async")]
    pub async fn from_file<P: AsRef<std::path::Path>>(file: P) -> Result<Self> {
        //! Open an OLE2 file and parse its header
        //!
        //! ## Example usage
        //! ```no_run
        //! use ole2_extract::Ole2Extractor;
        //!
        //! #[tokio::main]
        //! async fn main() {
        //!     let mut extractor = Ole2Extractor::from_file("data/oledoc1.doc_")
        //!         .await
        //!         .expect("not an OLE2 file");
        //!     extractor.extract_to_dir("/tmp/out").await.unwrap();
        //! }
        //! ```
        let f = tokio::fs::File::open(file).await?;
        Self::new(f).await
    }

    #[cfg(feature = "blocking")]
    pub fn extract_file_blocking<P, Q>(file: P, dir: Q) -> Result<()>
    where
        P: AsRef<std::path::Path>,
        Q: AsRef<std::path::Path>,
    {
        //! Extract every stream of an OLE2 file into a directory,
        //! driving the async pipeline on a private runtime.
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let f = tokio::fs::File::open(file).await?;
            let mut extractor = Self::new(f).await?;
            extractor.extract_to_dir(dir).await
        })
    }
}

impl<R: Readable> Ole2Extractor<R> {
    /// Parse the container header from `source`.
    ///
    /// Reads exactly the 512-byte header prefix; no other offset is
    /// touched until streams are enumerated. Header-level errors
    /// (`BadMagic`, `BadBlockSize`, short sources) are fatal; everything
    /// past the header is handled best-effort during [`extract`].
    ///
    /// [`extract`]: Self::extract
    pub async fn new(source: R) -> Result<Self> {
        let mut source = ByteSource::new(source).await?;
        let mut buf = vec![0u8; constants::HEADER_LENGTH];
        source.read_at(0, &mut buf).await?;
        let header = Ole2Header::parse(&buf)?;
        debug!("parsed OLE2 header: {header:#?}");

        Ok(Self {
            source,
            header,
            sbat_root_start: constants::END_OF_CHAIN,
            anonymous_streams: 0,
        })
    }

    pub fn header(&self) -> &Ole2Header {
        &self.header
    }

    /// Enumerate the property directory as a flat list.
    ///
    /// Re-reads the directory chain from the source on every call.
    pub async fn properties(&mut self) -> Vec<Property> {
        self.read_property_tree().await
    }

    pub async fn list_streams(&mut self) -> Vec<String> {
        //! Names of the stream entries, in stored order.
        self.list_object(PropertyType::Stream).await
    }

    pub async fn list_storage(&mut self) -> Vec<String> {
        //! Names of the storage entries, in stored order.
        self.list_object(PropertyType::Storage).await
    }

    async fn list_object(&mut self, property_type: PropertyType) -> Vec<String> {
        self.read_property_tree()
            .await
            .into_iter()
            .filter_map(|prop| {
                if prop.property_type == property_type {
                    prop.name
                } else {
                    None
                }
            })
            .collect()
    }

    /// Extract every stream, handing each one to `factory`.
    ///
    /// Faults inside a single stream (short reads, broken chains, FAT
    /// errors) abandon that stream and are logged; the remaining
    /// streams are still delivered. The only non-`Ok` outcome is
    /// [`Error::Aborted`], raised when a sink cancels the extraction.
    pub async fn extract<F: SinkFactory>(&mut self, factory: &mut F) -> Result<()> {
        let properties = self.read_property_tree().await;

        for prop in &properties {
            if prop.property_type != PropertyType::Stream {
                continue;
            }

            let name = self.output_name(prop);
            let mut sink = match factory.open(&name, prop) {
                Ok(Some(sink)) => sink,
                Ok(None) => {
                    debug!("consumer skipped stream {name}");
                    continue;
                }
                Err(Error::Aborted) => return Err(Error::Aborted),
                Err(err) => {
                    warn!("no sink for stream {name}: {err}");
                    continue;
                }
            };

            let outcome = self.materialize(prop, &mut sink).await;
            match outcome.and(sink.close()) {
                Ok(()) => {}
                Err(Error::Aborted) => return Err(Error::Aborted),
                Err(err) => warn!("stream {name} abandoned: {err}"),
            }
        }

        Ok(())
    }

    /// Extract every stream into one file per stream under `dir`.
    pub async fn extract_to_dir<P: AsRef<std::path::Path>>(&mut self, dir: P) -> Result<()> {
        let mut factory = DirSinkFactory::new(dir.as_ref());
        self.extract(&mut factory).await
    }

    /// Walk the property directory chain from `prop_start`, decoding
    /// every allocated entry in stored order.
    ///
    /// The directory is physically a red-black tree, but entries occupy
    /// contiguous 128-byte slots in the directory stream, so a linear
    /// scan sees every one of them; the tree pointers are carried on the
    /// decoded entries without being followed. Seeing the root entry
    /// records the mini-stream anchor as a side effect.
    ///
    /// The walk is best-effort: damage to the directory chain ends the
    /// scan with whatever was decoded so far.
    async fn read_property_tree(&mut self) -> Vec<Property> {
        let mut properties = Vec::new();
        let per_block = self.header.properties_per_block();
        let budget = self.chain_budget(self.header.big_block_size());

        let mut slot_base = 0usize;
        let mut steps = 0u64;
        let mut current = self.header.prop_start;
        while current >= 0 {
            steps += 1;
            if steps > budget {
                error!(
                    "property directory chain exceeded {budget} blocks: {}",
                    Error::ChainCycle(budget)
                );
                break;
            }

            let block = match self.read_big_block(current).await {
                Ok(block) => block,
                Err(err) => {
                    error!("property directory block {current} unreadable: {err}");
                    break;
                }
            };

            for slot in 0..per_block {
                let chunk = &block[slot * constants::PROPERTY_LENGTH..][..constants::PROPERTY_LENGTH];
                let Some(raw) = RawProperty::parse(chunk) else {
                    continue;
                };
                if let Some(prop) = Property::from_raw(raw, slot_base + slot) {
                    if prop.property_type == PropertyType::Root {
                        self.sbat_root_start = prop.start_block;
                    }
                    debug!(
                        "property {} {:?} start {} size {}",
                        prop.name.as_deref().unwrap_or("[no name]"),
                        prop.property_type,
                        prop.start_block,
                        prop.size,
                    );
                    properties.push(prop);
                }
            }

            slot_base += per_block;
            current = match self.next_big(current).await {
                Ok(next) => next,
                Err(err) => {
                    error!("property directory chain broken after block {current}: {err}");
                    break;
                }
            };
        }

        properties
    }

    /// Reconstruct one stream and feed it to `sink`.
    ///
    /// Streams below the cutoff live in the mini-FAT and are assembled
    /// from small blocks inside the mini-stream; everything else walks
    /// the big FAT directly. Each step emits at most one block and the
    /// walk stops at the first negative successor or once `size` bytes
    /// are out, whichever comes first.
    pub(crate) async fn materialize<S: StreamSink>(
        &mut self,
        prop: &Property,
        sink: &mut S,
    ) -> Result<()> {
        let small = prop.size < self.header.sbat_cutoff;
        let block_size = if small {
            self.header.small_block_size()
        } else {
            self.header.big_block_size()
        };
        let budget = self.chain_budget(block_size);

        let mut remaining = prop.size as usize;
        let mut current = prop.start_block;
        let mut steps = 0u64;
        while current >= 0 && remaining > 0 {
            steps += 1;
            if steps > budget {
                return Err(Error::ChainCycle(budget));
            }

            if small {
                let block = self.sbat_data_block(current).await?;
                let offset = (current % self.header.small_per_big()) as usize * block_size;
                let take = remaining.min(block_size);
                sink.write(&block[offset..offset + take])?;
                remaining -= take;
                current = self.next_small(current).await?;
            } else {
                let block = self.read_big_block(current).await?;
                let take = remaining.min(block_size);
                sink.write(&block[0..take])?;
                remaining -= take;
                current = self.next_big(current).await?;
            }
        }

        Ok(())
    }

    fn output_name(&mut self, prop: &Property) -> String {
        match &prop.name {
            Some(name) => name.clone(),
            None => {
                let name = format!("{:010}", self.anonymous_streams);
                self.anonymous_streams += 1;
                name
            }
        }
    }
}
