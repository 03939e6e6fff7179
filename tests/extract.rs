//! End-to-end extraction over synthesized OLE2 images.

use ole2_extract::{Error, Ole2Extractor, Property, Result, SinkFactory, StreamSink};
use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

const MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const TYPE_STREAM: u8 = 2;
const TYPE_ROOT: u8 = 5;

/// Assembles a compound file image: the 512-byte header followed by
/// 512-byte big blocks. Unset blocks are zero-filled.
struct ImageBuilder {
    header: Vec<u8>,
    blocks: Vec<Vec<u8>>,
}

impl ImageBuilder {
    fn new() -> Self {
        let mut header = vec![0u8; 512];
        header[0..8].copy_from_slice(&MAGIC);
        header[24] = 0x3E; // minor version
        header[26] = 0x03; // dll version
        header[28] = 0xFE; // byte order -2
        header[29] = 0xFF;
        header[30] = 9; // log2 big block size
        header[32] = 6; // log2 small block size
        header[57] = 0x10; // sbat cutoff 4096
        for field in [48, 60, 68] {
            header[field..field + 4].copy_from_slice(&(-1i32).to_le_bytes());
        }
        for entry in 0..109 {
            let at = 76 + entry * 4;
            header[at..at + 4].copy_from_slice(&(-1i32).to_le_bytes());
        }
        Self {
            header,
            blocks: Vec::new(),
        }
    }

    fn header_i32(&mut self, at: usize, value: i32) {
        self.header[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn header_u32(&mut self, at: usize, value: u32) {
        self.header[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn bat_count(&mut self, count: i32) {
        self.header_i32(44, count);
    }

    fn prop_start(&mut self, block: i32) {
        self.header_i32(48, block);
    }

    fn sbat(&mut self, start: i32, count: i32) {
        self.header_i32(60, start);
        self.header_i32(64, count);
    }

    fn xbat(&mut self, start: i32, count: i32) {
        self.header_i32(68, start);
        self.header_i32(72, count);
    }

    fn bat(&mut self, index: usize, sector: i32) {
        let at = 76 + index * 4;
        self.header[at..at + 4].copy_from_slice(&sector.to_le_bytes());
    }

    fn block_mut(&mut self, block: usize) -> &mut Vec<u8> {
        while self.blocks.len() <= block {
            self.blocks.push(vec![0u8; 512]);
        }
        &mut self.blocks[block]
    }

    /// Write one allocation-table entry inside a FAT/SBAT/XBAT block.
    fn entry(&mut self, block: usize, slot: usize, value: i32) {
        let buf = self.block_mut(block);
        buf[slot * 4..slot * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Link consecutive blocks in a FAT sector and terminate the chain.
    fn chain(&mut self, fat_block: usize, blocks: &[i32]) {
        for pair in blocks.windows(2) {
            self.entry(fat_block, pair[0] as usize, pair[1]);
        }
        if let Some(last) = blocks.last() {
            self.entry(fat_block, *last as usize, -1);
        }
    }

    fn data(&mut self, block: usize, at: usize, bytes: &[u8]) {
        let buf = self.block_mut(block);
        buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Write a 128-byte property entry into a directory sector.
    fn property(&mut self, block: usize, slot: usize, name: &str, kind: u8, start: i32, size: u32) {
        let at = slot * 128;
        let units: Vec<u16> = name.encode_utf16().collect();
        let name_size = (units.len() as u16 + 1) * 2;
        let buf = self.block_mut(block);
        for (i, unit) in units.iter().enumerate() {
            buf[at + i * 2..at + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        buf[at + 64..at + 66].copy_from_slice(&name_size.to_le_bytes());
        buf[at + 66] = kind;
        buf[at + 67] = 1; // black
        for field in [68, 72, 76] {
            buf[at + field..at + field + 4].copy_from_slice(&(-1i32).to_le_bytes());
        }
        buf[at + 116..at + 120].copy_from_slice(&start.to_le_bytes());
        buf[at + 120..at + 124].copy_from_slice(&size.to_le_bytes());
    }

    fn build(self) -> Vec<u8> {
        let mut bytes = self.header;
        for block in self.blocks {
            bytes.extend(block);
        }
        bytes
    }

    async fn extractor(self) -> Ole2Extractor<Cursor<Vec<u8>>> {
        Ole2Extractor::new(Cursor::new(self.build())).await.unwrap()
    }
}

#[derive(Debug)]
struct RecordedStream {
    name: String,
    data: Vec<u8>,
    closed: bool,
}

type Streams = Rc<RefCell<Vec<RecordedStream>>>;

/// Captures every extracted stream in memory; can skip streams by name
/// or abort the extraction from a given stream's first write.
#[derive(Default)]
struct Recorder {
    streams: Streams,
    skip: Vec<String>,
    abort_on: Option<String>,
}

struct RecorderSink {
    streams: Streams,
    index: usize,
    abort: bool,
}

impl SinkFactory for Recorder {
    type Sink = RecorderSink;

    fn open(&mut self, name: &str, _property: &Property) -> Result<Option<RecorderSink>> {
        if self.skip.iter().any(|skip| skip == name) {
            return Ok(None);
        }
        let mut streams = self.streams.borrow_mut();
        streams.push(RecordedStream {
            name: name.to_string(),
            data: Vec::new(),
            closed: false,
        });
        Ok(Some(RecorderSink {
            streams: self.streams.clone(),
            index: streams.len() - 1,
            abort: self.abort_on.as_deref() == Some(name),
        }))
    }
}

impl StreamSink for RecorderSink {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.abort {
            return Err(Error::Aborted);
        }
        self.streams.borrow_mut()[self.index]
            .data
            .extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.streams.borrow_mut()[self.index].closed = true;
        Ok(())
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// One mini-FAT stream "Foo" of 10 bytes, with the root entry in slot 0
/// of the first property sector.
fn mini_image() -> ImageBuilder {
    let mut img = ImageBuilder::new();
    img.bat_count(1);
    img.bat(0, 0);
    img.prop_start(1);
    img.sbat(2, 1);

    // FAT: property directory, mini-FAT and mini-stream are all
    // single-block chains.
    img.entry(0, 0, -3);
    img.entry(0, 1, -1);
    img.entry(0, 2, -1);
    img.entry(0, 3, -1);

    img.property(1, 0, "Root Entry", TYPE_ROOT, 3, 64);
    img.property(1, 1, "Foo", TYPE_STREAM, 0, 10);

    img.entry(2, 0, -1); // SBAT: small chain ends after block 0

    img.data(3, 0, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    img
}

#[tokio::test]
async fn extracts_a_mini_fat_stream() {
    let mut extractor = mini_image().extractor().await;
    let mut recorder = Recorder::default();
    extractor.extract(&mut recorder).await.unwrap();

    let streams = recorder.streams.borrow();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].name, "Foo");
    assert_eq!(streams[0].data, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    assert!(streams[0].closed);
}

#[tokio::test]
async fn lists_streams_and_properties() {
    let mut extractor = mini_image().extractor().await;
    assert_eq!(extractor.list_streams().await, vec!["Foo".to_string()]);

    let properties = extractor.properties().await;
    assert_eq!(properties.len(), 2);
    assert_eq!(properties[0].name.as_deref(), Some("Root Entry"));
    assert_eq!(properties[1].size, 10);
}

#[tokio::test]
async fn extracts_a_big_fat_stream() {
    let mut img = ImageBuilder::new();
    img.bat_count(1);
    img.bat(0, 0);
    img.prop_start(1);

    let chain: Vec<i32> = (2..12).collect();
    img.entry(0, 0, -3);
    img.entry(0, 1, -1);
    img.chain(0, &chain);

    img.property(1, 0, "Root Entry", TYPE_ROOT, -1, 0);
    img.property(1, 1, "Big", TYPE_STREAM, 2, 5000);
    for block in 2..12 {
        img.data(block, 0, &[0xAA; 512]);
    }

    let mut extractor = img.extractor().await;
    let mut recorder = Recorder::default();
    extractor.extract(&mut recorder).await.unwrap();

    let streams = recorder.streams.borrow();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].data, vec![0xAA; 5000]);
}

#[tokio::test]
async fn walks_fat_sectors_reached_through_the_xbat() {
    // 120 FAT sectors are declared; the stream's second block lands in
    // FAT sector 110, reachable only through the XBAT.
    let mut img = ImageBuilder::new();
    img.bat_count(120);
    img.bat(0, 0);
    img.prop_start(1);
    img.xbat(2, 1);
    img.header_u32(56, 100); // lowered cutoff keeps "X" in the big FAT

    let contents = pattern(700);
    img.entry(0, 0, -3);
    img.entry(0, 1, -1);
    img.entry(0, 10, 14080); // "X": block 10 -> block 14080

    img.entry(2, 1, 3); // XBAT slot 1 -> FAT sector 110 at block 3
    img.entry(2, 127, -1);
    img.entry(3, 0, -1); // FAT sector 110: entry for block 14080

    img.property(1, 0, "Root Entry", TYPE_ROOT, -1, 0);
    img.property(1, 1, "X", TYPE_STREAM, 10, 700);

    img.data(10, 0, &contents[0..512]);
    img.data(14080, 0, &contents[512..700]);

    let mut extractor = img.extractor().await;
    let mut recorder = Recorder::default();
    extractor.extract(&mut recorder).await.unwrap();

    let streams = recorder.streams.borrow();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].data, contents);
}

#[tokio::test]
async fn truncated_chain_abandons_only_that_stream() {
    // "Bad" points past the end of the image mid-chain; "Good" follows
    // it in the directory and must still come out whole. The lowered
    // cutoff keeps both streams in the big FAT.
    let mut img = ImageBuilder::new();
    img.bat_count(1);
    img.bat(0, 0);
    img.prop_start(1);
    img.header_u32(56, 100); // sbat cutoff

    let contents = pattern(700);
    img.entry(0, 0, -3);
    img.entry(0, 1, -1);
    img.entry(0, 2, 5); // "Bad": block 5 does not exist
    img.entry(0, 5, -1);
    img.chain(0, &[3, 4]); // "Good"

    img.property(1, 0, "Root Entry", TYPE_ROOT, -1, 0);
    img.property(1, 1, "Bad", TYPE_STREAM, 2, 1024);
    img.property(1, 2, "Good", TYPE_STREAM, 3, 700);

    img.data(2, 0, &[0xEE; 512]);
    img.data(3, 0, &contents[0..512]);
    img.data(4, 0, &contents[512..700]);

    let mut extractor = img.extractor().await;
    let mut recorder = Recorder::default();
    extractor.extract(&mut recorder).await.unwrap();

    let streams = recorder.streams.borrow();
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[0].name, "Bad");
    assert_eq!(streams[0].data, vec![0xEE; 512]);
    assert!(streams[0].closed);
    assert_eq!(streams[1].name, "Good");
    assert_eq!(streams[1].data, contents);
    assert!(streams[1].closed);
}

/// Builds an image holding "A" (`sbat_cutoff - 1` bytes, mini-FAT) and
/// "B" (`sbat_cutoff` bytes, big FAT).
fn boundary_image() -> (ImageBuilder, Vec<u8>) {
    let mut img = ImageBuilder::new();
    img.bat_count(1);
    img.bat(0, 0);
    img.prop_start(1);
    img.sbat(2, 1);

    img.entry(0, 0, -3);
    img.entry(0, 1, -1);
    img.entry(0, 2, -1);
    let mini_backing: Vec<i32> = (3..11).collect();
    img.chain(0, &mini_backing);
    let big_chain: Vec<i32> = (11..19).collect();
    img.chain(0, &big_chain);

    img.property(1, 0, "Root Entry", TYPE_ROOT, 3, 4096);
    img.property(1, 1, "A", TYPE_STREAM, 0, 4095);
    img.property(1, 2, "B", TYPE_STREAM, 11, 4096);

    // Mini-FAT: small blocks 0..63 chain linearly.
    for small in 0..63 {
        img.entry(2, small, small as i32 + 1);
    }
    img.entry(2, 63, -1);

    let mini_contents = pattern(4096);
    for (i, block) in (3..11).enumerate() {
        let piece = mini_contents[i * 512..(i + 1) * 512].to_vec();
        img.data(block, 0, &piece);
    }
    for block in 11..19 {
        img.data(block, 0, &[0xBB; 512]);
    }

    (img, mini_contents)
}

#[tokio::test]
async fn cutoff_boundary_selects_the_right_fat() {
    let (img, mini_contents) = boundary_image();
    let mut extractor = img.extractor().await;
    let mut recorder = Recorder::default();
    extractor.extract(&mut recorder).await.unwrap();

    let streams = recorder.streams.borrow();
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[0].name, "A");
    assert_eq!(streams[0].data, mini_contents[0..4095]);
    assert_eq!(streams[1].name, "B");
    assert_eq!(streams[1].data, vec![0xBB; 4096]);
}

#[tokio::test]
async fn corrupt_magic_fails_before_any_output() {
    let mut img = mini_image();
    img.header[0] = 0x00;
    let bytes = img.build();
    match Ole2Extractor::new(Cursor::new(bytes)).await {
        Err(Error::BadMagic(found)) => assert_eq!(found[0], 0x00),
        other => panic!("expected BadMagic, got {other:?}"),
    }
}

#[tokio::test]
async fn zero_size_stream_is_delivered_empty() {
    let mut img = mini_image();
    img.property(1, 2, "Empty", TYPE_STREAM, -1, 0);

    let mut extractor = img.extractor().await;
    let mut recorder = Recorder::default();
    extractor.extract(&mut recorder).await.unwrap();

    let streams = recorder.streams.borrow();
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[1].name, "Empty");
    assert!(streams[1].data.is_empty());
    assert!(streams[1].closed);
}

#[tokio::test]
async fn nameless_stream_gets_a_synthesized_name() {
    let mut img = mini_image();
    img.property(1, 2, "", TYPE_STREAM, -1, 0);

    let mut extractor = img.extractor().await;
    let mut recorder = Recorder::default();
    extractor.extract(&mut recorder).await.unwrap();

    let streams = recorder.streams.borrow();
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[1].name, "0000000000");
}

#[tokio::test]
async fn cyclic_chain_does_not_hang_the_extraction() {
    let mut img = ImageBuilder::new();
    img.bat_count(1);
    img.bat(0, 0);
    img.prop_start(1);

    img.entry(0, 0, -3);
    img.entry(0, 1, -1);
    img.entry(0, 2, 3); // "Loop": 2 -> 3 -> 2 -> ...
    img.entry(0, 3, 2);

    img.property(1, 0, "Root Entry", TYPE_ROOT, -1, 0);
    img.property(1, 1, "Loop", TYPE_STREAM, 2, 50_000_000);
    img.block_mut(3);

    let mut extractor = img.extractor().await;
    let mut recorder = Recorder::default();
    extractor.extract(&mut recorder).await.unwrap();

    let streams = recorder.streams.borrow();
    assert_eq!(streams.len(), 1);
    // The walk was cut off well short of the declared size.
    assert!(streams[0].data.len() < 50_000_000);
    assert!(streams[0].closed);
}

#[tokio::test]
async fn consumer_can_skip_streams() {
    let mut extractor = mini_image().extractor().await;
    let mut recorder = Recorder {
        skip: vec!["Foo".to_string()],
        ..Recorder::default()
    };
    extractor.extract(&mut recorder).await.unwrap();
    assert!(recorder.streams.borrow().is_empty());
}

#[tokio::test]
async fn consumer_abort_unwinds_the_extraction() {
    let mut img = mini_image();
    img.property(1, 2, "Never", TYPE_STREAM, -1, 0);

    let mut extractor = img.extractor().await;
    let mut recorder = Recorder {
        abort_on: Some("Foo".to_string()),
        ..Recorder::default()
    };
    match extractor.extract(&mut recorder).await {
        Err(Error::Aborted) => {}
        other => panic!("expected Aborted, got {other:?}"),
    }

    let streams = recorder.streams.borrow();
    // "Foo" was opened and closed; "Never" was never reached.
    assert_eq!(streams.len(), 1);
    assert!(streams[0].closed);
}

#[tokio::test]
async fn default_consumer_writes_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut extractor = mini_image().extractor().await;
    extractor.extract_to_dir(dir.path()).await.unwrap();

    let written = std::fs::read(dir.path().join("Foo")).unwrap();
    assert_eq!(written, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
}
