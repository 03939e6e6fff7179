use log::{error, Level};
use ole2_extract::Ole2Extractor;
use simple_logger::init_with_level;
use std::process::exit;

fn main() {
    init_with_level(Level::Debug).unwrap();

    let mut args = std::env::args().skip(1);
    let (Some(file), Some(dir)) = (args.next(), args.next()) else {
        eprintln!("usage: ole2x <ole2-file> <output-dir>");
        exit(2);
    };

    if let Err(err) = Ole2Extractor::extract_file_blocking(&file, &dir) {
        error!("{file}: {err}");
        exit(1);
    }
}
