use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{Error, Result};

/// Open a tab-delimited table, transparently decompressing `.gz` files.
pub fn open_table<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let f = File::open(path).map_err(|e| Error::io(path, e))?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead + Send> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    Ok(reader)
}

/// Stream a table line by line. The callback receives the 1-based line
/// number and the line with its terminator stripped.
pub fn for_each_line<P, F>(path: P, mut f: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(usize, &str) -> Result<()>,
{
    let path = path.as_ref();
    let mut reader = open_table(path)?;
    let mut line = String::new();
    let mut line_no = 0;

    loop {
        line.clear();
        if reader.read_line(&mut line).map_err(|e| Error::io(path, e))? == 0 {
            break; // EOF
        }
        line_no += 1;
        f(line_no, line.trim_end_matches(['\r', '\n']))?;
    }
    Ok(())
}
