//! Delimited numeric matrices on disk, plain or gzipped.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use flate2::read::GzDecoder;
use rayon::prelude::*;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
///
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(input_file)?;
    match Path::new(input_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not, or "stdout"
///
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }
    let file = File::create(output_file)?;
    match Path::new(output_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

fn split_line<'a>(line: &'a str, delim: &'a str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
    if delim.trim().is_empty() {
        Box::new(line.split_whitespace())
    } else {
        Box::new(line.split(delim).map(str::trim))
    }
}

///
/// Read a dense `(rows, cols)` f32 matrix; blank lines and lines
/// starting with `#` are skipped
///
/// * `input_file` - file name--either gzipped or not
/// * `delim` - column delimiter; whitespace splits on any run of blanks
///
pub fn read_matrix(input_file: &str, delim: &str) -> anyhow::Result<Tensor> {
    let lines = open_buf_reader(input_file)?
        .lines()
        .collect::<std::io::Result<Vec<_>>>()?;

    let rows = lines
        .par_iter()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| {
            split_line(line.trim(), delim)
                .map(|x| {
                    x.parse::<f32>().map_err(|e| {
                        anyhow::anyhow!("{}:{}: failed to parse {:?}: {}", input_file, i + 1, x, e)
                    })
                })
                .collect::<anyhow::Result<Vec<f32>>>()
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    if rows.is_empty() {
        anyhow::bail!("no data in {}", input_file);
    }

    let ncols = rows[0].len();
    if let Some((r, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != ncols) {
        anyhow::bail!(
            "{}: data row {} has {} columns, expected {}",
            input_file,
            r + 1,
            row.len(),
            ncols
        );
    }
    let nrows = rows.len();
    let data = rows.into_iter().flatten().collect::<Vec<_>>();

    Ok(Tensor::from_vec(data, (nrows, ncols), &Device::Cpu)?)
}

///
/// Write a rank-2 tensor as delimited text
///
/// * `x` - tensor `(rows, cols)`, any float dtype and device
/// * `output_file` - file name--either gzipped or not
/// * `delim` - column delimiter
///
pub fn write_matrix(x: &Tensor, output_file: &str, delim: &str) -> anyhow::Result<()> {
    if x.rank() != 2 {
        anyhow::bail!("expected 2 dimensions, got {:?}", x.dims());
    }
    let rows = x.to_dtype(DType::F32)?.to_vec2::<f32>()?;

    let lines = rows
        .par_iter()
        .map(|row| {
            row.iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(delim)
        })
        .collect::<Vec<_>>();

    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        writeln!(buf, "{}", line)?;
    }
    buf.flush()?;
    Ok(())
}
