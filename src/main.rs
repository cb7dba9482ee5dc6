//! `peakconvert`: convert peak list files between the formats the
//! registry knows, pair by pair.

use std::env;
use std::path::PathBuf;
use std::process;

use peakio::io::{create_path, open_path};
use peakio::prelude::*;
use peakio::PeakIoError;

const USAGE: &str = "usage: peakconvert [--sort] [--normalize] <input> <output> [<input> <output>]...";

fn convert(
    input: &PathBuf,
    output: &PathBuf,
    sort: bool,
    normalize: bool,
) -> Result<usize, PeakIoError> {
    let mut reader = open_path(input)?;
    let mut writer = create_path(output)?;
    let mut count = 0;
    while let Some(mut list) = reader.next_peak_list()? {
        if sort {
            list.sort_by_mz();
        }
        if normalize {
            list.normalize_intensities(100.0);
        }
        writer.write(&list)?;
        count += 1;
    }
    writer.close()?;
    reader.close();
    Ok(count)
}

fn main() {
    let mut sort = false;
    let mut normalize = false;
    let mut paths: Vec<PathBuf> = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--sort" => sort = true,
            "--normalize" => normalize = true,
            "--help" | "-h" => {
                println!("{}", USAGE);
                return;
            }
            _ => paths.push(PathBuf::from(arg)),
        }
    }
    if paths.is_empty() || paths.len() % 2 != 0 {
        eprintln!("{}", USAGE);
        process::exit(2);
    }

    let mut failures = 0;
    for pair in paths.chunks(2) {
        let (input, output) = (&pair[0], &pair[1]);
        match convert(input, output, sort, normalize) {
            Ok(count) => println!(
                "{} -> {}: {} peak list(s)",
                input.display(),
                output.display(),
                count
            ),
            Err(err) => {
                eprintln!("{} -> {}: {}", input.display(), output.display(), err);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        eprintln!("{} conversion(s) failed", failures);
        process::exit(1);
    }
}
