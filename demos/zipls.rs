use std::result::Result::Ok;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::*;
use log::*;
use memmap2::Mmap;
use rayon::prelude::*;
use structopt::*;

use zipls::*;

#[derive(Debug, StructOpt)]
#[structopt(name = "zipls", about = "Lists the files in .zip archives")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Memory map archives instead of reading just the parts we need.
    #[structopt(short, long)]
    mmap: bool,

    /// Bytes to read from the end of each archive when looking for its table of contents
    #[structopt(long, default_value = "66560")]
    tail_window: u64,

    #[structopt(name("ZIP files"), required = true)]
    zip_paths: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let options = ScanOptions {
        tail_window: args.tail_window,
        ..ScanOptions::default()
    };

    // List in parallel, print in the order we were given.
    let listings: Vec<Result<ZipArchive>> = args
        .zip_paths
        .par_iter()
        .map(|path| list(path, args.mmap, options))
        .collect();

    let mut failures = 0;
    for (path, listing) in args.zip_paths.iter().zip(listings) {
        match listing {
            Ok(archive) => print_archive(&archive, args.zip_paths.len() > 1),
            Err(e) => {
                error!("{}: {:#}", path.display(), e);
                failures += 1;
            }
        }
    }
    ensure!(failures == 0, "Couldn't list {} archive(s)", failures);
    Ok(())
}

fn list(path: &Path, mmap: bool, options: ScanOptions) -> Result<ZipArchive> {
    let name = path.to_string_lossy();
    let zip_file = File::open(path).context("Couldn't open zip file")?;
    let archive = if mmap {
        info!("Memory mapping {}", name);
        let mapping = unsafe { Mmap::map(&zip_file).context("Couldn't mmap zip file")? };
        ZipArchive::open_with(&name, &mapping[..], options)
    } else {
        let source = FileSource::new(zip_file).context("Couldn't stat zip file")?;
        ZipArchive::open_with(&name, &source, options)
    };
    archive.context("Couldn't list archive")
}

fn print_archive(archive: &ZipArchive, with_header: bool) {
    if with_header {
        println!("{}:", archive.name);
    }
    for entry in archive.entries() {
        println!(
            "{:>12}  {}  {}",
            entry.uncompressed_size,
            entry.modified.format("%Y-%m-%d %H:%M"),
            entry.name
        );
    }
}
