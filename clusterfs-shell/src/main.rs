mod command;
mod shell;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use clusterfs::{EventLog, FileSystem, FsError};
use log::{error, LevelFilter};

use crate::command::parse_size;
use crate::shell::Shell;

/// Interactive shell over a clusterfs disk image.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Disk image to open, e.g. `data.dat`
    image: PathBuf,

    /// Size used to format the image when the file does not exist yet
    #[arg(long, short, default_value = "50MB", value_parser = parse_size)]
    size: u64,

    /// Run the commands of this file instead of reading standard input
    #[arg(long)]
    script: Option<PathBuf>,

    /// Log more detail (-v info, -vv debug, -vvv trace); RUST_LOG is honoured otherwise
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Warn).parse_default_env();
    match verbose {
        0 => (),
        1 => {
            builder.filter_level(LevelFilter::Info);
        }
        2 => {
            builder.filter_level(LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(LevelFilter::Trace);
        }
    }
    if let Err(err) = builder.try_init() {
        eprintln!("logging disabled: {}", err);
    }
}

/// Opens `image`, formatting it with `size` bytes only when no file exists there.
/// An existing file without a file system is left untouched until `format` is run.
fn open_image(image: &Path, size: u64, log: EventLog) -> Result<FileSystem, FsError> {
    let missing = !image.exists();
    let mut fs = FileSystem::open_with_log(image, log)?;
    if missing {
        fs.format(size)?;
        println!("formatted {} ({} B)", image.display(), size);
    } else if !fs.is_formatted() {
        println!(
            "{} is not a clusterfs image, run `format` to initialize it",
            image.display()
        );
    }
    Ok(fs)
}

fn run(cli: Cli) -> Result<(), shell::ShellError> {
    let fs = open_image(&cli.image, cli.size, EventLog::facade())?;

    let stdout = io::stdout();
    let mut shell = Shell::new(fs, stdout.lock());
    let session = match &cli.script {
        Some(script) => shell.load(script),
        None => shell.run(io::stdin().lock(), true),
    };
    shell.sync()?;
    session
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_image_is_formatted() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("new.img");

        let fs = open_image(&image, 1_024_000, EventLog::facade()).unwrap();

        assert!(fs.is_formatted());
        assert_eq!(std::fs::metadata(&image).unwrap().len(), 1_024_000);
    }

    #[test]
    fn existing_foreign_file_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("notes.txt");
        std::fs::write(&image, b"not a disk image").unwrap();

        let fs = open_image(&image, 1_024_000, EventLog::facade()).unwrap();

        assert!(!fs.is_formatted());
        assert_eq!(std::fs::read(&image).unwrap(), b"not a disk image");
    }

    #[test]
    fn formatted_image_is_reopened_without_formatting() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        let mut fs = open_image(&image, 1_024_000, EventLog::facade()).unwrap();
        fs.create("/kept", clusterfs::InodeKind::Directory).unwrap();
        drop(fs);

        let mut fs = open_image(&image, 2_000_000, EventLog::facade()).unwrap();

        assert!(fs.resolve_path("/kept", false).is_ok());
        assert_eq!(std::fs::metadata(&image).unwrap().len(), 1_024_000);
    }
}
