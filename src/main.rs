mod logging;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use exif_sort_core::date::{BuiltinExifReader, ExifToolReader, FsModifiedTime, MetadataReader};
use exif_sort_core::{CancellationToken, ProcessControl, ProcessOptions};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReaderKind {
    /// Run the external exiftool program (must be on PATH)
    Exiftool,
    /// Read EXIF in-process
    Builtin,
}

#[derive(Parser)]
#[command(
    name = "exif-sort",
    version,
    about = "Sort photos into Year/Month folders by EXIF capture date, separating duplicates and undated files"
)]
struct Cli {
    /// Input directory
    #[arg(long, default_value = "Source")]
    source: PathBuf,

    /// Output directory for dated originals
    #[arg(long, default_value = "Dest")]
    dest: PathBuf,

    /// Output directory for files sharing a capture time with an earlier file
    #[arg(long, default_value = "Duplicates")]
    duplicates: PathBuf,

    /// Output directory for files without capture metadata
    #[arg(long, default_value = "No_Exif")]
    no_exif: PathBuf,

    /// Also pick up images in subdirectories of the input directory
    #[arg(long)]
    recursive: bool,

    /// Decide and print every placement without creating or copying anything
    #[arg(long)]
    dry_run: bool,

    /// Worker threads for metadata reads and copies
    #[arg(short, long)]
    jobs: Option<usize>,

    /// How capture dates are read
    #[arg(long, value_enum, default_value_t = ReaderKind::Exiftool)]
    reader: ReaderKind,

    /// Seconds to wait for exiftool on a single file
    #[arg(long, default_value_t = 30)]
    exiftool_timeout: u64,

    /// Log decisions as well as actions
    #[arg(short, long)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(logging::level_for(cli.verbose, cli.quiet))?;
    let t_total = std::time::Instant::now();

    let reader: Box<dyn MetadataReader> = match cli.reader {
        ReaderKind::Exiftool => Box::new(ExifToolReader::new(Duration::from_secs(cli.exiftool_timeout))),
        ReaderKind::Builtin => Box::new(BuiltinExifReader),
    };

    let options = ProcessOptions {
        source: cli.source,
        dest: cli.dest,
        duplicates: cli.duplicates,
        no_exif: cli.no_exif,
        recursive: cli.recursive,
        dry_run: cli.dry_run,
        jobs: cli.jobs,
    };

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling, waiting for in-flight copies to finish...");
        handler_token.cancel();
    })?;
    let control = ProcessControl::new().with_cancel_token(token);

    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar().template("[{bar:40}] {pos}/{len} reading dates")?);

    let bar = pb.clone();
    let result = exif_sort_core::process_with_control(
        &options,
        reader.as_ref(),
        &FsModifiedTime,
        &control,
        &move |stage, current, total, _message| {
            if stage != "metadata" || bar.is_finished() {
                return;
            }
            bar.set_length(total);
            bar.set_position(current + 1);
            if current + 1 >= total {
                bar.finish_and_clear();
            }
        },
    );
    pb.finish_and_clear();
    let result = result?;

    tracing::info!(
        "Done! {} files: {} dated, {} duplicates, {} without metadata, {} already present, {} failed ({:.2}s)",
        result.total,
        result.primary,
        result.duplicates,
        result.no_metadata,
        result.already_present,
        result.failed,
        t_total.elapsed().as_secs_f64()
    );

    Ok(())
}
