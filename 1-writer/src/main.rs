use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, error::ErrorKind};
use tracing::{debug, error};

/// Writes a string to a file, creating or truncating it first.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the file to write
    writefile: PathBuf,

    /// Text written to the file verbatim
    writestr: String,
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> ExitCode {
    init_tracing();

    let args = match parse_args(std::env::args_os()) {
        Ok(args) => args,
        Err(err) if is_display_request(&err) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            error!("two arguments required: <writefile> <writestr>");
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    debug!("Writing {} to {}", args.writestr, args.writefile.display());
    match write_file(&args.writefile, &args.writestr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args<I, T>(args: I) -> Result<Args, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Args::try_parse_from(args)
}

/// `--help` and `--version` surface as errors but are not failures.
fn is_display_request(err: &clap::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
    )
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("failed to open file {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write to file {}", path.display()))?;
    Ok(())
}
