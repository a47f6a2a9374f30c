//! Functionality shared across the crate.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
    str::FromStr,
};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use flate2::{bufread::MultiGzDecoder, write::GzEncoder, Compression};
use strum::{EnumIter, IntoEnumIterator};

/// Shared command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

/// Enable `env_logger` output when running with debug or trace verbosity.
pub fn init_env_logger(args_common: &Args) {
    if let Some(log::Level::Trace | log::Level::Debug) = args_common.verbose.log_level() {
        std::env::set_var("RUST_LOG", "debug");
        // May already be initialized when running several commands in one process.
        let _ = env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("info"))
            .try_init();
    }
}

/// Construct the `indicatif` style for progress bars.
///
/// # Panics
///
/// In the case when writing the ETA seconds could not be written to the progress bar.
pub fn indicatif_style() -> indicatif::ProgressStyle {
    let tpl = "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] \
    {human_pos}/{human_len} ({per_sec})";
    indicatif::ProgressStyle::with_template(tpl)
        .unwrap()
        .with_key(
            "eta",
            |state: &indicatif::ProgressState, w: &mut dyn std::fmt::Write| {
                write!(w, "{:.1}s", state.eta().as_secs_f64())
                    .expect("could not write the ETA as seconds to progress bar");
            },
        )
        .progress_chars("#>-")
}

/// Construct an `indicatif` progress bar with the common style.
///
/// Also, we will enable a steady tick every 0.1s and hide in tests.
pub fn progress_bar(#[allow(unused_variables)] len: usize) -> indicatif::ProgressBar {
    #[cfg(test)]
    let pb = indicatif::ProgressBar::hidden();
    #[cfg(not(test))]
    let pb = indicatif::ProgressBar::new(len as u64).with_style(indicatif_style());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Expand `~` and environment variables in a path given on the command line.
///
/// # Errors
///
/// If an environment variable in `path` is not set.
pub fn expand_path(path: &str) -> Result<String, anyhow::Error> {
    Ok(shellexpand::full(path)
        .map_err(|e| anyhow::anyhow!("could not expand path {}: {}", path, e))?
        .into_owned())
}

/// Transparently open a file with gzip decoder.
///
/// # Errors
///
/// If the file cannot be opened.
pub fn open_read_maybe_gz<P>(path: P) -> Result<Box<dyn BufRead>, anyhow::Error>
where
    P: AsRef<Path>,
{
    if path.as_ref().extension().map(|s| s.to_str()) == Some(Some("gz")) {
        tracing::trace!("Opening {:?} as gzip for reading", path.as_ref());
        let file = File::open(path)?;
        let bufreader = BufReader::new(file);
        let decoder = MultiGzDecoder::new(bufreader);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        tracing::trace!("Opening {:?} as plain text for reading", path.as_ref());
        let file = File::open(path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Output file, plain or gzip-compressed.
pub enum FileWriter {
    /// Plain text output.
    Plain(BufWriter<File>),
    /// Gzip-compressed output.
    Gz(GzEncoder<BufWriter<File>>),
}

impl FileWriter {
    /// Flush buffered data and, for gzip output, write the trailer.
    ///
    /// # Errors
    ///
    /// If writing to the underlying file fails.
    pub fn finish(self) -> Result<(), anyhow::Error> {
        match self {
            Self::Plain(mut writer) => writer.flush()?,
            Self::Gz(encoder) => encoder.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(writer) => writer.write(buf),
            Self::Gz(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(writer) => writer.flush(),
            Self::Gz(encoder) => encoder.flush(),
        }
    }
}

/// Transparently open a file with gzip encoder.
///
/// Call [`FileWriter::finish`] when done, errors on drop go unnoticed.
///
/// # Errors
///
/// If the file cannot be created.
pub fn open_write_maybe_gz<P>(path: P) -> Result<FileWriter, anyhow::Error>
where
    P: AsRef<Path>,
{
    if path.as_ref().extension().map(|s| s.to_str()) == Some(Some("gz")) {
        tracing::trace!("Opening {:?} as gzip for writing", path.as_ref());
        let file = File::create(path)?;
        let bufwriter = BufWriter::new(file);
        Ok(FileWriter::Gz(GzEncoder::new(bufwriter, Compression::default())))
    } else {
        tracing::trace!("Opening {:?} as plain text for writing", path.as_ref());
        let file = File::create(path)?;
        Ok(FileWriter::Plain(BufWriter::new(file)))
    }
}

/// How to combine pairwise term similarities into a similarity of two term sets.
#[derive(
    Default,
    Debug,
    Clone,
    Copy,
    EnumIter,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SetCombiner {
    /// Average of the two directed best-match averages (Phenomizer).
    #[default]
    #[display("fun-sim-avg")]
    FunSimAvg,
    /// Maximum of the two directed best-match averages.
    #[display("fun-sim-max")]
    FunSimMax,
    /// Best matches of both directions pooled and averaged.
    #[display("bma")]
    Bma,
    /// Maximum over all term pairs.
    #[display("max")]
    Max,
    /// Mean over all term pairs.
    #[display("mean")]
    Mean,
}

impl FromStr for SetCombiner {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SetCombiner::iter()
            .find(|m| m.to_string().as_str().eq(s))
            .ok_or(anyhow::anyhow!("unknown set combiner: {}", s))
    }
}

/// Format of the report written by `analyze`.
#[derive(
    Default,
    Debug,
    Clone,
    Copy,
    EnumIter,
    PartialEq,
    Eq,
    derive_more::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Tab-separated values with header.
    #[default]
    #[display("tsv")]
    Tsv,
    /// JSON container with metadata.
    #[display("json")]
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputFormat::iter()
            .find(|m| m.to_string().as_str().eq(s))
            .ok_or(anyhow::anyhow!("unknown output format: {}", s))
    }
}

/// The version of `hposim` package.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information written into the report.
#[serde_with::skip_serializing_none]
#[derive(serde::Serialize, serde::Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Data version of the ontology, if declared.
    pub ontology: Option<String>,
    /// Version of the `hposim` package.
    pub hposim: String,
}

impl Version {
    /// Construct a new version.
    ///
    /// The hposim version is filled automatically.
    pub fn new(ontology: Option<&str>) -> Self {
        Self {
            ontology: ontology.map(ToString::to_string),
            hposim: VERSION.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::{OutputFormat, SetCombiner};

    #[test]
    fn set_combiner_round_trips_through_display() -> Result<(), anyhow::Error> {
        for combiner in SetCombiner::iter() {
            assert_eq!(SetCombiner::from_str(&combiner.to_string())?, combiner);
        }
        assert!(SetCombiner::from_str("resnik").is_err());
        assert_eq!(OutputFormat::from_str("json")?, OutputFormat::Json);

        Ok(())
    }

    #[rstest::rstest]
    #[case("out.txt")]
    #[case("out.txt.gz")]
    fn open_maybe_gz(#[case] filename: &str) -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = tmp_dir.join(filename);

        let mut f = super::open_write_maybe_gz(&path)?;
        f.write_all(b"hello\n")?;
        f.finish()?;

        let mut buf = String::new();
        super::open_read_maybe_gz(&path)?.read_to_string(&mut buf)?;
        assert_eq!(buf, "hello\n");

        Ok(())
    }
}
