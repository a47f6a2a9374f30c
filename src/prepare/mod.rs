//! Preparation of the phenotypes JSON from a tab-separated phenotype table.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::BuildHasher;
use std::io::Write;
use std::path::Path;

use clap::Parser;
use serde::Serialize;

/// Command line arguments for `prepare` sub command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Prepare phenotypes JSON from a table", long_about = None)]
pub struct Args {
    /// Path to the phenotype table with `patient_id` and `child_hpo` columns.
    #[arg(long, required = true)]
    pub path_phenotypes_tsv: String,
    /// Path to table mapping `decipher_id` to `person_stable_id`.
    #[arg(long)]
    pub path_sample_ids: Option<String>,
    /// Path to trio table; only probands listed in its second column are kept.
    #[arg(long)]
    pub path_trios: Option<String>,
    /// Path to the output JSON file.
    #[arg(long, required = true)]
    pub path_out: String,
}

/// Values of `child_hpo` that mean "no terms".
const MISSING_TERMS: &[&str] = &["", "NA", "-"];

/// Open a tab-separated file, gzip-compressed if the name ends in `.gz`.
fn tsv_reader(
    path: &Path,
    has_headers: bool,
) -> Result<csv::Reader<Box<dyn std::io::BufRead>>, anyhow::Error> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(has_headers)
        .flexible(true)
        .from_reader(crate::common::open_read_maybe_gz(path)?))
}

/// Position of `name` in the header of `reader`.
fn column<R: std::io::Read>(
    reader: &mut csv::Reader<R>,
    name: &str,
) -> Result<usize, anyhow::Error> {
    reader
        .headers()?
        .iter()
        .position(|header| header == name)
        .ok_or_else(|| anyhow::anyhow!("missing column {} in header", name))
}

/// Load the map from DECIPHER id to stable sample id.
///
/// # Errors
///
/// If the file cannot be read or lacks the id columns.
pub fn load_sample_ids<P: AsRef<Path>>(
    path: P,
) -> Result<HashMap<String, String>, anyhow::Error> {
    let mut reader = tsv_reader(path.as_ref(), true)?;
    let decipher_col = column(&mut reader, "decipher_id")?;
    let stable_col = column(&mut reader, "person_stable_id")?;

    let mut result = HashMap::new();
    for record in reader.records() {
        let record = record?;
        if let (Some(decipher_id), Some(stable_id)) =
            (record.get(decipher_col), record.get(stable_col))
        {
            result.insert(
                decipher_id.trim().to_string(),
                stable_id.trim().to_string(),
            );
        }
    }
    tracing::debug!("  loaded {} sample id mappings", result.len());
    Ok(result)
}

/// Load the proband ids from the second column of the (header-less) trio table.
///
/// # Errors
///
/// If the file cannot be read.
pub fn load_trio_probands<P: AsRef<Path>>(path: P) -> Result<HashSet<String>, anyhow::Error> {
    let mut reader = tsv_reader(path.as_ref(), false)?;
    let mut result = HashSet::new();
    for record in reader.records() {
        if let Some(proband_id) = record?.get(1) {
            result.insert(proband_id.trim().to_string());
        }
    }
    tracing::debug!("  loaded {} trio probands", result.len());
    Ok(result)
}

/// Build terms by proband from the phenotype table.
///
/// Ids are mapped through `sample_ids` first, then filtered by `trio_probands` if given.
///
/// # Errors
///
/// If the file cannot be read or lacks the `patient_id` or `child_hpo` columns.
pub fn load_phenotype_table<P, S, T>(
    path: P,
    sample_ids: &HashMap<String, String, S>,
    trio_probands: Option<&HashSet<String, T>>,
) -> Result<BTreeMap<String, Vec<String>>, anyhow::Error>
where
    P: AsRef<Path>,
    S: BuildHasher,
    T: BuildHasher,
{
    let mut reader = tsv_reader(path.as_ref(), true)?;
    let proband_col = column(&mut reader, "patient_id")?;
    let terms_col = column(&mut reader, "child_hpo")?;

    let mut result = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let (Some(proband_id), Some(terms)) = (record.get(proband_col), record.get(terms_col))
        else {
            continue;
        };
        let terms = terms.trim();
        if MISSING_TERMS.contains(&terms) {
            continue;
        }

        let proband_id = proband_id.trim();
        let proband_id = sample_ids
            .get(proband_id)
            .map_or(proband_id, String::as_str);
        if trio_probands.is_some_and(|trio_probands| !trio_probands.contains(proband_id)) {
            continue;
        }

        result.insert(
            proband_id.to_string(),
            terms.split('|').map(|term| term.trim().to_string()).collect(),
        );
    }
    Ok(result)
}

/// Write terms by proband as JSON indented with four spaces.
///
/// # Errors
///
/// In the case of I/O failure.
pub fn write_phenotypes<W: Write>(
    phenotypes: &BTreeMap<String, Vec<String>>,
    mut writer: W,
) -> Result<(), anyhow::Error> {
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
    phenotypes.serialize(&mut ser)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Main entry point for `prepare` sub command.
///
/// # Errors
///
/// In the case of I/O failure or malformed input tables.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    crate::common::init_env_logger(args_common);

    tracing::info!("Loading sample tables...");
    let before_loading = std::time::Instant::now();
    let sample_ids = args
        .path_sample_ids
        .as_ref()
        .map(|path| load_sample_ids(crate::common::expand_path(path)?))
        .transpose()?
        .unwrap_or_default();
    let trio_probands = args
        .path_trios
        .as_ref()
        .map(|path| load_trio_probands(crate::common::expand_path(path)?))
        .transpose()?;
    let phenotypes = load_phenotype_table(
        crate::common::expand_path(&args.path_phenotypes_tsv)?,
        &sample_ids,
        trio_probands.as_ref(),
    )?;
    tracing::info!(
        "...done loading {} probands in {:?}",
        phenotypes.len(),
        before_loading.elapsed()
    );

    tracing::info!("Writing phenotypes JSON...");
    let before_writing = std::time::Instant::now();
    let mut writer =
        crate::common::open_write_maybe_gz(crate::common::expand_path(&args.path_out)?)?;
    write_phenotypes(&phenotypes, &mut writer)?;
    writer.finish()?;
    tracing::info!("...done writing in {:?}", before_writing.elapsed());

    tracing::info!("All done. Have a nice day!");

    Ok(())
}

#[cfg(test)]
mod test {
    use std::collections::{HashMap, HashSet};

    use clap_verbosity_flag::Verbosity;
    use temp_testdir::TempDir;

    #[test]
    fn load_without_maps() -> Result<(), anyhow::Error> {
        let phenotypes = super::load_phenotype_table(
            "tests/data/phenotypes.tsv",
            &HashMap::new(),
            None::<&HashSet<String>>,
        )?;

        assert_eq!(
            phenotypes.keys().collect::<Vec<_>>(),
            vec!["DEC1", "DEC2", "DEC5"]
        );
        assert_eq!(phenotypes["DEC1"], vec!["HP:0000003", "HP:0000006"]);

        Ok(())
    }

    #[test]
    fn load_trio_probands() -> Result<(), anyhow::Error> {
        let mut probands = super::load_trio_probands("tests/data/trios.tsv")?
            .into_iter()
            .collect::<Vec<_>>();
        probands.sort();

        assert_eq!(probands, vec!["DDD001", "DDD002"]);

        Ok(())
    }

    #[test]
    fn run_with_maps() -> Result<(), anyhow::Error> {
        let tmp_dir = TempDir::default();
        let path_out = tmp_dir.join("phenotypes.json");

        let args_common = crate::common::Args {
            verbose: Verbosity::new(0, 0),
        };
        let args = super::Args {
            path_phenotypes_tsv: String::from("tests/data/phenotypes.tsv"),
            path_sample_ids: Some(String::from("tests/data/sample_ids.tsv")),
            path_trios: Some(String::from("tests/data/trios.tsv")),
            path_out: format!("{}", path_out.display()),
        };
        super::run(&args_common, &args)?;

        insta::assert_snapshot!(std::fs::read_to_string(&path_out)?, @r###"
        {
            "DDD001": [
                "HP:0000003",
                "HP:0000006"
            ],
            "DDD002": [
                "HP:0000004"
            ]
        }
        "###);

        Ok(())
    }
}
