//! Submission metadata files
//!
//! Generates the tables the archive's interactive interface accepts (samples
//! and paired-FASTQ runs), the per-sample assembly manifests consumed by
//! webin-cli, and reads sample tables back for XML submission.
//!
//! All tables are tab-separated with `\r\n` line endings.

use crate::error::{Error, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use regex::Regex;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sample checklist the generated sample table declares
pub const SAMPLE_CHECKLIST: &str = "ERC000033";

const ASSEMBLY_SUFFIX: &str = ".fasta.gz";

/// How a table cell is filled for one sample
enum Cell {
    SampleId,
    CollectionDate,
    Isolate,
    /// `<ftp_dir>/<sample id><suffix>`
    FtpFile(&'static str),
    Fixed(&'static str),
}

const SAMPLE_COLUMNS: &[(&str, Cell)] = &[
    ("sample_alias", Cell::SampleId),
    (
        "sample_title",
        Cell::Fixed("Samples from Swedish individuals positive for Covid-19 by qPCR"),
    ),
    (
        "sample_description",
        Cell::Fixed("Samples from Swedish individuals positive for Covid-19 by qPCR."),
    ),
    ("tax_id", Cell::Fixed("2697049")),
    (
        "scientific_name",
        Cell::Fixed("Severe acute respiratory syndrome coronavirus 2"),
    ),
    ("collection date", Cell::CollectionDate),
    ("geographic location (country and/or sea)", Cell::Fixed("Sweden")),
    ("host subject id", Cell::Fixed("9606")),
    ("host common name", Cell::Fixed("human")),
    ("host scientific name", Cell::Fixed("homo sapiens")),
    ("host health state", Cell::Fixed("not provided")),
    ("host sex", Cell::Fixed("not provided")),
    ("collector name", Cell::Fixed("unknown")),
    ("collecting institution", Cell::Fixed("Karolinska institutet")),
    ("isolate", Cell::Isolate),
];

const RUN_COLUMNS: &[(&str, Cell)] = &[
    ("sample_alias", Cell::SampleId),
    ("design_description", Cell::Fixed("Multiplex PCR approach")),
    ("library_name", Cell::Fixed("")),
    ("library_strategy", Cell::Fixed("AMPLICON")),
    ("library_source", Cell::Fixed("VIRAL RNA")),
    ("library_selection", Cell::Fixed("PCR")),
    ("library_layout", Cell::Fixed("paired")),
    ("insert_size", Cell::Fixed("100")),
    ("library_construction_protocol", Cell::Fixed("")),
    ("platform", Cell::Fixed("DNBSEQ")),
    ("instrument_model", Cell::Fixed("DNBSEQ-G400")),
    ("forward_file_name", Cell::FtpFile("__1.fq.gz")),
    ("forward_file_md5", Cell::Fixed("")),
    ("reverse_file_name", Cell::FtpFile("__2.fq.gz")),
    ("reverse_file_md5", Cell::Fixed("")),
];

const ASSEMBLY_TYPE: &str = "COVID-19 outbreak";
const ASSEMBLY_COVERAGE: &str = "50";
const ASSEMBLY_PROGRAM: &str = "SARS-CoV-2 Multi-PCR v1.0 (MGI Tech Ltd., Co.)";
const ASSEMBLY_MOLECULE_TYPE: &str = "genomic RNA";
const ASSEMBLY_PLATFORM: &str = "DNBSEQ";
const ASSEMBLY_DESCRIPTION: &str = "Full-length SARS-Cov-2 genomes, the regions with <50x \
     sequencing depths were masked with N. Program available at: \
     https://github.com/MGI-tech-bioinformatics/SARS-CoV-2_Multi-PCR_v1.0";

/// Metadata generator for one study
///
/// Sample identifiers start with their collection date as `YYMMDD`.
pub struct MetadataGenerator {
    study_id: String,
    sample_ids: Vec<String>,
    assembly_dir: PathBuf,
    ftp_dir: String,
    date_pattern: Regex,
}

impl MetadataGenerator {
    /// Create a generator
    ///
    /// `assembly_dir` is where the local `<id>.fasta.gz` files live (used in
    /// manifests); `ftp_dir` is the upload-area directory holding the reads
    /// (used in the run table).
    pub fn new(
        study_id: impl Into<String>,
        sample_ids: Vec<String>,
        assembly_dir: impl Into<PathBuf>,
        ftp_dir: impl Into<String>,
    ) -> Result<Self> {
        let date_pattern = Regex::new(r"^(\d\d)(\d\d)(\d\d)$")
            .map_err(|e| Error::Other(format!("invalid date pattern: {e}")))?;
        Ok(Self {
            study_id: study_id.into(),
            sample_ids,
            assembly_dir: assembly_dir.into(),
            ftp_dir: ftp_dir.into(),
            date_pattern,
        })
    }

    /// Sample identifiers this generator writes rows for
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Collection date of a sample, `YYMMDD...` becoming `20YY-MM-DD`
    ///
    /// Identifiers that do not start with six digits yield their first six
    /// characters unchanged.
    pub fn collection_date(&self, sample_id: &str) -> String {
        let head: String = sample_id.chars().take(6).collect();
        self.date_pattern
            .replace(&head, "20$1-$2-$3")
            .into_owned()
    }

    /// Write the sample table
    pub fn write_sample_tsv(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        write!(out, "#checklist_accession\t{SAMPLE_CHECKLIST}\r\n")?;
        write!(out, "#unique_name_prefix\r\n")?;
        self.write_table(&mut out, SAMPLE_COLUMNS)?;
        out.flush()?;
        tracing::info!(path = %path.display(), samples = self.sample_ids.len(), "Wrote sample table");
        Ok(())
    }

    /// Write the paired-FASTQ run table
    pub fn write_run_paired_fastq_tsv(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_table(&mut out, RUN_COLUMNS)?;
        out.flush()?;
        tracing::info!(path = %path.display(), samples = self.sample_ids.len(), "Wrote run table");
        Ok(())
    }

    /// Write `<id>.manifest` and `<id>.chromosome_list.tsv.gz` for every sample
    ///
    /// Returns the manifest paths in sample order.
    pub fn write_assembly_manifests(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut manifests = Vec::with_capacity(self.sample_ids.len());
        for sample_id in &self.sample_ids {
            let chromosome_list = dir.join(format!("{sample_id}.chromosome_list.tsv.gz"));
            let manifest = dir.join(format!("{sample_id}.manifest"));
            self.write_assembly_manifest(&manifest, sample_id, &chromosome_list)?;
            write_chromosome_list(&chromosome_list, sample_id)?;
            manifests.push(manifest);
        }
        tracing::info!(dir = %dir.display(), manifests = manifests.len(), "Wrote assembly manifests");
        Ok(manifests)
    }

    fn write_assembly_manifest(
        &self,
        path: &Path,
        sample_id: &str,
        chromosome_list: &Path,
    ) -> Result<()> {
        let fasta = self.assembly_dir.join(format!("{sample_id}{ASSEMBLY_SUFFIX}"));
        let fasta = fasta.display().to_string();
        let chromosome_list = chromosome_list.display().to_string();
        let fields = [
            ("STUDY", self.study_id.as_str()),
            ("SAMPLE", sample_id),
            ("ASSEMBLYNAME", sample_id),
            ("ASSEMBLY_TYPE", ASSEMBLY_TYPE),
            ("COVERAGE", ASSEMBLY_COVERAGE),
            ("PROGRAM", ASSEMBLY_PROGRAM),
            ("MOLECULETYPE", ASSEMBLY_MOLECULE_TYPE),
            ("PLATFORM", ASSEMBLY_PLATFORM),
            ("DESCRIPTION", ASSEMBLY_DESCRIPTION),
            ("FASTA", fasta.as_str()),
            ("CHROMOSOME_LIST", chromosome_list.as_str()),
        ];

        let mut out = BufWriter::new(File::create(path)?);
        for (key, value) in fields {
            write!(out, "{key}\t{value}\r\n")?;
        }
        out.flush()?;
        Ok(())
    }

    fn write_table(&self, out: &mut impl Write, columns: &[(&str, Cell)]) -> io::Result<()> {
        write_row(out, columns.iter().map(|(name, _)| (*name).to_string()))?;
        for sample_id in &self.sample_ids {
            write_row(out, columns.iter().map(|(_, cell)| self.cell(cell, sample_id)))?;
        }
        Ok(())
    }

    fn cell(&self, cell: &Cell, sample_id: &str) -> String {
        match cell {
            Cell::SampleId => sample_id.to_string(),
            Cell::CollectionDate => self.collection_date(sample_id),
            Cell::Isolate => format!("SARS-CoV-2/human/SWE/NPC-{sample_id}/2020"),
            Cell::FtpFile(suffix) => {
                let dir = self.ftp_dir.trim_end_matches('/');
                if dir.is_empty() {
                    format!("{sample_id}{suffix}")
                } else {
                    format!("{dir}/{sample_id}{suffix}")
                }
            }
            Cell::Fixed(value) => (*value).to_string(),
        }
    }
}

fn write_row(out: &mut impl Write, fields: impl Iterator<Item = String>) -> io::Result<()> {
    let line = fields.collect::<Vec<_>>().join("\t");
    write!(out, "{line}\r\n")
}

/// Gzip-compressed chromosome list with a single monopartite chromosome
fn write_chromosome_list(path: &Path, object_name: &str) -> Result<()> {
    let mut encoder = GzEncoder::new(File::create(path)?, Compression::default());
    write!(encoder, "{object_name}\t1\tmonopartite\r\n")?;
    encoder.finish()?;
    Ok(())
}

/// Read the `sample_id` column of a tab-separated table
pub fn read_sample_ids(path: &Path) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| Error::Metadata(format!("{} is empty", path.display())))?;
    let column = header
        .split('\t')
        .position(|name| name.trim() == "sample_id")
        .ok_or_else(|| {
            Error::Metadata(format!("{} has no sample_id column", path.display()))
        })?;

    let mut ids = Vec::new();
    for (index, line) in lines.enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let id = line.split('\t').nth(column).ok_or_else(|| {
            Error::Metadata(format!(
                "{} line {}: missing sample_id",
                path.display(),
                index + 2
            ))
        })?;
        ids.push(id.to_string());
    }
    Ok(ids)
}

/// Sample identifiers of the `<id>.fasta.gz` files in `dir`, sorted
pub fn list_assembly_samples(dir: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(ASSEMBLY_SUFFIX)) {
            if !id.is_empty() {
                ids.push(id.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

/// Gzip every `*.fasta` in `input_dir` to `<output_dir>/<name>.fasta.gz`
///
/// Returns the written paths, sorted.
pub fn compress_fasta(input_dir: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut inputs: Vec<PathBuf> = std::fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "fasta"))
        .collect();
    inputs.sort();

    std::fs::create_dir_all(output_dir)?;
    let mut written = Vec::with_capacity(inputs.len());
    for input in inputs {
        let Some(file_name) = input.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let output = output_dir.join(format!("{file_name}.gz"));
        let mut reader = BufReader::new(File::open(&input)?);
        let mut encoder = GzEncoder::new(File::create(&output)?, Compression::default());
        io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?;
        tracing::debug!(input = %input.display(), output = %output.display(), "Compressed assembly");
        written.push(output);
    }
    Ok(written)
}

/// One row of a sample table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Sample alias (unique within the submitting account once prefixed)
    pub alias: String,
    /// Title
    pub title: String,
    /// Free-text description
    pub description: String,
    /// NCBI taxonomy id
    pub tax_id: String,
    /// Scientific name matching `tax_id`
    pub scientific_name: String,
    /// Remaining columns as (tag, value), in table order
    pub attributes: Vec<(String, String)>,
}

/// A sample table with its checklist and alias prefix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleList {
    /// Checklist accession from the `#checklist_accession` line
    pub checklist_id: String,
    /// Prefix from the `#unique_name_prefix` line (may be empty)
    pub prefix: String,
    /// Rows
    pub samples: Vec<Sample>,
}

const CORE_SAMPLE_COLUMNS: [&str; 5] = [
    "sample_alias",
    "sample_title",
    "sample_description",
    "tax_id",
    "scientific_name",
];

/// Read a sample table as written by [`MetadataGenerator::write_sample_tsv`]
pub fn read_sample_tsv(path: &Path) -> Result<SampleList> {
    let text = std::fs::read_to_string(path)?;
    let mut lines = text.lines();
    let invalid = |what: &str| Error::Metadata(format!("{}: {what}", path.display()));

    let checklist_id = lines
        .next()
        .and_then(|l| l.strip_prefix("#checklist_accession\t"))
        .ok_or_else(|| invalid("first line must be #checklist_accession"))?
        .to_string();
    let prefix = lines
        .next()
        .and_then(|l| l.strip_prefix("#unique_name_prefix"))
        .ok_or_else(|| invalid("second line must be #unique_name_prefix"))?;
    let prefix = prefix.strip_prefix('\t').unwrap_or(prefix).to_string();

    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| invalid("missing header row"))?
        .split('\t')
        .collect();
    let mut core = [0usize; 5];
    for (slot, name) in core.iter_mut().zip(CORE_SAMPLE_COLUMNS) {
        *slot = header
            .iter()
            .position(|h| *h == name)
            .ok_or_else(|| invalid(&format!("missing column {name}")))?;
    }

    let mut samples = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        let field = |i: usize| fields.get(i).copied().unwrap_or_default().to_string();
        let attributes = header
            .iter()
            .enumerate()
            .filter(|(_, name)| !CORE_SAMPLE_COLUMNS.contains(*name))
            .map(|(i, name)| (name.to_string(), field(i)))
            .collect();
        samples.push(Sample {
            alias: field(core[0]),
            title: field(core[1]),
            description: field(core[2]),
            tax_id: field(core[3]),
            scientific_name: field(core[4]),
            attributes,
        });
    }

    Ok(SampleList {
        checklist_id,
        prefix,
        samples,
    })
}
