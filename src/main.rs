//! ena-transfer command line
//!
//! Subcommands:
//! - `transfer` - move a WebDAV directory to the upload area, verifying checksums
//! - `metadata` - write sample/run tables and assembly manifests
//! - `webin` - validate or submit assembly manifests with webin-cli
//! - `submit-xml` - post XML documents to the drop box

use anyhow::Context;
use clap::{Parser, Subcommand};
use ena_transfer::metadata::{self, MetadataGenerator};
use ena_transfer::submission::{SubmissionClient, parse_receipt};
use ena_transfer::webin::WebinCli;
use ena_transfer::{
    BatchReport, Config, Event, FtpsDestination, TransferOrchestrator, WebDavSource,
    wait_for_signal,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit status after an operator interrupt
const EXIT_INTERRUPTED: u8 = 130;

/// Transfer sequencing data to ENA and prepare its submission
#[derive(Parser)]
#[command(name = "ena-transfer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "ena-transfer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transfer every data object of a source directory to the upload area
    Transfer {
        /// Source directory (defaults to source.directory from the configuration)
        #[arg(long)]
        dir: Option<String>,

        /// Write the batch report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Write sample and run tables plus assembly manifests
    Metadata {
        /// Study (project) accession, e.g. PRJEB42614
        #[arg(long)]
        study: String,

        /// Tab-separated table with a sample_id column
        #[arg(long, conflicts_with = "assemblies", required_unless_present = "assemblies")]
        samples: Option<PathBuf>,

        /// Directory of <sample id>.fasta.gz assemblies
        #[arg(long)]
        assemblies: Option<PathBuf>,

        /// Gzip the *.fasta files of this directory into --assemblies first
        #[arg(long, requires = "assemblies")]
        compress_from: Option<PathBuf>,

        /// Upload-area directory of the reads (defaults to destination.directory)
        #[arg(long)]
        ftp_dir: Option<String>,

        /// Output directory
        #[arg(long)]
        out: PathBuf,
    },

    /// Run webin-cli for every *.manifest in a directory
    Webin {
        /// Directory containing the manifests
        #[arg(long)]
        manifests: PathBuf,

        /// Submit after validation (default: validate only)
        #[arg(long)]
        submit: bool,
    },

    /// Post XML documents to the drop box and store the receipt
    SubmitXml {
        /// SUBMISSION document
        #[arg(long)]
        submission: PathBuf,

        /// PROJECT document
        #[arg(long)]
        project: Option<PathBuf>,

        /// SAMPLE document
        #[arg(long)]
        sample: Option<PathBuf>,

        /// Where to write the receipt
        #[arg(long)]
        receipt: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Transfer { dir, report } => run_transfer(config, dir, report).await,
        Commands::Metadata {
            study,
            samples,
            assemblies,
            compress_from,
            ftp_dir,
            out,
        } => {
            if let (Some(from), Some(to)) = (&compress_from, &assemblies) {
                let written = metadata::compress_fasta(from, to)
                    .with_context(|| format!("compressing assemblies from {}", from.display()))?;
                println!("Compressed {} assemblies into {}", written.len(), to.display());
            }
            let sample_ids = match (&samples, &assemblies) {
                (Some(tsv), _) => metadata::read_sample_ids(tsv)?,
                (None, Some(dir)) => metadata::list_assembly_samples(dir)?,
                (None, None) => anyhow::bail!("either --samples or --assemblies is required"),
            };
            let generator = MetadataGenerator::new(
                study,
                sample_ids,
                assemblies.unwrap_or_else(|| PathBuf::from(".")),
                ftp_dir.unwrap_or_else(|| config.destination.directory.clone()),
            )?;
            write_metadata(&generator, &out)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Webin { manifests, submit } => {
            let password = config
                .destination
                .password
                .clone()
                .context("Webin password not set (destination.password or ENA_WEBIN_PASSWORD)")?;
            let webin = WebinCli::new(&config.submission, &config.destination.username, password)?;
            let runs = webin.run_all(&manifests, submit).await?;
            let mut failed = 0;
            for run in &runs {
                let verdict = if run.success { "ok" } else { "FAILED" };
                println!("{}: {}", run.manifest.display(), verdict);
                if !run.success {
                    failed += 1;
                }
            }
            println!("{} manifests, {} failed", runs.len(), failed);
            Ok(if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::SubmitXml {
            submission,
            project,
            sample,
            receipt,
        } => submit_xml(&config, submission, project, sample, &receipt).await,
    }
}

/// Load the configuration file when it exists, defaults otherwise
fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        Config::from_file(path).with_context(|| format!("loading {}", path.display()))
    } else {
        tracing::debug!(path = %path.display(), "No configuration file, using defaults");
        let mut config = Config::default();
        config.apply_env();
        Ok(config)
    }
}

async fn run_transfer(
    config: Config,
    dir: Option<String>,
    report_path: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    config.validate()?;
    let dir = dir.unwrap_or_else(|| config.source.directory.clone());

    let source = Arc::new(WebDavSource::new(&config.source)?);
    let destination = FtpsDestination::new(config.destination.clone())?;
    let mut orchestrator = TransferOrchestrator::new(source, destination, config.transfer.clone());

    let printer = tokio::spawn(print_events(orchestrator.subscribe()));
    let cancel = CancellationToken::new();
    let interrupts = tokio::spawn(watch_interrupts(cancel.clone(), orchestrator.subscribe()));

    let result = orchestrator.run(&dir, &cancel).await;
    orchestrator.destination_mut().close().await;
    interrupts.abort();
    drop(orchestrator);
    printer.await.ok();

    let report = result.with_context(|| format!("transferring {dir}"))?;
    if let Some(path) = report_path {
        write_report(&report, &path)?;
    }

    let summary = report.summary();
    println!(
        "{} skipped, {} uploaded, {} mismatched, {} failed{}",
        summary.skipped,
        summary.succeeded,
        summary.mismatched,
        summary.failed,
        if report.cancelled { " (interrupted)" } else { "" }
    );

    Ok(if report.cancelled {
        ExitCode::from(EXIT_INTERRUPTED)
    } else if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Console presentation of batch events
async fn print_events(mut events: broadcast::Receiver<Event>) {
    let mut last_percent = None;
    loop {
        match events.recv().await {
            Ok(Event::BatchStarted {
                directory,
                candidates,
                already_present,
            }) => println!(
                "{directory}: {candidates} data objects, {already_present} already uploaded"
            ),
            Ok(Event::UploadStarted { name, total_bytes }) => {
                last_percent = None;
                println!("Uploading {name} ({total_bytes} bytes)");
            }
            Ok(Event::Progress {
                name,
                bytes_transferred,
                total_bytes,
            }) => {
                if total_bytes > 0 {
                    let percent = bytes_transferred.saturating_mul(100) / total_bytes;
                    if last_percent != Some(percent / 10) {
                        last_percent = Some(percent / 10);
                        eprintln!("  {name}: {percent}%");
                    }
                }
            }
            Ok(Event::CleaningUp { name }) => println!("Removing partial upload of {name}"),
            Ok(Event::ObjectFinished { outcome }) => println!("{outcome}"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// First interrupt cancels the batch; a second one during cleanup exits at once
async fn watch_interrupts(cancel: CancellationToken, mut events: broadcast::Receiver<Event>) {
    let mut current: Option<String> = None;

    let mut open = true;

    let first = wait_for_signal();
    tokio::pin!(first);
    loop {
        tokio::select! {
            _ = &mut first => break,
            event = events.recv(), if open => open = track_current(&mut current, event),
        }
    }
    tracing::warn!(object = ?current, "Interrupt received, cleaning up before stopping");
    cancel.cancel();

    let second = wait_for_signal();
    tokio::pin!(second);
    loop {
        tokio::select! {
            _ = &mut second => break,
            event = events.recv(), if open => open = track_current(&mut current, event),
        }
    }
    tracing::error!(
        object = ?current,
        "Second interrupt during cleanup, partial upload may remain at the destination"
    );
    std::process::exit(i32::from(EXIT_INTERRUPTED));
}

/// Remember the object in flight; false once the event channel is closed
fn track_current(
    current: &mut Option<String>,
    event: Result<Event, broadcast::error::RecvError>,
) -> bool {
    match event {
        Ok(Event::UploadStarted { name, .. }) | Ok(Event::CleaningUp { name }) => {
            *current = Some(name);
        }
        Ok(Event::ObjectFinished { .. }) => *current = None,
        Err(broadcast::error::RecvError::Closed) => return false,
        _ => {}
    }
    true
}

fn write_report(report: &BatchReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
    tracing::info!(path = %path.display(), "Wrote batch report");
    Ok(())
}

fn write_metadata(generator: &MetadataGenerator, out: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(out)?;
    let samples = out.join("samples.tsv");
    let runs = out.join("runs.tsv");
    generator.write_sample_tsv(&samples)?;
    generator.write_run_paired_fastq_tsv(&runs)?;
    let manifests = generator.write_assembly_manifests(out)?;
    println!(
        "{} samples: {}, {}, {} manifests",
        generator.sample_ids().len(),
        samples.display(),
        runs.display(),
        manifests.len()
    );
    Ok(())
}

async fn submit_xml(
    config: &Config,
    submission: PathBuf,
    project: Option<PathBuf>,
    sample: Option<PathBuf>,
    receipt_path: &Path,
) -> anyhow::Result<ExitCode> {
    let client = SubmissionClient::new(
        &config.submission,
        &config.destination.username,
        config.destination.password.clone(),
    )?;

    let mut documents: Vec<(&str, &Path)> = vec![("submission", submission.as_path())];
    if let Some(path) = &project {
        documents.push(("project", path.as_path()));
    }
    if let Some(path) = &sample {
        documents.push(("sample", path.as_path()));
    }

    let body = client.submit(&documents).await?;
    std::fs::write(receipt_path, &body)
        .with_context(|| format!("writing receipt {}", receipt_path.display()))?;

    let receipt = parse_receipt(&body)?;
    for accession in &receipt.accessions {
        println!(
            "{} {} {}",
            accession.object_type,
            accession.alias.as_deref().unwrap_or("-"),
            accession.accession
        );
    }
    for message in &receipt.infos {
        println!("INFO: {message}");
    }
    for message in &receipt.errors {
        println!("ERROR: {message}");
    }

    Ok(if receipt.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
