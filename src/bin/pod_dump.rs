//! POD dump binary - walks the PODs of a data file and prints a survey
//!
//! Usage:
//!   cargo run --bin pod_dump -- run.dat                  # survey report
//!   cargo run --bin pod_dump -- run.dat -v               # plus every header
//!   cargo run --bin pod_dump -- run.dat --format json    # machine-readable
//!
//! Exits with status 1 when the survey finds problems.

use clap::Parser;
use lzts_daq::common::cli::{OutputFormat, PodDumpArgs};
use lzts_daq::config::Config;
use lzts_daq::decoder::{FrameDecoder, FrameHeader, PodStream};
use lzts_daq::recorder::data_packets;
use lzts_daq::survey::{Survey, SurveyConfig};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct PodLine {
    record: u64,
    index: usize,
    offset: usize,
    header: FrameHeader,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("lzts_daq=info".parse()?))
        .init();

    let args = PodDumpArgs::parse();
    let config = Config::load_or_default(&args.common.config_file)?;
    let decoder = FrameDecoder::new(config.decoder_config());

    info!(input = %args.input.display(), "Reading data file");

    let mut survey = Survey::new(
        SurveyConfig {
            expected_dna: config.format.expected_dna,
        },
        decoder,
    );
    let mut lines = Vec::new();

    for record in data_packets(&args.input)? {
        let record = record?;
        if args.verbose {
            for pod in PodStream::new(&record.payload, decoder).flatten() {
                let line = PodLine {
                    record: record.offset,
                    index: pod.index,
                    offset: pod.offset,
                    header: pod.frame.header,
                };
                match args.format {
                    OutputFormat::Text => {
                        println!("@{:<10} #{:<4} {}", line.record, line.index, line.header);
                        if let Some(footer) = pod.footer {
                            println!(
                                "{:17} footer: T {}..{} DNA {:#018x}",
                                "", footer.min_time, footer.max_time, footer.dna_low
                            );
                        }
                    }
                    OutputFormat::Json => lines.push(line),
                }
            }
        }
        survey.scan(&record.payload);
    }

    let report = survey.finish();
    info!(records = report.buffers, pods = report.pods, "Data file read");
    match args.format {
        OutputFormat::Text => print!("{}", report),
        OutputFormat::Json => {
            let output = serde_json::json!({ "pods": lines, "report": report });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
