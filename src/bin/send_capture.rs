use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use pcap_analyzer::capture::decoder::Encoding;
use pcap_analyzer::capture::synth;
use pcap_analyzer::capture::writer::CaptureWriter;
use pcap_analyzer::client::{AnalysisClient, UploadPlan, DEFAULT_CHUNK_SIZE};
use pcap_analyzer::models::stats::AnalysisResult;
use pcap_analyzer::utils::logging;

const LINKTYPE_ETHERNET: u16 = 1;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Upload a capture to a running pcap-analyzer")]
struct Args {
    /// Capture file to upload
    #[clap(conflicts_with = "generate", required_unless_present = "generate")]
    file: Option<PathBuf>,

    /// Upload a synthetic capture with this many random packets instead
    #[clap(long)]
    generate: Option<usize>,

    /// Write the synthetic capture as pcapng instead of classic pcap
    #[clap(long, requires = "generate")]
    pcapng: bool,

    /// Base URL of the analyzer
    #[clap(long, default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Raw bytes per chunk
    #[clap(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Chunk encoding (hex or base64)
    #[clap(long, default_value = "hex")]
    encoding: String,

    /// Analysis identifier; a random one is used when unset
    #[clap(long)]
    analysis_id: Option<String>,

    /// Print every packet, not just the summary
    #[clap(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logger(logging::get_log_level(&args.log_level), None)?;

    let encoding: Encoding = args.encoding.parse()?;
    let analysis_id = args
        .analysis_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let plan = match (&args.file, args.generate) {
        (Some(path), _) => UploadPlan::from_file(path, &analysis_id, args.chunk_size, encoding)?,
        (None, Some(count)) => {
            let capture = generate_capture(count, args.pcapng);
            UploadPlan::new(&analysis_id, &capture, args.chunk_size, encoding)
        }
        (None, None) => bail!("either a capture file or --generate is required"),
    };

    println!(
        "Uploading analysis {} in {} chunks to {}",
        analysis_id,
        plan.chunks.len(),
        args.server
    );

    let client = AnalysisClient::new(&args.server);
    let result = client.upload(&plan).await?;

    print_result(&result, args.verbose)?;
    Ok(())
}

/// Random Ethernet traffic, one frame per millisecond
fn generate_capture(count: usize, pcapng: bool) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let start = Utc::now();
    let mut writer = if pcapng {
        CaptureWriter::pcapng(LINKTYPE_ETHERNET)
    } else {
        CaptureWriter::new(LINKTYPE_ETHERNET)
    };

    for (i, frame) in synth::random_frames(&mut rng, count, 32).iter().enumerate() {
        writer.write_frame(start + Duration::milliseconds(i as i64), frame);
    }
    writer.into_bytes()
}

fn print_result(result: &AnalysisResult, verbose: bool) -> Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);

    if verbose {
        for packet in &result.packets {
            let color = match packet.protocol.as_str() {
                "TCP" => Color::Green,
                "UDP" => Color::Blue,
                "ICMPv4" | "ICMPv6" => Color::Yellow,
                _ => Color::White,
            };
            stdout.set_color(ColorSpec::new().set_fg(Some(color)))?;
            write!(stdout, "{:<8}", packet.protocol)?;
            stdout.reset()?;

            let ports = packet
                .additional_info
                .transport
                .map(|p| format!(" {} -> {}", p.src_port, p.dst_port))
                .unwrap_or_default();
            writeln!(
                stdout,
                "{} -> {}{} ({} bytes)",
                packet.source_ip, packet.destination_ip, ports, packet.size
            )?;
        }
        writeln!(stdout)?;
    }

    let summary = &result.summary;
    stdout.set_color(ColorSpec::new().set_bold(true))?;
    writeln!(stdout, "Summary")?;
    stdout.reset()?;
    writeln!(stdout, "  packets:      {}", summary.total_packets)?;
    writeln!(stdout, "  bytes:        {}", summary.total_size)?;
    writeln!(stdout, "  sources:      {}", summary.unique_sources)?;
    writeln!(stdout, "  destinations: {}", summary.unique_destinations)?;

    let mut protocols: Vec<_> = summary.protocol_distribution.iter().collect();
    protocols.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (protocol, count) in protocols {
        writeln!(stdout, "  {:<12}  {}", protocol, count)?;
    }
    Ok(())
}
