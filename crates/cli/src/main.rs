mod ivf;

use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use segmux::config::DEFAULT_CHUNK_PREFIX;
use segmux::{
    ChunkerConfig, Delivery, Packet, PolicyConfig, SerializerOptions, SessionSummary,
    StreamDescriptor, WebmChunker,
};
use tracing_subscriber::EnvFilter;

use ivf::IvfReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyArg {
    /// New segment at every video keyframe
    Keyframe,
    /// New segment every --chunk-duration-ms
    Duration,
}

#[derive(Parser, Debug)]
#[command(
    name = "segmux",
    about = "Write an IVF video stream as segmented live WebM with boundary metadata"
)]
struct Args {
    /// Input IVF file ("-" for stdin)
    #[arg(long, short, default_value = "-")]
    input: String,

    /// Media destination: path, file://path, tcp://host:port or "-" for stdout
    #[arg(long, short = 'o')]
    stream_url: Option<String>,

    /// Boundary metadata destination (same forms as --stream-url)
    #[arg(long)]
    info_url: Option<String>,

    #[arg(long, value_enum, default_value_t = PolicyArg::Keyframe)]
    policy: PolicyArg,

    /// Segment length for --policy duration
    #[arg(long)]
    chunk_duration_ms: Option<u32>,

    /// With --policy duration, start each due segment at the next keyframe
    #[arg(long)]
    keyframe_aligned: bool,

    /// Write one file per segment into this directory instead of a stream
    #[arg(long)]
    discrete_dir: Option<PathBuf>,

    /// File name prefix for --discrete-dir
    #[arg(long, default_value = DEFAULT_CHUNK_PREFIX)]
    chunk_prefix: String,

    /// Write whole clusters at segment end instead of block by block
    #[arg(long)]
    buffered: bool,

    /// Upper bound on cluster length within a segment
    #[arg(long)]
    cluster_duration_ms: Option<u32>,

    /// Add the wall-clock time to each boundary event
    #[arg(long)]
    wall_clock: bool,
}

impl Args {
    fn chunker_config(&self) -> ChunkerConfig {
        let policy = match self.policy {
            PolicyArg::Keyframe => PolicyConfig::Keyframe { video_stream: None },
            PolicyArg::Duration => PolicyConfig::Duration {
                chunk_duration_ms: self.chunk_duration_ms,
                reference_stream: None,
                keyframe_aligned: self.keyframe_aligned,
            },
        };
        let delivery = match &self.discrete_dir {
            Some(dir) => Delivery::Discrete {
                dir: dir.clone(),
                prefix: self.chunk_prefix.clone(),
            },
            None => Delivery::Continuous,
        };

        ChunkerConfig {
            stream_url: self.stream_url.clone(),
            info_url: self.info_url.clone(),
            policy,
            delivery,
            serializer: SerializerOptions {
                is_low_latency: !self.buffered,
                cluster_duration_ms: self.cluster_duration_ms,
            },
            wall_clock: self.wall_clock,
        }
    }
}

fn open_input(path: &str) -> io::Result<Box<dyn Read>> {
    if path == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    Ok(Box::new(BufReader::new(File::open(path)?)))
}

fn run(args: &Args) -> Result<SessionSummary, Box<dyn Error>> {
    let config = args.chunker_config();
    let mut reader = IvfReader::new(open_input(&args.input)?)?;
    let header = *reader.header();
    tracing::info!(
        codec = ?header.codec,
        width = header.width,
        height = header.height,
        frames = header.frame_count,
        "input opened"
    );

    let stream = StreamDescriptor::video(
        header.codec,
        u32::from(header.width),
        u32::from(header.height),
        header.time_base,
    );
    let mut chunker = WebmChunker::open_session(&config, vec![stream])?;

    while let Some(frame) = reader.next_frame()? {
        chunker.ingest(&Packet::new(0, frame.pts, frame.keyframe, frame.data))?;
    }
    Ok(chunker.close_session()?)
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr so "-" can carry the media stream
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("segmux=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(&args) {
        Ok(summary) => {
            tracing::info!(
                segments = summary.segments,
                packets = summary.packets,
                bytes = summary.bytes,
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("segmux: {e}");
            ExitCode::FAILURE
        }
    }
}
