use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use log::info;

use tvf_codecs::{registry, DeflateCodec, Lz4Codec, PassThroughCodec, ZstdCodec};
use tvf_core::writer::{DEFAULT_MAX_BLOCK_BYTES, DEFAULT_MAX_BLOCK_ELEMENTS};
use tvf_core::{Codec, StreamReader, StreamWriter, TypeDescriptor, WriterOptions};

mod json;

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "tvf",
    about = "Typed Value Frames: pack JSON values into block-compressed streams and read them back",
    version
)]
struct Cli {
    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack JSON lines into a TVF stream
    Pack {
        /// JSON lines, one value per line ("-" reads stdin)
        input: PathBuf,
        /// Destination TVF file
        output: PathBuf,
        /// Descriptor of every value, e.g. 'Struct{id: Int64, tags: Array[String]}'
        #[arg(short = 't', long = "type")]
        descriptor: String,
        /// Codec to use: none | lz4 | deflate | zstd
        #[arg(short, long, default_value = "lz4")]
        codec: String,
        /// Compression level (deflate 0-9, zstd 1-22)
        #[arg(long)]
        level: Option<i32>,
        /// Values per block
        #[arg(long, default_value_t = DEFAULT_MAX_BLOCK_ELEMENTS)]
        max_elements: u32,
        /// Encoded bytes per block before compression
        #[arg(long, default_value_t = DEFAULT_MAX_BLOCK_BYTES)]
        max_bytes: u32,
        /// Keep compressed output even when it is larger than the raw block
        #[arg(long)]
        no_store_raw: bool,
    },
    /// Decode a TVF stream back to JSON lines
    Unpack {
        /// Source TVF file
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        #[arg(default_value = "-")]
        output: PathBuf,
    },
    /// Print stream metadata and block index statistics
    Inspect {
        /// TVF file to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
        /// Emit the statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Decode a single block by index
    ///
    /// Only the requested block is read from disk; no other blocks are
    /// touched.
    ReadBlock {
        /// TVF file
        file: PathBuf,
        /// Zero-based block index to read
        #[arg(short, long)]
        index: usize,
    },
    /// Benchmark random-access reads across N randomly chosen blocks
    Bench {
        /// TVF file
        file: PathBuf,
        /// Number of random blocks to read
        #[arg(short, long, default_value_t = 1000)]
        count: u64,
        /// Fixed random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn codec_from_name(name: &str, level: Option<i32>) -> anyhow::Result<Arc<dyn Codec>> {
    match name {
        "none" | "passthrough" | "pass" => Ok(Arc::new(PassThroughCodec)),
        "lz4" | "l" => Ok(Arc::new(Lz4Codec)),
        "deflate" | "d" => match level {
            None => Ok(Arc::new(DeflateCodec::default())),
            Some(l) if (0..=9).contains(&l) => Ok(Arc::new(DeflateCodec::new(l as u32))),
            Some(l) => anyhow::bail!("deflate level must be 0-9, got {l}"),
        },
        "zstd" | "z" => Ok(Arc::new(level.map_or_else(ZstdCodec::default, ZstdCodec::new))),
        other => anyhow::bail!(
            "unknown codec '{}'. Valid options: none, lz4, deflate, zstd",
            other
        ),
    }
}

fn open_stream(path: &Path) -> anyhow::Result<StreamReader<BufReader<File>>> {
    StreamReader::open_path(path, registry())
        .with_context(|| format!("opening TVF stream {:?}", path))
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn per_second(n: u64, secs: f64) -> u64 {
    if secs > 0.0 {
        (n as f64 / secs) as u64
    } else {
        0
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_pack(
    input: PathBuf,
    output: PathBuf,
    descriptor: &str,
    codec_name: &str,
    level: Option<i32>,
    max_elements: u32,
    max_bytes: u32,
    no_store_raw: bool,
) -> anyhow::Result<()> {
    let ty: TypeDescriptor = descriptor
        .parse()
        .with_context(|| format!("parsing descriptor {:?}", descriptor))?;
    let codec = codec_from_name(codec_name, level)?;
    let codec_display = codec.name();
    let options = WriterOptions::default()
        .max_block_elements(max_elements)
        .max_block_bytes(max_bytes)
        .store_incompressible(!no_store_raw);

    let mut writer = StreamWriter::create_path(&output, ty.clone(), codec, options)
        .with_context(|| format!("creating output file {:?}", output))?;

    let src: Box<dyn BufRead> = if input.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&input)
            .with_context(|| format!("opening input file {:?}", input))?;
        Box::new(BufReader::new(file))
    };

    let t0 = Instant::now();
    for (n, line) in src.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: serde_json::Value =
            serde_json::from_str(&line).with_context(|| format!("line {}: invalid JSON", n + 1))?;
        let value = json::from_json(&ty, &doc).with_context(|| format!("line {}", n + 1))?;
        writer
            .append(&value)
            .with_context(|| format!("line {}", n + 1))?;
    }
    let (_, summary) = writer.finish()?;
    let elapsed = t0.elapsed();
    info!("packed {} values into {:?}", summary.elements, output);

    let ratio = if summary.total_bytes > 0 {
        summary.raw_bytes as f64 / summary.total_bytes as f64
    } else {
        1.0
    };
    eprintln!("  descriptor  : {}", ty);
    eprintln!("  codec       : {}", codec_display);
    eprintln!("  values      : {}", summary.elements);
    eprintln!("  blocks      : {} ({} stored raw)", summary.blocks, summary.stored_blocks);
    eprintln!("  encoded     : {}", human_bytes(summary.raw_bytes));
    eprintln!("  on disk     : {}", human_bytes(summary.total_bytes));
    eprintln!("  ratio       : {:.2}x", ratio);
    eprintln!(
        "  throughput  : {}/s",
        human_bytes(per_second(summary.raw_bytes, elapsed.as_secs_f64()))
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_unpack(input: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let reader = open_stream(&input)?;
    let block_count = reader.block_count();

    let mut dst: Box<dyn Write> = if output.to_str() == Some("-") {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else {
        Box::new(BufWriter::new(
            File::create(&output).with_context(|| format!("creating output file {:?}", output))?,
        ))
    };

    let t0 = Instant::now();
    let mut count = 0u64;
    for value in reader.read_all() {
        let value = value.with_context(|| format!("decoding value {}", count))?;
        serde_json::to_writer(&mut dst, &json::to_json(&value)?)?;
        dst.write_all(b"\n")?;
        count += 1;
    }
    dst.flush()?;

    let elapsed = t0.elapsed();
    eprintln!("  blocks      : {}", block_count);
    eprintln!("  values      : {}", count);
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf, show_blocks: bool, as_json: bool) -> anyhow::Result<()> {
    let reader = open_stream(&file)?;
    let stats = reader.stats()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("=== TVF stream: {:?} ===", file);
    println!();
    println!("  format version : {}", stats.version);
    println!("  descriptor     : {}", stats.descriptor);
    println!("  fingerprint    : {}", stats.fingerprint);
    println!("  values         : {}", stats.elements);
    println!("  block count    : {}", stats.blocks.len());
    println!("  encoded size   : {}", human_bytes(stats.raw_bytes));
    println!("  compressed     : {}", human_bytes(stats.compressed_bytes));
    println!("  file on disk   : {}", human_bytes(stats.stream_bytes));
    println!("  ratio          : {:.2}x", stats.ratio());

    if show_blocks {
        println!();
        println!(
            "  {:>8}  {:>14}  {:>8}  {:>8}  {:>12}  {:>12}",
            "block", "file offset", "values", "codec", "compressed", "raw"
        );
        println!("  {}", "-".repeat(70));
        for b in &stats.blocks {
            println!(
                "  {:>8}  {:>14}  {:>8}  {:>8}  {:>12}  {:>12}",
                b.index,
                b.offset,
                b.elements,
                b.algorithm.name(),
                human_bytes(b.compressed_len as u64),
                human_bytes(b.raw_len as u64)
            );
        }
    }

    Ok(())
}

fn run_read_block(file: PathBuf, index: usize) -> anyhow::Result<()> {
    let reader = open_stream(&file)?;
    let offset = reader
        .index()
        .get(index)
        .map(|e| e.offset)
        .ok_or_else(|| {
            anyhow::anyhow!("block {} out of range (total {})", index, reader.block_count())
        })?;

    eprintln!(
        "seeking to block {} (offset {} bytes from file start)...",
        index, offset
    );

    let t0 = Instant::now();
    let values = reader.read_block(index)?;
    let elapsed = t0.elapsed();

    eprintln!(
        "  decoded {} values in {:.3}ms",
        values.len(),
        elapsed.as_secs_f64() * 1000.0
    );

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for value in &values {
        serde_json::to_writer(&mut out, &json::to_json(value)?)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn run_bench(file: PathBuf, count: u64, seed: u64) -> anyhow::Result<()> {
    let reader = open_stream(&file)?;
    let block_count = reader.block_count() as u64;

    if block_count == 0 {
        anyhow::bail!("stream has no blocks");
    }
    if count == 0 {
        anyhow::bail!("--count must be at least 1");
    }

    // Simple LCG for reproducible random block indices
    let indices: Vec<usize> = {
        let mut rng = seed;
        (0..count)
            .map(|_| {
                rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((rng >> 33) % block_count) as usize
            })
            .collect()
    };

    eprintln!(
        "benchmarking {} random block reads across {} blocks...",
        count, block_count
    );

    let t0 = Instant::now();
    let mut total_values = 0u64;
    let mut latencies_us: Vec<u64> = Vec::with_capacity(count as usize);

    for &idx in &indices {
        let t = Instant::now();
        let values = reader.read_block(idx)?;
        latencies_us.push(t.elapsed().as_micros() as u64);
        total_values += values.len() as u64;
    }

    let elapsed = t0.elapsed();
    latencies_us.sort_unstable();

    let pct = |p: f64| latencies_us[((latencies_us.len() as f64 * p) as usize).min(latencies_us.len() - 1)];

    println!();
    println!("=== Random Block Access Benchmark ===");
    println!("  blocks read : {}", count);
    println!("  values      : {}", total_values);
    println!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    println!(
        "  throughput  : {} values/s",
        per_second(total_values, elapsed.as_secs_f64())
    );
    println!("  latency:");
    println!("    min  : {} µs", latencies_us[0]);
    println!("    p50  : {} µs", pct(0.50));
    println!("    p95  : {} µs", pct(0.95));
    println!("    p99  : {} µs", pct(0.99));
    println!("    max  : {} µs", latencies_us[latencies_us.len() - 1]);

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Pack {
            input,
            output,
            descriptor,
            codec,
            level,
            max_elements,
            max_bytes,
            no_store_raw,
        } => run_pack(
            input,
            output,
            &descriptor,
            &codec,
            level,
            max_elements,
            max_bytes,
            no_store_raw,
        ),
        Commands::Unpack { input, output } => run_unpack(input, output),
        Commands::Inspect { file, blocks, json } => run_inspect(file, blocks, json),
        Commands::ReadBlock { file, index } => run_read_block(file, index),
        Commands::Bench { file, count, seed } => run_bench(file, count, seed),
    }
}
