mod interactive;

use std::{
    fs::File,
    io::{stdin, stdout, Read, Write},
    path::PathBuf,
};

use anyhow::{anyhow, Context, Result};
use bitmask_enum::bitmask;
use cache_sim::{
    geometry::Geometry,
    sim::{Event, SimConfig, Simulator},
    trace::{Trace, TraceFormat},
};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[cfg(feature = "stat")]
use terminal_size::terminal_size;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// replay an address trace
    Run(RunArgs),
    /// issue reads and writes by hand
    Interactive(CommonArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// File path to a JSON geometry config
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Cache size in bytes (power of 2)
    #[arg(long)]
    cache_size: Option<u64>,
    /// Memory size in bytes (power of 2)
    #[arg(long)]
    memory_size: Option<u64>,
    /// Offset bits; block size is 2^offset_bits
    #[arg(long)]
    offset_bits: Option<u32>,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    delegate: CommonArgs,
    /// File path to trace (stdin if absent)
    #[arg(short, long)]
    trace: Option<PathBuf>,
    /// Trace file layout
    #[arg(long, value_enum, default_value = "tagged")]
    format: Format,
    /// Sections to print
    #[arg(long, value_enum, value_delimiter = ',', default_values = ["accesses", "table", "stat"])]
    show: Vec<Section>,
    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    /// count, hex addresses to read, then count, hex addresses to update
    Counted,
    /// `r <hex>` / `w <hex>` per line
    Tagged,
}

impl From<Format> for TraceFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Counted => TraceFormat::Counted,
            Format::Tagged => TraceFormat::Tagged,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Section {
    Accesses,
    Table,
    Stat,
}

#[bitmask(u8)]
enum Sections {
    Accesses,
    Table,
    Stat,
}

impl From<Section> for Sections {
    fn from(s: Section) -> Self {
        match s {
            Section::Accesses => Sections::Accesses,
            Section::Table => Sections::Table,
            Section::Stat => Sections::Stat,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    match args.command {
        Command::Run(RunArgs {
            delegate,
            trace,
            format,
            show,
            json,
        }) => {
            init_logger(delegate.verbose);
            let geometry = read_geometry(&delegate)?;
            let text = read_trace(trace)?;
            let trace = Trace::parse(&text, format.into())?;
            log::info!("parsed trace: {} accesses", trace.len());
            let sections = show
                .into_iter()
                .fold(Sections::none(), |acc, s| acc | Sections::from(s));
            let mut sim = Simulator::with_geometry(geometry);
            for access in &trace {
                let event = sim.step(*access);
                if !json && echo(&event, sections) {
                    println!("{event}");
                }
            }
            if json {
                let mut out = stdout().lock();
                serde_json::to_writer_pretty(&mut out, &sim.report())?;
                writeln!(out)?;
                return Ok(());
            }
            if sections.contains(Sections::Table) {
                println!("Cache Table:");
                println!("{}", sim.cache().table());
            }
            if sections.contains(Sections::Stat) {
                output_stat(&sim);
            }
            Ok(())
        }
        Command::Interactive(delegate) => {
            init_logger(delegate.verbose);
            let geometry = read_geometry(&delegate)?;
            let mut sim = Simulator::with_geometry(geometry);
            interactive::execute_interactive(&mut sim)
        }
    }
}

fn init_logger(verbose: bool) {
    if verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }
}

/// Absent writes are shown even when the accesses section is off.
fn echo(event: &Event, sections: Sections) -> bool {
    sections.contains(Sections::Accesses) || event.is_absent_write()
}

fn read_geometry(args: &CommonArgs) -> Result<Geometry> {
    let file = match &args.config {
        Some(p) => {
            let file = File::open(p).with_context(|| format!("cannot open {}", p.display()))?;
            Some(SimConfig::deser(file)?)
        }
        None => None,
    };
    let config = merge(args, file)?;
    let geometry = config.geometry().context("invalid cache configuration")?;
    log::info!("geometry: {geometry}");
    Ok(geometry)
}

/// Flags take precedence over the config file.
fn merge(args: &CommonArgs, file: Option<SimConfig>) -> Result<SimConfig> {
    macro_rules! pick {
        ($field:ident, $flag:literal) => {
            args.$field
                .or(file.map(|c| c.$field))
                .ok_or_else(|| anyhow!("missing {}; pass {} or --config", stringify!($field), $flag))?
        };
    }
    Ok(SimConfig {
        cache_size: pick!(cache_size, "--cache-size"),
        memory_size: pick!(memory_size, "--memory-size"),
        offset_bits: pick!(offset_bits, "--offset-bits"),
    })
}

fn read_trace(trace: Option<PathBuf>) -> Result<String> {
    let mut buf = String::new();
    match trace {
        Some(p) => {
            let mut file = File::open(&p).with_context(|| format!("cannot open {}", p.display()))?;
            file.read_to_string(&mut buf)?;
        }
        None => {
            stdin().read_to_string(&mut buf)?;
        }
    }
    Ok(buf)
}

#[cfg(not(feature = "stat"))]
fn output_stat(sim: &Simulator) {
    let s = sim.cache().stat();
    println!("hit: {}, miss: {}, eviction: {}", s.hits(), s.misses(), s.evictions());
}

#[cfg(feature = "stat")]
fn output_stat(sim: &Simulator) {
    let max_width = get_terminal_width().unwrap_or(120) as usize;
    println!("{}", sim.collect_stat().view(max_width));
}

#[cfg(feature = "stat")]
fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(20))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_sim::trace::Access;

    fn flags(cache_size: Option<u64>, memory_size: Option<u64>, offset_bits: Option<u32>) -> CommonArgs {
        CommonArgs {
            config: None,
            cache_size,
            memory_size,
            offset_bits,
            verbose: false,
        }
    }

    const FILE: SimConfig = SimConfig {
        cache_size: 1024,
        memory_size: 65536,
        offset_bits: 8,
    };

    #[test]
    fn test_merge_flag_overrides_file() {
        let config = merge(&flags(Some(4096), None, Some(4)), Some(FILE)).unwrap();
        assert_eq!(config.cache_size, 4096);
        assert_eq!(config.memory_size, 65536);
        assert_eq!(config.offset_bits, 4);
    }

    #[test]
    fn test_merge_file_fills_missing_flags() {
        let config = merge(&flags(None, None, None), Some(FILE)).unwrap();
        assert_eq!(config, FILE);
        let config = merge(&flags(Some(2048), Some(8192), Some(6)), None).unwrap();
        assert_eq!(config.cache_size, 2048);
    }

    #[test]
    fn test_merge_missing_value() {
        let err = merge(&flags(None, Some(65536), Some(8)), None).unwrap_err();
        assert!(err.to_string().contains("missing cache_size"));
        let err = merge(&flags(Some(1024), Some(65536), None), None).unwrap_err();
        assert!(err.to_string().contains("--offset-bits"));
    }

    #[test]
    fn test_echo_absent_writes_always() {
        let mut sim = Simulator::with_geometry(FILE.geometry().unwrap());
        let absent = sim.step(Access::write(0x1A3));
        let read = sim.step(Access::read(0x1A3));
        let updated = sim.step(Access::write(0x1A3));
        let quiet = Sections::Table | Sections::Stat;
        assert!(echo(&absent, quiet));
        assert!(!echo(&read, quiet));
        assert!(!echo(&updated, quiet));
        assert!(echo(&read, Sections::Accesses));
        assert!(echo(&updated, Sections::Accesses));
    }
}
