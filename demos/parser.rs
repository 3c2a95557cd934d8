// Axel '0vercl0k' Souchet - July 20 2023
use std::fs::File;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use memmap2::Mmap;
use tracing_subscriber::EnvFilter;
use udmp_ingest::ParsedDump;

/// Display what a Windows user minidump contains.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Show everything.
    #[arg(short, long)]
    all: bool,
    /// Show the loaded modules.
    #[arg(long)]
    mods: bool,
    /// Show the memory map.
    #[arg(long)]
    mem: bool,
    /// Show the threads; pass a TID to only show this one, or `main` to only
    /// show the foreground thread.
    #[arg(short, long, value_name = "TID|main", num_args = 0..=1, default_missing_value = "all")]
    threads: Option<ThreadFilter>,
    /// Dump the memory at this (hexadecimal) address.
    #[arg(long, value_name = "ADDR", value_parser = string_to_hex)]
    dump: Option<u64>,
    /// The dump file.
    dump_path: PathBuf,
}

/// Which threads to display.
#[derive(Clone, Debug)]
enum ThreadFilter {
    All,
    Foreground,
    Tid(u32),
}

impl std::str::FromStr for ThreadFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "main" => Ok(Self::Foreground),
            tid => tid
                .parse()
                .map(Self::Tid)
                .map_err(|e| format!("{tid} is not a TID: {e}")),
        }
    }
}

/// Convert an hexadecimal string to a `u64`.
fn string_to_hex(s: &str) -> std::result::Result<u64, String> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

/// Print a hexdump of data that started at `address`.
fn hexdump(address: u64, data: &[u8]) {
    for (idx, row) in data.chunks(16).enumerate() {
        print!("{:016x}: ", address + (idx as u64 * 16));
        for i in 0..16 {
            match row.get(i) {
                Some(c) => print!("{:02x}", c),
                None => print!("  "),
            }
        }

        print!(" |");
        for i in 0..16 {
            match row.get(i) {
                Some(c) => {
                    let c = char::from(*c);
                    print!("{}", if c.is_ascii_graphic() { c } else { '.' });
                }
                None => print!(" "),
            }
        }
        println!("|");
    }
}

fn show_modules(dump: &ParsedDump) {
    println!("Loaded modules:");

    // Iterate through the module and display their base address and path.
    for (base, module) in dump.modules() {
        println!("{:016x}: {}", base, module.name);
    }
}

fn show_memory_map(dump: &ParsedDump) {
    println!("Memory map:");

    for region in dump.memory_regions().values() {
        print!(
            "{:016x} {:016x} {:016x} {:11} {:11} {:22}",
            region.start_addr(),
            region.end_addr(),
            region.region_size,
            region.type_as_str(),
            region.state_as_str(),
            region.protect_as_str()
        );

        // Do we have a module that exists at this address?
        if let Some(module) = dump.module_containing(region.start_addr()) {
            print!(" [{}; \"{}\"]", module.file_name(), module.name);
        }

        // Do we have data with this region? If so display the first few
        // bytes.
        if let Some(data) = region.data.filter(|data| data.len() >= 4) {
            print!(
                " {:02x} {:02x} {:02x} {:02x}...",
                data[0], data[1], data[2], data[3]
            );
        }

        println!();
    }
}

fn show_threads(dump: &ParsedDump, filter: &ThreadFilter) -> Result<()> {
    println!("Threads:");

    let wanted = match filter {
        ThreadFilter::All => None,
        ThreadFilter::Tid(tid) => Some(*tid),
        ThreadFilter::Foreground => Some(
            dump.foreground_thread_id()
                .context("no foreground thread id in dump")?,
        ),
    };

    for (tid, thread) in dump.threads() {
        if wanted.map_or(false, |wanted| wanted != *tid) {
            continue;
        }

        println!("TID {}, TEB {:016x}", tid, thread.teb);
        println!("Context:");
        println!("{}", thread.context());
    }

    Ok(())
}

fn show_memory(dump: &ParsedDump, address: u64) {
    println!("Memory:");

    let Some(region) = dump.memory_region_containing(address) else {
        println!("No memory region were found for {:016x}", address);
        return;
    };

    match region.data_from(address) {
        Some(data) => {
            println!("{:016x} -> {:016x}", address, region.end_addr());
            hexdump(address, &data[..data.len().min(0x1_00)]);
        }
        None => println!(
            "The memory at {:016x} (from region {:016x} -> {:016x}) has no backing data",
            address,
            region.start_addr(),
            region.end_addr()
        ),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Map the dump; the parsed dump borrows from the mapping.
    let file = File::open(&cli.dump_path)
        .with_context(|| format!("failed to open {}", cli.dump_path.display()))?;
    let mapping = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to map {}", cli.dump_path.display()))?;

    let dump = match ParsedDump::parse(&mapping) {
        Ok(dump) => dump,
        Err(e) => bail!("{} could not be parsed: {e}", cli.dump_path.display()),
    };

    if cli.mods || cli.all {
        show_modules(&dump);
    }

    if cli.mem || cli.all {
        show_memory_map(&dump);
    }

    let threads = match (&cli.threads, cli.all) {
        (Some(filter), _) => Some(filter.clone()),
        (None, true) => Some(ThreadFilter::All),
        (None, false) => None,
    };

    if let Some(filter) = threads {
        show_threads(&dump, &filter)?;
    }

    if let Some(address) = cli.dump {
        show_memory(&dump, address);
    }

    Ok(())
}
