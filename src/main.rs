use anyhow::{Context, Result};
use bytesize::ByteSize;
use clap::ArgMatches;
use log::{info, LevelFilter};
use std::path::Path;
use std::process;

use griffin::cli;
use griffin::elf;
use griffin::emulate::{EmulatorOptions, EmulatorState};
use griffin::engine::system::PAGE_SIZE;
use griffin::util::next_multiple_of;

fn main() {
    let matches = cli::args().get_matches();
    init_logger(matches.get_count("verbose"));

    match run(&matches) {
        // The exit status is the final a0, masked to the host width.
        Ok(exit_code) => process::exit((exit_code & 0xff) as i32),
        Err(err) => {
            eprintln!("error: {:#}", err);
            process::exit(1);
        }
    }
}

fn init_logger(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbosity > 0 {
        // -v turns on per-instruction tracing.
        builder.filter_level(LevelFilter::Trace);
    }
    builder.init();
}

fn run(matches: &ArgMatches) -> Result<u64> {
    let image = matches.get_one::<String>("image").expect("required");
    let program = elf::load_file(Path::new(image))
        .with_context(|| format!("failed to load '{}'", image))?;

    let mut options = EmulatorOptions::default();
    if let Some(mib) = matches.get_one::<u64>("memory") {
        options.memory_size = ByteSize::mib(*mib);
    }
    options.max_steps = matches.get_one::<u64>("max-steps").copied();
    options.strict_align = matches.get_flag("strict-align");

    // Grow physical memory until the image and the stack both fit.
    let required = next_multiple_of(program.highest_address(), PAGE_SIZE as u64)
        + options.stack_size.as_u64();
    if required > options.memory_size.as_u64() {
        options.memory_size = ByteSize(next_multiple_of(required, PAGE_SIZE as u64));
    }

    info!(
        "loaded '{}': entry={:#x} xlen={} memory={}",
        image,
        program.entry,
        program.xlen.bits(),
        options.memory_size
    );

    let mut emulator = EmulatorState::new(program.xlen, options);
    emulator.bootstrap(&program)?;
    let exit_code = emulator.run()?;
    info!("a0 = {:#x}", exit_code);
    Ok(exit_code)
}
