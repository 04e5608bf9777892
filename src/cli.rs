use clap::{crate_version, value_parser, Arg, ArgAction, Command};

pub fn args() -> Command {
    Command::new("griffin")
        .version(crate_version!())
        .about("User-mode RV32/RV64 IMAC instruction-set emulator")
        .arg(
            Arg::new("image")
                .value_name("FILE")
                .help("Statically linked little-endian RISC-V ELF executable")
                .required(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Trace every executed instruction"),
        )
        .arg(
            Arg::new("memory")
                .long("memory")
                .value_name("MIB")
                .value_parser(value_parser!(u64).range(1..=16 * 1024))
                .help("Physical memory size in MiB"),
        )
        .arg(
            Arg::new("max-steps")
                .long("max-steps")
                .value_name("COUNT")
                .value_parser(value_parser!(u64))
                .help("Abort the run after this many instructions"),
        )
        .arg(
            Arg::new("strict-align")
                .long("strict-align")
                .action(ArgAction::SetTrue)
                .help("Raise address-misaligned traps instead of satisfying misaligned accesses"),
        )
}
