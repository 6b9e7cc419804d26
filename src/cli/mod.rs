mod util;

use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::Verbosity;
use log::debug;

use crate::ops;
use crate::progress::Progress;
use crate::session::{self, Session, SessionError};
use crate::wire::{MediaIndex, Mode, Tags};

#[derive(Parser)]
#[command(
    name = "awfel",
    about = "Allwinner FEL/FES USB recovery protocol driver",
    long_about = None,
    version,
    help_template = r#"awfel(v{version}) - Allwinner FEL/FES USB recovery protocol driver
usage:
    awfel [--device N] device-info                        - Show device identity and mode
    awfel read <address> <length> <file> [--mode fel|fes] - Read device memory to file
    awfel write <address> <file> [--mode fel|fes]         - Write file to device memory
    awfel run <address> [--mode fel|fes]                  - Execute code at address
    awfel format <mbr-file>                               - Erase and program the MBR
    awfel mbr <mbr-file>                                  - Program the MBR without erasing
    awfel storage {{on|off}}                                - Toggle the NAND storage driver
    awfel transmite {{read|write}} <address> <length|file>  - Low-level FES media transport
    awfel request <cmd> <address> <length> <flags>         - Send a raw debug command
"#
)]
pub struct Cli {
    #[command(flatten)]
    pub verbose: Verbosity,
    /// Select among multiple connected Allwinner FEL/FES devices by index
    #[arg(long, default_value_t = 0)]
    pub device: usize,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Fel,
    Fes,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Fel => Mode::Fel,
            ModeArg::Fes => Mode::Fes,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StorageState {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TransmiteDirectionArg {
    Read,
    Write,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show device identity and current boot mode
    #[command(name = "device-info")]
    DeviceInfo,
    /// Read device memory into a file
    Read {
        address: String,
        length: String,
        file: String,
        #[arg(long, value_enum, default_value = "fel")]
        mode: ModeArg,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Write a file into device memory
    Write {
        address: String,
        file: String,
        #[arg(long, value_enum, default_value = "fel")]
        mode: ModeArg,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Execute code at an address
    Run {
        address: String,
        #[arg(long, value_enum, default_value = "fel")]
        mode: ModeArg,
    },
    /// Erase the platform and program the MBR (FES only)
    Format { file: String },
    /// Program the MBR without erasing (FES only)
    Mbr { file: String },
    /// Turn the NAND storage driver on or off (FES only)
    Storage {
        #[arg(value_enum)]
        state: StorageState,
    },
    /// Low-level FES media transport
    Transmite {
        #[arg(value_enum)]
        direction: TransmiteDirectionArg,
        address: String,
        /// Length for `read`, file path for `write`
        length_or_file: String,
        /// File path to read into, only used by `read`
        file: Option<String>,
        #[arg(long, default_value = "dram")]
        index: String,
    },
    /// Send a raw debug command and print its status
    Request {
        cmd: String,
        address: String,
        length: String,
        flags: String,
        #[arg(long, value_enum, default_value = "fel")]
        mode: ModeArg,
    },
}

#[derive(Debug)]
pub enum CliError {
    Session(SessionError),
    Fel(crate::error::FelError),
    Io(std::io::Error),
    BadArgument(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Session(err) => write!(f, "{err}"),
            CliError::Fel(err) => write!(f, "{err}"),
            CliError::Io(err) => write!(f, "I/O error: {err}"),
            CliError::BadArgument(msg) => write!(f, "bad argument: {msg}"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CliError::Session(err) => Some(err),
            CliError::Fel(err) => Some(err),
            CliError::Io(err) => Some(err),
            CliError::BadArgument(_) => None,
        }
    }
}

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        CliError::Session(err)
    }
}

impl From<crate::error::FelError> for CliError {
    fn from(err: crate::error::FelError) -> Self {
        CliError::Fel(err)
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err)
    }
}

fn parse_tags(raw: &[String]) -> Result<Tags, CliError> {
    raw.iter().try_fold(Tags::NONE, |acc, tag| {
        let bit = match tag.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Tags::NONE,
            "dram" => Tags::DRAM,
            "mbr" => Tags::MBR,
            "erase" => Tags::ERASE,
            "finish" => Tags::FINISH,
            "uboot" => Tags::UBOOT,
            "boot0" => Tags::BOOT0,
            other => return Err(CliError::BadArgument(format!("unknown tag '{other}'"))),
        };
        Ok(acc | bit)
    })
}

fn parse_media_index(raw: &str) -> Result<MediaIndex, CliError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "dram" => Ok(MediaIndex::Dram),
        "physical-log" | "physical_log" => Ok(MediaIndex::PhysicalLog),
        "physical" => Ok(MediaIndex::Physical),
        other => Err(CliError::BadArgument(format!(
            "unknown media index '{other}'"
        ))),
    }
}

pub fn run(cli: Cli) -> Result<(), CliError> {
    let Cli {
        verbose,
        device,
        command,
    } = cli;

    env_logger::Builder::new()
        .filter_level(verbose.log_level_filter())
        .init();

    let device = session::find_device(device)?;
    let session = Session::open(&device)?;

    execute(command, &session)
}

fn execute(command: Commands, session: &Session) -> Result<(), CliError> {
    match command {
        Commands::DeviceInfo => {
            let info = ops::device_info(session)?;
            println!("{:x?}", info);
            Ok(())
        }
        Commands::Read {
            address,
            length,
            file,
            mode,
            tags,
        } => {
            let address = util::parse_value::<u32>(&address)
                .map_err(|e| CliError::BadArgument(e.to_string()))?;
            let length = util::parse_value::<usize>(&length)
                .map_err(|e| CliError::BadArgument(e.to_string()))?;
            let tags = parse_tags(&tags)?;
            let mut progress = Progress::new();
            let data = ops::read(
                session,
                address,
                length,
                tags,
                mode.into(),
                &mut progress,
            )?;
            let mut writer = BufWriter::new(fs::File::create(&file)?);
            writer.write_all(&data)?;
            Ok(())
        }
        Commands::Write {
            address,
            file,
            mode,
            tags,
        } => {
            let address = util::parse_value::<u32>(&address)
                .map_err(|e| CliError::BadArgument(e.to_string()))?;
            let tags = parse_tags(&tags)?;
            let mut data = Vec::new();
            BufReader::new(fs::File::open(&file)?).read_to_end(&mut data)?;
            let mut progress = Progress::new();
            ops::write(session, address, &data, tags, mode.into(), &mut progress)?;
            Ok(())
        }
        Commands::Run { address, mode } => {
            let address = util::parse_value::<u32>(&address)
                .map_err(|e| CliError::BadArgument(e.to_string()))?;
            ops::run(session, address, mode.into())?;
            Ok(())
        }
        Commands::Format { file } => {
            let mbr = fs::read(&file)?;
            let mut progress = Progress::new();
            let status = ops::write_mbr(session, &mbr, true, &mut progress)?;
            print_verify_result(&status);
            Ok(())
        }
        Commands::Mbr { file } => {
            let mbr = fs::read(&file)?;
            let mut progress = Progress::new();
            let status = ops::write_mbr(session, &mbr, false, &mut progress)?;
            print_verify_result(&status);
            Ok(())
        }
        Commands::Storage { state } => {
            let on = matches!(state, StorageState::On);
            ops::set_storage_state(session, on)?;
            println!("storage: {}", if on { "on" } else { "off" });
            Ok(())
        }
        Commands::Transmite {
            direction,
            address,
            length_or_file,
            file,
            index,
        } => {
            let address = util::parse_value::<u32>(&address)
                .map_err(|e| CliError::BadArgument(e.to_string()))?;
            let media_index = parse_media_index(&index)?;
            match direction {
                TransmiteDirectionArg::Read => {
                    let length = util::parse_value::<usize>(&length_or_file)
                        .map_err(|e| CliError::BadArgument(e.to_string()))?;
                    let data = ops::transmite_read(session, address, length, media_index)?;
                    let out_file = file.ok_or_else(|| {
                        CliError::BadArgument("transmite read requires an output file".into())
                    })?;
                    fs::write(&out_file, &data)?;
                    Ok(())
                }
                TransmiteDirectionArg::Write => {
                    let data = fs::read(&length_or_file)?;
                    let mut progress = Progress::new();
                    ops::transmite_write(session, address, &data, media_index, &mut progress)?;
                    Ok(())
                }
            }
        }
        Commands::Request {
            cmd,
            address,
            length,
            flags,
            mode: _mode,
        } => {
            let cmd = util::parse_value::<u16>(&cmd)
                .map_err(|e| CliError::BadArgument(e.to_string()))?;
            let address = util::parse_value::<u32>(&address)
                .map_err(|e| CliError::BadArgument(e.to_string()))?;
            let length = util::parse_value::<u32>(&length)
                .map_err(|e| CliError::BadArgument(e.to_string()))?;
            let flags = util::parse_value::<u32>(&flags)
                .map_err(|e| CliError::BadArgument(e.to_string()))?;
            debug!("request: cmd=0x{cmd:04x} address=0x{address:08x} len={length} flags=0x{flags:08x}");
            let status = ops::raw_request(session, cmd, address, length, flags)?;
            // Report on the status record actually parsed above, not a
            // separately-named local.
            println!("status.state = {}", status.state);
            Ok(())
        }
    }
}

fn print_verify_result(status: &crate::wire::FesVerifyStatusResponse) {
    println!("verify: OK (flags=0x{:08x})", status.flags);
}
