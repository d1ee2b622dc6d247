use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::barcode::{codec::BarcodeCodec, record::ProductRecord, symbology::Symbology};
use crate::config::AppConfig;
use crate::core::{
    clone::{clone_card, read_dump, write_dump, CloneOptions},
    emulator::{VirtualBackend, VirtualCard, VIRTUAL_ATR},
    error::CardResult,
    reader::{CardBackend, PcscBackend, ReaderInfo, ShareMode},
    session::{CardSession, DynChannel},
    utils::{describe_status_word, format_ascii, format_hex_dump, format_hex_spaced, parse_hex},
};

/// Capacity of each card on the virtual workbench
const VIRTUAL_CARD_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "card-barcode-manager")]
#[command(about = "Smart card and barcode manager: PC/SC cards, card cloning and product barcodes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Card backend: the PC/SC service or two in-memory virtual readers
    #[arg(short, long, global = true, default_value = "pcsc")]
    pub backend: BackendKind,

    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Append log records to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available readers
    List {
        /// Show detailed information about readers
        #[arg(short = 'l', long)]
        detailed: bool,
    },

    /// Connect to a card, show its ATR and dump its memory region
    Read {
        /// Reader name or index (use 'list' to see available readers)
        reader: String,

        /// Bytes to read from offset 0
        #[arg(long)]
        length: Option<usize>,

        /// Bytes per READ BINARY command
        #[arg(long)]
        block_size: Option<u8>,

        /// Also write the raw dump to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Send one APDU and show the raw response
    Transmit {
        /// Reader name or index
        reader: String,

        /// APDU command in hex format (e.g., "00B0000010")
        apdu: String,

        /// Connection share mode
        #[arg(short, long)]
        mode: Option<ShareMode>,

        /// Show response in different formats
        #[arg(short, long)]
        format: Option<ResponseFormat>,
    },

    /// Copy the memory region of one card onto another
    Clone {
        /// Reader holding the source card
        source: String,

        /// Reader holding the destination card; defaults to the source
        /// reader, with a prompt to swap cards
        destination: Option<String>,

        /// Bytes to copy from offset 0
        #[arg(long)]
        length: Option<usize>,

        /// Writable bytes on the destination card
        #[arg(long)]
        capacity: Option<usize>,

        /// Do not wait for Enter before reading and writing
        #[arg(short = 'y', long)]
        no_prompt: bool,
    },

    /// Run APDUs against an emulated card
    Emulate {
        /// APDUs in hex format; none just shows the emulated ATR
        apdus: Vec<String>,
    },

    /// Generate a barcode image from a product record
    Encode {
        /// Product identifier
        #[arg(long)]
        id: String,

        /// Lot number
        #[arg(long, default_value = "")]
        lot: String,

        /// Expiry date
        #[arg(long, default_value = "")]
        expiry: String,

        /// Free-text notes
        #[arg(long, default_value = "")]
        notes: String,

        /// Symbology: code128, qr or pdf417
        #[arg(short, long, default_value = "qr")]
        format: Symbology,

        /// PNG file to write
        #[arg(short, long, default_value = "barcode.png")]
        output: PathBuf,
    },

    /// Read a product record from a barcode image
    Decode {
        /// Image file (PNG, JPEG or BMP)
        file: PathBuf,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Pcsc,
    Virtual,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pcsc" => Ok(BackendKind::Pcsc),
            "virtual" => Ok(BackendKind::Virtual),
            _ => Err(format!("Invalid backend: {s}")),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ResponseFormat {
    Hex,
    HexSpaced,
    HexDump,
    Ascii,
    All,
}

impl std::str::FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hex" => Ok(ResponseFormat::Hex),
            "spaced" => Ok(ResponseFormat::HexSpaced),
            "dump" => Ok(ResponseFormat::HexDump),
            "ascii" => Ok(ResponseFormat::Ascii),
            "all" => Ok(ResponseFormat::All),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

/// The card backend picked on the command line
pub enum Backend {
    Pcsc(PcscBackend),
    Virtual(VirtualBackend),
}

impl Backend {
    pub fn new(kind: BackendKind) -> CardResult<Self> {
        Ok(match kind {
            BackendKind::Pcsc => Backend::Pcsc(PcscBackend::new()?),
            BackendKind::Virtual => Backend::Virtual(VirtualBackend::workbench(VIRTUAL_CARD_CAPACITY)),
        })
    }
}

impl CardBackend for Backend {
    type Channel = DynChannel;

    fn list_readers(&self) -> CardResult<Vec<ReaderInfo>> {
        match self {
            Backend::Pcsc(backend) => backend.list_readers(),
            Backend::Virtual(backend) => backend.list_readers(),
        }
    }

    fn connect(&self, reader: &str, share_mode: ShareMode) -> CardResult<DynChannel> {
        Ok(match self {
            Backend::Pcsc(backend) => Box::new(backend.connect(reader, share_mode)?),
            Backend::Virtual(backend) => Box::new(backend.connect(reader, share_mode)?),
        })
    }
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    let config = AppConfig::load_or_default(cli.config.as_deref())?;
    let log_file = cli.log_file.as_deref().or(config.log_file.as_deref());
    crate::logging::init(log_level, log_file)?;

    match cli.command {
        Commands::List { detailed } => cmd_list(&open_backend(cli.backend)?, detailed),
        Commands::Read {
            reader,
            length,
            block_size,
            output,
        } => {
            let length = length.unwrap_or(config.clone.length);
            let block_size = block_size.unwrap_or(config.clone.block_size);
            cmd_read(
                &open_backend(cli.backend)?,
                &config,
                &reader,
                length,
                block_size,
                output.as_deref(),
            )
        }
        Commands::Transmit {
            reader,
            apdu,
            mode,
            format,
        } => {
            let mut config = config;
            if let Some(mode) = mode {
                config.share_mode = mode;
            }
            cmd_transmit(&open_backend(cli.backend)?, &config, &reader, &apdu, format)
        }
        Commands::Clone {
            source,
            destination,
            length,
            capacity,
            no_prompt,
        } => {
            let options = CloneOptions {
                length: length.unwrap_or(config.clone.length),
                block_size: config.clone.block_size,
                destination_capacity: capacity.or(config.clone.destination_capacity),
            };
            cmd_clone(
                &open_backend(cli.backend)?,
                &config,
                &source,
                destination.as_deref(),
                &options,
                no_prompt,
            )
        }
        Commands::Emulate { apdus } => cmd_emulate(&apdus),
        Commands::Encode {
            id,
            lot,
            expiry,
            notes,
            format,
            output,
        } => {
            let record = ProductRecord::new(id.trim(), lot.trim(), expiry.trim(), notes.trim());
            cmd_encode(&config, &record, format, &output)
        }
        Commands::Decode { file, json } => cmd_decode(&config, &file, json),
    }
}

fn open_backend(kind: BackendKind) -> Result<Backend> {
    Backend::new(kind).context("Failed to initialize card backend")
}

fn open_session(
    backend: &Backend,
    config: &AppConfig,
    reader_name: &str,
) -> Result<CardSession<DynChannel>> {
    CardSession::open(backend, reader_name, &config.session_options())
        .with_context(|| format!("Failed to connect to reader: {reader_name}"))
}

fn cmd_list(backend: &Backend, detailed: bool) -> Result<()> {
    let readers = backend.list_readers().context("Failed to list readers")?;

    println!("Available readers:");
    for (i, reader_info) in readers.iter().enumerate() {
        if detailed {
            println!("  [{}] {}", i, reader_info.name);
            println!(
                "      Status: {}",
                if reader_info.card_present {
                    "Card present"
                } else {
                    "No card"
                }
            );
            if let Some(ref atr) = reader_info.atr {
                println!("      ATR: {}", format_hex_spaced(atr));
            }
        } else {
            match (&reader_info.atr, reader_info.card_present) {
                (Some(atr), _) => println!(
                    "  [{}] {} [CARD - ATR: {}]",
                    i,
                    reader_info.name,
                    format_hex_spaced(atr)
                ),
                (None, true) => println!("  [{}] {} [CARD]", i, reader_info.name),
                (None, false) => println!("  [{}] {}", i, reader_info.name),
            }
        }
    }

    Ok(())
}

fn cmd_read(
    backend: &Backend,
    config: &AppConfig,
    reader_name: &str,
    length: usize,
    block_size: u8,
    output: Option<&Path>,
) -> Result<()> {
    let reader_name = resolve_reader_name(backend, reader_name)?;
    let mut session = open_session(backend, config, &reader_name)?;

    println!("Reader: {reader_name}");
    print_atr(session.atr());

    let dump = read_dump(&mut session, length, block_size).context("Card read failed")?;
    session.disconnect()?;

    println!("Memory (first {} bytes):", dump.len());
    println!("{}", format_hex_dump(&dump, 0));

    if let Some(path) = output {
        std::fs::write(path, &dump)
            .with_context(|| format!("Failed to write dump file: {}", path.display()))?;
        println!("Dump saved to {}", path.display());
    }
    Ok(())
}

fn cmd_transmit(
    backend: &Backend,
    config: &AppConfig,
    reader_name: &str,
    apdu_hex: &str,
    format: Option<ResponseFormat>,
) -> Result<()> {
    let apdu = parse_hex(apdu_hex).context("Failed to parse APDU hex string")?;
    let reader_name = resolve_reader_name(backend, reader_name)?;
    let mut session = open_session(backend, config, &reader_name)?;

    let response = session
        .transmit_raw(&apdu)
        .context("Failed to execute transmit command")?;

    println!("APDU: {}", format_hex_spaced(&apdu));
    print_response(&response.data, &format.unwrap_or(ResponseFormat::HexSpaced));
    println!(
        "Status: {:02X} {:02X} ({})",
        response.sw1,
        response.sw2,
        describe_status_word(response.sw1, response.sw2)
    );
    if let Some(exchange) = session.transcript().last() {
        println!("Duration: {}ms", exchange.duration_ms);
    }

    session.disconnect()?;
    Ok(())
}

fn cmd_clone(
    backend: &Backend,
    config: &AppConfig,
    source: &str,
    destination: Option<&str>,
    options: &CloneOptions,
    no_prompt: bool,
) -> Result<()> {
    options.check_destination().context("Clone refused")?;

    let source = resolve_reader_name(backend, source)?;
    let destination = match destination {
        Some(name) => resolve_reader_name(backend, name)?,
        None => source.clone(),
    };

    if source != destination {
        let mut src = open_session(backend, config, &source)?;
        let mut dst = open_session(backend, config, &destination)?;
        let report = clone_card(&mut src, &mut dst, options).context(
            "Clone failed; the destination card may be partially written and must be re-checked",
        )?;
        src.disconnect()?;
        dst.disconnect()?;

        println!("Source ATR: {}", format_hex_spaced(&report.source_atr));
        println!("Destination ATR: {}", format_hex_spaced(&report.destination_atr));
        println!(
            "Cloned {} bytes in {} blocks from {source} to {destination}",
            report.bytes, report.blocks
        );
        return Ok(());
    }

    // Single reader: read the source, then ask for the destination card
    if !no_prompt {
        wait_for_enter("Insert the card to copy and press Enter to continue...")?;
    }
    let dump = {
        let mut session = open_session(backend, config, &source)?;
        let dump = read_dump(&mut session, options.length, options.block_size)
            .context("Failed to read the source card")?;
        session.disconnect()?;
        dump
    };

    if !no_prompt {
        wait_for_enter("Insert the blank card and press Enter to complete the clone...")?;
    }
    let mut session = open_session(backend, config, &destination)?;
    let written = write_dump(&mut session, &dump, options.block_size).context(
        "Clone failed; the destination card may be partially written and must be re-checked",
    )?;
    session.disconnect()?;

    println!("Cloned {written} bytes on {destination}");
    Ok(())
}

fn cmd_emulate(apdus: &[String]) -> Result<()> {
    let mut session = CardSession::new("Virtual Card", VirtualCard::new(VIRTUAL_CARD_CAPACITY));

    println!("Emulated card ATR: {}", format_hex_spaced(&VIRTUAL_ATR));
    for apdu_hex in apdus {
        let apdu = parse_hex(apdu_hex).context("Failed to parse APDU hex string")?;
        let response = session.transmit_raw(&apdu)?;
        println!("> {}", format_hex_spaced(&apdu));
        println!(
            "< {} ({})",
            format_hex_spaced(&response.to_bytes()),
            describe_status_word(response.sw1, response.sw2)
        );
    }
    Ok(())
}

fn cmd_encode(
    config: &AppConfig,
    record: &ProductRecord,
    format: Symbology,
    output: &Path,
) -> Result<()> {
    let codec = BarcodeCodec::new(config.render.clone());
    let png = codec
        .encode_record(record, format)
        .context("Barcode generation failed")?;
    codec.save(output, &png)?;

    println!("{format} barcode saved to {}", output.display());
    Ok(())
}

fn cmd_decode(config: &AppConfig, file: &Path, json: bool) -> Result<()> {
    let codec = BarcodeCodec::new(config.render.clone());
    let symbol = codec.load(file).context("No barcode recognized")?;
    let record = ProductRecord::from_payload(&symbol.payload).context("Unrecognized payload")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    if let Some(symbology) = symbol.symbology {
        println!("Format: {symbology}");
    }
    println!("Product ID: {}", record.identifier);
    println!("Lot: {}", record.lot);
    println!("Expiry: {}", record.expiry);
    println!("Notes: {}", record.notes);
    Ok(())
}

fn resolve_reader_name(backend: &Backend, name_or_index: &str) -> Result<String> {
    // Try to parse as index first
    if let Ok(index) = name_or_index.parse::<usize>() {
        let readers = backend.list_readers()?;
        return match readers.get(index) {
            Some(reader) => Ok(reader.name.clone()),
            None => bail!(
                "Reader index {} out of range (0-{})",
                index,
                readers.len() - 1
            ),
        };
    }

    // Use as reader name directly
    Ok(name_or_index.to_string())
}

fn wait_for_enter(message: &str) -> Result<()> {
    print!("{message} ");
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    io::stdin()
        .lock()
        .read_line(&mut input)
        .context("Failed to read input")?;
    Ok(())
}

fn print_atr(atr: &[u8]) {
    if atr.is_empty() {
        println!("ATR: (not available)");
    } else {
        println!("ATR: {}", format_hex_spaced(atr));
    }
}

fn print_response(data: &[u8], format: &ResponseFormat) {
    if data.is_empty() {
        println!("Response: (empty)");
        return;
    }

    match format {
        ResponseFormat::Hex => {
            println!("Response: {}", hex::encode_upper(data));
        }
        ResponseFormat::HexSpaced => {
            println!("Response: {}", format_hex_spaced(data));
        }
        ResponseFormat::HexDump => {
            println!("Response:");
            println!("{}", format_hex_dump(data, 0));
        }
        ResponseFormat::Ascii => {
            println!("Response (ASCII): {}", format_ascii(data));
        }
        ResponseFormat::All => {
            println!("Response (Hex): {}", format_hex_spaced(data));
            println!("Response (ASCII): {}", format_ascii(data));
            if data.len() > 16 {
                println!("Response (Dump):");
                println!("{}", format_hex_dump(data, 0));
            }
        }
    }
}
