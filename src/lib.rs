//! Card & Barcode Manager - workstation tools for an industrial line
//!
//! Smart card side: PC/SC reader access, raw APDU exchange, memory dump,
//! card-to-card clone and a software emulated card.
//! Barcode side: product records carried in Code128, QR and PDF417 symbols.
pub mod barcode;
pub mod cli;
pub mod config;
pub mod core;
pub mod logging;

// Re-export commonly used types
pub use barcode::{
    codec::{BarcodeCodec, DecodedSymbol, RenderOptions},
    error::BarcodeError,
    record::ProductRecord,
    symbology::Symbology,
};
pub use core::{
    apdu::{Command, Response},
    clone::{clone_card, read_dump, write_dump, CloneOptions, CloneReport},
    emulator::{VirtualBackend, VirtualCard},
    error::CardError,
    reader::{CardBackend, CardChannel, PcscBackend, ReaderInfo, ShareMode},
    session::{CardSession, SessionOptions},
    utils::{format_hex_spaced, parse_hex},
};

// Common error type
pub type Result<T> = anyhow::Result<T>;
