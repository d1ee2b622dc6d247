//! Smart card side: reader access, APDU sessions, dump/clone and emulation.

pub mod apdu;
pub mod clone;
pub mod emulator;
pub mod error;
pub mod reader;
pub mod session;
pub mod timeout;
pub mod utils;
