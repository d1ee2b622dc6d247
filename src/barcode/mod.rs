//! Barcode side: product records, payload text and Code128/QR/PDF417 images.

pub mod codec;
pub mod error;
pub mod record;
pub mod symbology;
