use crate::barcode::error::{BarcodeError, BarcodeResult};
use crate::barcode::record::ProductRecord;
use crate::barcode::symbology::Symbology;
use image::{GrayImage, ImageFormat, Luma};
use rxing::common::BitMatrix;
use rxing::{MultiFormatWriter, Writer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

/// Pixel geometry of rendered symbols
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Pixels per module
    pub module_scale: u32,
    /// Extra white border, in modules, around the symbol's own margin
    pub quiet_zone: u32,
    /// Bar height, in modules, of linear symbols
    pub linear_height: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            module_scale: 3,
            quiet_zone: 2,
            linear_height: 60,
        }
    }
}

/// A symbol found in an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSymbol {
    pub payload: String,
    /// `None` when the symbol is not one of the supported formats
    pub symbology: Option<Symbology>,
}

/// Renders payloads to PNG and reads them back
#[derive(Debug, Clone, Default)]
pub struct BarcodeCodec {
    options: RenderOptions,
}

impl BarcodeCodec {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Encode `payload` into a grayscale image
    pub fn render(&self, payload: &str, symbology: Symbology) -> BarcodeResult<GrayImage> {
        symbology.check_payload(payload)?;

        // Width 1 asks the writer for its minimal size; linear symbols also
        // need an explicit bar height.
        let height = if symbology.is_linear() {
            self.options.linear_height.max(1) as i32
        } else {
            1
        };

        let matrix = MultiFormatWriter::default()
            .encode(payload, &symbology.barcode_format(), 1, height)
            .map_err(|e| BarcodeError::Encoding(format!("{symbology} encoder rejected payload: {e}")))?;

        log::debug!(
            "Encoded {} characters as {symbology} ({}x{} modules)",
            payload.len(),
            matrix.getWidth(),
            matrix.getHeight()
        );
        Ok(self.rasterize(&matrix))
    }

    fn rasterize(&self, matrix: &BitMatrix) -> GrayImage {
        let scale = self.options.module_scale.max(1);
        let margin = self.options.quiet_zone;
        let (width, height) = (matrix.getWidth(), matrix.getHeight());

        GrayImage::from_fn(
            (width + 2 * margin) * scale,
            (height + 2 * margin) * scale,
            |x, y| {
                let (mx, my) = (x / scale, y / scale);
                let dark = mx >= margin
                    && my >= margin
                    && mx - margin < width
                    && my - margin < height
                    && matrix.get(mx - margin, my - margin);
                Luma([if dark { 0 } else { 255 }])
            },
        )
    }

    /// Encode `payload` into PNG bytes
    pub fn encode(&self, payload: &str, symbology: Symbology) -> BarcodeResult<Vec<u8>> {
        let image = self.render(payload, symbology)?;
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| BarcodeError::Encoding(format!("PNG encoding failed: {e}")))?;
        Ok(png.into_inner())
    }

    pub fn encode_record(
        &self,
        record: &ProductRecord,
        symbology: Symbology,
    ) -> BarcodeResult<Vec<u8>> {
        let payload = record.to_payload()?;
        log::info!("Generating {symbology} barcode for product {}", record.identifier);
        self.encode(&payload, symbology)
    }

    /// Find the symbol in an encoded image (PNG, JPEG or BMP)
    pub fn decode(&self, image_bytes: &[u8]) -> BarcodeResult<DecodedSymbol> {
        let image = image::load_from_memory(image_bytes)
            .map_err(|e| BarcodeError::Decode(format!("unreadable image: {e}")))?;
        self.decode_image(&image.to_luma8())
    }

    pub fn decode_image(&self, image: &GrayImage) -> BarcodeResult<DecodedSymbol> {
        let (width, height) = image.dimensions();
        let result = rxing::helpers::detect_in_luma_with_hints(
            image.as_raw().clone(),
            width,
            height,
            None,
            &mut HashMap::new(),
        )
        .map_err(|e| BarcodeError::Decode(format!("no recognizable symbol found ({e})")))?;

        let symbology = Symbology::from_barcode_format(result.getBarcodeFormat());
        log::info!(
            "Decoded {} symbol with {} characters",
            symbology.map_or("unsupported", Symbology::name),
            result.getText().len()
        );

        Ok(DecodedSymbol {
            payload: result.getText().to_string(),
            symbology,
        })
    }

    pub fn decode_record(&self, image_bytes: &[u8]) -> BarcodeResult<ProductRecord> {
        let symbol = self.decode(image_bytes)?;
        ProductRecord::from_payload(&symbol.payload)
    }

    /// Write PNG bytes to `path`
    pub fn save(&self, path: &Path, png: &[u8]) -> BarcodeResult<()> {
        std::fs::write(path, png).map_err(|source| BarcodeError::Save {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Barcode saved to {}", path.display());
        Ok(())
    }

    /// Read and decode the image at `path`
    pub fn load(&self, path: &Path) -> BarcodeResult<DecodedSymbol> {
        let bytes = std::fs::read(path)
            .map_err(|e| BarcodeError::Decode(format!("cannot open {}: {e}", path.display())))?;
        self.decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_geometry() {
        let codec = BarcodeCodec::new(RenderOptions {
            module_scale: 2,
            quiet_zone: 1,
            linear_height: 10,
        });
        let image = codec.render("ID:1", Symbology::Code128).unwrap();
        // Linear symbols are as tall as requested plus the quiet zone
        assert_eq!(image.height(), (10 + 2) * 2);
        assert_eq!(image.width() % 2, 0);

        // Corners stay white
        assert_eq!(image.get_pixel(0, 0).0, [255]);
        let (w, h) = image.dimensions();
        assert_eq!(image.get_pixel(w - 1, h - 1).0, [255]);
        assert!(image.pixels().any(|p| p.0 == [0]));
    }

    #[test]
    fn test_png_output() {
        let png = BarcodeCodec::default().encode("ID:1", Symbology::Qr).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_payload_checked_before_encoding() {
        let codec = BarcodeCodec::default();
        assert!(matches!(
            codec.encode(&"9".repeat(81), Symbology::Code128),
            Err(BarcodeError::Encoding(_))
        ));
        assert!(matches!(
            codec.encode("Ω", Symbology::Pdf417),
            Err(BarcodeError::Encoding(_))
        ));
    }

    #[test]
    fn test_payload_round_trip() {
        let codec = BarcodeCodec::default();
        for symbology in Symbology::ALL {
            let png = codec.encode("ID:X1;LOT:7", symbology).unwrap();
            let decoded = codec.decode(&png).unwrap();
            assert_eq!(decoded.payload, "ID:X1;LOT:7");
            assert_eq!(decoded.symbology, Some(symbology));
        }
    }

    #[test]
    fn test_non_square_symbols_decode() {
        let codec = BarcodeCodec::default();
        for symbology in [Symbology::Code128, Symbology::Pdf417] {
            let image = codec.render("ID:WIDE-1;LOT:L9", symbology).unwrap();
            assert_ne!(image.width(), image.height());

            let decoded = codec.decode_image(&image).unwrap();
            assert_eq!(decoded.payload, "ID:WIDE-1;LOT:L9");
            assert_eq!(decoded.symbology, Some(symbology));
        }
    }

    #[test]
    fn test_payload_at_limit_renders() {
        let codec = BarcodeCodec::default();
        for symbology in Symbology::ALL {
            // Mixed case, digits and punctuation force frequent mode switches
            let payload: String = "a1;B".chars().cycle().take(symbology.max_payload_len()).collect();
            assert!(
                codec.render(&payload, symbology).is_ok(),
                "{symbology} rejected {} characters",
                payload.len()
            );
        }
    }

    #[test]
    fn test_blank_image_has_no_symbol() {
        let blank = GrayImage::from_pixel(200, 200, Luma([255]));
        assert!(matches!(
            BarcodeCodec::default().decode_image(&blank),
            Err(BarcodeError::Decode(_))
        ));
    }

    #[test]
    fn test_garbage_bytes_are_not_an_image() {
        assert!(matches!(
            BarcodeCodec::default().decode(b"definitely not a png"),
            Err(BarcodeError::Decode(_))
        ));
    }
}
