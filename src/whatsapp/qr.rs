//! Pairing QR rendering: PNG (served on `/` as a data URL) and Unicode
//! half blocks for the terminal.

use base64::Engine;
use image::{ImageBuffer, Luma};
use qrcode::{Color, QrCode};

use crate::error::{GatewayError, Result};

const QUIET_ZONE: usize = 4;
const MODULE_PX: u32 = 8;

/// QR modules padded with a light quiet zone.
struct Matrix {
    colors: Vec<Color>,
    width: usize,
}

impl Matrix {
    fn encode(code: &str) -> Result<Self> {
        let qr = QrCode::new(code.as_bytes()).map_err(|e| GatewayError::Qr(e.to_string()))?;
        Ok(Self {
            width: qr.width(),
            colors: qr.into_colors(),
        })
    }

    /// Side length including the quiet zone on both edges.
    fn size(&self) -> usize {
        self.width + QUIET_ZONE * 2
    }

    fn is_dark(&self, x: usize, y: usize) -> bool {
        let (Some(x), Some(y)) = (x.checked_sub(QUIET_ZONE), y.checked_sub(QUIET_ZONE)) else {
            return false;
        };
        x < self.width && y < self.width && self.colors[y * self.width + x] == Color::Dark
    }
}

/// Black-on-white PNG, 8 px per module.
pub fn render_png(code: &str) -> Result<Vec<u8>> {
    let matrix = Matrix::encode(code)?;
    let px = matrix.size() as u32 * MODULE_PX;

    let img = ImageBuffer::from_fn(px, px, |x, y| {
        let dark = matrix.is_dark((x / MODULE_PX) as usize, (y / MODULE_PX) as usize);
        Luma([if dark { 0u8 } else { 255u8 }])
    });

    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| GatewayError::Qr(e.to_string()))?;
    Ok(buf.into_inner())
}

/// `data:image/png;base64,...` suitable for an `<img src>`.
pub fn render_data_url(code: &str) -> Result<String> {
    let png = render_png(code)?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}

/// Two module rows per text line using `█ ▀ ▄`.
pub fn render_unicode(code: &str) -> Result<String> {
    let matrix = Matrix::encode(code)?;
    let size = matrix.size();
    let mut out = String::with_capacity((size + 1) * size.div_ceil(2) * 3);

    for y in (0..size).step_by(2) {
        for x in 0..size {
            out.push(match (matrix.is_dark(x, y), matrix.is_dark(x, y + 1)) {
                (true, true) => '\u{2588}',
                (true, false) => '\u{2580}',
                (false, true) => '\u{2584}',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: &str = "2@abcDEF123,xyz456,uvw789,base64key==";

    #[test]
    fn test_png_signature_and_size() {
        let png = render_png(CODE).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.width(), img.height());
        assert_eq!(img.width() % MODULE_PX, 0);
    }

    #[test]
    fn test_data_url_prefix() {
        let url = render_data_url(CODE).unwrap();
        assert!(url.starts_with("data:image/png;base64,iVBOR"));
    }

    #[test]
    fn test_unicode_has_quiet_zone() {
        let text = render_unicode(CODE).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.len() > 10);
        assert!(lines[0].chars().all(|c| c == ' '));
        assert!(text.contains('\u{2588}'));
    }

    #[test]
    fn test_quiet_zone_is_light() {
        let matrix = Matrix::encode(CODE).unwrap();
        assert!(!matrix.is_dark(0, 0));
        assert!(!matrix.is_dark(matrix.size() - 1, matrix.size() - 1));
        // finder pattern corner
        assert!(matrix.is_dark(QUIET_ZONE, QUIET_ZONE));
    }
}
