//! Terminal rendering of the pairing QR code.

use qrcode::render::unicode::Dense1x2;
use qrcode::types::QrError;
use qrcode::QrCode;

/// Renders pairing data as half-block unicode text scannable from a terminal.
///
/// Colors are inverted so the code reads correctly on dark terminal themes.
pub fn render_pairing_qr(data: &str) -> Result<String, QrError> {
    let code = QrCode::new(data.as_bytes())?;
    Ok(code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
