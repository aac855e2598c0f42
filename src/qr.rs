use std::io::Cursor;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Luma, Rgba, RgbaImage};
use qrcode::{EcLevel, QrCode};
use tracing::{info, instrument, warn};

use crate::error::AppError;

const MODULE_PIXELS: u32 = 10;
const LOGO_BORDER: u32 = 10;
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

pub fn checkin_link(frontend_url: &str, gym_id: i64) -> String {
    format!(
        "{}/checkin-selection?gym_id={}",
        frontend_url.trim_end_matches('/'),
        gym_id
    )
}

/// Renders the gym's check-in link as a PNG QR code.
///
/// The code uses the highest error-correction level so the logo, scaled to a
/// quarter of the code's side and framed in white, can cover the center
/// without breaking scans. A missing logo yields a plain code. The PNG is
/// encoded fully in memory; callers only ever see complete output or an error.
#[instrument(skip(logo_path))]
pub fn render_checkin_qr(
    frontend_url: &str,
    gym_id: i64,
    logo_path: Option<&Path>,
) -> Result<Vec<u8>, AppError> {
    let link = checkin_link(frontend_url, gym_id);
    let code = QrCode::with_error_correction_level(link.as_bytes(), EcLevel::H)?;

    let modules = code
        .render::<Luma<u8>>()
        .module_dimensions(MODULE_PIXELS, MODULE_PIXELS)
        .quiet_zone(true)
        .build();
    let mut canvas = DynamicImage::ImageLuma8(modules).to_rgba8();

    match logo_path {
        Some(path) if path.exists() => overlay_logo(&mut canvas, path)?,
        Some(path) => warn!(path = %path.display(), "QR logo not found, rendering plain code"),
        None => {}
    }

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(canvas).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    info!(gym_id, bytes = png.len(), "Rendered check-in QR code");
    Ok(png)
}

fn overlay_logo(canvas: &mut RgbaImage, path: &Path) -> Result<(), AppError> {
    let logo = image::open(path)?.to_rgba8();

    let (width, height) = canvas.dimensions();
    let logo_width = (width / 4).max(1);
    let logo_height = (height / 4).max(1);
    let logo = imageops::resize(&logo, logo_width, logo_height, FilterType::Lanczos3);

    let mut framed = RgbaImage::from_pixel(
        logo_width + LOGO_BORDER * 2,
        logo_height + LOGO_BORDER * 2,
        WHITE,
    );
    imageops::overlay(&mut framed, &logo, i64::from(LOGO_BORDER), i64::from(LOGO_BORDER));

    let x = (i64::from(width) - i64::from(framed.width())) / 2;
    let y = (i64::from(height) - i64::from(framed.height())) / 2;
    imageops::overlay(canvas, &framed, x, y);

    Ok(())
}
