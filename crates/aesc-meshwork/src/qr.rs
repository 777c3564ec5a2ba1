//! QR code rendering (PNG and SVG).

use crate::error::{Error, Result};
use image::{ImageFormat, Rgb, RgbImage};
use qrcode::{Color, EcLevel, QrCode};
use serde::Deserialize;
use std::fmt::Write as _;
use std::io::Cursor;

pub const MAX_TEXT_BYTES: usize = 2048;
pub const MIN_SIZE: u32 = 64;
pub const MAX_SIZE: u32 = 2048;
pub const DEFAULT_SIZE: u32 = 512;
pub const MAX_MARGIN: u32 = 16;
pub const DEFAULT_MARGIN: u32 = 2;

/// `Cache-Control` for rendered codes; output is a pure function of the query.
pub const CACHE_CONTROL: &str = "public, max-age=86400";

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrFormat {
    Png,
    Svg,
}

impl QrFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            QrFormat::Png => "image/png",
            QrFormat::Svg => "image/svg+xml",
        }
    }
}

/// Raw query string parameters.
#[derive(Debug, Default, Deserialize)]
pub struct QrQuery {
    pub text: Option<String>,
    pub size: Option<String>,
    pub margin: Option<String>,
    pub format: Option<String>,
    pub fg: Option<String>,
    pub bg: Option<String>,
    pub ec: Option<String>,
}

/// Validated rendering parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QrParams {
    pub text: String,
    pub size: u32,
    pub margin: u32,
    pub format: QrFormat,
    pub fg: [u8; 3],
    pub bg: [u8; 3],
    pub ec: EcLevel,
}

fn parse_bounded(field: &str, raw: Option<&str>, default: u32, min: u32, max: u32) -> Result<u32> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(default);
    };
    let value: u32 = raw
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{field} must be an integer")))?;
    if !(min..=max).contains(&value) {
        return Err(Error::InvalidInput(format!("{field} must be between {min} and {max}")));
    }
    Ok(value)
}

/// Parse `#rgb` or `#rrggbb` (the `#` is optional).
pub fn parse_hex_color(raw: &str) -> Option<[u8; 3]> {
    let hex = raw.trim().strip_prefix('#').unwrap_or(raw.trim());
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut out = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                out[i] = v * 16 + v;
            }
            Some(out)
        }
        6 => Some([channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?]),
        _ => None,
    }
}

impl QrParams {
    pub fn from_query(query: &QrQuery) -> Result<Self> {
        let text = query.text.clone().unwrap_or_default();
        if text.is_empty() {
            return Err(Error::InvalidInput("text is required".into()));
        }
        if text.len() > MAX_TEXT_BYTES {
            return Err(Error::InvalidInput(format!("text exceeds {MAX_TEXT_BYTES} bytes")));
        }

        let size = parse_bounded("size", query.size.as_deref(), DEFAULT_SIZE, MIN_SIZE, MAX_SIZE)?;
        let margin = parse_bounded("margin", query.margin.as_deref(), DEFAULT_MARGIN, 0, MAX_MARGIN)?;

        let format = match query.format.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("png") => QrFormat::Png,
            Some("svg") => QrFormat::Svg,
            Some(_) => return Err(Error::InvalidInput("format must be png or svg".into())),
        };

        let color = |field: &str, raw: Option<&str>, default: [u8; 3]| match raw.filter(|s| !s.is_empty()) {
            None => Ok(default),
            Some(raw) => parse_hex_color(raw)
                .ok_or_else(|| Error::InvalidInput(format!("{field} must be #rgb or #rrggbb"))),
        };
        let fg = color("fg", query.fg.as_deref(), [0, 0, 0])?;
        let bg = color("bg", query.bg.as_deref(), [255, 255, 255])?;

        let ec = match query.ec.as_deref().map(str::to_ascii_uppercase).as_deref() {
            None | Some("") | Some("M") => EcLevel::M,
            Some("L") => EcLevel::L,
            Some("Q") => EcLevel::Q,
            Some("H") => EcLevel::H,
            Some(_) => return Err(Error::InvalidInput("ec must be one of L, M, Q, H".into())),
        };

        Ok(Self {
            text,
            size,
            margin,
            format,
            fg,
            bg,
            ec,
        })
    }
}

/// Dark/light modules including the quiet zone, row-major, plus the side length.
fn modules(params: &QrParams) -> Result<(Vec<bool>, usize)> {
    let code = QrCode::with_error_correction_level(params.text.as_bytes(), params.ec)
        .map_err(|e| Error::InvalidInput(format!("text cannot be encoded: {e}")))?;
    let width = code.width();
    let margin = params.margin as usize;
    let side = width + 2 * margin;
    let colors = code.to_colors();

    let mut grid = vec![false; side * side];
    for y in 0..width {
        for x in 0..width {
            if colors[y * width + x] == Color::Dark {
                grid[(y + margin) * side + x + margin] = true;
            }
        }
    }
    Ok((grid, side))
}

/// Render to the requested format. Returns the body bytes.
pub fn render(params: &QrParams) -> Result<Vec<u8>> {
    match params.format {
        QrFormat::Png => render_png(params),
        QrFormat::Svg => render_svg(params).map(String::into_bytes),
    }
}

/// PNG of exactly `size` x `size` pixels.
pub fn render_png(params: &QrParams) -> Result<Vec<u8>> {
    let (grid, side) = modules(params)?;
    let size = params.size as usize;
    let img = RgbImage::from_fn(params.size, params.size, |x, y| {
        let mx = x as usize * side / size;
        let my = y as usize * side / size;
        if grid[my * side + mx] {
            Rgb(params.fg)
        } else {
            Rgb(params.bg)
        }
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| Error::Render(e.to_string()))?;
    Ok(out.into_inner())
}

fn css_hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// SVG with one unit per module, scaled to `size`.
pub fn render_svg(params: &QrParams) -> Result<String> {
    let (grid, side) = modules(params)?;
    let mut path = String::new();
    for y in 0..side {
        for x in 0..side {
            if grid[y * side + x] {
                let _ = write!(path, "M{x} {y}h1v1h-1z");
            }
        }
    }
    Ok(format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{size}" height="{size}" "#,
            r#"viewBox="0 0 {side} {side}" shape-rendering="crispEdges">"#,
            r#"<rect width="{side}" height="{side}" fill="{bg}"/>"#,
            r#"<path d="{path}" fill="{fg}"/></svg>"#
        ),
        size = params.size,
        side = side,
        bg = css_hex(params.bg),
        fg = css_hex(params.fg),
        path = path,
    ))
}
