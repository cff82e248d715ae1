use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use super::{Backend, Candidate, Part, RawResponse};
use crate::error::TransportError;
use crate::request::BackendRequest;

/// Offline backend: returns a flat PNG whose colour is derived from the prompt
/// and seed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunBackend;

const TILE: u32 = 32;

impl Backend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn requires_credential(&self) -> bool {
        false
    }

    fn generate(
        &self,
        request: &BackendRequest,
        _credential: Option<&str>,
    ) -> Result<RawResponse, TransportError> {
        let (w, h) = request.config.aspect_ratio.terms();
        let seed = request.config.seed.unwrap_or_default();
        let png = render_png(w * TILE, h * TILE, request.prompt(), seed)
            .map_err(|err| TransportError::other(format!("dryrun render failed: {err}")))?;
        Ok(RawResponse::with_candidates(vec![Candidate::new(
            vec![
                Part::text(format!("dryrun render for {}", request.model)),
                Part::inline("image/png", BASE64.encode(png)),
            ],
            Some("STOP"),
        )]))
    }
}

fn render_png(width: u32, height: u32, prompt: &str, seed: i64) -> image::ImageResult<Vec<u8>> {
    let (r, g, b) = color_from_prompt(prompt, seed);
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

fn color_from_prompt(prompt: &str, seed: i64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
