//! Page normalisation: trim → pad → compose.
//!
//! Scans come with arbitrary white margins. Each page is cropped to the
//! tight bounding box of its non-background pixels, given a uniform border,
//! and the pages are stacked top to bottom on one canvas:
//!
//! ```text
//!   ┌──────────────┐      canvas width  = max page width
//!   │   page 1     │      canvas height = Σ page heights
//!   ├──┬────────┬──┤      each page centered; gutters = background
//!   │  │ page 2 │  │
//!   └──┴────────┴──┘
//! ```
//!
//! Background comparison uses RGB only; alpha is ignored, so a transparent
//! pixel counts by its colour channels. Trimmed pages are flattened to
//! opaque before padding, so the output never carries transparency.

use crate::error::ImagePipelineError;
use crate::pipeline::input::{decode_page, RawPage};
use crate::progress::PipelineStage;
use image::{imageops, Rgb, Rgba, RgbaImage};

/// Solid white, the default background.
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Tight rectangle around a page's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Knobs for [`normalize`].
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub border_px: u32,
    pub background: Rgb<u8>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            border_px: crate::config::DEFAULT_BORDER_PX,
            background: WHITE,
        }
    }
}

impl NormalizeOptions {
    fn fill(&self) -> Rgba<u8> {
        opaque(self.background)
    }
}

fn opaque(rgb: Rgb<u8>) -> Rgba<u8> {
    let [r, g, b] = rgb.0;
    Rgba([r, g, b, 255])
}

/// Bounding box of every pixel whose RGB differs from `background`.
///
/// `None` when the image is entirely background (or has zero area).
pub fn content_bounds(image: &RgbaImage, background: Rgb<u8>) -> Option<Bounds> {
    let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
    let (mut max_x, mut max_y) = (0u32, 0u32);
    let mut found = false;

    for (x, y, px) in image.enumerate_pixels() {
        if px.0[..3] != background.0 {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    found.then(|| Bounds {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    })
}

/// Crop `image` to its content bounds.
pub fn trim(image: &RgbaImage, background: Rgb<u8>) -> Result<RgbaImage, ImagePipelineError> {
    let b = content_bounds(image, background)
        .ok_or(ImagePipelineError::EmptyContent { page: None })?;
    Ok(imageops::crop_imm(image, b.x, b.y, b.width, b.height).to_image())
}

/// Discard the alpha channel, keeping each pixel's colour as is.
pub fn flatten(image: &RgbaImage) -> RgbaImage {
    let mut out = image.clone();
    for px in out.pixels_mut() {
        px.0[3] = 255;
    }
    out
}

/// Surround `image` with `border` pixels of `fill` on every side.
pub fn pad(image: &RgbaImage, border: u32, fill: Rgba<u8>) -> RgbaImage {
    if border == 0 {
        return image.clone();
    }
    let mut canvas = RgbaImage::from_pixel(
        image.width() + 2 * border,
        image.height() + 2 * border,
        fill,
    );
    imageops::replace(&mut canvas, image, i64::from(border), i64::from(border));
    canvas
}

/// Stack `images` vertically in order, each centered on the widest.
///
/// A single image is returned as is.
pub fn compose(
    mut images: Vec<RgbaImage>,
    background: Rgb<u8>,
) -> Result<RgbaImage, ImagePipelineError> {
    match images.len() {
        0 => return Err(ImagePipelineError::NoPages),
        1 => return Ok(images.remove(0)),
        _ => {}
    }

    let width = images.iter().map(|i| i.width()).max().unwrap_or(0);
    let height = images.iter().map(|i| i.height()).sum();
    let mut canvas = RgbaImage::from_pixel(width, height, opaque(background));

    let mut y_offset: i64 = 0;
    for img in &images {
        let x_offset = (width - img.width()) / 2;
        imageops::replace(&mut canvas, img, i64::from(x_offset), y_offset);
        y_offset += i64::from(img.height());
    }
    Ok(canvas)
}

/// Decode, trim, pad and compose `pages` into one image.
pub fn normalize(
    pages: &[RawPage],
    options: &NormalizeOptions,
) -> Result<RgbaImage, ImagePipelineError> {
    normalize_observed(pages, options, &mut |_| {})
}

/// [`normalize`], reporting each completed stage to `on_stage`.
pub fn normalize_observed(
    pages: &[RawPage],
    options: &NormalizeOptions,
    on_stage: &mut dyn FnMut(PipelineStage),
) -> Result<RgbaImage, ImagePipelineError> {
    if pages.is_empty() {
        return Err(ImagePipelineError::NoPages);
    }

    let decoded = pages
        .iter()
        .enumerate()
        .map(|(i, raw)| decode_page(i + 1, raw))
        .collect::<Result<Vec<_>, _>>()?;
    on_stage(PipelineStage::Validated);

    let trimmed = decoded
        .iter()
        .enumerate()
        .map(|(i, img)| {
            trim(img, options.background)
                .map_err(|_| ImagePipelineError::EmptyContent { page: Some(i + 1) })
        })
        .collect::<Result<Vec<_>, _>>()?;
    on_stage(PipelineStage::Trimmed);

    let padded = trimmed
        .iter()
        .map(|img| pad(&flatten(img), options.border_px, options.fill()))
        .collect();
    let composite = compose(padded, options.background)?;
    on_stage(PipelineStage::Composed);

    Ok(composite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::io::Cursor;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const WHITE_PX: Rgba<u8> = Rgba([255, 255, 255, 255]);

    /// White `w×h` canvas with a black `bw×bh` block at (`bx`, `by`).
    fn page(w: u32, h: u32, bx: u32, by: u32, bw: u32, bh: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            if x >= bx && x < bx + bw && y >= by && y < by + bh {
                BLACK
            } else {
                WHITE_PX
            }
        })
    }

    fn raw(img: &RgbaImage) -> RawPage {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        RawPage::new(buf)
    }

    #[test]
    fn trim_finds_tight_box() {
        let img = page(100, 80, 10, 20, 30, 5);
        assert_eq!(
            content_bounds(&img, WHITE),
            Some(Bounds {
                x: 10,
                y: 20,
                width: 30,
                height: 5
            })
        );
        let t = trim(&img, WHITE).unwrap();
        assert_eq!(t.dimensions(), (30, 5));
        assert!(t.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn trim_all_background_fails() {
        let blank = RgbaImage::from_pixel(40, 40, WHITE_PX);
        assert!(matches!(
            trim(&blank, WHITE),
            Err(ImagePipelineError::EmptyContent { page: None })
        ));
    }

    #[test]
    fn trim_ignores_alpha_when_comparing() {
        // White but fully transparent still counts as background.
        let img = RgbaImage::from_pixel(5, 5, Rgba([255, 255, 255, 0]));
        assert!(trim(&img, WHITE).is_err());
    }

    #[test]
    fn trim_respects_custom_background() {
        let grey = Rgb([200, 200, 200]);
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([200, 200, 200, 255]));
        img.put_pixel(4, 6, WHITE_PX);
        assert_eq!(trim(&img, grey).unwrap().dimensions(), (1, 1));
    }

    #[test]
    fn trim_is_idempotent() {
        let img = page(64, 48, 3, 7, 20, 11);
        let once = trim(&img, WHITE).unwrap();
        let twice = trim(&once, WHITE).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn pad_adds_border_everywhere() {
        let img = RgbaImage::from_pixel(3, 2, BLACK);
        let p = pad(&img, 16, WHITE_PX);
        assert_eq!(p.dimensions(), (35, 34));
        assert_eq!(*p.get_pixel(0, 0), WHITE_PX);
        assert_eq!(*p.get_pixel(16, 16), BLACK);
        assert_eq!(*p.get_pixel(18, 17), BLACK);
        assert_eq!(*p.get_pixel(19, 17), WHITE_PX);
        assert_eq!(*p.get_pixel(34, 33), WHITE_PX);
    }

    #[test]
    fn compose_single_is_identity() {
        let img = page(20, 10, 2, 2, 5, 5);
        assert_eq!(compose(vec![img.clone()], WHITE).unwrap(), img);
    }

    #[test]
    fn compose_stacks_and_centers() {
        let wide = RgbaImage::from_pixel(10, 4, BLACK);
        let narrow = RgbaImage::from_pixel(4, 3, Rgba([255, 0, 0, 255]));
        let c = compose(vec![wide, narrow], WHITE).unwrap();
        assert_eq!(c.dimensions(), (10, 7));
        // Narrow page starts at x = (10 - 4) / 2 = 3, y = 4.
        assert_eq!(*c.get_pixel(2, 4), WHITE_PX);
        assert_eq!(*c.get_pixel(3, 4), Rgba([255, 0, 0, 255]));
        assert_eq!(*c.get_pixel(6, 6), Rgba([255, 0, 0, 255]));
        assert_eq!(*c.get_pixel(7, 6), WHITE_PX);
        assert_eq!(*c.get_pixel(0, 0), BLACK);
    }

    #[test]
    fn compose_empty_fails() {
        assert!(matches!(
            compose(Vec::new(), WHITE),
            Err(ImagePipelineError::NoPages)
        ));
    }

    #[test]
    fn normalize_single_page_law() {
        let a = page(100, 100, 40, 30, 12, 9);
        let opts = NormalizeOptions::default();
        let out = normalize(&[raw(&a)], &opts).unwrap();
        let expected = pad(&trim(&a, WHITE).unwrap(), 16, WHITE_PX);
        assert_eq!(out, expected);
    }

    #[test]
    fn normalize_two_page_dimensions() {
        let a = page(200, 150, 10, 10, 50, 20);
        let b = page(120, 300, 60, 100, 30, 70);
        let opts = NormalizeOptions::default();
        let out = normalize(&[raw(&a), raw(&b)], &opts).unwrap();

        let pa = pad(&trim(&a, WHITE).unwrap(), 16, WHITE_PX);
        let pb = pad(&trim(&b, WHITE).unwrap(), 16, WHITE_PX);
        assert_eq!(out.height(), pa.height() + pb.height());
        assert_eq!(out.width(), pa.width().max(pb.width()));
        assert_eq!(out.dimensions(), (82, 52 + 102));
    }

    #[test]
    fn normalize_reports_blank_page_number() {
        let a = page(10, 10, 1, 1, 2, 2);
        let blank = RgbaImage::from_pixel(10, 10, WHITE_PX);
        let err = normalize(&[raw(&a), raw(&blank)], &NormalizeOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            ImagePipelineError::EmptyContent { page: Some(2) }
        ));
    }

    #[test]
    fn normalize_reports_stages_in_order() {
        let a = page(10, 10, 1, 1, 2, 2);
        let mut seen = Vec::new();
        normalize_observed(&[raw(&a)], &NormalizeOptions::default(), &mut |s| {
            seen.push(s)
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![
                PipelineStage::Validated,
                PipelineStage::Trimmed,
                PipelineStage::Composed
            ]
        );
    }

    #[test]
    fn normalize_stops_before_trim_on_bad_format() {
        let mut seen = Vec::new();
        let err = normalize_observed(
            &[RawPage::new(b"GIF89a....".to_vec())],
            &NormalizeOptions::default(),
            &mut |s| seen.push(s),
        )
        .unwrap_err();
        assert!(matches!(err, ImagePipelineError::UnsupportedFormat { .. }));
        assert!(seen.is_empty());
    }

    #[test]
    fn flatten_drops_alpha_keeps_colour() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([10, 20, 30, 0]));
        img.put_pixel(1, 0, Rgba([200, 100, 50, 128]));
        let f = flatten(&img);
        assert_eq!(*f.get_pixel(0, 0), Rgba([10, 20, 30, 255]));
        assert_eq!(*f.get_pixel(1, 0), Rgba([200, 100, 50, 255]));
    }

    #[test]
    fn normalize_output_is_opaque() {
        // Transparent content pixels survive trim and must come out opaque.
        let mut a = page(20, 20, 5, 5, 4, 4);
        a.put_pixel(6, 6, Rgba([0, 0, 0, 0]));
        let mut b = page(12, 12, 2, 2, 3, 3);
        b.put_pixel(3, 3, Rgba([255, 0, 0, 40]));

        for pages in [vec![raw(&a)], vec![raw(&a), raw(&b)]] {
            let out = normalize(&pages, &NormalizeOptions::default()).unwrap();
            assert!(out.pixels().all(|p| p.0[3] == 255));
        }

        let single = normalize(&[raw(&a)], &NormalizeOptions::default()).unwrap();
        // (6, 6) in the page is (1, 1) after trim, then shifted by the border.
        assert_eq!(*single.get_pixel(17, 17), Rgba([0, 0, 0, 255]));
    }
}
