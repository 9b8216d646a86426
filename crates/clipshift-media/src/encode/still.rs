// crates/clipshift-media/src/encode/still.rs
//
// Single images: numbered Sequence frames and the one-frame Thumbnail.
//
// Save convention per still format:
//   JPG   alpha composited over white, quality 95
//   PNG   RGBA when alpha is kept, else RGB
//   WEBP  lossless, same alpha rule as PNG
//   GIF   same alpha rule as PNG
//
// Sequence output is a directory; frame `i` is `<dir name>.<iiii>.<ext>`,
// numbered from 0.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, RgbaImage};

use clipshift_core::StillFormat;

use crate::error::PipelineResult;
use crate::exec::ExecContext;
use crate::source::FrameSource;

use super::for_each_frame;

const JPEG_QUALITY: u8 = 95;

/// `image` composited over solid white.
pub fn flatten_on_white(image: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (dst, src) in out.pixels_mut().zip(image.pixels()) {
        let a = src[3] as u32;
        let mix = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        *dst = Rgb([mix(src[0]), mix(src[1]), mix(src[2])]);
    }
    out
}

/// Write one frame to `path` in `format`. `alpha` false drops the alpha
/// channel (JPG always composites instead).
pub fn save_still(image: RgbaImage, path: &Path, format: StillFormat, alpha: bool) -> PipelineResult<()> {
    match format {
        StillFormat::Jpg => {
            let mut writer = BufWriter::new(File::create(path)?);
            let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            flatten_on_white(&image).write_with_encoder(encoder)?;
        }
        StillFormat::Png | StillFormat::Webp | StillFormat::Gif => {
            let image_format = match format {
                StillFormat::Png  => ImageFormat::Png,
                StillFormat::Webp => ImageFormat::WebP,
                _                 => ImageFormat::Gif,
            };
            let dynamic = if alpha {
                DynamicImage::ImageRgba8(image)
            } else {
                DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8())
            };
            dynamic.save_with_format(path, image_format)?;
        }
    }
    Ok(())
}

/// Every output frame as a numbered still under the new directory `dir`.
/// Returns the written paths in order.
pub fn write_sequence(
    source: &dyn FrameSource,
    fps:    u32,
    format: StillFormat,
    alpha:  bool,
    dir:    &Path,
    ctx:    &ExecContext,
) -> PipelineResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let stem = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    let ext = format.extension();

    let mut written = Vec::new();
    for_each_frame(source, fps, ctx, |i, frame| {
        let path = dir.join(format!("{stem}.{i:04}{ext}"));
        save_still(frame, &path, format, alpha)?;
        written.push(path);
        Ok(())
    })?;
    log::debug!("[encode] sequence: {} frames → {}", written.len(), dir.display());
    Ok(written)
}

/// The first frame of `source` (the job's capture time, after trimming) as
/// a single still.
pub fn write_thumbnail(
    source: &dyn FrameSource,
    format: StillFormat,
    alpha:  bool,
    output: &Path,
    ctx:    &ExecContext,
) -> PipelineResult<()> {
    ctx.checkpoint()?;
    let frame = source.frame_at(0.0)?;
    save_still(frame, output, format, alpha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    struct Solid;

    impl FrameSource for Solid {
        fn duration(&self) -> f64 { 0.5 }
        fn size(&self) -> (u32, u32) { (6, 4) }
        fn has_alpha(&self) -> bool { true }
        fn frame_at(&self, _t: f64) -> PipelineResult<RgbaImage> {
            Ok(RgbaImage::from_pixel(6, 4, Rgba([0, 0, 0, 0])))
        }
    }

    #[test]
    fn transparent_black_becomes_white_in_jpg() {
        let flat = flatten_on_white(&RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0])));
        assert_eq!(*flat.get_pixel(0, 0), Rgb([255, 255, 255]));
        let half = flatten_on_white(&RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128])));
        assert_eq!(half.get_pixel(0, 0)[0], 127);
    }

    #[test]
    fn sequence_frames_are_numbered_from_zero_after_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("walk");
        let (ctx, _) = ExecContext::detached();
        let written = write_sequence(&Solid, 10, StillFormat::Png, true, &dir, &ctx).unwrap();

        assert_eq!(written.len(), 5);
        assert!(written[0].ends_with("walk/walk.0000.png"));
        assert!(written[4].ends_with("walk/walk.0004.png"));
        let back = image::open(&written[2]).unwrap();
        assert!(back.color().has_alpha());
    }

    #[test]
    fn png_without_alpha_is_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("t.png");
        let (ctx, _) = ExecContext::detached();
        write_thumbnail(&Solid, StillFormat::Png, false, &p, &ctx).unwrap();
        assert!(!image::open(&p).unwrap().color().has_alpha());

        let j = dir.path().join("t.jpg");
        write_thumbnail(&Solid, StillFormat::Jpg, true, &j, &ctx).unwrap();
        let px = image::open(&j).unwrap().to_rgb8();
        assert!(px.get_pixel(2, 2)[0] > 240);
    }
}
