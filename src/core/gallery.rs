use std::io::Cursor;
use std::path::{Path, PathBuf};

#[cfg(feature = "heic")]
use image::error::DecodingError;
#[cfg(not(feature = "heic"))]
use image::error::{UnsupportedError, UnsupportedErrorKind};
use image::error::{ImageError, ImageFormatHint};
use image::{DynamicImage, ImageOutputFormat, RgbImage};

use crate::core::embeddings::{Embedder, EmbeddingInput};
use crate::error::{AppError, Result};
use crate::models::matches::{BuildReport, SkippedImage};
use crate::models::store::EmbeddingStore;
use crate::utils::{file_name_of, has_allowed_extension};

/// Image extensions recognized in a gallery
///
/// HEIC images are decoded through libheif when the `heic` feature is
/// enabled; without it they are reported as skipped.
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "heic", "webp"];

/// List the gallery images in `dir`, sorted by file name
///
/// Only regular files whose extension is in `extensions` are returned.
pub fn scan_gallery<S: AsRef<str>>(dir: &Path, extensions: &[S]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(AppError::NotFound(format!(
            "gallery directory {}",
            dir.display()
        )));
    }

    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                log::warn!("Cannot read entry in {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|p| p.is_file() && has_allowed_extension(p, extensions))
        .collect();
    images.sort_by_key(|p| file_name_of(p));

    Ok(images)
}

/// Decode an image and re-encode it as RGB PNG bytes
///
/// Gallery and query images both pass through here so the model always sees
/// the same encoding for the same pixels.
pub fn normalize_image(bytes: &[u8]) -> Result<Vec<u8>> {
    let rgb = if is_heif(bytes) {
        DynamicImage::ImageRgb8(decode_heif(bytes)?)
    } else {
        DynamicImage::ImageRgb8(image::load_from_memory(bytes)?.to_rgb8())
    };

    let mut png = Cursor::new(Vec::new());
    rgb.write_to(&mut png, ImageOutputFormat::Png)?;
    Ok(png.into_inner())
}

/// HEIF brands written by cameras and phones for HEIC stills
const HEIF_BRANDS: [&[u8; 4]; 6] = [b"heic", b"heix", b"heim", b"heis", b"mif1", b"msf1"];

/// Returns `true` if `bytes` start with an ISO-BMFF `ftyp` box of a HEIF brand
fn is_heif(bytes: &[u8]) -> bool {
    match (bytes.get(4..8), bytes.get(8..12)) {
        (Some(b"ftyp"), Some(brand)) => HEIF_BRANDS.iter().any(|b| &b[..] == brand),
        _ => false,
    }
}

#[cfg(feature = "heic")]
fn decode_heif(bytes: &[u8]) -> Result<RgbImage> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let lib = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(bytes).map_err(heif_error)?;
    let handle = ctx.primary_image_handle().map_err(heif_error)?;
    let decoded = lib
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(heif_error)?;

    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| AppError::Validation("HEIC image has no interleaved RGB plane".to_string()))?;

    // Rows are padded to `stride` bytes
    let row_len = plane.width as usize * 3;
    if plane.stride < row_len || row_len == 0 {
        return Err(AppError::Validation(format!(
            "HEIC plane stride {} cannot hold {} pixels per row",
            plane.stride, plane.width
        )));
    }
    let mut pixels = Vec::with_capacity(row_len * plane.height as usize);
    for row in plane.data.chunks(plane.stride).take(plane.height as usize) {
        let row = row
            .get(..row_len)
            .ok_or_else(|| AppError::Validation("HEIC plane data is truncated".to_string()))?;
        pixels.extend_from_slice(row);
    }

    RgbImage::from_raw(plane.width, plane.height, pixels)
        .ok_or_else(|| AppError::Validation("HEIC plane size does not match its dimensions".to_string()))
}

#[cfg(feature = "heic")]
fn heif_error(err: libheif_rs::HeifError) -> AppError {
    AppError::Image(ImageError::Decoding(DecodingError::new(
        ImageFormatHint::Name("HEIC".to_string()),
        err,
    )))
}

/// Decode a HEIC image (placeholder)
#[cfg(not(feature = "heic"))]
fn decode_heif(_bytes: &[u8]) -> Result<RgbImage> {
    Err(AppError::Image(ImageError::Unsupported(
        UnsupportedError::from_format_and_kind(
            ImageFormatHint::Name("HEIC".to_string()),
            UnsupportedErrorKind::Format(ImageFormatHint::Name("HEIC".to_string())),
        ),
    )))
}

/// Normalize encoded image bytes and embed them
pub fn embed_image_bytes<E: Embedder + ?Sized>(embedder: &E, bytes: &[u8]) -> Result<Vec<f32>> {
    let png = normalize_image(bytes)?;
    embedder.embed(EmbeddingInput::Image(&png))
}

/// Read, normalize and embed an image file
pub fn embed_image_file<E: Embedder + ?Sized>(embedder: &E, path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    embed_image_bytes(embedder, &bytes)
}

/// Builds the embedding store from a gallery directory
#[derive(Debug, Clone)]
pub struct StoreBuilder {
    gallery_dir: PathBuf,
    store_path: PathBuf,
    extensions: Vec<String>,
}

impl StoreBuilder {
    /// Creates a builder reading `gallery_dir` and writing `store_path`.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(gallery_dir: P, store_path: Q) -> Self {
        Self {
            gallery_dir: gallery_dir.as_ref().to_path_buf(),
            store_path: store_path.as_ref().to_path_buf(),
            extensions: SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Replaces the recognized image extensions.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Gallery images that a build would embed.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        scan_gallery(&self.gallery_dir, &self.extensions)
    }

    /// Embed every gallery image and replace the store with the result
    ///
    /// An image that cannot be read, decoded or embedded is logged and
    /// listed in the report; the rest of the batch still goes in.
    ///
    /// # Errors
    ///
    /// Fails if the gallery cannot be listed or the store cannot be written.
    pub fn build<E: Embedder + ?Sized>(&self, embedder: &E) -> Result<BuildReport> {
        let images = self.scan()?;
        log::info!(
            "Embedding {} images from {}",
            images.len(),
            self.gallery_dir.display()
        );

        let mut store = EmbeddingStore::new();
        let mut skipped = Vec::new();

        for path in &images {
            let name = file_name_of(path);
            let outcome = embed_image_file(embedder, path)
                .and_then(|embedding| store.insert(name.clone(), embedding));

            match outcome {
                Ok(()) => log::debug!("Embedded {}", name),
                Err(e) => {
                    log::warn!("Cannot load image {}: {}", name, e);
                    skipped.push(SkippedImage {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        store.save(&self.store_path)?;
        log::info!(
            "Embeddings saved to {} ({} stored, {} skipped)",
            self.store_path.display(),
            store.len(),
            skipped.len()
        );

        Ok(BuildReport {
            store_path: self.store_path.clone(),
            embedded: store.len(),
            skipped,
        })
    }
}

/// Build the store at `store_path` from every supported image in `gallery_dir`
pub fn build_store<E, P, Q>(embedder: &E, gallery_dir: P, store_path: Q) -> Result<BuildReport>
where
    E: Embedder + ?Sized,
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    StoreBuilder::new(gallery_dir, store_path).build(embedder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use image::{GenericImageView, Rgba, RgbaImage};

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.JPG", "a.png", "c.webp", "d.heic", "notes.txt", "e.gif"] {
            dir.child(name).write_binary(b"x").unwrap();
        }
        dir.child("sub.png").create_dir_all().unwrap();

        let names: Vec<_> = scan_gallery(dir.path(), &SUPPORTED_EXTENSIONS)
            .unwrap()
            .iter()
            .map(|p| file_name_of(p))
            .collect();

        assert_eq!(names, vec!["a.png", "b.JPG", "c.webp", "d.heic"]);

        let narrow = scan_gallery(dir.path(), &["png", "jpg", "jpeg"]).unwrap();
        assert_eq!(narrow.len(), 2);
    }

    #[test]
    fn test_scan_missing_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.child("nope");
        assert!(matches!(
            scan_gallery(missing.path(), &SUPPORTED_EXTENSIONS),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_normalize_is_deterministic_rgb_png() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 128])));
        let mut jpeg = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(rgba.to_rgb8())
            .write_to(&mut jpeg, ImageOutputFormat::Jpeg(90))
            .unwrap();
        let jpeg = jpeg.into_inner();

        let first = normalize_image(&jpeg).unwrap();
        let second = normalize_image(&jpeg).unwrap();
        assert_eq!(first, second);

        let decoded = image::load_from_memory(&first).unwrap();
        assert_eq!(image::guess_format(&first).unwrap(), image::ImageFormat::Png);
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
        assert_eq!((decoded.width(), decoded.height()), (3, 2));

        // Already-normal input stays byte-identical after a second pass
        assert_eq!(normalize_image(&first).unwrap(), first);
    }

    #[test]
    fn test_detects_heif_brands() {
        assert!(is_heif(b"\0\0\0\x18ftypheic\0\0\0\0"));
        assert!(is_heif(b"\0\0\0\x18ftypmif1"));
        assert!(!is_heif(b"\0\0\0\x18ftypisom"));
        assert!(!is_heif(b"\x89PNG\r\n\x1a\n"));
        assert!(!is_heif(b"ftyp"));
    }

    #[cfg(not(feature = "heic"))]
    #[test]
    fn test_heic_without_feature_is_unsupported() {
        let err = normalize_image(b"\0\0\0\x18ftypheic\0\0\0\0").unwrap_err();
        assert!(matches!(err, AppError::Image(ImageError::Unsupported(_))));
    }

    #[cfg(feature = "heic")]
    #[test]
    fn test_normalize_decodes_heic() {
        use libheif_rs::{
            Channel, ColorSpace, CompressionFormat, EncoderQuality, HeifContext, Image, LibHeif,
            RgbChroma,
        };

        let (width, height) = (16u32, 8u32);
        let mut source = Image::new(width, height, ColorSpace::Rgb(RgbChroma::Rgb)).unwrap();
        source
            .create_plane(Channel::Interleaved, width, height, 8)
            .unwrap();
        {
            let planes = source.planes_mut();
            let mut plane = planes.interleaved.unwrap();
            for y in 0..height as usize {
                for x in 0..width as usize {
                    let at = y * plane.stride + x * 3;
                    plane.data[at..at + 3].copy_from_slice(&[200, 40, 40]);
                }
            }
        }

        let lib = LibHeif::new();
        let mut ctx = HeifContext::new().unwrap();
        let mut encoder = lib.encoder_for_format(CompressionFormat::Hevc).unwrap();
        encoder.set_quality(EncoderQuality::LossLess).unwrap();
        ctx.encode_image(&source, &mut encoder, None).unwrap();
        let heic = ctx.write_to_bytes().unwrap();
        assert!(is_heif(&heic));

        let png = normalize_image(&heic).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), image::ImageFormat::Png);
        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (width, height));
        let red = decoded.get_pixel(4, 4)[0];
        assert!(red > 150, "expected a red pixel, got {:?}", decoded.get_pixel(4, 4));
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_image(b"definitely not an image"),
            Err(AppError::Image(_))
        ));
    }
}
