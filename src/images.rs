//! Optimizes staged images for distribution. PNGs are recompressed
//! losslessly with [`oxipng`] at its highest preset and written interlaced
//! (Adam7). SVGs, JPEGs and GIFs pass through unchanged. An optimized image is
//! never larger than its input. Results are kept in a content-addressed
//! [`Cache`] so unchanged images aren't re-encoded on the next build.

use crate::util::{self, slash_path};
use oxipng::{Interlacing, Options};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The extensions eligible for the distribution tree. Anything else under the
/// images directory is left behind.
pub const EXTENSIONS: [&str; 4] = ["png", "jpg", "gif", "svg"];

// Bumped whenever the optimization output changes so stale cache entries are
// ignored.
const CACHE_VERSION: &str = "2";

/// A directory of optimized image bytes keyed by the SHA-256 of the input.
pub struct Cache {
    directory: PathBuf,
}

impl Cache {
    pub fn new(directory: impl Into<PathBuf>) -> Cache {
        Cache {
            directory: directory.into(),
        }
    }

    pub fn key(extension: &str, input: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(CACHE_VERSION.as_bytes());
        hasher.update(extension.as_bytes());
        hasher.update(input);
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        std::fs::read(self.directory.join(key)).ok()
    }

    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.directory.join(key);
        util::write(&path, bytes).map_err(|err| Error::Io { path, err })
    }
}

/// The outcome of [`optimize_tree`]. `written` lists output paths relative to
/// the output directory; `cached` counts how many came from the cache.
#[derive(Debug, Default)]
pub struct Report {
    pub written: Vec<String>,
    pub cached: usize,
}

/// Optimizes every eligible image under `source_directory` into
/// `output_directory`, preserving relative paths.
pub fn optimize_tree(source_directory: &Path, output_directory: &Path, cache: &Cache) -> Result<Report> {
    let mut report = Report::default();
    for file in util::files(source_directory)? {
        let extension = match eligible_extension(&file.relative) {
            Some(extension) => extension,
            None => continue,
        };
        let input = std::fs::read(&file.absolute).map_err(|err| Error::Io {
            path: file.absolute.clone(),
            err,
        })?;

        let key = Cache::key(&extension, &input);
        let output = match cache.get(&key) {
            Some(bytes) => {
                report.cached += 1;
                bytes
            }
            None => {
                let bytes = optimize(&extension, &input).map_err(|message| Error::Decode {
                    path: file.absolute.clone(),
                    message,
                })?;
                cache.put(&key, &bytes)?;
                bytes
            }
        };

        let target = output_directory.join(&file.relative);
        util::write(&target, &output).map_err(|err| Error::Io { path: target, err })?;
        debug!(image = %file.relative.display(), before = input.len(), after = output.len(), "optimized");
        report.written.push(slash_path(&file.relative));
    }
    Ok(report)
}

fn eligible_extension(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    if EXTENSIONS.contains(&extension.as_str()) {
        Some(extension)
    } else {
        None
    }
}

/// Optimizes `input` according to `extension`, keeping the original bytes
/// whenever optimization wouldn't shrink them.
pub fn optimize(extension: &str, input: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let optimized = match extension {
        "png" => recompress_png(input)?,
        _ => return Ok(input.to_vec()),
    };
    if optimized.len() < input.len() {
        Ok(optimized)
    } else {
        Ok(input.to_vec())
    }
}

fn recompress_png(input: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let mut options = Options::from_preset(6);
    options.interlace = Some(Interlacing::Adam7);
    oxipng::optimize_from_memory(input, &options).map_err(|e| e.to_string())
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for image optimization.
#[derive(Debug)]
pub enum Error {
    /// Returned when walking the image directory fails.
    Walk(walkdir::Error),

    /// Returned when an image can't be decoded or re-encoded.
    Decode { path: PathBuf, message: String },

    /// Returned for I/O problems reading images or writing output and cache
    /// entries.
    Io { path: PathBuf, err: io::Error },
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Walk(err) => err.fmt(f),
            Error::Decode { path, message } => {
                write!(f, "Optimizing image '{}': {}", path.display(), message)
            }
            Error::Io { path, err } => write!(f, "'{}': {}", path.display(), err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Walk(err) => Some(err),
            Error::Decode { .. } => None,
            Error::Io { path: _, err } => Some(err),
        }
    }
}

impl From<walkdir::Error> for Error {
    /// Converts [`walkdir::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator.
    fn from(err: walkdir::Error) -> Error {
        Error::Walk(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::write;
    use image::codecs::png::{CompressionType, FilterType, PngEncoder};
    use image::{ColorType, ImageEncoder};
    use tempfile::TempDir;

    // A four-colour pattern stored as 8-bit RGBA with the fastest
    // compression, which leaves plenty for a palette reduction to win.
    fn png_fixture() -> Vec<u8> {
        let colors = [[200, 30, 30, 255], [30, 200, 30, 255], [30, 30, 200, 255], [0, 0, 0, 255]];
        let mut seed: u32 = 7;
        let mut pixels = Vec::with_capacity(64 * 64 * 4);
        for _ in 0..64 * 64 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            pixels.extend_from_slice(&colors[(seed >> 16) as usize % colors.len()]);
        }
        let mut bytes = Vec::new();
        PngEncoder::new_with_quality(&mut bytes, CompressionType::Fast, FilterType::NoFilter)
            .write_image(&pixels, 64, 64, ColorType::Rgba8)
            .unwrap();
        bytes
    }

    // The interlace method is the last byte of the IHDR chunk, which always
    // comes first after the signature.
    fn is_interlaced(png: &[u8]) -> bool {
        &png[12..16] == b"IHDR" && png[28] == 1
    }

    #[test]
    fn test_png_is_lossless_and_not_larger() {
        let input = png_fixture();
        let output = optimize("png", &input).unwrap();
        assert!(output.len() < input.len());
        let (a, b) = (
            image::load_from_memory(&input).unwrap().to_rgba8(),
            image::load_from_memory(&output).unwrap().to_rgba8(),
        );
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_png_is_interlaced() {
        let input = png_fixture();
        assert!(!is_interlaced(&input));
        assert!(is_interlaced(&optimize("png", &input).unwrap()));
    }

    #[test]
    fn test_svg_text_is_untouched() {
        let input = b"<svg>\n  <text><tspan>Hello</tspan> <tspan>World</tspan></text>\n</svg>\n";
        assert_eq!(input.to_vec(), optimize("svg", input).unwrap());
    }

    #[test]
    fn test_svg_cdata_is_untouched() {
        let input = b"<svg><script><![CDATA[ var s = '<!-- x -->'; ]]></script><!-- note --></svg>";
        assert_eq!(input.to_vec(), optimize("svg", input).unwrap());
    }

    #[test]
    fn test_jpg_passthrough() {
        assert_eq!(b"not really a jpeg".to_vec(), optimize("jpg", b"not really a jpeg").unwrap());
    }

    #[test]
    fn test_corrupt_png() {
        assert!(optimize("png", b"garbage").is_err());
    }

    #[test]
    fn test_optimize_tree_uses_cache() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let (src, out) = (dir.path().join("public/images"), dir.path().join("dist/images"));
        let cache = Cache::new(dir.path().join("cache"));
        write(&src.join("logo.png"), png_fixture()).unwrap();
        write(&src.join("icons/menu.svg"), "<svg> <g/> </svg>").unwrap();
        write(&src.join("photo.webp"), "skipped").unwrap();

        let first = optimize_tree(&src, &out, &cache)?;
        assert_eq!(vec!["icons/menu.svg".to_owned(), "logo.png".to_owned()], first.written);
        assert_eq!(0, first.cached);
        assert!(!out.join("photo.webp").exists());

        let second = optimize_tree(&src, &out, &cache)?;
        assert_eq!(2, second.cached);
        assert_eq!(
            "<svg> <g/> </svg>",
            std::fs::read_to_string(out.join("icons/menu.svg")).unwrap()
        );
        assert!(is_interlaced(&std::fs::read(out.join("logo.png")).unwrap()));
        Ok(())
    }
}
