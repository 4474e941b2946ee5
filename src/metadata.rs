//! Capture dates and dominant colors.
//!
//! The engine only talks to [`MetadataOracle`]; which decoder sits behind it
//! does not change how a batch is processed. [`ImageMetadataOracle`] reads
//! EXIF tags and decodes pixels, [`NullMetadataOracle`] knows nothing and
//! leaves every file on its filesystem dates.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Local, NaiveDate};
use exif::{In, Reader, Tag, Value};
use serde::Serialize;
use tracing::debug;

use crate::media::{is_image_file, is_video_file};

/// Hue in degrees [0, 360), saturation and lightness in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Hsl {
    pub hue: f64,
    pub saturation: f64,
    pub lightness: f64,
}

impl std::fmt::Display for Hsl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "H:{:.0}° S:{:.0}% L:{:.0}%",
            self.hue, self.saturation, self.lightness
        )
    }
}

pub trait MetadataOracle: Send + Sync {
    /// When the media was captured, if the file records it
    fn capture_date(&self, path: &Path) -> Option<DateTime<Local>>;

    /// The most prominent color, if it can be determined
    fn dominant_color(&self, path: &Path) -> Option<Hsl>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetadataOracle;

impl MetadataOracle for NullMetadataOracle {
    fn capture_date(&self, _path: &Path) -> Option<DateTime<Local>> {
        None
    }

    fn dominant_color(&self, _path: &Path) -> Option<Hsl> {
        None
    }
}

/// EXIF dates via `kamadak-exif`, colors via the `image` decoder
#[derive(Debug, Clone, Copy)]
pub struct ImageMetadataOracle {
    thumbnail_size: u32,
}

impl Default for ImageMetadataOracle {
    fn default() -> Self {
        Self { thumbnail_size: 64 }
    }
}

const DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];
const HUE_BUCKETS: usize = 36;

impl MetadataOracle for ImageMetadataOracle {
    fn capture_date(&self, path: &Path) -> Option<DateTime<Local>> {
        if !is_image_file(path) {
            return None;
        }

        let file = File::open(path).ok()?;
        let exif = match Reader::new().read_from_container(&mut BufReader::new(file)) {
            Ok(exif) => exif,
            Err(e) => {
                debug!("No EXIF in {}: {e}", path.display());
                return None;
            }
        };

        DATE_TAGS.iter().find_map(|tag| {
            let field = exif.get_field(*tag, In::PRIMARY)?;
            match &field.value {
                Value::Ascii(parts) => parts.first().and_then(|raw| parse_exif_date(raw)),
                _ => None,
            }
        })
    }

    fn dominant_color(&self, path: &Path) -> Option<Hsl> {
        if is_video_file(path) {
            debug!("Video color sorting not supported: {}", path.display());
            return None;
        }

        let image = match image::open(path) {
            Ok(image) => image,
            Err(e) => {
                debug!("Failed to decode {}: {e}", path.display());
                return None;
            }
        };
        let thumbnail = image
            .thumbnail(self.thumbnail_size, self.thumbnail_size)
            .to_rgb8();
        let pixels: Vec<[u8; 3]> = thumbnail.pixels().map(|pixel| pixel.0).collect();
        dominant_of(&pixels)
    }
}

fn parse_exif_date(raw: &[u8]) -> Option<DateTime<Local>> {
    let stamp = exif::DateTime::from_ascii(raw).ok()?;
    NaiveDate::from_ymd_opt(stamp.year.into(), stamp.month.into(), stamp.day.into())?
        .and_hms_opt(stamp.hour.into(), stamp.minute.into(), stamp.second.into())?
        .and_local_timezone(Local)
        .earliest()
}

/// Pick the most populated hue bucket among vivid pixels and average it.
/// Washed-out images fall back to the mean of all pixels.
fn dominant_of(pixels: &[[u8; 3]]) -> Option<Hsl> {
    if pixels.is_empty() {
        return None;
    }

    let mut buckets = vec![(0usize, [0u64; 3]); HUE_BUCKETS];
    for pixel in pixels {
        let hsl = rgb_to_hsl(pixel[0], pixel[1], pixel[2]);
        if hsl.saturation < 25.0 || !(15.0..=85.0).contains(&hsl.lightness) {
            continue;
        }
        let index = ((hsl.hue / 360.0) * HUE_BUCKETS as f64) as usize % HUE_BUCKETS;
        let (count, sums) = &mut buckets[index];
        *count += 1;
        for (sum, channel) in sums.iter_mut().zip(pixel) {
            *sum += u64::from(*channel);
        }
    }

    let (count, sums) = match buckets.into_iter().max_by_key(|(count, _)| *count) {
        Some((count, sums)) if count > 0 => (count, sums),
        _ => {
            let mut sums = [0u64; 3];
            for pixel in pixels {
                for (sum, channel) in sums.iter_mut().zip(pixel) {
                    *sum += u64::from(*channel);
                }
            }
            (pixels.len(), sums)
        }
    };

    let mean = |sum: u64| (sum / count as u64) as u8;
    Some(rgb_to_hsl(mean(sums[0]), mean(sums[1]), mean(sums[2])))
}

pub fn rgb_to_hsl(r: u8, g: u8, b: u8) -> Hsl {
    let r = f64::from(r) / 255.0;
    let g = f64::from(g) / 255.0;
    let b = f64::from(b) / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let lightness = (max + min) / 2.0;

    if max == min {
        return Hsl {
            hue: 0.0,
            saturation: 0.0,
            lightness: lightness * 100.0,
        };
    }

    let d = max - min;
    let saturation = if lightness > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };
    let sector = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    let hue = sector / 6.0;

    Hsl {
        hue: (hue * 360.0) % 360.0,
        saturation: saturation * 100.0,
        lightness: lightness * 100.0,
    }
}
