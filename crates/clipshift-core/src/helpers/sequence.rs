// crates/clipshift-core/src/helpers/sequence.rs
//
// Image-sequence naming: split a trailing frame number off a filename, order
// names the way a person would (frame2 before frame10), and render a short
// label for a whole sequence.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Image extensions accepted as sequence frames (lowercase, no dot).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tga", "tif", "tiff", "webp"];

/// Container extensions treated as single video sources during a folder scan.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "webm", "gif"];

/// A filename split around its trailing frame number.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequenceParts {
    /// Everything before the separator, e.g. `shot` in `shot_0042.png`.
    pub prefix:    String,
    /// The digits as written, leading zeros kept. `None` when the stem does
    /// not end in a digit.
    pub number:    Option<String>,
    /// Extension including the dot, e.g. `.png`. Empty when absent.
    pub ext:       String,
    /// One of `.`, `_`, `-`, or empty.
    pub separator: String,
}

impl SequenceParts {
    pub fn frame_number(&self) -> Option<u64> {
        self.number.as_deref().and_then(|n| n.parse().ok())
    }

    /// Key that groups frames of the same sequence within one directory.
    pub fn group_key(&self) -> (String, String, String) {
        (self.prefix.clone(), self.ext.to_lowercase(), self.separator.clone())
    }
}

/// Split `filename` (no directory) into prefix, frame number, extension and
/// separator.
///
/// ```
/// use clipshift_core::helpers::sequence::sequence_parts;
/// let p = sequence_parts("shot_0042.png");
/// assert_eq!(p.prefix, "shot");
/// assert_eq!(p.number.as_deref(), Some("0042"));
/// assert_eq!(p.ext, ".png");
/// assert_eq!(p.separator, "_");
///
/// let q = sequence_parts("poster.jpg");
/// assert_eq!(q.prefix, "poster");
/// assert!(q.number.is_none());
/// ```
pub fn sequence_parts(filename: &str) -> SequenceParts {
    let (stem, ext) = split_ext(filename);
    let digits_at = stem
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);

    let Some(at) = digits_at else {
        return SequenceParts {
            prefix:    stem.to_string(),
            number:    None,
            ext:       ext.to_string(),
            separator: String::new(),
        };
    };

    let head = &stem[..at];
    let (prefix, separator) = match head.chars().last() {
        Some(c @ ('.' | '_' | '-')) => (&head[..head.len() - 1], c.to_string()),
        _                            => (head, String::new()),
    };
    SequenceParts {
        prefix:    prefix.to_string(),
        number:    Some(stem[at..].to_string()),
        ext:       ext.to_string(),
        separator,
    }
}

/// Split at the last dot, keeping the dot with the extension. A leading dot
/// (hidden file) is part of the stem.
fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _                => (name, ""),
    }
}

// ── Natural ordering ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    Num(u128),
    Text(String),
}

fn natural_key(s: &str) -> Vec<Chunk> {
    let mut out  = Vec::new();
    let mut text = String::new();
    let mut num  = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            if !text.is_empty() {
                out.push(Chunk::Text(std::mem::take(&mut text)));
            }
            num.push(c);
        } else {
            if !num.is_empty() {
                out.push(Chunk::Num(num.parse().unwrap_or(u128::MAX)));
                num.clear();
            }
            text.extend(c.to_lowercase());
        }
    }
    if !text.is_empty() {
        out.push(Chunk::Text(text));
    }
    if !num.is_empty() {
        out.push(Chunk::Num(num.parse().unwrap_or(u128::MAX)));
    }
    out
}

/// Case-insensitive comparison that orders digit runs numerically.
///
/// ```
/// use std::cmp::Ordering;
/// use clipshift_core::helpers::sequence::natural_cmp;
/// assert_eq!(natural_cmp("frame2.png", "frame10.png"), Ordering::Less);
/// assert_eq!(natural_cmp("B1", "a2"), Ordering::Greater);
/// ```
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b))
}

/// Sort paths by file name in natural order.
pub fn sort_natural(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
}

fn file_name(p: &Path) -> String {
    p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

// ── Labels ────────────────────────────────────────────────────────────────────

/// Short label for a sequence: `prefix.ext (first-last)` using the lowest and
/// highest frame numbers, or `<dir> (Sequence)` when no file is numbered.
///
/// ```
/// use std::path::PathBuf;
/// use clipshift_core::helpers::sequence::sequence_display_name;
/// let paths: Vec<PathBuf> = ["/r/a_010.png", "/r/a_002.png", "/r/a_100.png"]
///     .iter().map(PathBuf::from).collect();
/// assert_eq!(sequence_display_name(&paths), "a.png (002-100)");
/// ```
pub fn sequence_display_name(paths: &[PathBuf]) -> String {
    let Some(first) = paths.first() else {
        return "Sequence".to_string();
    };

    let mut numbered: Vec<(u64, SequenceParts)> = paths
        .iter()
        .map(|p| sequence_parts(&file_name(p)))
        .filter_map(|parts| parts.frame_number().map(|n| (n, parts)))
        .collect();

    if numbered.is_empty() {
        let dir = first
            .parent()
            .and_then(|d| d.file_name())
            .map(|d| d.to_string_lossy().into_owned())
            .unwrap_or_default();
        return format!("{dir} (Sequence)");
    }

    numbered.sort_by_key(|(n, _)| *n);
    let (_, lo) = &numbered[0];
    let (_, hi) = &numbered[numbered.len() - 1];
    format!(
        "{}{} ({}-{})",
        lo.prefix,
        lo.ext,
        lo.number.as_deref().unwrap_or_default(),
        hi.number.as_deref().unwrap_or_default(),
    )
}

/// Base name for output files of a sequence: the shared prefix, or
/// `sequence` when the frames have none.
pub fn sequence_base_name(paths: &[PathBuf]) -> String {
    paths
        .first()
        .map(|p| sequence_parts(&file_name(p)).prefix)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "sequence".to_string())
}

pub fn is_image_path(p: &Path) -> bool {
    has_extension(p, IMAGE_EXTENSIONS)
}

pub fn is_video_path(p: &Path) -> bool {
    has_extension(p, VIDEO_EXTENSIONS)
}

fn has_extension(p: &Path, set: &[&str]) -> bool {
    p.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| set.contains(&e.as_str()))
}
