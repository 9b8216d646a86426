// crates/clipshift-media/src/scan.rs
//
// Folder scan: turn a directory tree into candidate jobs.
//
//   numbered images  grouped per (directory, prefix, extension, separator);
//                    groups of two or more become one sequence job each
//   video files      one file job each
//
// Everything else, including lone numbered images, is ignored. Jobs come back
// unanalyzed, in discovery order with sequences first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use clipshift_core::grade::GradeSettings;
use clipshift_core::helpers::sequence::{is_image_path, is_video_path, sequence_parts, sort_natural};
use clipshift_core::job::{ConversionJob, ExportFormat, JobSource};
use clipshift_core::PipelineConfig;

/// Settings given to every job a scan creates.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanOptions {
    /// Every job becomes a Thumbnail job using `width` and `grade`.
    pub thumbnail_mode: bool,
    pub width:          u32,
    pub fps:            u32,
    /// Only applied in thumbnail mode.
    pub grade:          GradeSettings,
}

impl ScanOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            thumbnail_mode: false,
            width:          config.default_width,
            fps:            config.default_fps,
            grade:          GradeSettings::default(),
        }
    }
}

type GroupKey = (PathBuf, String, String, String);

fn file_name(p: &Path) -> String {
    p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn group_key(path: &Path) -> Option<GroupKey> {
    let parts = sequence_parts(&file_name(path));
    if parts.number.is_none() {
        return None;
    }
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let (prefix, ext, sep) = parts.group_key();
    Some((dir, prefix, ext, sep))
}

/// Walk `root` and build one job per sequence and per video file.
pub fn discover(root: &Path, options: &ScanOptions) -> Vec<ConversionJob> {
    let mut order:  Vec<GroupKey> = Vec::new();
    let mut groups: HashMap<GroupKey, Vec<PathBuf>> = HashMap::new();
    let mut videos: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(e)  => e,
            Err(e) => {
                log::warn!("[scan] skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if is_image_path(&path) {
            if let Some(key) = group_key(&path) {
                if !groups.contains_key(&key) {
                    order.push(key.clone());
                }
                groups.entry(key).or_default().push(path);
            }
        } else if is_video_path(&path) {
            videos.push(path);
        }
    }

    let mut jobs = Vec::new();
    for key in order {
        let Some(mut paths) = groups.remove(&key) else { continue };
        if paths.len() < 2 {
            continue;
        }
        sort_natural(&mut paths);
        let source = JobSource::Sequence { paths, fps: options.fps.max(1) as f64 };
        jobs.push(new_job(source, ExportFormat::WebM, options));
    }
    let sequences = jobs.len();
    for path in videos {
        jobs.push(new_job(JobSource::File { path }, ExportFormat::Gif, options));
    }

    log::info!(
        "[scan] {} → {sequences} sequences, {} files",
        root.display(),
        jobs.len() - sequences
    );
    jobs
}

fn new_job(source: JobSource, format: ExportFormat, options: &ScanOptions) -> ConversionJob {
    let format = if options.thumbnail_mode { ExportFormat::Thumbnail } else { format };
    let mut job = ConversionJob::new(source, format);
    job.width = options.width;
    job.fps   = options.fps;
    if options.thumbnail_mode {
        job.grade = options.grade.clamped();
    }
    job
}

/// Every numbered sibling of `path` that belongs to the same sequence, in
/// natural order. A file with no siblings (or no frame number) comes back
/// alone.
pub fn expand_sequence(path: &Path) -> Vec<PathBuf> {
    let alone = || vec![path.to_path_buf()];
    let Some(key) = group_key(path) else { return alone() };
    let Ok(entries) = std::fs::read_dir(&key.0) else { return alone() };

    let mut siblings: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_image_path(p))
        .filter(|p| group_key(p).as_ref() == Some(&key))
        .collect();
    if siblings.len() < 2 {
        return alone();
    }
    sort_natural(&mut siblings);
    siblings
}

/// Source for a user-picked file: a numbered image expands to its whole
/// sequence at `fps`, anything else is a single file.
pub fn source_for_path(path: &Path, fps: u32) -> JobSource {
    if is_image_path(path) {
        let paths = expand_sequence(path);
        if paths.len() > 1 {
            return JobSource::Sequence { paths, fps: fps.max(1) as f64 };
        }
    }
    JobSource::File { path: path.to_path_buf() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn numbered_images_group_and_videos_stand_alone() {
        let root = tempfile::tempdir().unwrap();
        let r = root.path();
        for name in ["walk_10.png", "walk_2.png", "walk_1.png", "run.0001.jpg", "run.0002.jpg"] {
            touch(&r.join("shots").join(name));
        }
        touch(&r.join("shots/lonely_5.png"));
        touch(&r.join("notes.txt"));
        touch(&r.join("clip.mov"));
        touch(&r.join("deep/anim.gif"));

        let jobs = discover(r, &ScanOptions::from_config(&PipelineConfig::default()));
        assert_eq!(jobs.len(), 4);

        let JobSource::Sequence { paths, fps } = &jobs[1].source else { panic!("expected sequence") };
        let names: Vec<String> = paths.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, ["walk_1.png", "walk_2.png", "walk_10.png"]);
        assert_eq!(*fps, 24.0);
        assert_eq!(jobs[0].format, ExportFormat::WebM);
        assert!(matches!(jobs[0].source, JobSource::Sequence { .. }));

        assert_eq!(jobs[2].format, ExportFormat::Gif);
        assert!(jobs[2..].iter().all(|j| !j.source.is_sequence()));
    }

    #[test]
    fn thumbnail_mode_applies_width_and_grade() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("a.mp4"));
        let grade = GradeSettings { enabled: true, exposure: 20.0, ..Default::default() };
        let opts = ScanOptions { thumbnail_mode: true, width: 320, fps: 12, grade };

        let jobs = discover(root.path(), &opts);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].format, ExportFormat::Thumbnail);
        assert_eq!(jobs[0].width, 320);
        assert_eq!(jobs[0].grade, grade);
    }

    #[test]
    fn grade_is_ignored_outside_thumbnail_mode() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("a.mp4"));
        let mut opts = ScanOptions::from_config(&PipelineConfig::default());
        opts.grade.enabled = true;
        opts.grade.contrast = 50.0;
        let jobs = discover(root.path(), &opts);
        assert_eq!(jobs[0].grade, GradeSettings::default());
    }

    #[test]
    fn picked_frame_expands_to_its_siblings() {
        let root = tempfile::tempdir().unwrap();
        let r = root.path();
        for name in ["s-3.png", "s-1.png", "s-2.png", "s_4.png", "s-5.jpg"] {
            touch(&r.join(name));
        }
        let all = expand_sequence(&r.join("s-2.png"));
        let names: Vec<String> = all.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, ["s-1.png", "s-2.png", "s-3.png"]);

        assert_eq!(expand_sequence(&r.join("s_4.png")), vec![r.join("s_4.png")]);
        assert!(matches!(source_for_path(&r.join("s-1.png"), 30), JobSource::Sequence { fps, .. } if fps == 30.0));
        assert!(matches!(source_for_path(&r.join("s-5.jpg"), 30), JobSource::File { .. }));
    }
}
