// crates/clipshift-cli/src/commands.rs
//
// One function per subcommand. Long operations go through MediaWorker and
// this side just drains its result channel; probe and thumb call the media
// crate directly.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};

use clipshift_core::helpers::time::format_duration;
use clipshift_core::media_types::{BatchSummary, MediaInfo};
use clipshift_core::{
    ConversionJob, CropRegion, ExportFormat, FormatOptions, GradeSettings, JobSource, JobStatus, PipelineConfig,
};
use clipshift_media::analyze::analyze_source;
use clipshift_media::encode::run_job;
use clipshift_media::scan::{source_for_path, ScanOptions};
use clipshift_media::{ExecContext, MediaResult, MediaWorker, ProgressUpdate};

use crate::cli::{ConvertArgs, EditArgs, ProbeArgs, RunArgs, ScanArgs, ThumbArgs};

// ── Output ────────────────────────────────────────────────────────────────────

fn show_progress(p: &ProgressUpdate) {
    let mut err = io::stderr().lock();
    let _ = write!(err, "\r{:<48} {:>5.1}% {}", p.label, p.fraction * 100.0, p.eta);
    let _ = err.flush();
}

fn end_progress_line() {
    eprintln!();
}

fn describe_media(m: &MediaInfo) -> String {
    format!(
        "{}x{} {:.3}fps {}{}",
        m.width,
        m.height,
        m.fps,
        format_duration(m.duration),
        if m.has_alpha { " alpha" } else { "" }
    )
}

fn print_summary(s: &BatchSummary) {
    println!(
        "{} completed, {} failed, {} cancelled, {} skipped",
        s.completed, s.failed, s.cancelled, s.skipped
    );
}

// ── Edit flags ────────────────────────────────────────────────────────────────

impl EditArgs {
    fn grade(&self) -> GradeSettings {
        let base = GradeSettings::default();
        let g = GradeSettings {
            enabled:     false,
            exposure:    self.exposure.unwrap_or(base.exposure),
            contrast:    self.contrast.unwrap_or(base.contrast),
            gamma:       self.gamma.unwrap_or(base.gamma),
            saturation:  self.saturation.unwrap_or(base.saturation),
            tint:        self.tint.unwrap_or(base.tint),
            temperature: self.temperature.unwrap_or(base.temperature),
        };
        GradeSettings { enabled: !g.is_neutral(), ..g }.clamped()
    }

    fn crop(&self) -> Result<Option<CropRegion>> {
        match self.crop.as_deref() {
            None                     => Ok(None),
            Some(&[x1, y1, x2, y2])  => Ok(Some(CropRegion::new(x1, y1, x2, y2).resolve())),
            Some(other)              => bail!("--crop takes 4 values, got {}", other.len()),
        }
    }

    /// A job for `source` with every flag applied.
    fn job(&self, source: JobSource, format: ExportFormat) -> Result<ConversionJob> {
        let mut job = ConversionJob::new(source, format);
        job.start = self.start.max(0.0);
        job.end   = self.end;
        job.width = FormatOptions::parse_width(&self.width);
        job.fps   = FormatOptions::parse_fps(&self.fps);
        job.options.loop_count   = FormatOptions::parse_loop(&self.loop_count);
        job.options.bitrate_mbps = FormatOptions::parse_bitrate(&self.bitrate);
        job.options.still_format = self.still;
        job.keep_transparency    = !self.opaque;
        job.grade = self.grade();
        if let Some(crop) = self.crop()? {
            job.crop_enabled = !crop.is_full();
            job.crop = crop;
        }
        Ok(job)
    }
}

// ── Subcommands ───────────────────────────────────────────────────────────────

pub fn run(args: RunArgs, config: PipelineConfig) -> Result<()> {
    if !args.jobs.is_file() {
        bail!("job list not found: {}", args.jobs.display());
    }
    let worker = MediaWorker::new(config);
    worker.import_jobs(args.jobs.clone());

    for msg in worker.rx.iter() {
        match msg {
            MediaResult::Analyzing { done, total } => log::debug!("[cli] analyzed {done}/{total}"),
            MediaResult::ImportFinished { jobs } => {
                let ready = jobs.iter().filter(|j| j.status == JobStatus::Queued).count();
                println!("imported {} jobs, {ready} ready", jobs.len());
                for job in jobs.iter().filter(|j| j.status != JobStatus::Queued) {
                    println!("  {}: {}", job.name, job.status);
                }
                break;
            }
            MediaResult::Error { msg } => bail!(msg),
            _ => {}
        }
    }

    worker.start_batch(args.output.clone(), None);
    let summary = drain_batch(&worker)?;

    if args.write_back {
        worker
            .export_jobs(&args.jobs)
            .with_context(|| format!("writing {}", args.jobs.display()))?;
    }
    print_summary(&summary);
    if summary.failed > 0 {
        bail!("{} of {} jobs failed", summary.failed, summary.total());
    }
    Ok(())
}

fn drain_batch(worker: &MediaWorker) -> Result<BatchSummary> {
    for msg in worker.rx.iter() {
        match msg {
            MediaResult::Progress(p) => show_progress(&p),
            MediaResult::JobStarted { name, .. } => log::info!("[cli] started {name}"),
            MediaResult::JobFinished { status, output, index } => {
                end_progress_line();
                let pos = index.map(|i| format!("#{} ", i + 1)).unwrap_or_default();
                match output {
                    Some(path) => println!("{pos}{status} → {}", path.display()),
                    None       => println!("{pos}{status}"),
                }
            }
            MediaResult::BatchFinished(summary) => return Ok(summary),
            MediaResult::Error { msg } => bail!(msg),
            _ => {}
        }
    }
    bail!("worker stopped before the batch finished")
}

pub fn convert(args: ConvertArgs, config: PipelineConfig) -> Result<()> {
    if !args.input.exists() {
        bail!("input not found: {}", args.input.display());
    }
    let fps    = FormatOptions::parse_fps(&args.edit.fps);
    let source = source_for_path(&args.input, fps);
    let job    = args.edit.job(source, args.format)?;
    println!("{} → {} ({})", job.name, args.output.display(), job.format);

    let worker = MediaWorker::new(config);
    worker.convert_now(job, args.output);

    for msg in worker.rx.iter() {
        match msg {
            MediaResult::Progress(p) => show_progress(&p),
            MediaResult::JobFinished { status, output, .. } => {
                end_progress_line();
                return match (status, output) {
                    (JobStatus::Completed, Some(path)) => {
                        println!("{}", path.display());
                        Ok(())
                    }
                    (status, _) => bail!("{status}"),
                };
            }
            MediaResult::Error { msg } => bail!(msg),
            _ => {}
        }
    }
    bail!("worker stopped before the conversion finished")
}

pub fn scan(args: ScanArgs, config: PipelineConfig) -> Result<()> {
    if !args.folder.is_dir() {
        bail!("not a folder: {}", args.folder.display());
    }
    let options = ScanOptions { thumbnail_mode: args.thumbnails, ..ScanOptions::from_config(&config) };
    let worker  = MediaWorker::new(config);
    worker.scan_folder(args.folder.clone(), options);

    let jobs = loop {
        match worker.rx.recv().context("worker stopped during the scan")? {
            MediaResult::Analyzing { done, total } => log::debug!("[cli] analyzed {done}/{total}"),
            MediaResult::ScanFinished { jobs } => break jobs,
            MediaResult::Error { msg } => bail!(msg),
            _ => {}
        }
    };

    for job in &jobs {
        let media = job.media.as_ref().map(describe_media).unwrap_or_else(|| job.status.label());
        println!("{:<10} {}  [{media}]", job.format.label(), job.name);
    }
    println!("{} jobs", jobs.len());

    if let Some(path) = args.export {
        worker.export_jobs(&path).with_context(|| format!("writing {}", path.display()))?;
        println!("saved {}", path.display());
    }
    Ok(())
}

pub fn probe(args: ProbeArgs, config: PipelineConfig) -> Result<()> {
    let mut failures = 0;
    for input in &args.inputs {
        let source = source_for_path(input, args.fps);
        match analyze_source(&source, &GradeSettings::default(), &config) {
            Ok((media, _)) => {
                let frames = match &source {
                    JobSource::Sequence { paths, .. } => format!(" ({} frames)", paths.len()),
                    JobSource::File { .. }            => String::new(),
                };
                println!("{}: {}{frames}", source.display_name(), describe_media(&media));
            }
            Err(e) => {
                failures += 1;
                println!("{}: {e}", input.display());
            }
        }
    }
    if failures > 0 {
        bail!("{failures} of {} inputs could not be read", args.inputs.len());
    }
    Ok(())
}

pub fn thumb(args: ThumbArgs, config: PipelineConfig) -> Result<()> {
    let source = source_for_path(&args.input, args.fps);
    let (media, _) = analyze_source(&source, &GradeSettings::default(), &config)
        .with_context(|| format!("reading {}", args.input.display()))?;

    let mut job = ConversionJob::new(source, ExportFormat::Thumbnail);
    job.start = args.at.clamp(0.0, media.duration.max(0.0));
    job.width = media.width;
    job.media = Some(media);
    job.options.still_format = args.still;

    let (ctx, _cancel) = ExecContext::detached();
    let out = run_job(&job, &args.output, &ctx.with_timing(&config), &config)?;
    println!("{}", out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::cli::{Cli, Commands};

    fn convert_args(extra: &[&str]) -> ConvertArgs {
        let mut argv = vec!["clipshift", "convert", "in.mov", "-o", "out"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Convert(a) => a,
            other => panic!("parsed {other:?}"),
        }
    }

    fn file() -> JobSource {
        JobSource::File { path: "in.mov".into() }
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let args = convert_args(&["--width", "wide", "--fps", "0", "--bitrate", "abc", "--loop", "2"]);
        let job = args.edit.job(file(), args.format).unwrap();
        assert_eq!(job.width, 1280);
        assert_eq!(job.fps, 24);
        assert_eq!(job.options.bitrate_mbps, 2.0);
        assert_eq!(job.options.loop_count, 2);
        assert_eq!(job.format, ExportFormat::Gif);
    }

    #[test]
    fn grade_flags_enable_and_clamp() {
        let args = convert_args(&["--contrast", "250", "--gamma", "0"]);
        let g = args.edit.job(file(), args.format).unwrap().grade;
        assert!(g.enabled);
        assert_eq!(g.contrast, 100.0);
        assert_eq!(g.gamma, 0.1);

        let plain = convert_args(&[]);
        assert!(!plain.edit.job(file(), plain.format).unwrap().grade.enabled);
    }

    #[test]
    fn crop_needs_four_values_and_is_normalized() {
        let args = convert_args(&["--crop", "0.9,0.8,0.1,0.2"]);
        let job = args.edit.job(file(), args.format).unwrap();
        assert!(job.crop_enabled);
        assert!(job.crop.x1 < job.crop.x2 && job.crop.y1 < job.crop.y2);

        let args = convert_args(&["--crop", "0.1,0.2"]);
        assert!(args.edit.job(file(), args.format).is_err());
    }

    #[test]
    fn trim_and_transparency_flags_reach_the_job() {
        let args = convert_args(&["--start", "1.5", "--end", "4", "--opaque", "-f", "thumbnail", "--still", "jpg"]);
        let job = args.edit.job(file(), args.format).unwrap();
        assert_eq!((job.start, job.end), (1.5, Some(4.0)));
        assert!(!job.keep_transparency);
        assert_eq!(job.format, ExportFormat::Thumbnail);
        assert_eq!(job.output_file_name(), "in_thumb.jpg");
    }
}
