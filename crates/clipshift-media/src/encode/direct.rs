// crates/clipshift-media/src/encode/direct.rs
//
// Direct MP4 path: run an external ffmpeg against the original file.
//
// Nothing is decoded in-process. The trim window becomes `-ss`/`-t` input
// options, and the transform stack becomes a filter chain built from the
// same OutputGeometry the in-process stack uses:
//
//   crop=w:h:x:y , scale=W:H , format=yuv420p [, eq=… [, colorbalance=…]]
//
// `-fps_mode passthrough` keeps the source's own frame timestamps, so
// variable-frame-rate sources are not resampled.
//
// Progress comes from the `time=HH:MM:SS.xx` field of ffmpeg's stats output
// on stderr. Stats lines end in `\r`, not `\n`, so the reader splits on
// both. A reader thread feeds lines to the encode loop, which polls pause and
// cancel between lines and while waiting for one; cancel kills the child.
//
// Pause does not signal the child. ffmpeg keeps encoding until the line
// channel and the OS pipe behind it are full, then blocks on its next stderr
// write, so output can run a few seconds past the pause. Progress reports
// stop at once.

use std::ffi::OsString;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;

use crossbeam_channel::{bounded, RecvTimeoutError};

use clipshift_core::media_types::MediaInfo;
use clipshift_core::{ConversionJob, PipelineConfig};

use crate::error::{PipelineError, PipelineResult};
use crate::exec::ExecContext;
use crate::probe;
use crate::source::transform::OutputGeometry;

const AUDIO_CODEC:   &str = "aac";
const AUDIO_BITRATE: &str = "128k";

/// Stderr lines buffered between the reader thread and the encode loop.
const LINE_BACKLOG: usize = 64;

/// Filter chain for `job` over a `source_w × source_h` input.
///
/// ```
/// use std::path::PathBuf;
/// use clipshift_core::{ConversionJob, CropRegion, ExportFormat, JobSource};
/// use clipshift_media::encode::direct::filter_chain;
///
/// let mut job = ConversionJob::new(JobSource::File { path: PathBuf::from("a.mov") }, ExportFormat::Mp4);
/// job.width = 640;
/// assert_eq!(filter_chain(&job, 1920, 1080), "scale=640:360,format=yuv420p");
///
/// job.crop_enabled = true;
/// job.crop = CropRegion::new(0.0, 0.0, 0.5, 1.0);
/// assert_eq!(filter_chain(&job, 1920, 1080), "crop=960:1080:0:0,scale=640:720,format=yuv420p");
/// ```
pub fn filter_chain(job: &ConversionJob, source_w: u32, source_h: u32) -> String {
    let geometry = OutputGeometry::for_job(job, source_w, source_h);
    let mut filters = Vec::new();
    if let Some(r) = geometry.crop {
        filters.push(format!("crop={}:{}:{}:{}", r.width, r.height, r.x, r.y));
    }
    filters.push(format!("scale={}:{}", geometry.width, geometry.height));
    filters.push("format=yuv420p".to_string());
    if let Some(grade) = job.grade.to_filter_expr() {
        filters.push(grade);
    }
    filters.join(",")
}

/// Full ffmpeg argument list (without the program name). Returns the args
/// and the trimmed duration that `time=` progress is measured against.
pub fn build_args(job: &ConversionJob, media: &MediaInfo, output: &Path) -> (Vec<OsString>, f64) {
    let (start, end) = job.trim_window(media.duration);
    let length = end - start;
    let input = job.source.primary_path().map(|p| p.as_os_str().to_os_string()).unwrap_or_default();

    let mut args: Vec<OsString> = vec![
        "-y".into(), "-hide_banner".into(), "-nostdin".into(),
        "-ss".into(), format!("{start:.3}").into(),
        "-t".into(), format!("{length:.3}").into(),
        "-i".into(), input,
    ];

    let rest = [
        "-vf".to_string(), filter_chain(job, media.width, media.height),
        "-fps_mode".into(), "passthrough".into(),
        "-c:v".into(), "libx264".into(),
        "-b:v".into(), format!("{}M", job.options.bitrate_mbps),
        "-c:a".into(), AUDIO_CODEC.into(),
        "-b:a".into(), AUDIO_BITRATE.into(),
        "-movflags".into(), "+faststart".into(),
    ];
    args.extend(rest.into_iter().map(OsString::from));
    args.push(output.as_os_str().to_os_string());
    (args, length)
}

/// Seconds from the `time=` field of an ffmpeg stats line. `N/A` and lines
/// without the field give `None`.
///
/// ```
/// use clipshift_media::encode::direct::parse_time_marker;
/// let line = "frame=  240 fps= 60 q=28.0 size=  512kB time=00:01:02.50 bitrate= 67.1kbits/s speed=2.0x";
/// assert_eq!(parse_time_marker(line), Some(62.5));
/// assert_eq!(parse_time_marker("time=N/A bitrate=N/A"), None);
/// ```
pub fn parse_time_marker(line: &str) -> Option<f64> {
    let at = line.find("time=")? + "time=".len();
    let value = line[at..].split_whitespace().next()?;
    let mut secs = 0.0;
    for part in value.split(':') {
        let v: f64 = part.parse().ok()?;
        secs = secs * 60.0 + v;
    }
    Some(secs)
}

/// Splits a byte stream into lines on `\r` or `\n`, skipping empties.
struct LineReader<R> {
    inner:   R,
    pending: Vec<u8>,
    buf:     [u8; 4096],
    filled:  usize,
    pos:     usize,
    eof:     bool,
}

impl<R: Read> LineReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, pending: Vec::new(), buf: [0; 4096], filled: 0, pos: 0, eof: false }
    }

    fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            while self.pos < self.filled {
                let b = self.buf[self.pos];
                self.pos += 1;
                if b == b'\r' || b == b'\n' {
                    if !self.pending.is_empty() {
                        let line = String::from_utf8_lossy(&self.pending).into_owned();
                        self.pending.clear();
                        return Ok(Some(line));
                    }
                } else {
                    self.pending.push(b);
                }
            }
            if self.eof {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                return Ok(Some(line));
            }
            self.filled = self.inner.read(&mut self.buf)?;
            self.pos = 0;
            if self.filled == 0 {
                self.eof = true;
            }
        }
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Encode `job` straight from its source file into `output`.
pub fn encode(job: &ConversionJob, output: &Path, ctx: &ExecContext, config: &PipelineConfig) -> PipelineResult<()> {
    let input = job
        .source
        .primary_path()
        .filter(|_| !job.source.is_sequence())
        .ok_or_else(|| PipelineError::Validation("direct encode needs a single source file".into()))?;

    let media = match job.media {
        Some(m) => m,
        None    => probe::probe(input, config)?,
    };
    let (args, length) = build_args(job, &media, output);
    run_encoder(&args, length, ctx, config)
}

/// Run `config.ffmpeg_bin` with `args` to completion, mapping its `time=`
/// stats onto `[0, 1]` of `length` seconds.
pub(crate) fn run_encoder(args: &[OsString], length: f64, ctx: &ExecContext, config: &PipelineConfig) -> PipelineResult<()> {
    log::info!(
        "[encode] direct: {} {}",
        config.ffmpeg_bin.display(),
        args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
    );
    ctx.checkpoint()?;

    let mut child = Command::new(&config.ffmpeg_bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PipelineError::Encode(format!("spawn {}: {e}", config.ffmpeg_bin.display())))?;

    let Some(stderr) = child.stderr.take() else {
        kill(&mut child);
        return Err(PipelineError::Encode("encoder stderr unavailable".into()));
    };

    // Lines come through a small bounded channel: a paused run stops
    // draining it, the reader blocks, and ffmpeg blocks on its stderr pipe.
    let (line_tx, line_rx) = bounded::<io::Result<String>>(LINE_BACKLOG);
    let reader = thread::spawn(move || {
        let mut lines = LineReader::new(stderr);
        loop {
            let next = match lines.next_line() {
                Ok(Some(line)) => Ok(line),
                Ok(None)       => break,
                Err(e)         => Err(e),
            };
            let failed = next.is_err();
            if line_tx.send(next).is_err() || failed {
                break;
            }
        }
    });

    let mut last_message = String::new();
    loop {
        if let Err(e) = ctx.checkpoint() {
            log::info!("[encode] direct: stopping encoder");
            kill(&mut child);
            drop(line_rx);
            let _ = reader.join();
            return Err(e);
        }
        let line = match line_rx.recv_timeout(config.pause_poll()) {
            Ok(Ok(line))                        => line,
            Ok(Err(e))                          => {
                kill(&mut child);
                drop(line_rx);
                let _ = reader.join();
                return Err(e.into());
            }
            Err(RecvTimeoutError::Timeout)      => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match parse_time_marker(&line) {
            Some(t) if length > 0.0 => ctx.report(t / length),
            Some(_)                 => {}
            None                    => {
                log::debug!("[encode] ffmpeg: {line}");
                last_message = line;
            }
        }
    }
    let _ = reader.join();

    let status = child.wait()?;
    exit_outcome(status, ctx.is_cancelled(), &last_message)
}

/// Result for an encoder that ran to exit. A clean exit is kept even if a
/// cancel arrived while the last lines were read; a failed exit after a
/// cancel is reported as the cancel.
fn exit_outcome(status: ExitStatus, cancelled: bool, last_message: &str) -> PipelineResult<()> {
    match (status.success(), cancelled) {
        (true, _)      => Ok(()),
        (false, true)  => Err(PipelineError::Cancelled),
        (false, false) => Err(PipelineError::EncoderProcess {
            code:   status.code(),
            detail: last_message.trim().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipshift_core::{ExportFormat, GradeSettings, JobSource};
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::exec::{CancelToken, NullSink, PauseToken};

    fn job() -> ConversionJob {
        let mut j = ConversionJob::new(JobSource::File { path: PathBuf::from("/in/clip.mov") }, ExportFormat::Mp4);
        j.width = 1280;
        j
    }

    fn media() -> MediaInfo {
        MediaInfo { width: 1920, height: 1080, fps: 23.976, duration: 10.0, has_alpha: false }
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn trim_becomes_seek_and_length() {
        let mut j = job();
        j.start = 2.0;
        j.end   = Some(5.5);
        let (args, length) = build_args(&j, &media(), Path::new("/out/clip.mp4"));
        let a = strings(&args);
        assert_eq!(length, 3.5);
        let ss = a.iter().position(|s| s == "-ss").unwrap();
        let i  = a.iter().position(|s| s == "-i").unwrap();
        assert!(ss < i, "seek must be an input option");
        assert_eq!(a[ss + 1], "2.000");
        assert_eq!(a[ss + 3], "3.500");
        assert_eq!(a[i + 1], "/in/clip.mov");
        assert_eq!(a.last().unwrap(), "/out/clip.mp4");
    }

    #[test]
    fn native_timestamps_and_bitrate() {
        let mut j = job();
        j.options.bitrate_mbps = 8.0;
        let a = strings(&build_args(&j, &media(), Path::new("o.mp4")).0);
        let fm = a.iter().position(|s| s == "-fps_mode").unwrap();
        assert_eq!(a[fm + 1], "passthrough");
        let bv = a.iter().position(|s| s == "-b:v").unwrap();
        assert_eq!(a[bv + 1], "8M");
        assert!(!a.iter().any(|s| s == "-r"));
    }

    #[test]
    fn grade_is_appended_after_format() {
        let mut j = job();
        j.grade = GradeSettings { enabled: true, temperature: 30.0, ..Default::default() };
        let chain = filter_chain(&j, 1920, 1080);
        assert!(chain.starts_with("scale=1280:720,format=yuv420p,eq="));
        assert!(chain.ends_with("colorbalance=rm=0.100:gm=0.000:bm=-0.100"));
    }

    #[test]
    fn line_reader_splits_on_carriage_returns() {
        let data = b"header\nframe=1 time=00:00:01.00\rframe=2 time=00:00:02.00\r\n\nlast";
        let mut r = LineReader::new(&data[..]);
        let mut got = Vec::new();
        while let Some(l) = r.next_line().unwrap() {
            got.push(l);
        }
        assert_eq!(got, vec!["header", "frame=1 time=00:00:01.00", "frame=2 time=00:00:02.00", "last"]);
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_decides_the_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mov");
        std::fs::write(&src, b"x").unwrap();
        let mut j = ConversionJob::new(JobSource::File { path: src }, ExportFormat::Mp4);
        j.media = Some(media());
        let (ctx, _) = ExecContext::detached();

        // `false` and `true` ignore their arguments.
        let failing = PipelineConfig { ffmpeg_bin: PathBuf::from("false"), ..Default::default() };
        match encode(&j, &dir.path().join("o.mp4"), &ctx, &failing).unwrap_err() {
            PipelineError::EncoderProcess { code, .. } => assert_eq!(code, Some(1)),
            other => panic!("unexpected {other:?}"),
        }

        let passing = PipelineConfig { ffmpeg_bin: PathBuf::from("true"), ..Default::default() };
        encode(&j, &dir.path().join("o.mp4"), &ctx, &passing).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn late_cancel_keeps_a_finished_encode() {
        use std::os::unix::process::ExitStatusExt;

        let ok     = ExitStatus::from_raw(0);
        let failed = ExitStatus::from_raw(1 << 8);
        assert!(exit_outcome(ok, true, "").is_ok());
        assert!(exit_outcome(failed, true, "Conversion failed!").unwrap_err().is_cancelled());
        match exit_outcome(failed, false, " Conversion failed!\n").unwrap_err() {
            PipelineError::EncoderProcess { code, detail } => {
                assert_eq!(code, Some(1));
                assert_eq!(detail, "Conversion failed!");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn sh(script: &str) -> Vec<OsString> {
        vec!["-c".into(), script.into()]
    }

    #[cfg(unix)]
    #[test]
    fn paused_encode_waits_for_resume() {
        let config = PipelineConfig { ffmpeg_bin: PathBuf::from("sh"), pause_poll_ms: 5, ..Default::default() };
        let pause  = PauseToken::new();
        let ctx    = ExecContext::new(CancelToken::new(), pause.clone(), Arc::new(NullSink)).with_timing(&config);
        pause.pause();
        let resumer = {
            let pause = pause.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(120));
                pause.resume();
            })
        };
        let started = std::time::Instant::now();
        run_encoder(&sh("echo time=00:00:01.00 >&2"), 2.0, &ctx, &config).unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_millis(100));
        resumer.join().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn cancel_while_paused_with_a_full_backlog_returns() {
        let config = PipelineConfig { ffmpeg_bin: PathBuf::from("sh"), pause_poll_ms: 5, ..Default::default() };
        let cancel = CancelToken::new();
        let pause  = PauseToken::new();
        let ctx    = ExecContext::new(cancel.clone(), pause.clone(), Arc::new(NullSink)).with_timing(&config);
        let control = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            pause.pause();
            std::thread::sleep(std::time::Duration::from_millis(150));
            cancel.cancel();
        });
        let err = run_encoder(&sh("while :; do echo frame=1 time=00:00:01.00 >&2; done"), 10.0, &ctx, &config)
            .unwrap_err();
        assert!(err.is_cancelled());
        control.join().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn cancel_kills_a_silent_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mov");
        std::fs::write(&src, b"x").unwrap();
        let mut j = ConversionJob::new(JobSource::File { path: src }, ExportFormat::Mp4);
        j.media = Some(media());

        // `yes` never exits and never writes to stderr.
        let config = PipelineConfig { ffmpeg_bin: PathBuf::from("yes"), pause_poll_ms: 10, ..Default::default() };
        let (ctx, cancel) = ExecContext::detached();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(150));
            cancel.cancel();
        });
        let err = encode(&j, &dir.path().join("o.mp4"), &ctx, &config).unwrap_err();
        assert!(err.is_cancelled());
        canceller.join().unwrap();
    }
}
