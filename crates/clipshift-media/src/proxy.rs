// crates/clipshift-media/src/proxy.rs
//
// Preview proxies for high-resolution sources, and the active-source slot
// that swaps between original and proxy.
//
// ProxyManager states:
//   Idle ──request──▶ Generating ──▶ Ready
//                              ├──▶ Stopped   (cancelled)
//                              └──▶ Idle      (build failed)
//
// Every source load bumps a generation counter. A build remembers the
// generation it started under and, when it finishes, is applied only if that
// is still the current one; otherwise its file is deleted and a Stale event
// is sent. Starting a build, the compare and the apply all happen under the
// same lock as the bump, so a load can never slip in between them.
//
// Proxy files are named `proxy_<session>_<generation>.mp4`, where the session
// id is fresh per manager, so managers sharing one directory never collide.
//
// ActiveSource locking:
//   swap    held for a whole original ↔ proxy switch
//   access  held for each frame read; one read at a time per decoder

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use image::RgbaImage;
use parking_lot::Mutex;
use uuid::Uuid;

use clipshift_core::helpers::geometry::proxy_height;
use clipshift_core::job::JobSource;
use clipshift_core::media_types::{MediaInfo, MediaResult, ProgressUpdate, ProxyEvent};
use clipshift_core::PipelineConfig;

use crate::encode::direct::run_encoder;
use crate::error::PipelineResult;
use crate::exec::{CancelToken, ExecContext, PauseToken, ProgressSink};
use crate::source::FrameSource;

const PROXY_BITRATE: &str = "8M";
const PROXY_PRESET:  &str = "faster";

// ── Builder seam ──────────────────────────────────────────────────────────────

/// Writes a `height`-tall proxy of `source` to `output`.
pub trait ProxyBuilder: Send + Sync {
    fn build(&self, source: &Path, media: &MediaInfo, height: u32, output: &Path, ctx: &ExecContext) -> PipelineResult<()>;
}

/// H.264 proxy through the external ffmpeg: source frame rate, no audio.
pub struct FfmpegProxyBuilder {
    config: PipelineConfig,
}

impl FfmpegProxyBuilder {
    pub fn new(config: PipelineConfig) -> Self { Self { config } }

    pub fn args(source: &Path, height: u32, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-hide_banner", "-nostdin", "-i"].into_iter().map(OsString::from).collect();
        args.push(source.into());
        for a in [
            "-vf".to_string(), format!("scale=-2:{height}"),
            "-c:v".into(), "libx264".into(),
            "-preset".into(), PROXY_PRESET.into(),
            "-b:v".into(), PROXY_BITRATE.into(),
            "-pix_fmt".into(), "yuv420p".into(),
            "-an".into(),
        ] {
            args.push(a.into());
        }
        args.push(output.into());
        args
    }
}

impl ProxyBuilder for FfmpegProxyBuilder {
    fn build(&self, source: &Path, media: &MediaInfo, height: u32, output: &Path, ctx: &ExecContext) -> PipelineResult<()> {
        run_encoder(&Self::args(source, height, output), media.duration, ctx, &self.config)
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum ProxyState {
    Idle,
    Generating { generation: u64, height: u32 },
    Ready      { generation: u64, path: PathBuf },
    Stopped,
}

struct InFlight {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

/// Maps pipeline progress onto proxy events.
struct ProxySink {
    generation: u64,
    events:     Sender<MediaResult>,
}

impl ProgressSink for ProxySink {
    fn report(&self, update: ProgressUpdate) {
        let _ = self.events.send(MediaResult::Proxy(ProxyEvent::Progress {
            generation: self.generation,
            fraction:   update.fraction,
        }));
    }
}

struct Shared {
    generation: AtomicU64,
    state:      Mutex<ProxyState>,
    /// Every proxy file written and not yet deleted.
    files:      Mutex<Vec<PathBuf>>,
    events:     Sender<MediaResult>,
}

impl Shared {
    fn send(&self, event: ProxyEvent) {
        let _ = self.events.send(MediaResult::Proxy(event));
    }

    /// Apply a finished build. Runs under the state lock so `begin_load`
    /// cannot interleave.
    fn finish(&self, generation: u64, output: PathBuf, result: PipelineResult<()>) {
        let mut state = self.state.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            if matches!(*state, ProxyState::Generating { generation: g, .. } if g == generation) {
                *state = ProxyState::Idle;
            }
            remove_file(&output);
            log::info!("[proxy] discarding stale proxy from load {generation}");
            self.send(ProxyEvent::Stale { generation });
            return;
        }
        match result {
            Ok(()) => {
                log::info!("[proxy] ready → {}", output.display());
                self.files.lock().push(output.clone());
                *state = ProxyState::Ready { generation, path: output.clone() };
                self.send(ProxyEvent::Ready { generation, path: output });
            }
            Err(e) if e.is_cancelled() => {
                remove_file(&output);
                *state = ProxyState::Stopped;
                self.send(ProxyEvent::Stopped { generation });
            }
            Err(e) => {
                remove_file(&output);
                log::warn!("[proxy] generation failed: {e}");
                *state = ProxyState::Idle;
                self.send(ProxyEvent::Failed { generation, msg: e.job_reason() });
            }
        }
    }
}

fn remove_file(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("[proxy] could not delete {}: {e}", path.display());
        }
    }
}

pub struct ProxyManager {
    shared:     Arc<Shared>,
    builder:    Arc<dyn ProxyBuilder>,
    dir:        PathBuf,
    session:    Uuid,
    min_height: u32,
    config:     PipelineConfig,
    in_flight:  Mutex<Option<InFlight>>,
}

impl ProxyManager {
    pub fn new(config: &PipelineConfig, events: Sender<MediaResult>) -> Self {
        Self::with_builder(config, events, Arc::new(FfmpegProxyBuilder::new(config.clone())))
    }

    pub fn with_builder(config: &PipelineConfig, events: Sender<MediaResult>, builder: Arc<dyn ProxyBuilder>) -> Self {
        Self {
            shared: Arc::new(Shared {
                generation: AtomicU64::new(0),
                state:      Mutex::new(ProxyState::Idle),
                files:      Mutex::new(Vec::new()),
                events,
            }),
            builder,
            dir:        config.proxy_dir.clone(),
            session:    Uuid::new_v4(),
            min_height: config.proxy_min_height,
            config:     config.clone(),
            in_flight:  Mutex::new(None),
        }
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ProxyState {
        self.shared.state.lock().clone()
    }

    /// The proxy for the current load, if one is ready.
    pub fn ready_path(&self) -> Option<PathBuf> {
        match &*self.shared.state.lock() {
            ProxyState::Ready { generation, path } if *generation == self.generation() => Some(path.clone()),
            _ => None,
        }
    }

    /// Where the proxy for `generation` is written.
    pub fn proxy_path(&self, generation: u64) -> PathBuf {
        self.dir.join(format!("proxy_{}_{generation}.mp4", self.session.simple()))
    }

    /// A new source was loaded. Invalidates whatever is in flight and
    /// returns the new generation.
    pub fn begin_load(&self) -> u64 {
        let generation = {
            let mut state = self.shared.state.lock();
            let g = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = ProxyState::Idle;
            g
        };
        if let Some(f) = &*self.in_flight.lock() {
            f.cancel.cancel();
        }
        log::debug!("[proxy] load generation {generation}");
        generation
    }

    /// Start building a proxy for `source` under `generation`. Returns the
    /// proxy height, or `None` when no proxy applies: sequences, sources
    /// below the threshold, and requests from an older load.
    pub fn request(&self, generation: u64, source: &JobSource, media: &MediaInfo) -> Option<u32> {
        let JobSource::File { path } = source else { return None };
        let height = proxy_height(media.height, self.min_height)?;
        if generation != self.generation() {
            log::debug!("[proxy] ignoring request from load {generation}");
            return None;
        }

        self.stop_in_flight();

        {
            let mut state = self.shared.state.lock();
            if generation != self.generation() {
                log::debug!("[proxy] load {generation} superseded before its build started");
                return None;
            }
            *state = ProxyState::Generating { generation, height };
        }
        let output = self.proxy_path(generation);
        let cancel = CancelToken::new();
        self.shared.send(ProxyEvent::Started { generation, height });
        log::info!("[proxy] {}p proxy for {} → {}", height, path.display(), output.display());

        let shared  = Arc::clone(&self.shared);
        let builder = Arc::clone(&self.builder);
        let sink    = Arc::new(ProxySink { generation, events: shared.events.clone() });
        let ctx     = ExecContext::new(cancel.clone(), PauseToken::new(), sink).with_timing(&self.config);
        let input   = path.clone();
        let media   = *media;
        let handle  = thread::spawn(move || {
            let result = builder.build(&input, &media, height, &output, &ctx);
            shared.finish(generation, output, result);
        });

        *self.in_flight.lock() = Some(InFlight { cancel, handle });
        Some(height)
    }

    fn stop_in_flight(&self) {
        let previous = self.in_flight.lock().take();
        if let Some(f) = previous {
            f.cancel.cancel();
            let _ = f.handle.join();
        }
    }

    /// Cancel the running build, if any, and wait for it to unwind.
    pub fn stop(&self) {
        self.stop_in_flight();
    }

    /// Block until the running build (if any) has finished and been applied.
    pub fn wait(&self) {
        let previous = self.in_flight.lock().take();
        if let Some(f) = previous {
            let _ = f.handle.join();
        }
    }

    /// Stop any build and delete every proxy file written so far.
    pub fn cleanup(&self) {
        self.stop_in_flight();
        let files: Vec<PathBuf> = self.shared.files.lock().drain(..).collect();
        for path in &files {
            remove_file(path);
        }
        *self.shared.state.lock() = ProxyState::Idle;
        if !files.is_empty() {
            log::info!("[proxy] removed {} proxy files", files.len());
        }
    }
}

impl Drop for ProxyManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

// ── Active source ─────────────────────────────────────────────────────────────

struct Slot {
    original:  Arc<dyn FrameSource>,
    proxy:     Option<Arc<dyn FrameSource>>,
    use_proxy: bool,
    /// Last frame read, keyed by time.
    cache:     Option<(f64, RgbaImage)>,
}

impl Slot {
    fn current(&self) -> &Arc<dyn FrameSource> {
        match (&self.proxy, self.use_proxy) {
            (Some(p), true) => p,
            _               => &self.original,
        }
    }
}

/// The frame source preview and playback read from. Proxy frames are
/// scaled back to the original size so callers never see the switch.
pub struct ActiveSource {
    swap:     Mutex<()>,
    access:   Mutex<Slot>,
    playback: PauseToken,
}

impl ActiveSource {
    /// `playback` is paused whenever the source is swapped.
    pub fn new(original: Arc<dyn FrameSource>, playback: PauseToken) -> Self {
        Self {
            swap:   Mutex::new(()),
            access: Mutex::new(Slot { original, proxy: None, use_proxy: false, cache: None }),
            playback,
        }
    }

    pub fn using_proxy(&self) -> bool {
        let slot = self.access.lock();
        slot.use_proxy && slot.proxy.is_some()
    }

    pub fn size(&self) -> (u32, u32) {
        self.access.lock().original.size()
    }

    pub fn frame_at(&self, t: f64) -> PipelineResult<RgbaImage> {
        let mut slot = self.access.lock();
        if let Some((at, frame)) = &slot.cache {
            if *at == t {
                return Ok(frame.clone());
            }
        }
        let size  = slot.original.size();
        let frame = slot.current().frame_at(t)?;
        let frame = if frame.dimensions() == size {
            frame
        } else {
            image::imageops::resize(&frame, size.0, size.1, image::imageops::FilterType::Triangle)
        };
        slot.cache = Some((t, frame.clone()));
        Ok(frame)
    }

    fn swap_with<F: FnOnce(&mut Slot)>(&self, change: F) {
        let _swap = self.swap.lock();
        let mut slot = self.access.lock();
        self.playback.pause();
        change(&mut slot);
        slot.cache = None;
    }

    /// Install a finished proxy. Reads keep using the original until
    /// `set_use_proxy(true)`.
    pub fn set_proxy(&self, proxy: Arc<dyn FrameSource>) {
        self.swap_with(|slot| slot.proxy = Some(proxy));
    }

    pub fn clear_proxy(&self) {
        self.swap_with(|slot| {
            slot.proxy = None;
            slot.use_proxy = false;
        });
    }

    /// Switch reads between original and proxy. Pauses playback; the
    /// playhead is left where it is.
    pub fn set_use_proxy(&self, on: bool) {
        self.swap_with(|slot| slot.use_proxy = on);
        log::info!("[proxy] proxy playback {}", if on { "on" } else { "off" });
    }

    /// Replace the original (a new load). Any proxy belongs to the old load
    /// and is dropped.
    pub fn replace_original(&self, original: Arc<dyn FrameSource>) {
        self.swap_with(|slot| {
            slot.original  = original;
            slot.proxy     = None;
            slot.use_proxy = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Receiver};
    use image::Rgba;

    /// Writes a marker file once released; honors cancel while waiting.
    struct Gated {
        release: CancelToken,
    }

    impl ProxyBuilder for Gated {
        fn build(&self, _s: &Path, _m: &MediaInfo, _h: u32, output: &Path, ctx: &ExecContext) -> PipelineResult<()> {
            while !self.release.is_cancelled() {
                ctx.checkpoint()?;
                thread::sleep(Duration::from_millis(2));
            }
            std::fs::write(output, b"proxy")?;
            Ok(())
        }
    }

    fn media(height: u32) -> MediaInfo {
        MediaInfo { width: height * 16 / 9, height, fps: 30.0, duration: 4.0, has_alpha: false }
    }

    fn file() -> JobSource {
        JobSource::File { path: PathBuf::from("/in/big.mov") }
    }

    fn manager(dir: &Path) -> (ProxyManager, CancelToken, Receiver<MediaResult>) {
        let (tx, rx) = unbounded();
        let release = CancelToken::new();
        let config = PipelineConfig { proxy_dir: dir.to_path_buf(), ..Default::default() };
        let m = ProxyManager::with_builder(&config, tx, Arc::new(Gated { release: release.clone() }));
        (m, release, rx)
    }

    fn proxy_events(rx: &Receiver<MediaResult>) -> Vec<ProxyEvent> {
        rx.try_iter()
            .filter_map(|m| match m {
                MediaResult::Proxy(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn ffmpeg_args_scale_to_the_proxy_height_without_audio() {
        let args = FfmpegProxyBuilder::args(Path::new("/in/a.mov"), 540, Path::new("/tmp/proxy_3.mp4"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let at = |flag: &str| args.iter().position(|a| a == flag).map(|i| args[i + 1].as_str());
        assert_eq!(at("-vf"), Some("scale=-2:540"));
        assert_eq!(at("-b:v"), Some("8M"));
        assert_eq!(at("-preset"), Some("faster"));
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/proxy_3.mp4"));
    }

    #[test]
    fn small_sources_and_sequences_get_no_proxy() {
        let dir = tempfile::tempdir().unwrap();
        let (m, _release, _rx) = manager(dir.path());
        let g = m.begin_load();
        assert_eq!(m.request(g, &file(), &media(480)), None);
        let seq = JobSource::Sequence { paths: vec![PathBuf::from("/a_1.png")], fps: 24.0 };
        assert_eq!(m.request(g, &seq, &media(2160)), None);
        assert_eq!(m.state(), ProxyState::Idle);
    }

    #[test]
    fn current_build_becomes_ready_and_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let (m, release, rx) = manager(dir.path());
        let g = m.begin_load();
        assert_eq!(m.request(g, &file(), &media(2160)), Some(540));
        assert!(matches!(m.state(), ProxyState::Generating { height: 540, .. }));

        release.cancel();
        m.wait();
        let path = m.ready_path().unwrap();
        assert_eq!(path, m.proxy_path(g));
        assert!(path.exists());
        assert!(proxy_events(&rx).contains(&ProxyEvent::Ready { generation: g, path: path.clone() }));

        m.cleanup();
        assert!(!path.exists());
        assert_eq!(m.state(), ProxyState::Idle);
    }

    #[test]
    fn stale_build_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let (m, release, rx) = manager(dir.path());
        let first = m.begin_load();
        m.request(first, &file(), &media(1080)).unwrap();

        // Bump the generation without cancelling, as if the new load landed
        // just as the build finished.
        let second = {
            let mut state = m.shared.state.lock();
            let g = m.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = ProxyState::Idle;
            g
        };
        release.cancel();
        m.wait();

        assert_eq!(m.ready_path(), None);
        assert_eq!(m.state(), ProxyState::Idle);
        assert!(!m.proxy_path(first).exists());
        assert!(proxy_events(&rx).contains(&ProxyEvent::Stale { generation: first }));
        assert_eq!(m.request(first, &file(), &media(1080)), None);
        assert_eq!(m.generation(), second);
    }

    #[test]
    fn new_load_cancels_the_running_build() {
        let dir = tempfile::tempdir().unwrap();
        let (m, _release, rx) = manager(dir.path());
        let g = m.begin_load();
        m.request(g, &file(), &media(1080)).unwrap();
        m.begin_load();
        m.wait();
        let events = proxy_events(&rx);
        assert!(events.contains(&ProxyEvent::Stale { generation: g }));
        assert_eq!(m.ready_path(), None);
    }

    #[test]
    fn managers_sharing_a_directory_use_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _ra, _rxa) = manager(dir.path());
        let (b, _rb, _rxb) = manager(dir.path());
        assert_ne!(a.proxy_path(1), b.proxy_path(1));
        assert_ne!(a.proxy_path(1), a.proxy_path(2));
        assert!(a.proxy_path(1).starts_with(dir.path()));
    }

    #[test]
    fn stale_finish_does_not_leave_the_state_generating() {
        let dir = tempfile::tempdir().unwrap();
        let (m, _release, rx) = manager(dir.path());
        let first = m.begin_load();

        // A build for `first` had already marked itself Generating when a
        // new load bumped the generation.
        *m.shared.state.lock() = ProxyState::Generating { generation: first, height: 540 };
        m.shared.generation.fetch_add(1, Ordering::SeqCst);
        let output = m.proxy_path(first);
        std::fs::write(&output, b"proxy").unwrap();
        m.shared.finish(first, output.clone(), Ok(()));

        assert_eq!(m.state(), ProxyState::Idle);
        assert!(!output.exists());
        assert!(proxy_events(&rx).contains(&ProxyEvent::Stale { generation: first }));
    }

    #[test]
    fn superseded_request_leaves_the_newer_state_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (m, _release, rx) = manager(dir.path());
        let first  = m.begin_load();
        let _second = m.begin_load();
        assert_eq!(m.request(first, &file(), &media(2160)), None);
        assert_eq!(m.state(), ProxyState::Idle);
        assert!(!proxy_events(&rx).iter().any(|e| matches!(e, ProxyEvent::Started { .. })));
    }

    struct Flat {
        size:  (u32, u32),
        value: u8,
    }

    impl FrameSource for Flat {
        fn duration(&self) -> f64 { 1.0 }
        fn size(&self) -> (u32, u32) { self.size }
        fn has_alpha(&self) -> bool { false }
        fn frame_at(&self, _t: f64) -> PipelineResult<RgbaImage> {
            Ok(RgbaImage::from_pixel(self.size.0, self.size.1, Rgba([self.value, 0, 0, 255])))
        }
    }

    #[test]
    fn swapping_to_the_proxy_pauses_playback_and_keeps_size() {
        let playback = PauseToken::new();
        let active = ActiveSource::new(Arc::new(Flat { size: (64, 36), value: 10 }), playback.clone());
        assert_eq!(active.frame_at(0.5).unwrap().get_pixel(0, 0)[0], 10);

        active.set_proxy(Arc::new(Flat { size: (32, 18), value: 200 }));
        assert!(!active.using_proxy());
        active.set_use_proxy(true);
        assert!(playback.is_paused());
        assert!(active.using_proxy());

        let frame = active.frame_at(0.5).unwrap();
        assert_eq!(frame.dimensions(), (64, 36));
        assert_eq!(frame.get_pixel(0, 0)[0], 200);

        active.set_use_proxy(false);
        assert_eq!(active.frame_at(0.5).unwrap().get_pixel(0, 0)[0], 10);
    }
}
