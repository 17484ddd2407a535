//! Control plane
//!
//! [`Controller`] is the façade any UI shell talks to: typed commands in,
//! [`AppEvent`]s out. Mixer-bound commands become lock-free engine messages;
//! store, cache, and import commands execute directly on the calling thread.
//! A telemetry pump thread bridges the audio thread's rings back onto the
//! event bus.

mod error;
mod outbox;

pub use error::ControlError;
pub use outbox::CommandOutbox;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::audio::{
    list_output_devices, CallbackState, DriverNotice, OutputDeviceInfo, OutputDriver, StreamInfo,
    StreamRequest,
};
use crate::cache::{CacheStats, SongCache};
use crate::db::{AudioSettings, Database, Setlist, Song, SongFilter, Stem};
use crate::engine::{
    command_channel, retired_channel, telemetry_channel, EngineCommand, EngineEvent,
    PlaybackEngine,
};
use crate::events::{AppEvent, EventBus, StemLevel};
use crate::import::{import_song, ImportRequest};
use crate::loader::SongLoader;
use crate::song::DecodedSong;
use crate::types::{PlaybackState, SAMPLE_RATE};

/// Telemetry pump tick
const PUMP_INTERVAL: Duration = Duration::from_millis(20);
/// Position events are throttled to ~10Hz on the event bus
const POSITION_EVENT_INTERVAL: Duration = Duration::from_millis(100);

type ControlResult<T> = Result<T, ControlError>;

/// Runtime mix mirror for one stem of the active song
///
/// The engine owns the authoritative state; this mirror lets toggle commands
/// compute their next value without querying the audio thread.
struct StemRuntime {
    id: String,
    muted: bool,
    soloed: bool,
}

#[derive(Default)]
struct ActiveSong {
    song_id: Option<String>,
    song: Option<Arc<DecodedSong>>,
    stems: Vec<StemRuntime>,
}

struct PreloadedSet {
    setlist_id: String,
    song_ids: Vec<String>,
}

/// The engine façade
pub struct Controller {
    db: Arc<Database>,
    cache: Arc<SongCache>,
    events: EventBus,
    outbox: Arc<CommandOutbox>,
    driver: OutputDriver,
    active: Arc<Mutex<ActiveSong>>,
    preloaded: Arc<Mutex<Option<PreloadedSet>>>,
    stream: Mutex<Option<StreamInfo>>,
    shutdown: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl Controller {
    /// Open the engine against the default per-user store location
    pub fn new() -> ControlResult<Self> {
        Self::with_store_path(crate::paths::default_store_path())
    }

    /// Open the engine against a specific store file
    pub fn with_store_path(path: PathBuf) -> ControlResult<Self> {
        let db = Arc::new(Database::open(&path)?);
        Self::build(db)
    }

    /// Build on an existing store handle (tests use an in-memory store)
    pub fn with_database(db: Arc<Database>) -> ControlResult<Self> {
        Self::build(db)
    }

    fn build(db: Arc<Database>) -> ControlResult<Self> {
        let settings = db.get_settings()?;
        let events = EventBus::new();

        let loader = SongLoader::new(db.clone(), events.clone());
        let cache = Arc::new(SongCache::new(loader, events.clone(), settings.cache_bytes));

        let (command_tx, command_rx) = command_channel();
        let (telemetry_tx, telemetry_rx) = telemetry_channel();
        let (retired_tx, retired_rx) = retired_channel();

        let engine = PlaybackEngine::new(telemetry_tx, retired_tx);
        let state = CallbackState::new(engine, command_rx);

        let (notice_tx, notice_rx) = crossbeam_channel::unbounded();
        let driver = OutputDriver::spawn(state, notice_tx);

        let stream = match driver.configure(StreamRequest {
            device_name: settings.output_device.clone(),
            buffer_size: settings.buffer_size,
            sample_rate: settings.sample_rate,
        }) {
            Ok(info) => Some(info),
            Err(e) => {
                // The engine stays usable for library/import work; playback
                // needs a later switch_audio_device.
                log::warn!("audio output unavailable at startup: {}", e);
                events.emit(AppEvent::AudioError {
                    kind: "DeviceUnavailable".to_string(),
                    message: e.to_string(),
                });
                None
            }
        };

        let outbox = Arc::new(CommandOutbox::new(command_tx));
        let active = Arc::new(Mutex::new(ActiveSong::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let pump = spawn_pump(PumpContext {
            outbox: outbox.clone(),
            telemetry_rx,
            retired_rx,
            notice_rx,
            events: events.clone(),
            active: active.clone(),
            shutdown: shutdown.clone(),
        });

        Ok(Self {
            db,
            cache,
            events,
            outbox,
            driver,
            active,
            preloaded: Arc::new(Mutex::new(None)),
            stream: Mutex::new(stream),
            shutdown,
            pump: Some(pump),
        })
    }

    /// Subscribe to the event surface
    pub fn subscribe(&self) -> Receiver<AppEvent> {
        self.events.subscribe()
    }

    // ---- playback -------------------------------------------------------

    /// Load a song (from cache or disk) and start playing it
    pub fn play_song(&self, song_id: &str) -> ControlResult<()> {
        self.db.get_song(song_id)?;

        let song = self.cache.get_or_load_pinned(song_id)?;

        let previous = {
            let mut active = self.lock_active();
            let previous = active.song_id.take();

            active.song_id = Some(song_id.to_string());
            active.stems = song
                .stems
                .iter()
                .map(|stem| StemRuntime {
                    id: stem.id.clone(),
                    muted: stem.default_muted,
                    soloed: false,
                })
                .collect();
            active.song = Some(song.clone());
            previous
        };

        if let Some(previous) = previous {
            if previous != song_id && !self.is_preload_pinned(&previous) {
                self.cache.unpin(&previous);
            }
        }

        self.outbox.send(EngineCommand::LoadSong(song));
        self.outbox.send(EngineCommand::Play);
        log::info!("playing song {}", song_id);
        Ok(())
    }

    pub fn pause_playback(&self) -> ControlResult<()> {
        self.ensure_active()?;
        self.outbox.send(EngineCommand::Pause);
        Ok(())
    }

    pub fn resume_playback(&self) -> ControlResult<()> {
        self.ensure_active()?;
        self.outbox.send(EngineCommand::Play);
        Ok(())
    }

    pub fn stop_playback(&self) -> ControlResult<()> {
        self.ensure_active()?;
        self.outbox.send(EngineCommand::Stop);
        Ok(())
    }

    /// Seek to a position in seconds (clamped to the song length)
    pub fn seek_to_position(&self, seconds: f64) -> ControlResult<()> {
        self.ensure_active()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ControlError::InvalidSeekPosition(seconds));
        }
        let frame = (seconds * SAMPLE_RATE as f64) as u64;
        self.outbox.send(EngineCommand::Seek { frame });
        Ok(())
    }

    pub fn set_master_volume(&self, volume: f32) -> ControlResult<()> {
        self.outbox.send(EngineCommand::SetMasterGain {
            gain: volume.clamp(0.0, 1.0),
        });
        Ok(())
    }

    // ---- stems ----------------------------------------------------------

    /// Set a stem's runtime gain; also persisted as the stem's default
    pub fn set_stem_volume(&self, stem_id: &str, volume: f32) -> ControlResult<()> {
        let volume = volume.clamp(0.0, 1.0);
        let index = self.stem_index(stem_id)?;
        self.outbox.send(EngineCommand::SetStemGain {
            stem: index,
            gain: volume,
        });

        let mut stem = self.db.get_stem(stem_id)?;
        stem.gain = volume as f64;
        self.db.update_stem(&stem)?;
        Ok(())
    }

    /// Toggle a stem's mute; returns the new state. The default mute flag is
    /// persisted so the song reloads the way it was left.
    pub fn toggle_stem_mute(&self, stem_id: &str) -> ControlResult<bool> {
        let (index, muted) = {
            let mut active = self.lock_active();
            let index = active
                .stems
                .iter()
                .position(|s| s.id == stem_id)
                .ok_or_else(|| ControlError::UnknownStem(stem_id.to_string()))?;
            active.stems[index].muted = !active.stems[index].muted;
            (index, active.stems[index].muted)
        };

        self.outbox
            .send(EngineCommand::SetStemMute { stem: index, muted });

        let mut stem = self.db.get_stem(stem_id)?;
        stem.muted = muted;
        self.db.update_stem(&stem)?;
        Ok(muted)
    }

    /// Toggle a stem's solo; returns the new state. Solo is ephemeral.
    pub fn toggle_stem_solo(&self, stem_id: &str) -> ControlResult<bool> {
        let (index, soloed) = {
            let mut active = self.lock_active();
            let index = active
                .stems
                .iter()
                .position(|s| s.id == stem_id)
                .ok_or_else(|| ControlError::UnknownStem(stem_id.to_string()))?;
            active.stems[index].soloed = !active.stems[index].soloed;
            (index, active.stems[index].soloed)
        };

        self.outbox
            .send(EngineCommand::SetStemSolo { stem: index, soloed });
        Ok(soloed)
    }

    // ---- library --------------------------------------------------------

    pub fn import_files(
        &self,
        paths: Vec<PathBuf>,
        title: String,
        artist: Option<String>,
        key: Option<String>,
        time_signature: Option<String>,
    ) -> ControlResult<String> {
        let song_id = import_song(
            &self.db,
            &self.events,
            ImportRequest {
                file_paths: paths,
                title,
                artist,
                key,
                time_signature,
            },
        )?;
        Ok(song_id)
    }

    pub fn get_all_songs(&self) -> ControlResult<Vec<Song>> {
        Ok(self.db.list_songs(None)?)
    }

    pub fn get_song(&self, song_id: &str) -> ControlResult<Song> {
        Ok(self.db.get_song(song_id)?)
    }

    pub fn get_song_stems(&self, song_id: &str) -> ControlResult<Vec<Stem>> {
        self.db.get_song(song_id)?;
        Ok(self.db.stems_for_song(song_id)?)
    }

    pub fn search_songs(&self, query: &str) -> ControlResult<Vec<Song>> {
        Ok(self.db.list_songs(Some(&SongFilter {
            search_query: Some(query.to_string()),
            ..Default::default()
        }))?)
    }

    pub fn filter_songs(&self, mut filter: SongFilter) -> ControlResult<Vec<Song>> {
        filter.tempo_min = filter.tempo_min.map(|t| t.clamp(20.0, 300.0));
        filter.tempo_max = filter.tempo_max.map(|t| t.clamp(20.0, 300.0));
        Ok(self.db.list_songs(Some(&filter))?)
    }

    /// Delete a song; stops playback first if it is the active song
    pub fn delete_song(&self, song_id: &str) -> ControlResult<()> {
        {
            let mut active = self.lock_active();
            if active.song_id.as_deref() == Some(song_id) {
                self.outbox.send(EngineCommand::Stop);
                *active = ActiveSong::default();
            }
        }

        if let Some(set) = self.preloaded.lock().expect("preload set poisoned").as_mut() {
            set.song_ids.retain(|id| id != song_id);
        }

        self.cache.remove(song_id);
        self.db.delete_song(song_id)?;
        Ok(())
    }

    // ---- setlists -------------------------------------------------------

    pub fn create_setlist(&self, name: &str) -> ControlResult<Setlist> {
        Ok(self.db.create_setlist(name)?)
    }

    pub fn get_setlist(&self, setlist_id: &str) -> ControlResult<Setlist> {
        Ok(self.db.get_setlist(setlist_id)?)
    }

    pub fn get_all_setlists(&self) -> ControlResult<Vec<Setlist>> {
        Ok(self.db.list_setlists()?)
    }

    pub fn update_setlist(
        &self,
        setlist_id: &str,
        name: &str,
        song_ids: &[String],
    ) -> ControlResult<()> {
        Ok(self.db.update_setlist(setlist_id, name, song_ids)?)
    }

    pub fn delete_setlist(&self, setlist_id: &str) -> ControlResult<()> {
        self.release_preload_if(setlist_id);
        Ok(self.db.delete_setlist(setlist_id)?)
    }

    pub fn add_song_to_setlist(&self, setlist_id: &str, song_id: &str) -> ControlResult<()> {
        Ok(self.db.add_song_to_setlist(setlist_id, song_id)?)
    }

    pub fn remove_song_from_setlist(&self, setlist_id: &str, song_id: &str) -> ControlResult<()> {
        Ok(self.db.remove_song_from_setlist(setlist_id, song_id)?)
    }

    pub fn reorder_setlist_songs(
        &self,
        setlist_id: &str,
        song_ids: &[String],
    ) -> ControlResult<()> {
        Ok(self.db.reorder_setlist_songs(setlist_id, song_ids)?)
    }

    /// Load and pin every song of a setlist in the background
    ///
    /// Replaces any previously preloaded setlist (its pins are released,
    /// except the active song). Progress arrives as `preload:progress` /
    /// `preload:complete`; individual song failures are reported as
    /// `audio:error` events and do not abort the rest.
    pub fn preload_setlist(&self, setlist_id: &str) -> ControlResult<()> {
        let setlist = self.db.get_setlist(setlist_id)?;

        let old = {
            let mut preloaded = self.preloaded.lock().expect("preload set poisoned");
            std::mem::replace(
                &mut *preloaded,
                Some(PreloadedSet {
                    setlist_id: setlist.id.clone(),
                    song_ids: setlist.song_ids.clone(),
                }),
            )
        };
        if let Some(old) = old {
            self.release_pins(&old, Some(&setlist.song_ids));
        }

        let cache = self.cache.clone();
        let events = self.events.clone();
        let setlist_id = setlist.id.clone();
        let song_ids = setlist.song_ids;

        std::thread::Builder::new()
            .name("setlist-preload".to_string())
            .spawn(move || {
                let total = song_ids.len();
                for (i, song_id) in song_ids.iter().enumerate() {
                    match cache.get_or_load_pinned(song_id) {
                        Ok(_) => {}
                        Err(e) => {
                            log::error!("preload of {} failed: {}", song_id, e);
                            events.emit(AppEvent::AudioError {
                                kind: "SongLoadFailed".to_string(),
                                message: e.to_string(),
                            });
                        }
                    }
                    events.emit(AppEvent::PreloadProgress {
                        setlist_id: setlist_id.clone(),
                        current: i + 1,
                        total,
                    });
                }
                events.emit(AppEvent::PreloadComplete { setlist_id });
            })
            .expect("failed to spawn preload thread");

        Ok(())
    }

    // ---- audio configuration -------------------------------------------

    pub fn get_audio_devices(&self) -> ControlResult<Vec<OutputDeviceInfo>> {
        Ok(list_output_devices()?)
    }

    /// Switch the output device without losing playback state
    pub fn switch_audio_device(&self, device_name: &str) -> ControlResult<StreamInfo> {
        let mut settings = self.db.get_settings()?;
        settings.output_device = Some(device_name.to_string());
        self.db.update_settings(&settings)?;

        let info = self.driver.configure(StreamRequest {
            device_name: Some(device_name.to_string()),
            buffer_size: settings.buffer_size,
            sample_rate: settings.sample_rate,
        })?;
        *self.stream.lock().expect("stream info poisoned") = Some(info.clone());
        Ok(info)
    }

    pub fn set_buffer_size(&self, frames: u32) -> ControlResult<StreamInfo> {
        let mut settings = self.db.get_settings()?;
        settings.buffer_size = frames.clamp(64, crate::engine::MAX_BUFFER_SIZE as u32);
        self.db.update_settings(&settings)?;
        self.reopen_stream(&settings)
    }

    pub fn set_sample_rate(&self, hz: u32) -> ControlResult<StreamInfo> {
        if !(8_000..=192_000).contains(&hz) {
            return Err(ControlError::Audio(
                crate::audio::AudioError::SampleRateUnsupported {
                    device: "requested".to_string(),
                    requested: hz,
                },
            ));
        }
        let mut settings = self.db.get_settings()?;
        settings.sample_rate = hz;
        self.db.update_settings(&settings)?;
        self.reopen_stream(&settings)
    }

    pub fn get_audio_settings(&self) -> ControlResult<AudioSettings> {
        Ok(self.db.get_settings()?)
    }

    /// The stream the driver currently runs, if any
    pub fn current_stream(&self) -> Option<StreamInfo> {
        self.stream.lock().expect("stream info poisoned").clone()
    }

    fn reopen_stream(&self, settings: &AudioSettings) -> ControlResult<StreamInfo> {
        let info = self.driver.configure(StreamRequest {
            device_name: settings.output_device.clone(),
            buffer_size: settings.buffer_size,
            sample_rate: settings.sample_rate,
        })?;
        *self.stream.lock().expect("stream info poisoned") = Some(info.clone());
        Ok(info)
    }

    // ---- cache ----------------------------------------------------------

    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn set_cache_size(&self, bytes: u64) -> ControlResult<()> {
        let mut settings = self.db.get_settings()?;
        settings.cache_bytes = bytes;
        self.db.update_settings(&settings)?;
        self.cache.set_byte_budget(bytes);
        Ok(())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // ---- internals ------------------------------------------------------

    fn lock_active(&self) -> std::sync::MutexGuard<'_, ActiveSong> {
        self.active.lock().expect("active song poisoned")
    }

    fn ensure_active(&self) -> ControlResult<()> {
        if self.lock_active().song_id.is_none() {
            return Err(ControlError::NoSongLoaded);
        }
        Ok(())
    }

    fn stem_index(&self, stem_id: &str) -> ControlResult<usize> {
        self.lock_active()
            .stems
            .iter()
            .position(|s| s.id == stem_id)
            .ok_or_else(|| ControlError::UnknownStem(stem_id.to_string()))
    }

    fn is_preload_pinned(&self, song_id: &str) -> bool {
        self.preloaded
            .lock()
            .expect("preload set poisoned")
            .as_ref()
            .map(|set| set.song_ids.iter().any(|id| id == song_id))
            .unwrap_or(false)
    }

    fn release_preload_if(&self, setlist_id: &str) {
        let old = {
            let mut preloaded = self.preloaded.lock().expect("preload set poisoned");
            match preloaded.as_ref() {
                Some(set) if set.setlist_id == setlist_id => preloaded.take(),
                _ => None,
            }
        };
        if let Some(old) = old {
            self.release_pins(&old, None);
        }
    }

    /// Unpin a retired preload set, keeping the active song and anything in
    /// `keep` pinned
    fn release_pins(&self, set: &PreloadedSet, keep: Option<&[String]>) {
        let active_id = self.lock_active().song_id.clone();
        for song_id in &set.song_ids {
            let keep_pinned = active_id.as_deref() == Some(song_id.as_str())
                || keep
                    .map(|ids| ids.iter().any(|id| id == song_id))
                    .unwrap_or(false);
            if !keep_pinned {
                self.cache.unpin(song_id);
            }
        }
    }

    /// Drive the audio callback synthetically (tests run without a device;
    /// the driver renders on the parked callback state)
    #[cfg(test)]
    fn drive_audio(&self, frames: usize) {
        self.driver.drive(frames);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
        self.driver.stop();
    }
}

// ---- telemetry pump -----------------------------------------------------

struct PumpContext {
    outbox: Arc<CommandOutbox>,
    telemetry_rx: rtrb::Consumer<EngineEvent>,
    retired_rx: rtrb::Consumer<Arc<DecodedSong>>,
    notice_rx: Receiver<DriverNotice>,
    events: EventBus,
    active: Arc<Mutex<ActiveSong>>,
    shutdown: Arc<AtomicBool>,
}

fn spawn_pump(ctx: PumpContext) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("telemetry-pump".to_string())
        .spawn(move || pump_loop(ctx))
        .expect("failed to spawn telemetry pump")
}

fn pump_loop(mut ctx: PumpContext) {
    log::debug!("telemetry pump started");
    let mut last_position_emit = Instant::now() - POSITION_EVENT_INTERVAL;
    let mut last_position_seconds = 0.0f64;

    while !ctx.shutdown.load(Ordering::Acquire) {
        // Re-try commands that overflowed the ring.
        ctx.outbox.flush();

        // Songs replaced on the audio thread get their final drop here.
        while let Ok(retired) = ctx.retired_rx.pop() {
            log::debug!("releasing retired song {}", retired.song_id);
            drop(retired);
        }

        while let Ok(event) = ctx.telemetry_rx.pop() {
            match event {
                EngineEvent::Position { frame } => {
                    let seconds = frame as f64 / SAMPLE_RATE as f64;
                    // Jumps backwards (stop, rewind seek) bypass the
                    // throttle so shells never show a stale position.
                    if last_position_emit.elapsed() >= POSITION_EVENT_INTERVAL
                        || seconds < last_position_seconds
                    {
                        last_position_emit = Instant::now();
                        last_position_seconds = seconds;
                        ctx.events.emit(AppEvent::PlaybackPosition { seconds });
                    }
                }
                EngineEvent::State { state } => {
                    ctx.events.emit(AppEvent::PlaybackStateChanged { state });
                }
                EngineEvent::Levels(frame) => {
                    let stems = {
                        let active = ctx.active.lock().expect("active song poisoned");
                        active
                            .stems
                            .iter()
                            .take(frame.stem_count)
                            .enumerate()
                            .map(|(i, stem)| StemLevel {
                                stem_id: stem.id.clone(),
                                peak: frame.stems[i],
                            })
                            .collect::<Vec<_>>()
                    };
                    ctx.events.emit(AppEvent::PlaybackLevels {
                        stems,
                        master: frame.master,
                    });
                }
            }
        }

        while let Ok(notice) = ctx.notice_rx.try_recv() {
            match notice {
                DriverNotice::DeviceLost { message } => {
                    log::error!("output device lost: {}", message);
                    // Keep the transport state and wait for the user to pick
                    // a new device; the engine pauses at the next drain.
                    ctx.outbox.send(EngineCommand::Pause);
                    ctx.events.emit(AppEvent::PlaybackStateChanged {
                        state: PlaybackState::Paused,
                    });
                    ctx.events.emit(AppEvent::AudioError {
                        kind: "DeviceDisconnected".to_string(),
                        message,
                    });
                }
            }
        }

        std::thread::sleep(PUMP_INTERVAL);
    }
    log::debug!("telemetry pump shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_wav(path: &Path, frames: u32, seed: i16) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let s = seed.wrapping_add((i % 11) as i16 * 100);
            writer.write_sample(s).unwrap();
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    struct Fixture {
        controller: Controller,
        _dir: tempfile::TempDir,
        dir_path: PathBuf,
        next_seed: i16,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Arc::new(Database::open_in_memory().unwrap());
            let controller = Controller::with_database(db).unwrap();
            let dir_path = dir.path().to_path_buf();
            Self {
                controller,
                _dir: dir,
                dir_path,
                next_seed: 1000,
            }
        }

        /// Import a song with `stems` one-second stems; returns its id
        fn import_song(&mut self, title: &str, stems: usize) -> String {
            let mut paths = Vec::new();
            for i in 0..stems {
                let path = self.dir_path.join(format!("{}-{}.wav", title, i));
                write_wav(&path, 48_000, self.next_seed);
                self.next_seed = self.next_seed.wrapping_add(37);
                paths.push(path);
            }
            self.controller
                .import_files(paths, title.to_string(), None, None, None)
                .unwrap()
        }
    }

    #[test]
    fn test_play_song_loads_pins_and_starts() {
        let mut fx = Fixture::new();
        let song_id = fx.import_song("Opener", 2);

        let rx = fx.controller.subscribe();
        fx.controller.play_song(&song_id).unwrap();

        // Load events were emitted and the song is cached.
        let events: Vec<_> = rx.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, AppEvent::LoadComplete { song_id: id } if id == &song_id)));
        assert_eq!(fx.controller.get_cache_stats().entries, 1);

        // The engine receives LoadSong + Play at the next callback.
        fx.controller.drive_audio(4800);
        std::thread::sleep(Duration::from_millis(80));
        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.iter().any(|e| matches!(
            e,
            AppEvent::PlaybackStateChanged {
                state: PlaybackState::Playing
            }
        )));
    }

    #[test]
    fn test_play_unknown_song_is_not_found() {
        let fx = Fixture::new();
        let err = fx.controller.play_song("missing").unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[test]
    fn test_transport_without_song_is_rejected() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.controller.pause_playback(),
            Err(ControlError::NoSongLoaded)
        ));
        assert!(matches!(
            fx.controller.resume_playback(),
            Err(ControlError::NoSongLoaded)
        ));
        assert!(matches!(
            fx.controller.stop_playback(),
            Err(ControlError::NoSongLoaded)
        ));
        assert!(matches!(
            fx.controller.seek_to_position(1.0),
            Err(ControlError::NoSongLoaded)
        ));
    }

    #[test]
    fn test_seek_rejects_invalid_positions() {
        let mut fx = Fixture::new();
        let song_id = fx.import_song("Seekable", 1);
        fx.controller.play_song(&song_id).unwrap();

        assert!(matches!(
            fx.controller.seek_to_position(-1.0),
            Err(ControlError::InvalidSeekPosition(_))
        ));
        assert!(matches!(
            fx.controller.seek_to_position(f64::NAN),
            Err(ControlError::InvalidSeekPosition(_))
        ));
        fx.controller.seek_to_position(0.5).unwrap();
    }

    #[test]
    fn test_position_events_flow_while_playing() {
        let mut fx = Fixture::new();
        let song_id = fx.import_song("Clock", 1);

        fx.controller.play_song(&song_id).unwrap();
        let rx = fx.controller.subscribe();

        // Simulate ~0.5s of audio callbacks.
        for _ in 0..5 {
            fx.controller.drive_audio(4800);
        }
        std::thread::sleep(Duration::from_millis(100));

        let positions: Vec<f64> = rx
            .try_iter()
            .filter_map(|e| match e {
                AppEvent::PlaybackPosition { seconds } => Some(seconds),
                _ => None,
            })
            .collect();
        assert!(!positions.is_empty());
        // Monotonic within the session
        for pair in positions.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(positions.last().unwrap() <= &1.0);
    }

    #[test]
    fn test_stem_volume_persists_default() {
        let mut fx = Fixture::new();
        let song_id = fx.import_song("Mixable", 2);
        fx.controller.play_song(&song_id).unwrap();

        let stems = fx.controller.get_song_stems(&song_id).unwrap();
        fx.controller.set_stem_volume(&stems[0].id, 0.3).unwrap();

        let reloaded = fx.controller.get_song_stems(&song_id).unwrap();
        assert!((reloaded[0].gain - 0.3).abs() < 1e-9);

        // Out-of-range input clamps
        fx.controller.set_stem_volume(&stems[0].id, 7.0).unwrap();
        let reloaded = fx.controller.get_song_stems(&song_id).unwrap();
        assert!((reloaded[0].gain - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_toggle_mute_roundtrip() {
        let mut fx = Fixture::new();
        let song_id = fx.import_song("Mutable", 1);
        fx.controller.play_song(&song_id).unwrap();

        let stem_id = fx.controller.get_song_stems(&song_id).unwrap()[0].id.clone();

        assert!(fx.controller.toggle_stem_mute(&stem_id).unwrap());
        assert!(fx.controller.get_song_stems(&song_id).unwrap()[0].muted);

        assert!(!fx.controller.toggle_stem_mute(&stem_id).unwrap());
        assert!(!fx.controller.get_song_stems(&song_id).unwrap()[0].muted);
    }

    #[test]
    fn test_toggle_solo_is_ephemeral() {
        let mut fx = Fixture::new();
        let song_id = fx.import_song("Soloable", 1);
        fx.controller.play_song(&song_id).unwrap();

        let stem_id = fx.controller.get_song_stems(&song_id).unwrap()[0].id.clone();
        assert!(fx.controller.toggle_stem_solo(&stem_id).unwrap());
        assert!(!fx.controller.toggle_stem_solo(&stem_id).unwrap());

        // Nothing persisted
        assert!(!fx.controller.get_song_stems(&song_id).unwrap()[0].muted);
    }

    #[test]
    fn test_stem_commands_need_active_song() {
        let mut fx = Fixture::new();
        let song_id = fx.import_song("Inactive", 1);
        let stem_id = fx.controller.get_song_stems(&song_id).unwrap()[0].id.clone();

        let err = fx.controller.toggle_stem_mute(&stem_id).unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[test]
    fn test_preload_setlist_pins_members() {
        let mut fx = Fixture::new();
        let a = fx.import_song("A", 1);
        let b = fx.import_song("B", 1);

        let setlist = fx.controller.create_setlist("Sunday").unwrap();
        fx.controller.add_song_to_setlist(&setlist.id, &a).unwrap();
        fx.controller.add_song_to_setlist(&setlist.id, &b).unwrap();

        let rx = fx.controller.subscribe();
        fx.controller.preload_setlist(&setlist.id).unwrap();

        // Wait for completion.
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut complete = false;
        while Instant::now() < deadline && !complete {
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(200)) {
                complete = matches!(event, AppEvent::PreloadComplete { .. });
            }
        }
        assert!(complete);
        assert_eq!(fx.controller.get_cache_stats().entries, 2);

        // Pinned entries survive a zero budget.
        fx.controller.set_cache_size(0).unwrap();
        assert_eq!(fx.controller.get_cache_stats().entries, 2);
    }

    #[test]
    fn test_delete_active_song_stops_and_evicts() {
        let mut fx = Fixture::new();
        let song_id = fx.import_song("Doomed", 1);
        fx.controller.play_song(&song_id).unwrap();
        assert_eq!(fx.controller.get_cache_stats().entries, 1);

        fx.controller.delete_song(&song_id).unwrap();

        assert_eq!(fx.controller.get_cache_stats().entries, 0);
        assert!(matches!(
            fx.controller.resume_playback(),
            Err(ControlError::NoSongLoaded)
        ));
        assert!(fx.controller.get_song(&song_id).is_err());
    }

    #[test]
    fn test_cache_commands() {
        let mut fx = Fixture::new();
        let song_id = fx.import_song("Cached", 1);
        fx.controller.play_song(&song_id).unwrap();

        let stats = fx.controller.get_cache_stats();
        assert_eq!(stats.entries, 1);
        assert!(stats.used_bytes > 0);

        fx.controller.set_cache_size(123_456_789).unwrap();
        assert_eq!(fx.controller.get_cache_stats().budget_bytes, 123_456_789);
        assert_eq!(
            fx.controller.get_audio_settings().unwrap().cache_bytes,
            123_456_789
        );

        // The active song is pinned; clear keeps it.
        fx.controller.clear_cache();
        assert_eq!(fx.controller.get_cache_stats().entries, 1);
    }

    #[test]
    fn test_filter_clamps_tempo_bounds() {
        let fx = Fixture::new();
        // No songs; the call just has to accept and clamp the range.
        let songs = fx
            .controller
            .filter_songs(SongFilter {
                tempo_min: Some(1.0),
                tempo_max: Some(999.0),
                ..Default::default()
            })
            .unwrap();
        assert!(songs.is_empty());
    }

    #[test]
    fn test_switching_songs_unpins_previous() {
        let mut fx = Fixture::new();
        let first = fx.import_song("First", 1);
        let second = fx.import_song("Second", 1);

        fx.controller.play_song(&first).unwrap();
        fx.controller.play_song(&second).unwrap();

        // Only the new active song survives a zero budget.
        fx.controller.set_cache_size(0).unwrap();
        let stats = fx.controller.get_cache_stats();
        assert_eq!(stats.entries, 1);

        // And it is the second song: playing it again is a pure cache hit
        // (no further load:complete events).
        let rx = fx.controller.subscribe();
        fx.controller.play_song(&second).unwrap();
        assert!(rx
            .try_iter()
            .all(|e| !matches!(e, AppEvent::LoadComplete { .. })));
    }

    #[test]
    fn test_set_sample_rate_validates_range() {
        let fx = Fixture::new();
        let err = fx.controller.set_sample_rate(1_000).unwrap_err();
        assert_eq!(err.kind(), "SampleRateUnsupported");
    }

    #[test]
    fn test_audio_settings_persist_despite_missing_device() {
        let fx = Fixture::new();
        // Headless machines fail to open a stream, but the preference lands.
        let _ = fx.controller.set_buffer_size(256);
        assert_eq!(fx.controller.get_audio_settings().unwrap().buffer_size, 256);
    }
}
