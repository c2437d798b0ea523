// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Playback of a recording.
//!
//! The controller owns a [`TickLoader`] and a window of loaded ticks. Each
//! call to [`ReplayController::tick`] collects finished loader work, plays
//! as many ticks as elapsed time (or a pending seek) calls for, and keeps
//! the window between the configured watermarks.
//!
//! Tick numbers here are indices from the first recorded tick, not game
//! times.

pub mod handler;
pub mod volatile;

pub use handler::{EventLog, PlaybackEvent, ReplayHandler, SpaceId};
pub use volatile::VolatileCache;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::PlaybackConfig;
use crate::error::{ErrorKind, ReplayError, ReplayResult};
use crate::format::{
    Block, BlockReader, Direction, EntityId, ProtocolVersion, ReplayHeader, ReplayMetaData,
    ReplayTickData, Vector3,
};
use crate::loader::{LoaderEvent, RequestType, TickLoader};
use crate::reader::{ReplayReader, ReplayReaderListener};
use crate::writer::{BackgroundFileWriter, FileEvent, WriteTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    AwaitingHeader,
    Playing,
    Paused,
}

/// What happens to the replay file when the controller is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDisposition {
    Keep,
    Remove,
}

/// Counts ticks in data as it arrives over the network. Nothing is
/// verified here; the loader verifies when it reads the buffer file.
#[derive(Default)]
struct TickCounter;

impl ReplayReaderListener for TickCounter {
    fn on_tick_data(&mut self, _game_time: u32, _is_compressed: bool, _data: &[u8]) -> Result<(), String> {
        Ok(())
    }
}

/// Reception state when the recording arrives as a stream.
struct Receiver {
    counter: ReplayReader<TickCounter>,
    buffer_file: Box<dyn BackgroundFileWriter>,
    is_receiving: bool,
    reported_meta_data: bool,
}

/// Where the recording comes from.
pub enum ReplaySource {
    /// A complete file at the loader's path.
    File,
    /// Data arriving through [`ReplayController::add_replay_data`]. It is
    /// written to `buffer_file`, which must be the file the loader reads.
    Stream {
        buffer_file: Box<dyn BackgroundFileWriter>,
        /// Only used to size signatures.
        verifying_key_hex: String,
    },
}

pub struct ReplayController<H: ReplayHandler> {
    handler: H,
    loader: TickLoader,
    config: PlaybackConfig,
    space_id: SpaceId,
    path: PathBuf,
    disposition: FileDisposition,
    receiver: Option<Receiver>,

    ticks: VecDeque<ReplayTickData>,
    volatile: VolatileCache,

    header: Option<ReplayHeader>,
    header_requested: bool,
    update_frequency: u32,
    first_game_time: u32,
    num_ticks_reported: u32,
    is_live: bool,

    current_tick: u32,
    seek_to_tick: Option<u32>,
    time_since_last_tick: f64,
    speed_scale: f32,
    is_playing: bool,
    should_force_volatile: bool,
    has_finished: bool,

    is_destroyed: bool,
    error_message: Option<String>,
}

impl<H: ReplayHandler> ReplayController<H> {
    pub fn new(
        handler: H,
        space_id: SpaceId,
        loader: TickLoader,
        source: ReplaySource,
        config: &PlaybackConfig,
        disposition: FileDisposition,
    ) -> Self {
        let receiver = match source {
            ReplaySource::File => None,
            ReplaySource::Stream { buffer_file, verifying_key_hex } => Some(Receiver {
                counter: ReplayReader::with_verifying_key(TickCounter, &verifying_key_hex, false, usize::MAX),
                buffer_file,
                is_receiving: true,
                reported_meta_data: false,
            }),
        };
        let path = loader.path().to_path_buf();
        Self {
            handler,
            loader,
            config: config.clone(),
            space_id,
            path,
            disposition,
            receiver,
            ticks: VecDeque::new(),
            volatile: VolatileCache::new(config.volatile_injection_period),
            header: None,
            header_requested: false,
            update_frequency: 0,
            first_game_time: 0,
            num_ticks_reported: 0,
            is_live: false,
            current_tick: 0,
            seek_to_tick: None,
            time_since_last_tick: 0.0,
            speed_scale: 1.0,
            is_playing: false,
            should_force_volatile: false,
            has_finished: false,
            is_destroyed: false,
            error_message: None,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> Option<&ReplayHeader> {
        self.header.as_ref()
    }

    pub fn state(&self) -> PlaybackState {
        if self.is_destroyed || !self.header_requested {
            PlaybackState::Idle
        } else if self.header.is_none() {
            PlaybackState::AwaitingHeader
        } else if self.is_playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }

    pub fn is_seeking(&self) -> bool {
        self.seek_to_tick.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.is_destroyed
    }

    pub fn is_receiving(&self) -> bool {
        self.receiver.as_ref().map_or(false, |r| r.is_receiving)
    }

    /// True when the recording was still being written when its header
    /// was read.
    pub fn is_live(&self) -> bool {
        self.is_live
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick
    }

    pub fn num_ticks_loaded(&self) -> usize {
        self.ticks.len()
    }

    /// Ticks known to exist: the header count for a file, the count
    /// received so far for a stream.
    pub fn num_ticks_total(&self) -> u32 {
        match &self.receiver {
            Some(r) => r.counter.num_ticks_read(),
            None => self.num_ticks_reported,
        }
    }

    pub fn update_frequency(&self) -> u32 {
        self.update_frequency
    }

    /// Game time of the current tick, once the header has been read.
    pub fn current_tick_time(&self) -> Option<u32> {
        self.header
            .as_ref()
            .map(|_| self.first_game_time.wrapping_add(self.current_tick))
    }

    pub fn current_tick_time_in_seconds(&self) -> Option<f64> {
        if self.update_frequency == 0 {
            return None;
        }
        self.current_tick_time()
            .map(|t| f64::from(t) / f64::from(self.update_frequency))
    }

    pub fn speed_scale(&self) -> f32 {
        self.speed_scale
    }

    pub fn set_speed_scale(&mut self, speed_scale: f32) {
        self.speed_scale = speed_scale.max(0.0);
    }

    pub fn pause(&mut self) {
        self.is_playing = false;
        self.seek_to_tick = None;
        self.time_since_last_tick = 0.0;
    }

    pub fn resume(&mut self) {
        self.is_playing = true;
        self.seek_to_tick = None;
        self.time_since_last_tick = 0.0;
    }

    /// Moves playback to `tick`. Going backwards reloads from the start
    /// of the file and replays forward, since entity state is cumulative.
    pub fn set_current_tick(&mut self, tick: u32) -> bool {
        if self.is_destroyed {
            return false;
        }
        if tick < self.current_tick {
            let end = self.current_tick.min(self.config.max_ticks_in_memory);
            self.loader.add_request(RequestType::Prepend, 0, end);
        }
        self.seek_to_tick = Some(tick);
        true
    }

    /// Feeds recording bytes received over the network.
    pub fn add_replay_data(&mut self, data: &[u8]) -> ReplayResult<()> {
        if self.is_destroyed {
            return Err(ReplayError::Closed);
        }
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(ReplayError::Rejected(
                "controller is playing a complete file".into(),
            ));
        };

        if let Err(e) = receiver.counter.add_data(data) {
            if let ReplayError::UnsupportedVersion { found, .. } = &e {
                self.refuse_version(*found);
                return Err(e);
            }
            error!(error = %e, "could not parse replay data");
            self.fail(format!("Invalid or corrupt replay data: {}", e));
            return Err(e);
        }
        receiver.buffer_file.queue_write(data.to_vec(), WriteTag::None);

        if !receiver.reported_meta_data {
            if let Some(meta_data) = receiver.counter.meta_data() {
                receiver.reported_meta_data = true;
                if !self.handler.on_read_meta_data(meta_data) {
                    self.fail("User callback rejected meta-data".into());
                    return Err(ReplayError::Rejected("meta-data rejected".into()));
                }
            }
        }
        Ok(())
    }

    /// No more data will arrive.
    pub fn replay_data_finalise(&mut self) {
        if let Some(receiver) = self.receiver.as_mut() {
            receiver.is_receiving = false;
        }
    }

    /// Advances playback by `time_delta` seconds of real time.
    pub fn tick(&mut self, time_delta: f64) {
        if self.is_destroyed {
            return;
        }
        self.process_background();
        if self.is_destroyed {
            return;
        }

        if self.should_force_volatile {
            self.should_force_volatile = false;
            self.volatile
                .process_for_tick(&mut self.handler, self.space_id, self.current_tick, true);
        }

        if self.header.is_none() {
            if self.loader.next_queued().is_none() {
                self.header_requested = true;
                self.loader.add_header_request();
            }
            return;
        }

        if !self.is_playing && !self.is_seeking() {
            return;
        }
        if self.loader.next_queued() == Some(RequestType::Prepend) {
            return;
        }

        let mut ticks_left: u64 = match self.seek_to_tick {
            Some(target) => {
                self.time_since_last_tick = 0.0;
                (target.saturating_sub(self.current_tick) as usize).min(self.ticks.len()) as u64
            }
            None if self.current_tick == 0 => {
                self.time_since_last_tick = 0.0;
                1
            }
            None => {
                let frequency = f64::from(self.update_frequency.max(1));
                self.time_since_last_tick += time_delta * f64::from(self.speed_scale);
                let due = (self.time_since_last_tick * frequency).floor();
                if due < 1.0 {
                    return;
                }
                self.time_since_last_tick -= due / frequency;
                due as u64
            }
        };

        self.request_more_ticks();

        while (self.is_seeking() || self.is_playing) && ticks_left > 0 {
            let Some(tick) = self.ticks.pop_front() else { break };
            if self.is_seeking() {
                self.handler
                    .on_increase_total_time(1.0 / f64::from(self.update_frequency.max(1)));
            }
            if let Err(message) = self.process_tick(&tick) {
                self.handler.on_corrupted_data();
                self.fail(message);
                return;
            }
            self.handler.on_post_tick(self.current_tick);
            metrics::increment_counter!("tickvault_ticks_dispatched_total");
            self.current_tick += 1;
            ticks_left -= 1;
        }

        if self.seek_to_tick == Some(self.current_tick) {
            self.seek_to_tick = None;
            self.should_force_volatile = true;
        }

        if self.is_receiving()
            && self.speed_scale > 0.0
            && self.speed_scale < 1.0
            && self.num_ticks_total().saturating_sub(self.current_tick) <= self.config.ideal_ticks_left
        {
            self.speed_scale = 1.0;
        }

        if self.ticks.is_empty() && !self.is_receiving() && self.num_ticks_total() <= self.current_tick {
            // A seek past the end stops at the last tick.
            if self.seek_to_tick.take().is_some() {
                self.should_force_volatile = true;
            }
            if self.is_playing {
                self.handle_final();
            }
        }
    }

    /// Asks for more ticks once the window drops below the low-water
    /// mark, never beyond the high-water mark.
    fn request_more_ticks(&mut self) {
        let loaded = self.ticks.len() as u32;
        let highest_loaded = self.current_tick + loaded;
        if loaded >= self.config.min_ticks_in_memory
            || self.num_ticks_total() <= highest_loaded
            || self.loader.next_queued().is_some()
        {
            return;
        }
        let to_load = self.config.max_ticks_in_memory.saturating_sub(loaded);
        if to_load > 0 {
            self.loader
                .add_request(RequestType::Append, highest_loaded, highest_loaded + to_load);
        }
    }

    fn process_background(&mut self) {
        if let Some(receiver) = self.receiver.as_mut() {
            let failure = receiver
                .buffer_file
                .poll_completions()
                .into_iter()
                .find_map(|event| match event {
                    FileEvent::Failed { message, .. } => Some(message),
                    FileEvent::Completed { .. } => None,
                });
            if let Some(message) = failure {
                let path = receiver.buffer_file.path().display().to_string();
                error!(%path, %message, "could not write replay buffer file");
                self.fail(format!("Failed to write to \"{}\": {}", path, message));
                return;
            }
        }

        for event in self.loader.poll() {
            if self.is_destroyed {
                return;
            }
            match event {
                LoaderEvent::Header { header, meta_data, first_game_time } => {
                    self.on_header(header, meta_data, first_game_time)
                }
                LoaderEvent::Prepend(ticks) => self.on_prepend(ticks),
                LoaderEvent::Append(ticks) => self.on_append(ticks),
                LoaderEvent::UnsupportedVersion(found) => self.refuse_version(found),
                LoaderEvent::Error { kind, message } => self.on_loader_error(kind, message),
            }
        }
    }

    fn on_header(&mut self, header: ReplayHeader, meta_data: Option<ReplayMetaData>, first_game_time: u32) {
        info!(
            version = %header.version,
            digest = %hex::encode(header.digest),
            update_hz = header.update_frequency,
            num_ticks = header.num_ticks,
            first_game_time,
            "replay header read"
        );

        if !self.handler.on_read_header(&header) {
            self.fail("Header rejected by application".into());
            return;
        }
        // A stream reports its metadata as it arrives.
        if self.receiver.is_none() {
            if let Some(meta_data) = &meta_data {
                if !self.handler.on_read_meta_data(meta_data) {
                    self.fail("User callback rejected meta-data".into());
                    return;
                }
            }
        }

        if header.num_ticks == 0 && self.receiver.is_none() {
            warn!(path = %self.path.display(), "replay file does not report a tick count in its header");
        }
        self.is_playing = true;
        self.update_frequency = u32::from(header.update_frequency);
        self.first_game_time = first_game_time;
        self.is_live = header.is_live();
        self.num_ticks_reported = header.num_ticks;
        self.header = Some(header);
    }

    fn on_prepend(&mut self, ticks: Vec<ReplayTickData>) {
        if ticks.is_empty() {
            self.seek_to_tick = None;
            warn!("failed to prepend ticks, none returned");
            return;
        }
        let total = ticks.len();
        let fits = total + self.ticks.len() <= self.config.max_ticks_in_memory as usize;
        // The loaded window joins on only if the new range ends where it starts.
        if total as u32 != self.current_tick || !fits {
            self.ticks.clear();
        }
        for tick in ticks.into_iter().rev() {
            self.ticks.push_front(tick);
        }

        self.volatile.clear();
        self.handler.on_entities_reset();
        self.current_tick = 0;
        self.has_finished = false;
    }

    fn on_append(&mut self, ticks: Vec<ReplayTickData>) {
        if ticks.is_empty() {
            self.seek_to_tick = None;
            debug!("tick data writer is behind the reader, no ticks returned");
            return;
        }
        self.ticks.extend(ticks);
    }

    fn refuse_version(&mut self, found: ProtocolVersion) {
        self.handler.on_bad_version(found);
        let mismatch = ReplayError::UnsupportedVersion {
            found,
            expected: ProtocolVersion::CURRENT,
        };
        self.fail(mismatch.to_string());
    }

    fn on_loader_error(&mut self, kind: ErrorKind, message: String) {
        // A stream's buffer file may simply not exist yet.
        if kind == ErrorKind::FileMissing && self.receiver.is_some() && self.header.is_none() {
            return;
        }
        error!(%kind, %message, "tick loader failed");
        self.fail(format!("Invalid/corrupt replay data: {}", message));
    }

    /// Plays one tick. An error is fatal to playback.
    fn process_tick(&mut self, tick: &ReplayTickData) -> Result<(), String> {
        // Empty ticks happen when every source of a tick died at once.
        if tick.is_empty() {
            return Ok(());
        }

        let data = tick.decoded().map_err(|e| {
            error!(game_time = tick.game_time, error = %e, "failed to decompress tick data");
            String::from("Invalid/corrupt replay data: Failed to decompress tick data")
        })?;

        let mut has_space_data = false;
        for block in BlockReader::new(&data) {
            match block {
                Ok(Block::Final) => {
                    self.handle_final();
                    return Ok(());
                }
                Ok(block) => {
                    has_space_data |= matches!(block, Block::SpaceData { .. });
                    self.dispatch(block);
                }
                Err(e) if e.is_fatal() => {
                    error!(game_time = tick.game_time, error = %e, "invalid block type");
                    return Err(format!("Invalid/corrupt replay data: {}", e));
                }
                Err(e) => {
                    // Only this event is lost; nothing after it can be framed.
                    error!(game_time = tick.game_time, error = %e, "skipping undecodable event");
                    break;
                }
            }
        }

        if self.current_tick == 0 && !has_space_data {
            error!("tick 0 carries no space data");
            return Err("Invalid/corrupt replay data: Could not read space data for tick 0".into());
        }

        if !self.is_seeking() {
            self.volatile
                .process_for_tick(&mut self.handler, self.space_id, self.current_tick, false);
        }
        Ok(())
    }

    fn dispatch(&mut self, block: Block) {
        let space_id = self.space_id;
        match block {
            Block::EntityCreate {
                vehicle_id,
                entity_id,
                entity_type,
                position,
                direction,
                properties,
            } => self.handler.on_entity_create(
                entity_id,
                entity_type,
                space_id,
                vehicle_id,
                position,
                direction,
                &properties,
            ),
            Block::Volatile {
                entity_id,
                position,
                direction,
                vehicle_id,
            }
            | Block::VolatileOnGround {
                entity_id,
                position,
                direction,
                vehicle_id,
            } => self.move_entity(entity_id, vehicle_id, position, direction),
            Block::Method {
                entity_id,
                message_id,
                data,
            } => self.handler.on_entity_method(entity_id, message_id, &data),
            Block::PropertyChange {
                entity_id,
                is_slice,
                data,
            } => self.handler.on_entity_property(entity_id, is_slice, &data),
            Block::PlayerStateChange {
                player_id,
                has_become_player,
                entities_in_aoi,
            } => {
                self.handler.on_player_state_change(player_id, has_become_player);
                for entity_id in entities_in_aoi {
                    self.handler.on_aoi_change(player_id, entity_id, true);
                }
            }
            Block::AoiChange {
                player_id,
                entity_id,
                has_entered,
            } => self.handler.on_aoi_change(player_id, entity_id, has_entered),
            Block::EntityDelete { entity_id } => {
                self.handler.on_entity_leave(entity_id);
                self.volatile.remove(entity_id);
            }
            Block::SpaceData {
                entry_id,
                key,
                value,
            } => self.handler.on_space_data(space_id, entry_id, key, &value),
            Block::Final => self.handle_final(),
        }
    }

    /// While seeking, the move on the tick just before the target is held
    /// back; the forced reinjection after the seek delivers it.
    fn move_entity(&mut self, entity_id: EntityId, vehicle_id: EntityId, position: Vector3, direction: Direction) {
        let is_volatile = !self.is_seeking();
        let is_last_seek_tick = self
            .seek_to_tick
            .map_or(false, |target| target.saturating_sub(self.current_tick) <= 1);
        if !is_last_seek_tick {
            self.handler.on_entity_move(
                entity_id,
                self.space_id,
                vehicle_id,
                position,
                direction,
                is_volatile,
            );
        }
        self.volatile
            .set(entity_id, vehicle_id, position, direction, self.current_tick);
    }

    fn handle_final(&mut self) {
        if self.has_finished {
            return;
        }
        self.has_finished = true;
        self.handler.on_finish();
    }

    /// The single path for fatal errors: the owner hears about it once,
    /// then the controller shuts down.
    fn fail(&mut self, message: String) {
        if self.is_destroyed {
            return;
        }
        error!(%message, "replay controller failed");
        self.handler.on_error(&message);
        self.error_message = Some(message);
        self.destroy();
    }

    /// Stops playback for good. A partially received stream has its
    /// tick count rewritten so the buffer file can be replayed later.
    pub fn destroy(&mut self) {
        if self.is_destroyed {
            return;
        }
        self.is_destroyed = true;
        self.is_playing = false;
        self.ticks.clear();

        if let Some(receiver) = self.receiver.as_mut() {
            let counter = &receiver.counter;
            if let (Some(header), Some(offset)) = (counter.header(), counter.num_ticks_field_offset()) {
                let received = counter.num_ticks_read();
                if header.num_ticks != received {
                    receiver.buffer_file.queue_seek(offset as u64, WriteTag::None);
                    receiver
                        .buffer_file
                        .queue_write(received.to_le_bytes().to_vec(), WriteTag::None);
                }
            }
        }
        self.handler.on_destroyed();
    }
}

impl<H: ReplayHandler> Drop for ReplayController<H> {
    fn drop(&mut self) {
        if !self.is_destroyed {
            self.destroy();
        }
        if let Some(mut receiver) = self.receiver.take() {
            receiver.buffer_file.wait_idle();
        }
        if self.disposition == FileDisposition::Remove {
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!(path = %self.path.display(), error = %e, "could not remove replay file");
            }
        }
    }
}
