//! DeckLink playback controller
//!
//! Drives one output through `Idle -> Prerolling -> Running -> Idle`:
//!
//! 1. `prepare_for_playback` installs the completion dispatcher and enables
//!    the output. The session is prepared but still `Idle`.
//! 2. Each `schedule_frame` copies the frame into a hardware buffer and
//!    queues it at the next stream time. The first frame starts prerolling;
//!    once `video_water_level()` frames are queued, scheduled playback starts.
//! 3. `stop_playback` asks the hardware to stop and waits until it reports
//!    that playback has stopped, then tears the session down.
//!
//! Completions run on the driver's callback thread. Each session has a
//! generation number; completions from a finished session are discarded.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::device::{sdi_video_mode_flags, DeviceDescriptor};
use super::flags::{DisplayModeFlags, SupportedVideoModeFlags, VideoConnection};
use super::format::{Colorspace, PixelFormat};
use super::frame::VideoFrame;
use super::hal::{
    CompletionResult, DeckLink, DeckLinkOutput, ProfileManager, ProfileNotifications,
    ScheduledFrame, VideoOutputCallback,
};
use super::mode::{DisplayMode, DisplayModeId, LinkConfiguration};
use crate::error::{AppError, Capability, Result};
use crate::events::{DeckLinkEvent, DeviceRef, EventBus};
use crate::utils::{AutoResetEvent, LogThrottler};

/// Frames queued before playback starts, whatever the hardware reports
pub const MINIMUM_VIDEO_PREROLL_SIZE: u32 = 2;

/// Upper bound on waiting for the hardware to confirm a stop
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives frames back from the hardware once displayed or discarded
pub trait PlaybackCallback: Send + Sync {
    fn frame_completed(&self, frame: ScheduledFrame, result: CompletionResult);
}

impl<F> PlaybackCallback for F
where
    F: Fn(ScheduledFrame, CompletionResult) + Send + Sync,
{
    fn frame_completed(&self, frame: ScheduledFrame, result: CompletionResult) {
        self(frame, result)
    }
}

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    Idle,
    Prerolling,
    Running,
}

/// What happened to a frame passed to `schedule_frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Queued for display at `stream_time`
    Scheduled { stream_time: i64 },
    /// The hardware refused the frame; playback continues
    Dropped,
}

/// Playback statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    pub frames_scheduled: u64,
    pub frames_completed: u64,
    pub frames_late: u64,
    pub frames_dropped: u64,
    pub frames_flushed: u64,
    /// Frames the hardware refused at submission
    pub submission_failures: u64,
}

#[derive(Default)]
struct Counters {
    frames_scheduled: AtomicU64,
    frames_completed: AtomicU64,
    frames_late: AtomicU64,
    frames_dropped: AtomicU64,
    frames_flushed: AtomicU64,
    submission_failures: AtomicU64,
}

struct PlaybackSession {
    mode: DisplayMode,
    pixel_format: PixelFormat,
    row_bytes: usize,
    next_stream_time: i64,
    frames_submitted: u64,
    preroll_target: u32,
    /// A stop request is waiting for the hardware
    stopping: bool,
}

struct Slot {
    state: PlaybackState,
    session: Option<PlaybackSession>,
    generation: u64,
}

struct Shared {
    device: DeviceRef,
    output: Arc<dyn DeckLinkOutput>,
    slot: Mutex<Slot>,
    /// Generation of the prepared session, 0 when none
    live_generation: AtomicU64,
    stopped: AutoResetEvent,
    counters: Counters,
    throttler: LogThrottler,
    events: Arc<EventBus>,
}

/// Completion callback installed for one playback session
struct Dispatcher {
    shared: Weak<Shared>,
    generation: u64,
    callback: Arc<dyn PlaybackCallback>,
}

impl Dispatcher {
    fn live_shared(&self) -> Option<Arc<Shared>> {
        let shared = self.shared.upgrade()?;
        (shared.live_generation.load(Ordering::Acquire) == self.generation).then_some(shared)
    }
}

impl VideoOutputCallback for Dispatcher {
    fn scheduled_frame_completed(&self, frame: ScheduledFrame, result: CompletionResult) {
        let Some(shared) = self.live_shared() else {
            trace!("Discarding completion of frame {} from a stopped session", frame.id());
            return;
        };

        let counter = match result {
            CompletionResult::Completed => &shared.counters.frames_completed,
            CompletionResult::DisplayedLate => &shared.counters.frames_late,
            CompletionResult::Dropped => &shared.counters.frames_dropped,
            CompletionResult::Flushed => &shared.counters.frames_flushed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        shared.events.publish(DeckLinkEvent::ScheduledFrameCompleted {
            device: shared.device.clone(),
            frame_id: frame.id(),
            stream_time: frame.display_time(),
            result,
        });
        self.callback.frame_completed(frame, result);
    }

    fn scheduled_playback_has_stopped(&self) {
        if let Some(shared) = self.live_shared() {
            debug!("Scheduled playback stopped on {}", shared.device.name);
            shared.stopped.set();
        }
    }
}

/// Playback controller bound to one device
pub struct OutputController {
    descriptor: DeviceDescriptor,
    shared: Arc<Shared>,
    profile_manager: Option<Arc<dyn ProfileManager>>,
}

impl OutputController {
    /// Bind to a playback-capable device and register the shared profile callback
    ///
    /// Fails before touching the output when the device cannot play back.
    pub fn new(
        device: Arc<dyn DeckLink>,
        profile_callback: Arc<dyn ProfileNotifications>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let descriptor = DeviceDescriptor::query(device.clone());
        descriptor.require(Capability::Playback)?;
        let output = device.output().ok_or_else(|| AppError::MissingCapability {
            device: descriptor.display_name().to_string(),
            capability: Capability::Playback,
        })?;

        let profile_manager = device.profile_manager();
        if let Some(manager) = &profile_manager {
            manager
                .set_callback(Some(profile_callback))
                .map_err(|e| AppError::hardware(descriptor.display_name(), e))?;
        }

        debug!("Output controller bound to {}", descriptor.display_name());

        Ok(Self {
            shared: Arc::new(Shared {
                device: DeviceRef::of(device.as_ref()),
                output,
                slot: Mutex::new(Slot {
                    state: PlaybackState::Idle,
                    session: None,
                    generation: 0,
                }),
                live_generation: AtomicU64::new(0),
                stopped: AutoResetEvent::new(),
                counters: Counters::default(),
                throttler: LogThrottler::default(),
                events,
            }),
            descriptor,
            profile_manager,
        })
    }

    /// Prepare 8-bit YUV playback at `mode`
    pub fn prepare_for_playback(
        &self,
        mode: DisplayModeId,
        callback: Arc<dyn PlaybackCallback>,
    ) -> Result<()> {
        self.prepare_for_playback_with_format(mode, PixelFormat::Yuv8, callback)
    }

    /// Install the completion dispatcher and enable the output
    pub fn prepare_for_playback_with_format(
        &self,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        callback: Arc<dyn PlaybackCallback>,
    ) -> Result<()> {
        if pixel_format == PixelFormat::Unspecified {
            return Err(AppError::InvalidArgument(
                "playback needs a concrete pixel format".to_string(),
            ));
        }

        let mut slot = self.shared.slot.lock();
        if slot.session.is_some() {
            return Err(AppError::AlreadyPrepared(self.display_name().to_string()));
        }

        let output = &self.shared.output;
        let failed = |source| AppError::StartPlaybackFailed {
            device: self.display_name().to_string(),
            source,
        };

        let display_mode = output.display_mode(mode).map_err(failed)?;
        let row_bytes = pixel_format
            .bytes_per_row(display_mode.width)
            .ok_or_else(|| AppError::InvalidArgument(format!("no stride for {}", pixel_format)))?;

        slot.generation += 1;
        let generation = slot.generation;
        let dispatcher = Arc::new(Dispatcher {
            shared: Arc::downgrade(&self.shared),
            generation,
            callback,
        });

        self.shared.live_generation.store(generation, Ordering::Release);
        self.shared.stopped.reset();

        if let Err(e) = output.set_scheduled_frame_completion_callback(Some(dispatcher)) {
            self.shared.live_generation.store(0, Ordering::Release);
            return Err(failed(e));
        }
        if let Err(e) = output.enable_video_output(mode) {
            self.shared.live_generation.store(0, Ordering::Release);
            self.clear_completion_callback();
            return Err(failed(e));
        }

        let preroll_target = self.video_water_level();
        info!(
            "Playback prepared on {}: {} {} (preroll {} frames)",
            self.display_name(),
            display_mode,
            pixel_format,
            preroll_target
        );

        slot.state = PlaybackState::Idle;
        slot.session = Some(PlaybackSession {
            mode: display_mode,
            pixel_format,
            row_bytes,
            next_stream_time: 0,
            frames_submitted: 0,
            preroll_target,
            stopping: false,
        });
        Ok(())
    }

    /// Copy `frame` into a hardware buffer and queue it at the next stream time
    ///
    /// A frame the hardware refuses is dropped and reported as
    /// [`ScheduleOutcome::Dropped`]; caller errors (not prepared, wrong size
    /// or pixel format) are returned as errors.
    pub fn schedule_frame(&self, frame: &VideoFrame) -> Result<ScheduleOutcome> {
        let mut guard = self.shared.slot.lock();
        let slot = &mut *guard;
        let Some(session) = slot.session.as_mut().filter(|s| !s.stopping) else {
            return Err(AppError::NotPrepared(self.display_name().to_string()));
        };

        validate_frame(frame, session)?;

        let output = &self.shared.output;
        let rate = session.mode.frame_rate;
        let stream_time = session.next_stream_time;
        let row_bytes = session.row_bytes;

        let submitted = output
            .create_video_frame(frame.width(), frame.height(), row_bytes, session.pixel_format)
            .and_then(|mut hw_frame| {
                copy_rows(frame, &mut hw_frame, row_bytes);
                output.schedule_video_frame(hw_frame, stream_time, rate.duration, rate.time_scale)
            });

        if let Err(e) = submitted {
            self.shared
                .counters
                .submission_failures
                .fetch_add(1, Ordering::Relaxed);
            if let Some(suppressed) = self.shared.throttler.check("schedule_frame") {
                warn!(
                    "Dropped frame #{} on {}: {} ({} similar suppressed)",
                    frame.sequence,
                    self.display_name(),
                    e,
                    suppressed
                );
            }
            return Ok(ScheduleOutcome::Dropped);
        }

        session.next_stream_time += rate.duration;
        session.frames_submitted += 1;
        self.shared
            .counters
            .frames_scheduled
            .fetch_add(1, Ordering::Relaxed);

        if slot.state == PlaybackState::Idle {
            debug!("Prerolling on {}", self.display_name());
            slot.state = PlaybackState::Prerolling;
        }

        if slot.state == PlaybackState::Prerolling
            && session.frames_submitted >= u64::from(session.preroll_target)
        {
            output
                .start_scheduled_playback(0, rate.time_scale, 1.0)
                .map_err(|source| AppError::StartPlaybackFailed {
                    device: self.display_name().to_string(),
                    source,
                })?;
            slot.state = PlaybackState::Running;
            info!(
                "Scheduled playback started on {} after {} frames",
                self.display_name(),
                session.frames_submitted
            );
        }

        Ok(ScheduleOutcome::Scheduled { stream_time })
    }

    /// Stop playback and release the output
    ///
    /// From `Running` this blocks until the hardware reports that playback
    /// has stopped; frames still queued come back through the callback as
    /// flushed before it returns. Frames queued for preroll were never
    /// started; disabling the output releases them without a callback and
    /// they are counted as flushed. Without a prepared session it is a no-op.
    /// Must not be called from a playback callback.
    pub fn stop_playback(&self) -> Result<()> {
        let running_time_scale = {
            let mut guard = self.shared.slot.lock();
            let slot = &mut *guard;
            let Some(session) = slot.session.as_mut() else {
                return Ok(());
            };
            // From here on schedule_frame refuses frames, so the state read
            // below cannot move to Running behind our back
            session.stopping = true;
            if slot.state == PlaybackState::Running {
                Some(session.mode.frame_rate.time_scale)
            } else {
                self.release_session(slot);
                None
            }
        };

        if let Some(time_scale) = running_time_scale {
            if let Err(e) = self.shared.output.stop_scheduled_playback(0, time_scale) {
                if let Some(session) = self.shared.slot.lock().session.as_mut() {
                    session.stopping = false;
                }
                return Err(AppError::StopPlaybackFailed {
                    device: self.display_name().to_string(),
                    source: e,
                });
            }

            if !self.shared.stopped.wait_timeout(STOP_TIMEOUT) {
                error!(
                    "{} did not confirm playback stop within {:?}",
                    self.display_name(),
                    STOP_TIMEOUT
                );
            }
            self.release_session(&mut self.shared.slot.lock());
        }

        self.clear_completion_callback();
        if let Err(e) = self.shared.output.disable_video_output() {
            warn!("Failed to disable video output on {}: {}", self.display_name(), e);
        }

        info!("Playback stopped on {}", self.display_name());
        Ok(())
    }

    /// Drop the session and stop dispatching its completions
    fn release_session(&self, slot: &mut Slot) {
        if let Some(session) = slot.session.take() {
            if slot.state != PlaybackState::Running && session.frames_submitted > 0 {
                debug!(
                    "Releasing {} prerolled frames on {}",
                    session.frames_submitted,
                    self.display_name()
                );
                self.shared
                    .counters
                    .frames_flushed
                    .fetch_add(session.frames_submitted, Ordering::Relaxed);
            }
        }
        slot.state = PlaybackState::Idle;
        self.shared.live_generation.store(0, Ordering::Release);
    }

    fn clear_completion_callback(&self) {
        if let Err(e) = self.shared.output.set_scheduled_frame_completion_callback(None) {
            warn!("Failed to clear completion callback on {}: {}", self.display_name(), e);
        }
    }

    /// Connection and video-mode flags for support queries
    fn support_query_target(&self) -> (VideoConnection, SupportedVideoModeFlags) {
        let has_sdi = self.has_sdi_output_connection();
        let link = if has_sdi {
            self.current_link_configuration().unwrap_or_default()
        } else {
            LinkConfiguration::SingleLink
        };
        let connection = if has_sdi {
            VideoConnection::SDI
        } else {
            VideoConnection::UNSPECIFIED
        };
        (connection, sdi_video_mode_flags(has_sdi, link))
    }

    pub fn is_display_mode_supported(&self, mode: DisplayModeId, pixel_format: PixelFormat) -> bool {
        let (connection, flags) = self.support_query_target();
        match self
            .shared
            .output
            .does_support_video_mode(connection, mode, pixel_format, flags)
        {
            Ok(supported) => supported,
            Err(e) => {
                debug!("Mode support query for {} failed: {}", mode, e);
                false
            }
        }
    }

    pub fn does_display_mode_support_3d(&self, mode: DisplayModeId) -> bool {
        self.shared
            .output
            .display_mode(mode)
            .map(|m| m.flags.contains(DisplayModeFlags::SUPPORTS_3D))
            .unwrap_or(false)
    }

    /// SD modes carry Rec.601, HD and above Rec.709
    pub fn is_colorspace_supported(&self, mode: DisplayModeId, colorspace: Colorspace) -> bool {
        self.shared
            .output
            .display_mode(mode)
            .map(|m| colorspace.is_supported_for_height(m.height))
            .unwrap_or(false)
    }

    pub fn is_link_configuration_supported(&self, link: LinkConfiguration) -> bool {
        let attrs = self.descriptor.attributes();
        match link {
            LinkConfiguration::SingleLink => true,
            LinkConfiguration::DualLink => attrs.supports_dual_link_sdi,
            LinkConfiguration::QuadLink => attrs.supports_quad_link_sdi,
        }
    }

    /// Frames to queue before playback starts
    pub fn video_water_level(&self) -> u32 {
        self.descriptor
            .minimum_preroll_frames()
            .max(MINIMUM_VIDEO_PREROLL_SIZE)
    }

    pub fn supports_hfr_timecode(&self) -> bool {
        self.descriptor.attributes().supports_hfr_timecode
    }

    pub fn supports_colorspace_metadata(&self) -> bool {
        self.descriptor.attributes().supports_colorspace_metadata
    }

    pub fn has_sdi_output_connection(&self) -> bool {
        self.descriptor.has_sdi_output()
    }

    /// Display modes available on the output's connection and link configuration
    ///
    /// Each call returns a fresh iterator; support is checked lazily.
    pub fn display_modes(&self) -> Result<impl Iterator<Item = DisplayMode>> {
        let (connection, flags) = self.support_query_target();
        let output = self.shared.output.clone();
        let modes = output
            .display_mode_iterator()
            .map_err(|e| AppError::hardware(self.display_name(), e))?;

        Ok(modes.filter(move |mode| {
            matches!(
                output.does_support_video_mode(connection, mode.id, PixelFormat::Unspecified, flags),
                Ok(true)
            )
        }))
    }

    pub fn current_link_configuration(&self) -> Result<LinkConfiguration> {
        self.descriptor
            .device()
            .sdi_output_link_configuration()
            .map_err(|e| AppError::hardware(self.display_name(), e))
    }

    pub fn set_link_configuration(&self, link: LinkConfiguration) -> Result<()> {
        if !self.is_link_configuration_supported(link) {
            return Err(AppError::InvalidArgument(format!(
                "{} does not support {} link SDI",
                self.display_name(),
                link
            )));
        }
        self.descriptor
            .device()
            .set_sdi_output_link_configuration(link)
            .map_err(|e| AppError::hardware(self.display_name(), e))?;
        info!("SDI link configuration on {} set to {}", self.display_name(), link);
        Ok(())
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn display_name(&self) -> &str {
        self.descriptor.display_name()
    }

    pub fn is_active(&self) -> bool {
        self.descriptor.is_active()
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.slot.lock().state
    }

    /// Prerolling or running
    pub fn is_running(&self) -> bool {
        self.state() != PlaybackState::Idle
    }

    pub fn is_prepared(&self) -> bool {
        self.shared.slot.lock().session.is_some()
    }

    pub fn stats(&self) -> PlaybackStats {
        let c = &self.shared.counters;
        PlaybackStats {
            frames_scheduled: c.frames_scheduled.load(Ordering::Relaxed),
            frames_completed: c.frames_completed.load(Ordering::Relaxed),
            frames_late: c.frames_late.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            frames_flushed: c.frames_flushed.load(Ordering::Relaxed),
            submission_failures: c.submission_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for OutputController {
    fn drop(&mut self) {
        if let Err(e) = self.stop_playback() {
            warn!("Failed to stop playback on drop: {}", e);
        }
        if let Some(manager) = &self.profile_manager {
            if let Err(e) = manager.set_callback(None) {
                warn!("Failed to unregister profile callback on {}: {}", self.display_name(), e);
            }
        }
    }
}

fn validate_frame(frame: &VideoFrame, session: &PlaybackSession) -> Result<()> {
    let mode = &session.mode;
    if frame.width() != mode.width || frame.height() != mode.height {
        return Err(AppError::FrameMismatch(format!(
            "frame is {}, output expects {}",
            frame.resolution,
            mode.resolution()
        )));
    }
    if frame.format != session.pixel_format {
        return Err(AppError::FrameMismatch(format!(
            "frame is {}, output expects {}",
            frame.format, session.pixel_format
        )));
    }
    let stride = frame.stride as usize;
    let height = frame.height() as usize;
    if stride < session.row_bytes || frame.len() < stride * (height - 1) + session.row_bytes {
        return Err(AppError::FrameMismatch(format!(
            "frame holds {} bytes at stride {}, {} bytes per row needed",
            frame.len(),
            stride,
            session.row_bytes
        )));
    }
    Ok(())
}

fn copy_rows(frame: &VideoFrame, hw_frame: &mut ScheduledFrame, row_bytes: usize) {
    let src = frame.data();
    let src_stride = frame.stride as usize;
    let dst_stride = hw_frame.row_bytes();
    for (y, dst_row) in hw_frame.bytes_mut().chunks_exact_mut(dst_stride).enumerate() {
        let start = y * src_stride;
        dst_row[..row_bytes].copy_from_slice(&src[start..start + row_bytes]);
    }
}
