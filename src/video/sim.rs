//! Software-emulated DeckLink driver
//!
//! Implements the [`hal`](super::hal) traits without hardware. Every driver
//! call that changes state is recorded in a per-device call log, and any
//! recorded call can be made to fail, so controller behaviour can be checked
//! call by call. Frames and completions are produced either on demand
//! ([`FramePacing::Manual`]) or by background threads at the display mode's
//! frame rate ([`FramePacing::Realtime`]).
//!
//! Callbacks are always invoked without internal locks held.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::flags::{
    DetectedFormatFlags, DisplayModeFlags, FormatChangedEvents, FrameFlags,
    SupportedVideoModeFlags, VideoConnection, VideoInputFlags, VideoIoSupport,
};
use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use super::hal::{
    CompletionResult, DeckLink, DeckLinkInput, DeckLinkOutput, DeviceAttributes,
    DeviceNotificationCallback, DiscoveryDriver, DuplexMode, HardwareError, HwResult,
    InputCallback, ProfileInfo, ProfileManager, ProfileNotifications, ScheduledFrame,
    ScreenPreviewCallback, VideoOutputCallback,
};
use super::mode::{DisplayMode, DisplayModeId, LinkConfiguration};

static NEXT_PERSISTENT_ID: AtomicU64 = AtomicU64::new(0x1000);

/// How an emulated device produces frames and completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramePacing {
    /// Only when a test calls `deliver_frame` / `complete_next`
    #[default]
    Manual,
    /// Background threads at the display mode's frame rate
    Realtime,
}

/// Records driver calls and injects failures
#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, HardwareError>>,
}

impl CallLog {
    fn record(&self, call: &str) -> HwResult<()> {
        self.calls.lock().push(call.to_string());
        match self.failures.lock().get(call) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Make every subsequent `call` return `err`
    pub fn fail(&self, call: &str, err: HardwareError) {
        self.failures.lock().insert(call.to_string(), err);
    }

    pub fn heal(&self, call: &str) {
        self.failures.lock().remove(call);
    }
}

/// Periodic background thread
struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(
        name: &str,
        interval: Duration,
        mut tick: impl FnMut() + Send + 'static,
    ) -> HwResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    tick();
                }
            })
            .map_err(|e| HardwareError::Failed(format!("spawn {}: {}", name, e)))?;
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Release);
        // A tick may stop its own worker from inside a callback
        if self.handle.thread().id() != thread::current().id() {
            let name = self.handle.thread().name().unwrap_or("sim-worker").to_string();
            if self.handle.join().is_err() {
                warn!("Emulator thread {} panicked", name);
            }
        }
    }
}

/// Configuration of one emulated sub-device
#[derive(Debug, Clone)]
pub struct SimDeviceConfig {
    pub name: String,
    pub attributes: DeviceAttributes,
    pub duplex: DuplexMode,
    pub profile_manager: bool,
    pub pacing: FramePacing,
}

impl SimDeviceConfig {
    /// Capture and playback over SDI, every optional feature present
    pub fn duplex(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: DeviceAttributes {
                video_io_support: VideoIoSupport::CAPTURE | VideoIoSupport::PLAYBACK,
                input_connections: VideoConnection::SDI | VideoConnection::HDMI,
                output_connections: VideoConnection::SDI,
                supports_input_format_detection: true,
                supports_colorspace_metadata: true,
                supports_hfr_timecode: true,
                supports_dual_link_sdi: true,
                supports_quad_link_sdi: false,
                minimum_preroll_frames: 0,
            },
            duplex: DuplexMode::Half,
            profile_manager: true,
            pacing: FramePacing::Manual,
        }
    }

    pub fn input_only(name: impl Into<String>) -> Self {
        let mut config = Self::duplex(name);
        config.attributes.video_io_support = VideoIoSupport::CAPTURE;
        config.attributes.output_connections = VideoConnection::UNSPECIFIED;
        config
    }

    pub fn output_only(name: impl Into<String>) -> Self {
        let mut config = Self::duplex(name);
        config.attributes.video_io_support = VideoIoSupport::PLAYBACK;
        config.attributes.input_connections = VideoConnection::UNSPECIFIED;
        config.attributes.supports_input_format_detection = false;
        config
    }

    pub fn with_pacing(mut self, pacing: FramePacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_minimum_preroll(mut self, frames: u32) -> Self {
        self.attributes.minimum_preroll_frames = frames;
        self
    }

    pub fn with_output_connections(mut self, connections: VideoConnection) -> Self {
        self.attributes.output_connections = connections;
        self
    }

    pub fn with_quad_link(mut self) -> Self {
        self.attributes.supports_quad_link_sdi = true;
        self
    }

    pub fn without_format_detection(mut self) -> Self {
        self.attributes.supports_input_format_detection = false;
        self
    }

    pub fn without_profile_manager(mut self) -> Self {
        self.profile_manager = false;
        self
    }
}

/// Mode support rules shared by emulated inputs and outputs
fn supports_mode(
    attributes: &DeviceAttributes,
    available: VideoConnection,
    connection: VideoConnection,
    mode: DisplayModeId,
    flags: SupportedVideoModeFlags,
) -> bool {
    if !connection.is_empty() && !available.intersects(connection) {
        return false;
    }
    let info = mode.info();
    if flags.contains(SupportedVideoModeFlags::DUAL_STREAM_3D)
        && !info.flags.contains(DisplayModeFlags::SUPPORTS_3D)
    {
        return false;
    }
    if flags.contains(SupportedVideoModeFlags::SDI_QUAD_LINK) {
        return attributes.supports_quad_link_sdi && info.width == 3840;
    }
    if flags.contains(SupportedVideoModeFlags::SDI_DUAL_LINK) {
        return attributes.supports_dual_link_sdi && info.height >= 1080;
    }
    if flags.contains(SupportedVideoModeFlags::SDI_SINGLE_LINK) {
        // 2160p above 30 fps needs more than one 6G link
        return !(info.width == 3840 && info.frame_rate.fps() > 30.0);
    }
    true
}

/// Flat-field test frame whose luma steps with the sequence number
fn test_pattern(mode: &DisplayMode, pixel_format: PixelFormat, sequence: u64) -> Option<VideoFrame> {
    let stride = pixel_format.bytes_per_row(mode.width)?;
    let mut data = vec![0u8; stride * mode.height as usize];
    if pixel_format == PixelFormat::Yuv8 {
        let luma = 16 + (sequence % 220) as u8;
        for px in data.chunks_exact_mut(4) {
            px.copy_from_slice(&[0x80, luma, 0x80, luma]);
        }
    }
    Some(VideoFrame::from_vec(
        data,
        Resolution::new(mode.width, mode.height),
        pixel_format,
        stride as u32,
        sequence,
    ))
}

// ============================================================================
// Device
// ============================================================================

/// Emulated DeckLink sub-device
pub struct SimDevice {
    id: u64,
    config: SimDeviceConfig,
    log: Arc<CallLog>,
    duplex: Mutex<DuplexMode>,
    input_connection: Mutex<VideoConnection>,
    link_configuration: Mutex<LinkConfiguration>,
    input: Option<Arc<SimInput>>,
    output: Option<Arc<SimOutput>>,
    profiles: Option<Arc<SimProfileManager>>,
}

impl SimDevice {
    pub fn new(config: SimDeviceConfig) -> Arc<Self> {
        let id = NEXT_PERSISTENT_ID.fetch_add(1, Ordering::Relaxed);
        let log = Arc::new(CallLog::default());
        let attrs = &config.attributes;

        let input = attrs
            .video_io_support
            .contains(VideoIoSupport::CAPTURE)
            .then(|| Arc::new(SimInput::new(&config, log.clone())));
        let output = attrs
            .video_io_support
            .contains(VideoIoSupport::PLAYBACK)
            .then(|| Arc::new(SimOutput::new(&config, log.clone())));
        let profiles = config
            .profile_manager
            .then(|| Arc::new(SimProfileManager::new(log.clone())));

        // First available connector, SDI preferred
        let connection = [
            VideoConnection::SDI,
            VideoConnection::HDMI,
            VideoConnection::OPTICAL_SDI,
        ]
        .into_iter()
        .find(|c| attrs.input_connections.contains(*c))
        .unwrap_or(VideoConnection::UNSPECIFIED);

        debug!("Created emulated device {} ({:#x})", config.name, id);

        Arc::new(Self {
            id,
            duplex: Mutex::new(config.duplex),
            input_connection: Mutex::new(connection),
            link_configuration: Mutex::new(LinkConfiguration::SingleLink),
            log,
            input,
            output,
            profiles,
            config,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.log.count(call)
    }

    pub fn clear_calls(&self) {
        self.log.clear();
    }

    pub fn fail(&self, call: &str, err: HardwareError) {
        self.log.fail(call, err);
    }

    pub fn heal(&self, call: &str) {
        self.log.heal(call);
    }

    pub fn set_duplex_mode(&self, mode: DuplexMode) {
        *self.duplex.lock() = mode;
    }

    pub fn sim_input(&self) -> Option<&Arc<SimInput>> {
        self.input.as_ref()
    }

    pub fn sim_output(&self) -> Option<&Arc<SimOutput>> {
        self.output.as_ref()
    }

    pub fn sim_profiles(&self) -> Option<&Arc<SimProfileManager>> {
        self.profiles.as_ref()
    }
}

impl DeckLink for SimDevice {
    fn persistent_id(&self) -> u64 {
        self.id
    }

    fn display_name(&self) -> String {
        self.config.name.clone()
    }

    fn attributes(&self) -> DeviceAttributes {
        self.config.attributes.clone()
    }

    fn duplex_mode(&self) -> DuplexMode {
        *self.duplex.lock()
    }

    fn input(&self) -> Option<Arc<dyn DeckLinkInput>> {
        self.input
            .clone()
            .map(|input| input as Arc<dyn DeckLinkInput>)
    }

    fn output(&self) -> Option<Arc<dyn DeckLinkOutput>> {
        self.output
            .clone()
            .map(|output| output as Arc<dyn DeckLinkOutput>)
    }

    fn profile_manager(&self) -> Option<Arc<dyn ProfileManager>> {
        self.profiles
            .clone()
            .map(|profiles| profiles as Arc<dyn ProfileManager>)
    }

    fn video_input_connection(&self) -> HwResult<VideoConnection> {
        Ok(*self.input_connection.lock())
    }

    fn set_video_input_connection(&self, connection: VideoConnection) -> HwResult<()> {
        self.log.record("device.set_video_input_connection")?;
        if connection.is_empty() || !self.config.attributes.input_connections.contains(connection) {
            return Err(HardwareError::InvalidArg(format!(
                "connection {:?} not available",
                connection
            )));
        }
        *self.input_connection.lock() = connection;
        Ok(())
    }

    fn sdi_output_link_configuration(&self) -> HwResult<LinkConfiguration> {
        Ok(*self.link_configuration.lock())
    }

    fn set_sdi_output_link_configuration(&self, link: LinkConfiguration) -> HwResult<()> {
        self.log.record("device.set_sdi_output_link_configuration")?;
        let attrs = &self.config.attributes;
        let supported = match link {
            LinkConfiguration::SingleLink => true,
            LinkConfiguration::DualLink => attrs.supports_dual_link_sdi,
            LinkConfiguration::QuadLink => attrs.supports_quad_link_sdi,
        };
        if !supported {
            return Err(HardwareError::NotSupported);
        }
        *self.link_configuration.lock() = link;
        Ok(())
    }
}

// ============================================================================
// Input
// ============================================================================

#[derive(Default)]
struct InputState {
    callback: Option<Arc<dyn InputCallback>>,
    preview: Option<Arc<dyn ScreenPreviewCallback>>,
    enabled: Option<(DisplayMode, PixelFormat, VideoInputFlags)>,
    streaming: bool,
    sequence: u64,
}

struct InputInner {
    attributes: DeviceAttributes,
    log: Arc<CallLog>,
    state: Mutex<InputState>,
    no_signal: AtomicBool,
}

impl InputInner {
    fn deliver(&self) -> bool {
        let (callback, frame) = {
            let mut state = self.state.lock();
            if !state.streaming {
                return false;
            }
            let Some((mode, pixel_format, _)) = state.enabled.clone() else {
                return false;
            };
            state.sequence += 1;
            let Some(frame) = test_pattern(&mode, pixel_format, state.sequence) else {
                return false;
            };
            (state.callback.clone(), frame)
        };

        let frame = if self.no_signal.load(Ordering::Relaxed) {
            frame.with_flags(FrameFlags::HAS_NO_INPUT_SOURCE)
        } else {
            frame
        };
        trace!("Emulated input frame #{}", frame.sequence);
        if let Some(callback) = callback {
            callback.video_input_frame_arrived(Some(&frame));
        }
        true
    }
}

/// Emulated capture interface
pub struct SimInput {
    inner: Arc<InputInner>,
    pacing: FramePacing,
    generator: Mutex<Option<Worker>>,
}

impl SimInput {
    fn new(config: &SimDeviceConfig, log: Arc<CallLog>) -> Self {
        Self {
            inner: Arc::new(InputInner {
                attributes: config.attributes.clone(),
                log,
                state: Mutex::new(InputState::default()),
                no_signal: AtomicBool::new(false),
            }),
            pacing: config.pacing,
            generator: Mutex::new(None),
        }
    }

    /// Push one frame of the enabled mode through the frame callback.
    /// Returns false when streams are not running.
    pub fn deliver_frame(&self) -> bool {
        self.inner.deliver()
    }

    /// Invoke the frame callback with no video frame (audio-only packet)
    pub fn deliver_null_frame(&self) {
        let callback = self.inner.state.lock().callback.clone();
        if let Some(callback) = callback {
            callback.video_input_frame_arrived(None);
        }
    }

    /// Emulate a signal change on the input
    ///
    /// Only notifies when streams run with format detection enabled, like
    /// the hardware. Returns whether the callback was invoked.
    pub fn signal_format_change(
        &self,
        events: FormatChangedEvents,
        mode: DisplayModeId,
        detected: DetectedFormatFlags,
    ) -> bool {
        let callback = {
            let state = self.inner.state.lock();
            let detecting = state
                .enabled
                .as_ref()
                .is_some_and(|(_, _, flags)| flags.contains(VideoInputFlags::ENABLE_FORMAT_DETECTION));
            if !state.streaming || !detecting {
                return false;
            }
            state.callback.clone()
        };
        match callback {
            Some(callback) => {
                callback.video_input_format_changed(events, &mode.info(), detected);
                true
            }
            None => false,
        }
    }

    /// Mark subsequent frames as having no input source
    pub fn set_signal_present(&self, present: bool) {
        self.inner.no_signal.store(!present, Ordering::Relaxed);
    }

    /// Mode, pixel format and flags of the enabled input
    pub fn enabled_format(&self) -> Option<(DisplayModeId, PixelFormat, VideoInputFlags)> {
        self.inner
            .state
            .lock()
            .enabled
            .as_ref()
            .map(|(mode, pf, flags)| (mode.id, *pf, *flags))
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.state.lock().streaming
    }

    pub fn installed_callback(&self) -> Option<Arc<dyn InputCallback>> {
        self.inner.state.lock().callback.clone()
    }

    fn stop_generator(&self) {
        if let Some(worker) = self.generator.lock().take() {
            worker.stop();
        }
    }
}

impl DeckLinkInput for SimInput {
    fn display_mode_iterator(&self) -> HwResult<Box<dyn Iterator<Item = DisplayMode> + Send>> {
        self.inner.log.record("input.display_mode_iterator")?;
        Ok(Box::new(DisplayModeId::ALL.into_iter().map(|id| id.info())))
    }

    fn does_support_video_mode(
        &self,
        connection: VideoConnection,
        mode: DisplayModeId,
        _pixel_format: PixelFormat,
        flags: SupportedVideoModeFlags,
    ) -> HwResult<bool> {
        let attrs = &self.inner.attributes;
        Ok(supports_mode(attrs, attrs.input_connections, connection, mode, flags))
    }

    fn set_callback(&self, callback: Option<Arc<dyn InputCallback>>) -> HwResult<()> {
        self.inner.log.record("input.set_callback")?;
        self.inner.state.lock().callback = callback;
        Ok(())
    }

    fn set_screen_preview_callback(
        &self,
        callback: Option<Arc<dyn ScreenPreviewCallback>>,
    ) -> HwResult<()> {
        self.inner.log.record("input.set_screen_preview_callback")?;
        self.inner.state.lock().preview = callback;
        Ok(())
    }

    fn enable_video_input(
        &self,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        flags: VideoInputFlags,
    ) -> HwResult<()> {
        self.inner.log.record("input.enable_video_input")?;
        if pixel_format.bytes_per_row(1).is_none() {
            return Err(HardwareError::InvalidArg("pixel format".to_string()));
        }
        let mut state = self.inner.state.lock();
        if state.streaming {
            return Err(HardwareError::Busy);
        }
        state.enabled = Some((mode.info(), pixel_format, flags));
        Ok(())
    }

    fn disable_video_input(&self) -> HwResult<()> {
        self.inner.log.record("input.disable_video_input")?;
        self.inner.state.lock().enabled = None;
        Ok(())
    }

    fn start_streams(&self) -> HwResult<()> {
        self.inner.log.record("input.start_streams")?;
        let interval = {
            let mut state = self.inner.state.lock();
            let Some((mode, _, _)) = state.enabled.as_ref() else {
                return Err(HardwareError::InvalidArg("video input not enabled".to_string()));
            };
            let interval = mode.frame_rate.frame_interval();
            state.streaming = true;
            interval
        };

        if self.pacing == FramePacing::Realtime {
            let inner = self.inner.clone();
            let worker = Worker::spawn("sim-input", interval, move || {
                inner.deliver();
            });
            match worker {
                Ok(worker) => *self.generator.lock() = Some(worker),
                Err(e) => {
                    self.inner.state.lock().streaming = false;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn stop_streams(&self) -> HwResult<()> {
        self.inner.log.record("input.stop_streams")?;
        self.inner.state.lock().streaming = false;
        self.stop_generator();
        Ok(())
    }
}

// ============================================================================
// Output
// ============================================================================

#[derive(Default)]
struct OutputState {
    callback: Option<Arc<dyn VideoOutputCallback>>,
    enabled: Option<DisplayMode>,
    queue: VecDeque<ScheduledFrame>,
    running: bool,
}

struct OutputInner {
    attributes: DeviceAttributes,
    log: Arc<CallLog>,
    state: Mutex<OutputState>,
    next_frame_id: AtomicU64,
}

impl OutputInner {
    fn complete_next(&self, result: CompletionResult) -> bool {
        let (callback, frame) = {
            let mut state = self.state.lock();
            if !state.running {
                return false;
            }
            let Some(frame) = state.queue.pop_front() else {
                return false;
            };
            (state.callback.clone(), frame)
        };
        trace!("Emulated output completed frame {} ({:?})", frame.id(), result);
        if let Some(callback) = callback {
            callback.scheduled_frame_completed(frame, result);
        }
        true
    }
}

/// Emulated playback interface
pub struct SimOutput {
    inner: Arc<OutputInner>,
    pacing: FramePacing,
    playout: Mutex<Option<Worker>>,
}

impl SimOutput {
    fn new(config: &SimDeviceConfig, log: Arc<CallLog>) -> Self {
        Self {
            inner: Arc::new(OutputInner {
                attributes: config.attributes.clone(),
                log,
                state: Mutex::new(OutputState::default()),
                next_frame_id: AtomicU64::new(1),
            }),
            pacing: config.pacing,
            playout: Mutex::new(None),
        }
    }

    /// Complete the oldest queued frame. Returns false when playback is not
    /// running or nothing is queued.
    pub fn complete_next(&self, result: CompletionResult) -> bool {
        self.inner.complete_next(result)
    }

    pub fn queued_frames(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Display times of the queued frames, oldest first
    pub fn queued_display_times(&self) -> Vec<i64> {
        self.inner
            .state
            .lock()
            .queue
            .iter()
            .map(|f| f.display_time())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn enabled_mode(&self) -> Option<DisplayModeId> {
        self.inner.state.lock().enabled.as_ref().map(|m| m.id)
    }

    pub fn installed_callback(&self) -> Option<Arc<dyn VideoOutputCallback>> {
        self.inner.state.lock().callback.clone()
    }

    fn stop_playout(&self) {
        if let Some(worker) = self.playout.lock().take() {
            worker.stop();
        }
    }
}

impl DeckLinkOutput for SimOutput {
    fn display_mode_iterator(&self) -> HwResult<Box<dyn Iterator<Item = DisplayMode> + Send>> {
        self.inner.log.record("output.display_mode_iterator")?;
        Ok(Box::new(DisplayModeId::ALL.into_iter().map(|id| id.info())))
    }

    fn display_mode(&self, mode: DisplayModeId) -> HwResult<DisplayMode> {
        Ok(mode.info())
    }

    fn does_support_video_mode(
        &self,
        connection: VideoConnection,
        mode: DisplayModeId,
        _pixel_format: PixelFormat,
        flags: SupportedVideoModeFlags,
    ) -> HwResult<bool> {
        let attrs = &self.inner.attributes;
        Ok(supports_mode(attrs, attrs.output_connections, connection, mode, flags))
    }

    fn set_scheduled_frame_completion_callback(
        &self,
        callback: Option<Arc<dyn VideoOutputCallback>>,
    ) -> HwResult<()> {
        self.inner.log.record("output.set_scheduled_frame_completion_callback")?;
        self.inner.state.lock().callback = callback;
        Ok(())
    }

    fn enable_video_output(&self, mode: DisplayModeId) -> HwResult<()> {
        self.inner.log.record("output.enable_video_output")?;
        let mut state = self.inner.state.lock();
        if state.enabled.is_some() {
            return Err(HardwareError::Busy);
        }
        state.enabled = Some(mode.info());
        Ok(())
    }

    fn disable_video_output(&self) -> HwResult<()> {
        self.inner.log.record("output.disable_video_output")?;
        let mut state = self.inner.state.lock();
        state.enabled = None;
        state.queue.clear();
        Ok(())
    }

    fn create_video_frame(
        &self,
        width: u32,
        height: u32,
        row_bytes: usize,
        pixel_format: PixelFormat,
    ) -> HwResult<ScheduledFrame> {
        self.inner.log.record("output.create_video_frame")?;
        match pixel_format.bytes_per_row(width) {
            Some(min) if row_bytes >= min => {}
            _ => {
                return Err(HardwareError::InvalidArg(format!(
                    "row bytes {} for {}x{} {}",
                    row_bytes, width, height, pixel_format
                )))
            }
        }
        let id = self.inner.next_frame_id.fetch_add(1, Ordering::Relaxed);
        Ok(ScheduledFrame::new(id, width, height, row_bytes, pixel_format))
    }

    fn schedule_video_frame(
        &self,
        mut frame: ScheduledFrame,
        display_time: i64,
        _duration: i64,
        _time_scale: i64,
    ) -> HwResult<()> {
        self.inner.log.record("output.schedule_video_frame")?;
        let mut state = self.inner.state.lock();
        if state.enabled.is_none() {
            return Err(HardwareError::InvalidArg("video output not enabled".to_string()));
        }
        frame.set_display_time(display_time);
        state.queue.push_back(frame);
        Ok(())
    }

    fn start_scheduled_playback(
        &self,
        _start_time: i64,
        _time_scale: i64,
        _speed: f64,
    ) -> HwResult<()> {
        self.inner.log.record("output.start_scheduled_playback")?;
        let interval = {
            let mut state = self.inner.state.lock();
            let Some(mode) = state.enabled.as_ref() else {
                return Err(HardwareError::InvalidArg("video output not enabled".to_string()));
            };
            if state.running {
                return Err(HardwareError::Busy);
            }
            let interval = mode.frame_rate.frame_interval();
            state.running = true;
            interval
        };

        if self.pacing == FramePacing::Realtime {
            let inner = self.inner.clone();
            let worker = Worker::spawn("sim-playout", interval, move || {
                inner.complete_next(CompletionResult::Completed);
            });
            match worker {
                Ok(worker) => *self.playout.lock() = Some(worker),
                Err(e) => {
                    self.inner.state.lock().running = false;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn stop_scheduled_playback(&self, _stop_time: i64, _time_scale: i64) -> HwResult<()> {
        self.inner.log.record("output.stop_scheduled_playback")?;
        if !self.inner.state.lock().running {
            return Ok(());
        }
        self.stop_playout();

        let (frames, callback) = {
            let mut state = self.inner.state.lock();
            state.running = false;
            (std::mem::take(&mut state.queue), state.callback.clone())
        };

        // The driver reports the stop asynchronously after flushing
        thread::Builder::new()
            .name("sim-output-drain".to_string())
            .spawn(move || {
                if let Some(callback) = callback {
                    for frame in frames {
                        callback.scheduled_frame_completed(frame, CompletionResult::Flushed);
                    }
                    callback.scheduled_playback_has_stopped();
                }
            })
            .map_err(|e| HardwareError::Failed(format!("spawn drain: {}", e)))?;
        Ok(())
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// Emulated profile manager
pub struct SimProfileManager {
    log: Arc<CallLog>,
    callback: Mutex<Option<Arc<dyn ProfileNotifications>>>,
}

impl SimProfileManager {
    fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            callback: Mutex::new(None),
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Run a profile switch: changing, then activated
    pub fn switch_profile(&self, profile: ProfileInfo, stream_will_be_forced_to_stop: bool) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback.profile_changing(&profile, stream_will_be_forced_to_stop);
            let activated = ProfileInfo {
                is_active: true,
                ..profile
            };
            callback.profile_activated(&activated);
        }
    }
}

impl ProfileManager for SimProfileManager {
    fn set_callback(&self, callback: Option<Arc<dyn ProfileNotifications>>) -> HwResult<()> {
        self.log.record("profile.set_callback")?;
        *self.callback.lock() = callback;
        Ok(())
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Emulated system-wide device notifier
#[derive(Default)]
pub struct SimDriver {
    devices: Mutex<Vec<Arc<SimDevice>>>,
    callback: Mutex<Option<Arc<dyn DeviceNotificationCallback>>>,
    log: CallLog,
}

impl SimDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_devices(devices: impl IntoIterator<Item = Arc<SimDevice>>) -> Arc<Self> {
        let driver = Self::default();
        driver.devices.lock().extend(devices);
        Arc::new(driver)
    }

    /// Plug in a device, notifying if notifications are installed
    pub fn add_device(&self, device: Arc<SimDevice>) {
        self.devices.lock().push(device.clone());
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback.device_arrived(device);
        }
    }

    /// Unplug a device. Returns false if no device has that id.
    pub fn remove_device(&self, persistent_id: u64) -> bool {
        let removed = {
            let mut devices = self.devices.lock();
            let Some(pos) = devices.iter().position(|d| d.persistent_id() == persistent_id) else {
                return false;
            };
            devices.remove(pos)
        };
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback.device_removed(removed);
        }
        true
    }

    pub fn devices(&self) -> Vec<Arc<SimDevice>> {
        self.devices.lock().clone()
    }

    pub fn is_installed(&self) -> bool {
        self.callback.lock().is_some()
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn fail(&self, call: &str, err: HardwareError) {
        self.log.fail(call, err);
    }
}

impl DiscoveryDriver for SimDriver {
    fn install_device_notifications(
        &self,
        callback: Arc<dyn DeviceNotificationCallback>,
    ) -> HwResult<()> {
        self.log.record("discovery.install")?;
        *self.callback.lock() = Some(callback.clone());

        // Devices already present are announced on install
        let present = self.devices.lock().clone();
        for device in present {
            callback.device_arrived(device);
        }
        Ok(())
    }

    fn uninstall_device_notifications(&self) -> HwResult<()> {
        self.log.record("discovery.uninstall")?;
        *self.callback.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_stop_survives_panicking_tick() {
        let worker = Worker::spawn("sim-test-panic", Duration::from_millis(1), || {
            panic!("tick failed");
        })
        .unwrap();
        while !worker.handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }

        // Joining reports the panic instead of propagating it
        worker.stop();
    }

    struct CountingInput {
        frames: AtomicU64,
    }

    impl InputCallback for CountingInput {
        fn video_input_frame_arrived(&self, frame: Option<&VideoFrame>) {
            if frame.is_some() {
                self.frames.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_call_log_and_failure_injection() {
        let device = SimDevice::new(SimDeviceConfig::duplex("DeckLink Duo (1)"));
        let input = device.input().unwrap();

        input
            .enable_video_input(DisplayModeId::Hd1080i50, PixelFormat::Yuv8, VideoInputFlags::DEFAULT)
            .unwrap();
        device.fail("input.start_streams", HardwareError::Busy);
        assert_eq!(input.start_streams(), Err(HardwareError::Busy));
        device.heal("input.start_streams");
        assert!(input.start_streams().is_ok());

        assert_eq!(
            device.calls(),
            vec![
                "input.enable_video_input",
                "input.start_streams",
                "input.start_streams"
            ]
        );
    }

    #[test]
    fn test_manual_frame_delivery() {
        let device = SimDevice::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let input = device.input().unwrap();
        let sim = device.sim_input().unwrap();
        let callback = Arc::new(CountingInput {
            frames: AtomicU64::new(0),
        });

        input.set_callback(Some(callback.clone())).unwrap();
        assert!(!sim.deliver_frame());

        input
            .enable_video_input(DisplayModeId::Pal, PixelFormat::Yuv8, VideoInputFlags::DEFAULT)
            .unwrap();
        input.start_streams().unwrap();
        assert!(sim.deliver_frame());
        assert!(sim.deliver_frame());
        sim.deliver_null_frame();

        assert_eq!(callback.frames.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_format_change_requires_detection() {
        let device = SimDevice::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let input = device.input().unwrap();
        let sim = device.sim_input().unwrap();
        input
            .set_callback(Some(Arc::new(CountingInput {
                frames: AtomicU64::new(0),
            })))
            .unwrap();

        input
            .enable_video_input(DisplayModeId::Pal, PixelFormat::Yuv8, VideoInputFlags::DEFAULT)
            .unwrap();
        input.start_streams().unwrap();
        assert!(!sim.signal_format_change(
            FormatChangedEvents::DISPLAY_MODE_CHANGED,
            DisplayModeId::Hd1080p25,
            DetectedFormatFlags::YCBCR_422 | DetectedFormatFlags::BIT_DEPTH_8,
        ));
    }

    #[test]
    fn test_realtime_input_generates_frames() {
        let config =
            SimDeviceConfig::input_only("DeckLink Duo (2)").with_pacing(FramePacing::Realtime);
        let device = SimDevice::new(config);
        let input = device.input().unwrap();
        let callback = Arc::new(CountingInput {
            frames: AtomicU64::new(0),
        });

        input.set_callback(Some(callback.clone())).unwrap();
        input
            .enable_video_input(DisplayModeId::Hd720p60, PixelFormat::Yuv8, VideoInputFlags::DEFAULT)
            .unwrap();
        input.start_streams().unwrap();
        thread::sleep(Duration::from_millis(200));
        input.stop_streams().unwrap();

        let delivered = callback.frames.load(Ordering::SeqCst);
        assert!(delivered > 0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(callback.frames.load(Ordering::SeqCst), delivered);
    }

    #[test]
    fn test_mode_support_rules() {
        let attrs = SimDeviceConfig::duplex("x").attributes;
        let sdi = VideoConnection::SDI;

        assert!(supports_mode(&attrs, sdi, sdi, DisplayModeId::Hd1080p5994, SupportedVideoModeFlags::SDI_SINGLE_LINK));
        assert!(!supports_mode(&attrs, sdi, sdi, DisplayModeId::Uhd2160p60, SupportedVideoModeFlags::SDI_SINGLE_LINK));
        assert!(!supports_mode(&attrs, sdi, sdi, DisplayModeId::Uhd2160p25, SupportedVideoModeFlags::SDI_QUAD_LINK));
        assert!(!supports_mode(&attrs, sdi, VideoConnection::COMPONENT, DisplayModeId::Pal, SupportedVideoModeFlags::DEFAULT));
        assert!(supports_mode(&attrs, sdi, VideoConnection::UNSPECIFIED, DisplayModeId::Pal, SupportedVideoModeFlags::DEFAULT));
    }

    #[test]
    fn test_driver_announces_present_devices() {
        struct Names(Mutex<Vec<String>>);

        impl DeviceNotificationCallback for Names {
            fn device_arrived(&self, device: Arc<dyn DeckLink>) {
                self.0.lock().push(format!("+{}", device.display_name()));
            }

            fn device_removed(&self, device: Arc<dyn DeckLink>) {
                self.0.lock().push(format!("-{}", device.display_name()));
            }
        }

        let first = SimDevice::new(SimDeviceConfig::duplex("DeckLink Duo (1)"));
        let driver = SimDriver::with_devices([first.clone()]);
        let names = Arc::new(Names(Mutex::new(Vec::new())));

        driver.install_device_notifications(names.clone()).unwrap();
        driver.add_device(SimDevice::new(SimDeviceConfig::duplex("DeckLink Duo (2)")));
        assert!(driver.remove_device(first.persistent_id()));
        assert!(!driver.remove_device(first.persistent_id()));

        assert_eq!(
            *names.0.lock(),
            vec!["+DeckLink Duo (1)", "+DeckLink Duo (2)", "-DeckLink Duo (1)"]
        );
    }
}
