//! DeckLink capture controller
//!
//! Drives one input through `Idle -> Capturing -> Idle`. Frames arrive on the
//! driver's callback thread and are forwarded to the caller's
//! [`CaptureCallback`] without taking any lock. When input format detection
//! is enabled, a detected signal change is followed by a
//! stop/enable/start round-trip in the new format.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::device::DeviceDescriptor;
use super::flags::{
    DetectedFormatFlags, FormatChangedEvents, SupportedVideoModeFlags, VideoConnection,
    VideoInputFlags,
};
use super::format::PixelFormat;
use super::frame::{FrameMeta, VideoFrame};
use super::hal::{
    DeckLink, DeckLinkInput, HardwareError, InputCallback, ProfileManager, ProfileNotifications,
};
use super::mode::{DisplayMode, DisplayModeId};
use crate::error::{AppError, Capability, Result};
use crate::events::{DeckLinkEvent, DeviceRef, EventBus};

/// How long a format change waits for the session before giving up.
/// Only contended while capture is being started or stopped.
const FORMAT_CHANGE_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Pixel format capture starts with, before any detected change
pub const INITIAL_PIXEL_FORMAT: PixelFormat = PixelFormat::Yuv8;

/// Receives captured frames
///
/// Called on the driver's callback thread; implementations must return
/// quickly.
pub trait CaptureCallback: Send + Sync {
    fn frame_arrived(&self, frame: &VideoFrame);

    /// Capture was reconfigured to a detected input format
    fn format_changed(&self, _mode: &DisplayMode, _pixel_format: PixelFormat, _dual_stream_3d: bool) {}

    /// Reconfiguring to a detected format failed and capture has stopped
    fn capture_failed(&self, _error: &HardwareError) {}
}

impl<F> CaptureCallback for F
where
    F: Fn(&VideoFrame) + Send + Sync,
{
    fn frame_arrived(&self, frame: &VideoFrame) {
        self(frame)
    }
}

/// Capture controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    Idle,
    Capturing,
}

/// Format of the running capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub mode: DisplayModeId,
    pub pixel_format: PixelFormat,
    pub flags: VideoInputFlags,
}

/// Capture statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Frames forwarded to the callback
    pub frames_delivered: u64,
    /// Callbacks that carried no video frame
    pub null_frames: u64,
    /// Frames dropped while the input was being reconfigured
    pub frames_suppressed: u64,
    /// Detected format changes applied
    pub format_changes: u64,
}

#[derive(Default)]
struct Counters {
    frames_delivered: AtomicU64,
    null_frames: AtomicU64,
    frames_suppressed: AtomicU64,
    format_changes: AtomicU64,
}

struct CaptureSession {
    format: CaptureFormat,
    dispatcher: Arc<Dispatcher>,
}

struct Shared {
    device: DeviceRef,
    input: Arc<dyn DeckLinkInput>,
    session: Mutex<Option<CaptureSession>>,
    /// Set during the stop/enable/start round-trip of a format change
    reconfiguring: AtomicBool,
    counters: Counters,
    events: Arc<EventBus>,
}

impl Shared {
    fn apply_detected_format(
        &self,
        dispatcher: &Dispatcher,
        events: FormatChangedEvents,
        mode: &DisplayMode,
        detected: DetectedFormatFlags,
    ) {
        let Some(pixel_format) = PixelFormat::from_detected_flags(detected) else {
            debug!(
                "Ignoring unsupported detected format on {}: {:?}",
                self.device.name, detected
            );
            return;
        };

        let dual_stream_3d = detected.contains(DetectedFormatFlags::DUAL_STREAM_3D);
        let mut flags = VideoInputFlags::ENABLE_FORMAT_DETECTION;
        if dual_stream_3d {
            flags |= VideoInputFlags::DUAL_STREAM_3D;
        }

        if !events.intersects(
            FormatChangedEvents::DISPLAY_MODE_CHANGED | FormatChangedEvents::COLORSPACE_CHANGED,
        ) {
            debug!("Format change on {} needs no reconfiguration: {:?}", self.device.name, events);
            return;
        }

        let Some(mut guard) = self.session.try_lock_for(FORMAT_CHANGE_LOCK_TIMEOUT) else {
            warn!("Capture on {} is changing state, ignoring format change", self.device.name);
            return;
        };
        let Some(session) = guard.as_mut() else {
            return;
        };
        if !std::ptr::eq(Arc::as_ptr(&session.dispatcher), dispatcher) {
            return;
        }

        info!(
            "Input format on {} changed to {} {}, reconfiguring",
            self.device.name, mode, pixel_format
        );

        self.reconfiguring.store(true, Ordering::Release);
        if let Err(e) = self.input.stop_streams() {
            self.reconfiguring.store(false, Ordering::Release);
            error!(
                "Failed to stop streams for format change on {}, keeping {}: {}",
                self.device.name, session.format.mode, e
            );
            return;
        }
        let result = self
            .input
            .enable_video_input(mode.id, pixel_format, flags)
            .and_then(|_| self.input.start_streams());
        self.reconfiguring.store(false, Ordering::Release);

        if let Err(e) = result {
            error!("Failed to apply detected format on {}: {}", self.device.name, e);
            // The input is left stopped; end the session rather than report a
            // capture that no longer streams
            if let Some(session) = guard.take() {
                session.dispatcher.active.store(false, Ordering::Release);
            }
            self.release_input();
            drop(guard);

            self.events.publish(DeckLinkEvent::InputFormatChangeFailed {
                device: self.device.clone(),
                display_mode: mode.clone(),
                pixel_format,
                error: e.to_string(),
            });
            dispatcher.callback.capture_failed(&e);
            return;
        }

        session.format = CaptureFormat {
            mode: mode.id,
            pixel_format,
            flags,
        };
        drop(guard);

        self.counters.format_changes.fetch_add(1, Ordering::Relaxed);
        self.events.publish(DeckLinkEvent::InputFormatChanged {
            device: self.device.clone(),
            display_mode: mode.clone(),
            pixel_format,
            dual_stream_3d,
        });
        dispatcher
            .callback
            .format_changed(mode, pixel_format, dual_stream_3d);
    }

    /// Disable the input and drop every callback installed on it
    fn release_input(&self) {
        if let Err(e) = self.input.disable_video_input() {
            warn!("Failed to disable video input on {}: {}", self.device.name, e);
        }
        if let Err(e) = self.input.set_screen_preview_callback(None) {
            warn!("Failed to clear preview callback on {}: {}", self.device.name, e);
        }
        if let Err(e) = self.input.set_callback(None) {
            warn!("Failed to clear input callback on {}: {}", self.device.name, e);
        }
    }
}

/// Input callback installed for one capture session
struct Dispatcher {
    shared: Weak<Shared>,
    callback: Arc<dyn CaptureCallback>,
    apply_detected_format: bool,
    active: AtomicBool,
}

impl InputCallback for Dispatcher {
    fn video_input_format_changed(
        &self,
        events: FormatChangedEvents,
        mode: &DisplayMode,
        detected: DetectedFormatFlags,
    ) {
        if !self.apply_detected_format || !self.active.load(Ordering::Acquire) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.apply_detected_format(self, events, mode, detected);
        }
    }

    fn video_input_frame_arrived(&self, frame: Option<&VideoFrame>) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let Some(frame) = frame else {
            shared.counters.null_frames.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if shared.reconfiguring.load(Ordering::Acquire) {
            shared.counters.frames_suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        shared.counters.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.callback.frame_arrived(frame);
        shared.events.publish(DeckLinkEvent::VideoFrameArrived {
            device: shared.device.clone(),
            frame: FrameMeta::from(frame),
        });
    }
}

/// Capture controller bound to one device
pub struct CaptureController {
    descriptor: DeviceDescriptor,
    shared: Arc<Shared>,
    profile_manager: Option<Arc<dyn ProfileManager>>,
}

impl CaptureController {
    /// Bind to a capture-capable device and register the shared profile callback
    pub fn new(
        device: Arc<dyn DeckLink>,
        profile_callback: Arc<dyn ProfileNotifications>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let descriptor = DeviceDescriptor::query(device.clone());
        descriptor.require(Capability::Capture)?;
        let input = device.input().ok_or_else(|| AppError::MissingCapability {
            device: descriptor.display_name().to_string(),
            capability: Capability::Capture,
        })?;

        let profile_manager = device.profile_manager();
        if let Some(manager) = &profile_manager {
            manager
                .set_callback(Some(profile_callback))
                .map_err(|e| AppError::hardware(descriptor.display_name(), e))?;
        }

        debug!(
            "Capture controller bound to {} (format detection: {})",
            descriptor.display_name(),
            descriptor.attributes().supports_input_format_detection
        );

        Ok(Self {
            shared: Arc::new(Shared {
                device: DeviceRef::of(device.as_ref()),
                input,
                session: Mutex::new(None),
                reconfiguring: AtomicBool::new(false),
                counters: Counters::default(),
                events,
            }),
            descriptor,
            profile_manager,
        })
    }

    /// Start capturing `mode` in 8-bit YUV
    ///
    /// No-op while already capturing. With `apply_detected_format` and a
    /// device that supports it, input format detection is enabled and
    /// detected signal changes are applied automatically.
    pub fn start_capture(
        &self,
        mode: DisplayModeId,
        callback: Arc<dyn CaptureCallback>,
        apply_detected_format: bool,
    ) -> Result<()> {
        let mut session = self.shared.session.lock();
        if session.is_some() {
            debug!("Capture already running on {}", self.display_name());
            return Ok(());
        }

        let mut flags = VideoInputFlags::DEFAULT;
        if apply_detected_format && self.supports_format_detection() {
            flags |= VideoInputFlags::ENABLE_FORMAT_DETECTION;
        }

        let dispatcher = Arc::new(Dispatcher {
            shared: Arc::downgrade(&self.shared),
            callback,
            apply_detected_format,
            active: AtomicBool::new(true),
        });

        let input = &self.shared.input;
        let failed = |source| AppError::StartCaptureFailed {
            device: self.display_name().to_string(),
            source,
        };

        input.set_callback(Some(dispatcher.clone())).map_err(failed)?;

        if let Err(e) = input.enable_video_input(mode, INITIAL_PIXEL_FORMAT, flags) {
            dispatcher.active.store(false, Ordering::Release);
            self.clear_input_callback();
            return Err(failed(e));
        }

        if let Err(e) = input.start_streams() {
            dispatcher.active.store(false, Ordering::Release);
            if let Err(e) = input.disable_video_input() {
                warn!("Failed to disable video input on {}: {}", self.display_name(), e);
            }
            self.clear_input_callback();
            return Err(failed(e));
        }

        *session = Some(CaptureSession {
            format: CaptureFormat {
                mode,
                pixel_format: INITIAL_PIXEL_FORMAT,
                flags,
            },
            dispatcher,
        });
        info!("Capture started on {}: {} ({:?})", self.display_name(), mode, flags);
        Ok(())
    }

    /// Stop capturing. No-op (and no hardware access) while idle.
    pub fn stop_capture(&self) -> Result<()> {
        let mut guard = self.shared.session.lock();
        let Some(session) = guard.take() else {
            return Ok(());
        };

        session.dispatcher.active.store(false, Ordering::Release);
        let input = &self.shared.input;

        if let Err(e) = input.stop_streams() {
            session.dispatcher.active.store(true, Ordering::Release);
            *guard = Some(session);
            return Err(AppError::StopCaptureFailed {
                device: self.display_name().to_string(),
                source: e,
            });
        }

        self.shared.release_input();

        info!("Capture stopped on {}", self.display_name());
        Ok(())
    }

    fn clear_input_callback(&self) {
        if let Err(e) = self.shared.input.set_callback(None) {
            warn!("Failed to clear input callback on {}: {}", self.display_name(), e);
        }
    }

    /// Display modes the input supports on the current connection
    ///
    /// Each call returns a fresh iterator; support is checked lazily as the
    /// iterator advances.
    pub fn display_modes(&self) -> Result<impl Iterator<Item = DisplayMode>> {
        let connection = self.current_input_connection()?;
        let input = self.shared.input.clone();
        let modes = input
            .display_mode_iterator()
            .map_err(|e| AppError::hardware(self.display_name(), e))?;

        Ok(modes.filter(move |mode| {
            matches!(
                input.does_support_video_mode(
                    connection,
                    mode.id,
                    PixelFormat::Unspecified,
                    SupportedVideoModeFlags::DEFAULT,
                ),
                Ok(true)
            )
        }))
    }

    pub fn current_input_connection(&self) -> Result<VideoConnection> {
        self.descriptor
            .device()
            .video_input_connection()
            .map_err(|e| AppError::hardware(self.display_name(), e))
    }

    pub fn set_input_connection(&self, connection: VideoConnection) -> Result<()> {
        self.descriptor
            .device()
            .set_video_input_connection(connection)
            .map_err(|e| AppError::hardware(self.display_name(), e))?;
        info!("Input connection on {} set to {:?}", self.display_name(), connection);
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

    pub fn state(&self) -> CaptureState {
        if self.shared.session.lock().is_some() {
            CaptureState::Capturing
        } else {
            CaptureState::Idle
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == CaptureState::Capturing
    }

    pub fn supports_format_detection(&self) -> bool {
        self.descriptor.attributes().supports_input_format_detection
    }

    pub fn available_input_connections(&self) -> VideoConnection {
        self.descriptor.input_connections()
    }

    /// Mode and pixel format of the running capture
    pub fn current_format(&self) -> Option<CaptureFormat> {
        self.shared.session.lock().as_ref().map(|s| s.format)
    }

    pub fn stats(&self) -> CaptureStats {
        let c = &self.shared.counters;
        CaptureStats {
            frames_delivered: c.frames_delivered.load(Ordering::Relaxed),
            null_frames: c.null_frames.load(Ordering::Relaxed),
            frames_suppressed: c.frames_suppressed.load(Ordering::Relaxed),
            format_changes: c.format_changes.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Err(e) = self.stop_capture() {
            warn!("Failed to stop capture on drop: {}", e);
        }
        if let Some(manager) = &self.profile_manager {
            if let Err(e) = manager.set_callback(None) {
                warn!("Failed to unregister profile callback on {}: {}", self.display_name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::profile::ProfileCallback;
    use crate::video::sim::{SimDevice, SimDeviceConfig, SimInput};

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<u64>>,
        formats: Mutex<Vec<(DisplayModeId, PixelFormat, bool)>>,
    }

    impl CaptureCallback for Recorder {
        fn frame_arrived(&self, frame: &VideoFrame) {
            self.frames.lock().push(frame.sequence);
        }

        fn format_changed(&self, mode: &DisplayMode, pixel_format: PixelFormat, dual_stream_3d: bool) {
            self.formats.lock().push((mode.id, pixel_format, dual_stream_3d));
        }
    }

    #[derive(Default)]
    struct FailureRecorder {
        failures: Mutex<Vec<HardwareError>>,
    }

    impl CaptureCallback for FailureRecorder {
        fn frame_arrived(&self, _frame: &VideoFrame) {}

        fn capture_failed(&self, error: &HardwareError) {
            self.failures.lock().push(error.clone());
        }
    }

    struct Fixture {
        device: Arc<SimDevice>,
        bus: Arc<EventBus>,
        controller: CaptureController,
    }

    impl Fixture {
        fn new(config: SimDeviceConfig) -> Self {
            let device = SimDevice::new(config);
            let bus = Arc::new(EventBus::new());
            let controller =
                CaptureController::new(device.clone(), ProfileCallback::new(bus.clone()), bus.clone())
                    .unwrap();
            device.clear_calls();
            Self {
                device,
                bus,
                controller,
            }
        }

        fn input(&self) -> &Arc<SimInput> {
            self.device.sim_input().unwrap()
        }
    }

    fn rgb10() -> DetectedFormatFlags {
        DetectedFormatFlags::RGB_444 | DetectedFormatFlags::BIT_DEPTH_10
    }

    #[test]
    fn test_new_requires_capture_support() {
        let device = SimDevice::new(SimDeviceConfig::output_only("DeckLink Duo (4)"));
        let bus = Arc::new(EventBus::new());

        let result = CaptureController::new(device.clone(), ProfileCallback::new(bus.clone()), bus);

        assert!(matches!(
            result,
            Err(AppError::MissingCapability {
                capability: Capability::Capture,
                ..
            })
        ));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_profile_callback_registered_for_lifetime() {
        let device = SimDevice::new(SimDeviceConfig::duplex("DeckLink Duo (2)"));
        let bus = Arc::new(EventBus::new());
        let controller =
            CaptureController::new(device.clone(), ProfileCallback::new(bus.clone()), bus).unwrap();

        assert_eq!(device.calls(), vec!["profile.set_callback"]);
        assert!(device.sim_profiles().unwrap().has_callback());

        drop(controller);
        assert!(!device.sim_profiles().unwrap().has_callback());
    }

    #[test]
    fn test_start_capture_sequence() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));

        fx.controller
            .start_capture(DisplayModeId::Hd1080i50, Arc::new(Recorder::default()), true)
            .unwrap();

        assert_eq!(
            fx.device.calls(),
            vec!["input.set_callback", "input.enable_video_input", "input.start_streams"]
        );
        assert_eq!(
            fx.input().enabled_format(),
            Some((
                DisplayModeId::Hd1080i50,
                PixelFormat::Yuv8,
                VideoInputFlags::ENABLE_FORMAT_DETECTION
            ))
        );
        assert!(fx.controller.is_capturing());
        assert_eq!(
            fx.controller.current_format().map(|f| f.pixel_format),
            Some(PixelFormat::Yuv8)
        );
    }

    #[test]
    fn test_start_capture_is_idempotent() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let callback = Arc::new(Recorder::default());

        fx.controller
            .start_capture(DisplayModeId::Hd1080i50, callback.clone(), true)
            .unwrap();
        fx.device.clear_calls();
        fx.controller
            .start_capture(DisplayModeId::Hd720p50, callback, false)
            .unwrap();

        assert!(fx.device.calls().is_empty());
        assert_eq!(
            fx.controller.current_format().map(|f| f.mode),
            Some(DisplayModeId::Hd1080i50)
        );
    }

    #[test]
    fn test_detection_flag_needs_support_and_request() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)").without_format_detection());
        fx.controller
            .start_capture(DisplayModeId::Pal, Arc::new(Recorder::default()), true)
            .unwrap();
        assert_eq!(
            fx.input().enabled_format().map(|f| f.2),
            Some(VideoInputFlags::DEFAULT)
        );

        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        fx.controller
            .start_capture(DisplayModeId::Pal, Arc::new(Recorder::default()), false)
            .unwrap();
        assert_eq!(
            fx.input().enabled_format().map(|f| f.2),
            Some(VideoInputFlags::DEFAULT)
        );
    }

    #[test]
    fn test_start_failure_rolls_back() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        fx.device.fail("input.start_streams", HardwareError::Busy);

        let result =
            fx.controller
                .start_capture(DisplayModeId::Hd1080i50, Arc::new(Recorder::default()), true);

        match result {
            Err(AppError::StartCaptureFailed { device, source }) => {
                assert_eq!(device, "DeckLink Duo (2)");
                assert_eq!(source, HardwareError::Busy);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(fx.controller.state(), CaptureState::Idle);
        assert!(fx.input().enabled_format().is_none());
        assert!(fx.input().installed_callback().is_none());
        assert_eq!(
            fx.device.calls(),
            vec![
                "input.set_callback",
                "input.enable_video_input",
                "input.start_streams",
                "input.disable_video_input",
                "input.set_callback"
            ]
        );
    }

    #[test]
    fn test_stop_capture_when_idle_touches_nothing() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));

        fx.controller.stop_capture().unwrap();

        assert!(fx.device.calls().is_empty());
    }

    #[test]
    fn test_stop_capture_sequence() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        fx.controller
            .start_capture(DisplayModeId::Hd1080i50, Arc::new(Recorder::default()), true)
            .unwrap();
        fx.device.clear_calls();

        fx.controller.stop_capture().unwrap();

        assert_eq!(
            fx.device.calls(),
            vec![
                "input.stop_streams",
                "input.disable_video_input",
                "input.set_screen_preview_callback",
                "input.set_callback"
            ]
        );
        assert_eq!(fx.controller.state(), CaptureState::Idle);
        assert!(fx.controller.current_format().is_none());
    }

    #[test]
    fn test_stop_failure_keeps_capturing() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let callback = Arc::new(Recorder::default());
        fx.controller
            .start_capture(DisplayModeId::Hd1080i50, callback.clone(), true)
            .unwrap();
        fx.device.fail("input.stop_streams", HardwareError::Failed("timeout".into()));

        assert!(matches!(
            fx.controller.stop_capture(),
            Err(AppError::StopCaptureFailed { .. })
        ));
        assert!(fx.controller.is_capturing());
        assert!(fx.input().deliver_frame());
        assert_eq!(callback.frames.lock().len(), 1);

        fx.device.heal("input.stop_streams");
        fx.controller.stop_capture().unwrap();
        assert!(!fx.controller.is_capturing());
    }

    #[test]
    fn test_frames_forwarded_and_published() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let mut rx = fx.bus.subscribe();
        let callback = Arc::new(Recorder::default());
        fx.controller
            .start_capture(DisplayModeId::Pal, callback.clone(), true)
            .unwrap();

        assert!(fx.input().deliver_frame());
        fx.input().deliver_null_frame();
        assert!(fx.input().deliver_frame());

        assert_eq!(*callback.frames.lock(), vec![1, 2]);
        for expected in [1, 2] {
            match rx.try_recv().unwrap() {
                DeckLinkEvent::VideoFrameArrived { device, frame } => {
                    assert_eq!(device.name, "DeckLink Duo (2)");
                    assert_eq!(frame.sequence, expected);
                    assert_eq!(frame.stride, 1440);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(rx.try_recv().is_err());

        let stats = fx.controller.stats();
        assert_eq!(stats.frames_delivered, 2);
        assert_eq!(stats.null_frames, 1);
    }

    #[test]
    fn test_closure_callback() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        let callback = move |frame: &VideoFrame| {
            counter.store(frame.sequence, Ordering::SeqCst);
        };

        fx.controller
            .start_capture(DisplayModeId::Pal, Arc::new(callback), false)
            .unwrap();
        fx.input().deliver_frame();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detected_format_reconfigures_input() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let mut rx = fx.bus.subscribe();
        let callback = Arc::new(Recorder::default());
        fx.controller
            .start_capture(DisplayModeId::Hd1080i50, callback.clone(), true)
            .unwrap();
        fx.device.clear_calls();

        assert!(fx.input().signal_format_change(
            FormatChangedEvents::DISPLAY_MODE_CHANGED,
            DisplayModeId::Hd1080p25,
            rgb10(),
        ));

        assert_eq!(
            fx.device.calls(),
            vec!["input.stop_streams", "input.enable_video_input", "input.start_streams"]
        );
        assert_eq!(
            fx.input().enabled_format(),
            Some((
                DisplayModeId::Hd1080p25,
                PixelFormat::Rgb10,
                VideoInputFlags::ENABLE_FORMAT_DETECTION
            ))
        );
        assert_eq!(
            fx.controller.current_format(),
            Some(CaptureFormat {
                mode: DisplayModeId::Hd1080p25,
                pixel_format: PixelFormat::Rgb10,
                flags: VideoInputFlags::ENABLE_FORMAT_DETECTION,
            })
        );
        match rx.try_recv().unwrap() {
            DeckLinkEvent::InputFormatChanged {
                display_mode,
                pixel_format,
                dual_stream_3d,
                ..
            } => {
                assert_eq!(display_mode.id, DisplayModeId::Hd1080p25);
                assert_eq!(pixel_format, PixelFormat::Rgb10);
                assert!(!dual_stream_3d);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            *callback.formats.lock(),
            vec![(DisplayModeId::Hd1080p25, PixelFormat::Rgb10, false)]
        );
        assert_eq!(fx.controller.stats().format_changes, 1);

        // Frames now arrive in the new format
        assert!(fx.input().deliver_frame());
        match rx.try_recv().unwrap() {
            DeckLinkEvent::VideoFrameArrived { frame, .. } => {
                assert_eq!(frame.format, PixelFormat::Rgb10);
                assert_eq!(frame.stride, 7680);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_failed_reconfigure_ends_capture() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let mut rx = fx.bus.subscribe();
        let callback = Arc::new(FailureRecorder::default());
        fx.controller
            .start_capture(DisplayModeId::Hd1080i50, callback.clone(), true)
            .unwrap();
        fx.device.clear_calls();
        fx.device.fail("input.enable_video_input", HardwareError::Busy);

        assert!(fx.input().signal_format_change(
            FormatChangedEvents::DISPLAY_MODE_CHANGED,
            DisplayModeId::Hd1080p25,
            rgb10(),
        ));

        assert_eq!(fx.controller.state(), CaptureState::Idle);
        assert!(fx.controller.current_format().is_none());
        assert!(!fx.input().is_streaming());
        assert!(fx.input().enabled_format().is_none());
        assert!(fx.input().installed_callback().is_none());
        assert_eq!(
            fx.device.calls(),
            vec![
                "input.stop_streams",
                "input.enable_video_input",
                "input.disable_video_input",
                "input.set_screen_preview_callback",
                "input.set_callback"
            ]
        );
        match rx.try_recv().unwrap() {
            DeckLinkEvent::InputFormatChangeFailed {
                device,
                display_mode,
                pixel_format,
                error,
            } => {
                assert_eq!(device.name, "DeckLink Duo (2)");
                assert_eq!(display_mode.id, DisplayModeId::Hd1080p25);
                assert_eq!(pixel_format, PixelFormat::Rgb10);
                assert_eq!(error, HardwareError::Busy.to_string());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(*callback.failures.lock(), vec![HardwareError::Busy]);
        assert_eq!(fx.controller.stats().format_changes, 0);

        // Idle again, so stopping touches nothing and capture can restart
        fx.device.clear_calls();
        fx.controller.stop_capture().unwrap();
        assert!(fx.device.calls().is_empty());
        fx.device.heal("input.enable_video_input");
        fx.controller
            .start_capture(DisplayModeId::Hd1080i50, callback, true)
            .unwrap();
        assert!(fx.controller.is_capturing());
    }

    #[test]
    fn test_failed_stream_stop_keeps_old_format() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let mut rx = fx.bus.subscribe();
        fx.controller
            .start_capture(DisplayModeId::Hd1080i50, Arc::new(Recorder::default()), true)
            .unwrap();
        fx.device.fail("input.stop_streams", HardwareError::Busy);

        fx.input().signal_format_change(
            FormatChangedEvents::DISPLAY_MODE_CHANGED,
            DisplayModeId::Hd1080p25,
            rgb10(),
        );

        assert!(fx.controller.is_capturing());
        assert!(fx.input().is_streaming());
        assert_eq!(
            fx.controller.current_format().map(|f| (f.mode, f.pixel_format)),
            Some((DisplayModeId::Hd1080i50, PixelFormat::Yuv8))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dual_stream_3d_kept_on_reconfigure() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        fx.controller
            .start_capture(DisplayModeId::Hd1080i50, Arc::new(Recorder::default()), true)
            .unwrap();

        fx.input().signal_format_change(
            FormatChangedEvents::COLORSPACE_CHANGED,
            DisplayModeId::Hd720p50,
            DetectedFormatFlags::YCBCR_422
                | DetectedFormatFlags::BIT_DEPTH_8
                | DetectedFormatFlags::DUAL_STREAM_3D,
        );

        assert_eq!(
            fx.input().enabled_format(),
            Some((
                DisplayModeId::Hd720p50,
                PixelFormat::Yuv8,
                VideoInputFlags::ENABLE_FORMAT_DETECTION | VideoInputFlags::DUAL_STREAM_3D
            ))
        );
    }

    #[test]
    fn test_unmapped_or_minor_changes_ignored() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let mut rx = fx.bus.subscribe();
        fx.controller
            .start_capture(DisplayModeId::Hd1080i50, Arc::new(Recorder::default()), true)
            .unwrap();
        fx.device.clear_calls();

        // RGB 4:4:4 without a bit depth
        fx.input().signal_format_change(
            FormatChangedEvents::DISPLAY_MODE_CHANGED,
            DisplayModeId::Hd1080p25,
            DetectedFormatFlags::RGB_444,
        );
        // Field dominance alone
        fx.input().signal_format_change(
            FormatChangedEvents::FIELD_DOMINANCE_CHANGED,
            DisplayModeId::Hd1080p25,
            rgb10(),
        );

        assert!(fx.device.calls().is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(fx.controller.stats().format_changes, 0);
    }

    #[test]
    fn test_detected_format_not_applied_when_disabled() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        fx.controller
            .start_capture(DisplayModeId::Hd1080i50, Arc::new(Recorder::default()), false)
            .unwrap();
        fx.device.clear_calls();

        let dispatcher = fx.input().installed_callback().unwrap();
        dispatcher.video_input_format_changed(
            FormatChangedEvents::DISPLAY_MODE_CHANGED,
            &DisplayModeId::Hd1080p25.info(),
            rgb10(),
        );

        assert!(fx.device.calls().is_empty());
    }

    #[test]
    fn test_frames_suppressed_while_reconfiguring() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let mut rx = fx.bus.subscribe();
        let callback = Arc::new(Recorder::default());
        fx.controller
            .start_capture(DisplayModeId::Pal, callback.clone(), true)
            .unwrap();

        fx.controller.shared.reconfiguring.store(true, Ordering::Release);
        assert!(fx.input().deliver_frame());
        fx.controller.shared.reconfiguring.store(false, Ordering::Release);

        assert!(callback.frames.lock().is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(fx.controller.stats().frames_suppressed, 1);
    }

    #[test]
    fn test_stale_dispatcher_is_inert() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        let callback = Arc::new(Recorder::default());
        fx.controller
            .start_capture(DisplayModeId::Pal, callback.clone(), true)
            .unwrap();
        let old = fx.input().installed_callback().unwrap();
        fx.controller.stop_capture().unwrap();
        fx.device.clear_calls();

        let frame = VideoFrame::from_vec(
            vec![0; 16],
            crate::video::format::Resolution::new(4, 2),
            PixelFormat::Yuv8,
            8,
            99,
        );
        old.video_input_frame_arrived(Some(&frame));
        old.video_input_format_changed(
            FormatChangedEvents::DISPLAY_MODE_CHANGED,
            &DisplayModeId::Hd1080p25.info(),
            rgb10(),
        );

        assert!(callback.frames.lock().is_empty());
        assert!(fx.device.calls().is_empty());
    }

    #[test]
    fn test_display_modes_restartable() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));

        let first: Vec<_> = fx.controller.display_modes().unwrap().map(|m| m.id).collect();
        let second: Vec<_> = fx.controller.display_modes().unwrap().map(|m| m.id).collect();

        assert_eq!(first.len(), DisplayModeId::ALL.len());
        assert_eq!(first, second);
        assert_eq!(fx.device.call_count("input.display_mode_iterator"), 2);

        let mut lazy = fx.controller.display_modes().unwrap();
        assert_eq!(lazy.next().map(|m| m.id), Some(DisplayModeId::Ntsc));
    }

    #[test]
    fn test_input_connection_selection() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));

        assert_eq!(fx.controller.current_input_connection().unwrap(), VideoConnection::SDI);
        fx.controller.set_input_connection(VideoConnection::HDMI).unwrap();
        assert_eq!(fx.controller.current_input_connection().unwrap(), VideoConnection::HDMI);
        assert!(matches!(
            fx.controller.set_input_connection(VideoConnection::COMPONENT),
            Err(AppError::Hardware { .. })
        ));
        assert!(fx
            .controller
            .available_input_connections()
            .contains(VideoConnection::SDI | VideoConnection::HDMI));
    }

    #[test]
    fn test_drop_stops_capture() {
        let fx = Fixture::new(SimDeviceConfig::input_only("DeckLink Duo (2)"));
        fx.controller
            .start_capture(DisplayModeId::Pal, Arc::new(Recorder::default()), true)
            .unwrap();
        let device = fx.device.clone();
        drop(fx);

        assert!(!device.sim_input().unwrap().is_streaming());
        assert!(device.sim_input().unwrap().installed_callback().is_none());
        assert!(!device.sim_profiles().unwrap().has_callback());
    }
}
