use isi_types::CameraFrame;

/// What a capture produced for the hardware timestamp. `Unavailable`
/// triggers the development-mode software-timestamp fallback (or, in
/// Recording without development mode, a fatal error) in the capture
/// loop — see [`crate::capture`].
#[derive(Debug, Clone, Copy)]
pub enum CaptureTimestamp {
    Hardware(i64),
    Unavailable,
}

/// One capture: grayscale (destined for recording) and RGBA (destined
/// for display via the bus), sharing one timestamp.
///
/// `fallback_timestamp_us` lets a source that has no real hardware clock
/// (the synthetic source, certain low-end drivers) hand the capture loop
/// a deterministic value to use when `timestamp` is `Unavailable` and
/// development mode permits the substitution, instead of the loop always
/// reaching for the wall clock.
pub struct CapturedFrame {
    pub gray: CameraFrame,
    pub rgba: CameraFrame,
    pub timestamp: CaptureTimestamp,
    pub fallback_timestamp_us: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
#[error("camera capture failed: {0}")]
pub struct CameraSourceError(pub String);

/// Hardware abstraction for C7. No vendor SDK binding lives in this
/// crate — real backends implement this trait elsewhere; the synthetic
/// source below stands in for hardware in tests and development mode.
pub trait CameraSource: Send {
    fn name(&self) -> &str;
    fn capture(&mut self) -> Result<CapturedFrame, CameraSourceError>;
}

/// A deterministic, hardware-free camera source for tests and
/// development-mode runs: produces monotonically increasing timestamps
/// at a fixed interval and a flat-gray frame stamped with the frame
/// counter, so recorded sequences are trivially checkable.
pub struct SyntheticCameraSource {
    name: String,
    width: u32,
    height: u32,
    next_frame: u64,
    base_timestamp_us: i64,
    interval_us: i64,
    report_hardware_timestamps: bool,
}

impl SyntheticCameraSource {
    pub fn new(width: u32, height: u32, base_timestamp_us: i64, interval_us: i64) -> Self {
        Self {
            name: "synthetic".to_string(),
            width,
            height,
            next_frame: 0,
            base_timestamp_us,
            interval_us,
            report_hardware_timestamps: false,
        }
    }

    /// Makes this source report its timestamps as `Hardware(..)` rather
    /// than `Unavailable`, for tests exercising the hardware-timestamp
    /// path without the development-mode fallback.
    pub fn with_hardware_timestamps(mut self) -> Self {
        self.report_hardware_timestamps = true;
        self
    }
}

impl CameraSource for SyntheticCameraSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&mut self) -> Result<CapturedFrame, CameraSourceError> {
        let i = self.next_frame;
        self.next_frame += 1;
        let ts_us = self.base_timestamp_us + i as i64 * self.interval_us;

        let value = (i % 256) as u8;
        let gray_data = vec![value; (self.width * self.height) as usize];
        let gray = CameraFrame::new(self.width, self.height, 1, gray_data);

        let rgba_data = vec![value; (self.width * self.height) as usize * 4];
        let rgba = CameraFrame::new(self.width, self.height, 4, rgba_data);

        let timestamp = if self.report_hardware_timestamps {
            CaptureTimestamp::Hardware(ts_us)
        } else {
            CaptureTimestamp::Unavailable
        };

        Ok(CapturedFrame {
            gray,
            rgba,
            timestamp,
            fallback_timestamp_us: Some(ts_us),
        })
    }
}
