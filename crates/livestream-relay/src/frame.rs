//! Broadcast sample types.

use bytes::Bytes;
use std::time::Instant;

/// Kind of sample delivered by the OS broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    /// Screen video, NV12.
    Video,
    /// Audio played by apps on the device.
    AppAudio,
    /// Microphone audio.
    MicAudio,
}

/// Timestamp for a broadcast sample.
#[derive(Debug, Clone, Copy)]
pub struct SampleTimestamp {
    /// Monotonic time when the sample was received.
    pub capture_time: Instant,

    /// Presentation timestamp in 100ns units.
    pub pts_100ns: u64,
}

impl SampleTimestamp {
    /// Timestamp relative to the broadcast start.
    pub fn now(start_time: Instant) -> Self {
        let capture_time = Instant::now();
        let elapsed = capture_time.duration_since(start_time);

        Self {
            capture_time,
            pts_100ns: elapsed.as_nanos() as u64 / 100,
        }
    }

    /// Presentation timestamp in milliseconds.
    pub fn pts_ms(&self) -> u64 {
        self.pts_100ns / 10_000
    }
}

/// One sample buffer from the OS broadcast.
#[derive(Debug, Clone)]
pub struct SampleFrame {
    pub kind: SampleKind,

    /// Raw payload: NV12 pixels for video, PCM for audio.
    pub data: Bytes,

    /// Frame width in pixels (zero for audio).
    pub width: u32,

    /// Frame height in pixels (zero for audio).
    pub height: u32,

    pub timestamp: SampleTimestamp,

    /// Monotonically increasing per broadcast.
    pub sequence: u64,
}

impl SampleFrame {
    /// Create a video sample.
    pub fn video(
        data: Bytes,
        width: u32,
        height: u32,
        timestamp: SampleTimestamp,
        sequence: u64,
    ) -> Self {
        Self {
            kind: SampleKind::Video,
            data,
            width,
            height,
            timestamp,
            sequence,
        }
    }

    /// Create an audio sample.
    pub fn audio(kind: SampleKind, data: Bytes, timestamp: SampleTimestamp, sequence: u64) -> Self {
        Self {
            kind,
            data,
            width: 0,
            height: 0,
            timestamp,
            sequence,
        }
    }

    /// Expected NV12 buffer size for given dimensions.
    pub fn nv12_buffer_size(width: u32, height: u32) -> usize {
        // Y plane plus half-size interleaved UV plane.
        let y_size = width as usize * height as usize;
        y_size + y_size / 2
    }

    /// Check the payload against the declared format.
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            SampleKind::Video => {
                if self.width == 0 || self.height == 0 {
                    return Err(format!("empty dimensions {}x{}", self.width, self.height));
                }
                let expected = Self::nv12_buffer_size(self.width, self.height);
                if self.data.len() != expected {
                    return Err(format!(
                        "{}x{} NV12 needs {} bytes, got {}",
                        self.width,
                        self.height,
                        expected,
                        self.data.len()
                    ));
                }
                Ok(())
            }
            SampleKind::AppAudio | SampleKind::MicAudio => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_size() {
        assert_eq!(SampleFrame::nv12_buffer_size(540, 960), 777_600);
        assert_eq!(SampleFrame::nv12_buffer_size(2, 2), 6);
    }

    #[test]
    fn test_video_validation() {
        let ts = SampleTimestamp::now(Instant::now());
        let good = SampleFrame::video(Bytes::from(vec![0u8; 6]), 2, 2, ts, 0);
        assert!(good.validate().is_ok());

        let short = SampleFrame::video(Bytes::from(vec![0u8; 4]), 2, 2, ts, 1);
        assert!(short.validate().is_err());

        let empty = SampleFrame::video(Bytes::new(), 0, 0, ts, 2);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_audio_has_no_dimensions() {
        let ts = SampleTimestamp::now(Instant::now());
        let frame = SampleFrame::audio(SampleKind::MicAudio, Bytes::from_static(&[1, 2]), ts, 0);
        assert_eq!((frame.width, frame.height), (0, 0));
        assert!(frame.validate().is_ok());
    }
}
