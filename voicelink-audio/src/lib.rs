pub mod capture;
pub mod error;
pub mod playback;
pub mod queue;
pub mod resample;

// Hardware backends are only built with the `cpal` feature.
#[cfg(feature = "cpal")]
pub mod device;

pub use capture::{AudioCapture, CaptureDevice};
pub use error::DeviceError;
pub use playback::{AudioPlayback, PcmSink, PlaybackSender, PlaybackStats};
pub use queue::{CaptureConsumer, CaptureProducer, RawHandoff, capture_queue};

#[cfg(feature = "cpal")]
pub use device::{CpalInput, CpalOutput};
