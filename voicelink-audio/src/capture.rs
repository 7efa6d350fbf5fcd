use crate::error::DeviceError;
use crate::queue::{CaptureConsumer, capture_queue};

pub use crate::queue::CaptureProducer;

/// A hardware (or simulated) microphone.
///
/// The device owns its own callback context. It must deliver frames in the
/// wire format through `CaptureProducer::push`, which never blocks.
pub trait CaptureDevice: Send {
    fn start(&mut self, producer: CaptureProducer) -> Result<(), DeviceError>;
    fn stop(&mut self);
}

pub struct AudioCapture {
    device: Box<dyn CaptureDevice>,
    capacity: usize,
    running: bool,
}

impl AudioCapture {
    pub fn new(device: Box<dyn CaptureDevice>, capacity: usize) -> Self {
        Self {
            device,
            capacity,
            running: false,
        }
    }

    /// Starts the device and hands back the consuming end of its queue.
    pub fn start(&mut self) -> Result<CaptureConsumer, DeviceError> {
        if self.running {
            return Err(DeviceError::AlreadyStarted);
        }
        let (producer, consumer) = capture_queue(self.capacity);
        self.device.start(producer)?;
        self.running = true;
        log::info!("Audio capture started (queue={} frames)", self.capacity);
        Ok(consumer)
    }

    /// Releases the device. Dropping the producer ends the consumer's stream.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.device.stop();
        self.running = false;
        log::info!("Audio capture stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicelink_core::types::PcmFrame;

    struct OneShotDevice {
        producer: Option<CaptureProducer>,
        frames: Vec<PcmFrame>,
    }

    impl CaptureDevice for OneShotDevice {
        fn start(&mut self, producer: CaptureProducer) -> Result<(), DeviceError> {
            for f in self.frames.drain(..) {
                producer.push(f);
            }
            self.producer = Some(producer);
            Ok(())
        }

        fn stop(&mut self) {
            self.producer = None;
        }
    }

    struct BrokenDevice;

    impl CaptureDevice for BrokenDevice {
        fn start(&mut self, _producer: CaptureProducer) -> Result<(), DeviceError> {
            Err(DeviceError::NoInputDevice)
        }

        fn stop(&mut self) {}
    }

    #[tokio::test]
    async fn frames_flow_until_stop() {
        let mut capture = AudioCapture::new(
            Box::new(OneShotDevice {
                producer: None,
                frames: vec![PcmFrame::new(vec![1]), PcmFrame::new(vec![2])],
            }),
            4,
        );
        let mut rx = capture.start().unwrap();
        assert!(capture.is_running());
        assert!(matches!(capture.start(), Err(DeviceError::AlreadyStarted)));

        assert_eq!(rx.recv().await, Some(PcmFrame::new(vec![1])));
        assert_eq!(rx.recv().await, Some(PcmFrame::new(vec![2])));

        capture.stop();
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn device_failure_surfaces() {
        let mut capture = AudioCapture::new(Box::new(BrokenDevice), 4);
        assert!(matches!(capture.start(), Err(DeviceError::NoInputDevice)));
        assert!(!capture.is_running());
    }
}
