use super::{BYTES_PER_PIXEL, FrameSource, RawFrame, SourceFactory};
use crate::Result;

/// Synthetic frame source drawing a moving gradient.
///
/// Stands in for a camera on machines without capture hardware. Each device
/// gets a different hue so channels can be told apart downstream.
#[derive(Debug)]
pub struct PatternSource {
    device: u32,
    width: u32,
    height: u32,
    tick: u64,
}

impl PatternSource {
    pub fn new(device: u32, width: u32, height: u32) -> Self {
        Self {
            device,
            width,
            height,
            tick: 0,
        }
    }

    pub fn frames_produced(&self) -> u64 {
        self.tick
    }
}

impl FrameSource for PatternSource {
    fn next_frame(&mut self) -> Result<RawFrame> {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = self.tick as usize;
        let hue = (self.device as usize * 67) % 256;
        let mut data = Vec::with_capacity(w * h * BYTES_PER_PIXEL);

        for y in 0..h {
            for x in 0..w {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift / 2) % 256) as u8);
                data.push(hue as u8);
            }
        }

        self.tick += 1;
        Ok(RawFrame::new(self.width, self.height, data))
    }
}

/// Opens a [`PatternSource`] for any device index.
#[derive(Debug, Clone, Copy)]
pub struct PatternSourceFactory {
    width: u32,
    height: u32,
}

impl PatternSourceFactory {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl SourceFactory for PatternSourceFactory {
    fn open(&self, device: u32) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(PatternSource::new(device, self.width, self.height)))
    }
}
