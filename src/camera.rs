// src/camera.rs

use crate::frame::Frame;
use crate::types::CameraConfig;
use anyhow::Result;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use tracing::info;

/// Frame acquisition seam. `Ok(None)` means "no frame this tick"; the
/// window keeps polling, it is not an error.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

pub struct Camera {
    cap: VideoCapture,
}

impl Camera {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        info!("Opening camera {}", config.index);

        let mut cap = VideoCapture::new(config.index, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            anyhow::bail!("Failed to open camera {}", config.index);
        }

        // Resolution is a hint; the device may deliver something else and
        // every frame carries its own dimensions.
        cap.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)?;
        cap.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)?;

        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)?;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)?;
        info!("✓ Camera ready at {:.0}x{:.0}", width, height);

        Ok(Self { cap })
    }
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut mat = Mat::default();

        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        let width = rgb_mat.cols() as usize;
        let height = rgb_mat.rows() as usize;
        let data = rgb_mat.data_bytes()?.to_vec();

        Ok(Some(Frame::new(data, width, height)))
    }
}
