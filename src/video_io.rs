// src/video_io.rs
//
// The opencv boundary: stream capture, clip writing, and overlay drawing.
// Frames cross this boundary as owned RGB buffers; everything opencv-shaped
// (BGR Mats, writers, captures) stays inside this module.

use crate::recorder::VideoSink;
use crate::types::{Frame, ObservedDetection};
use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat},
    imgcodecs, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use std::path::Path;
use tracing::info;

/// Fallback when the stream does not report a frame rate (common for RTSP).
const DEFAULT_FPS: f64 = 25.0;

pub enum FrameRead {
    Frame(Frame),
    /// Read failed or the stream ended; the caller decides whether to
    /// reconnect.
    Disconnected,
}

/// A connected stream of frames. Implemented over opencv `VideoCapture`
/// for RTSP URLs and video files; tests script their own sources.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<FrameRead>;
    fn reconnect(&mut self) -> Result<()>;
    fn fps(&self) -> f64;
    fn frame_size(&self) -> (i32, i32);
}

pub struct RtspSource {
    url: String,
    cap: VideoCapture,
    fps: f64,
    width: i32,
    height: i32,
}

impl RtspSource {
    /// Open the stream. Failure here is fatal to the caller: if the stream
    /// never existed there is nothing to reconnect to.
    pub fn open(url: &str) -> Result<Self> {
        info!("Opening stream: {}", url);
        let cap = Self::connect(url)?;

        let fps = cap.get(videoio::CAP_PROP_FPS)?;
        let fps = if fps > 0.0 { fps } else { DEFAULT_FPS };
        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!("Stream properties: {}x{} @ {:.1} FPS", width, height, fps);

        Ok(Self {
            url: url.to_string(),
            cap,
            fps,
            width,
            height,
        })
    }

    fn connect(url: &str) -> Result<VideoCapture> {
        let mut cap = VideoCapture::from_file(url, videoio::CAP_ANY)
            .with_context(|| format!("opening stream {url}"))?;
        if !cap.is_opened()? {
            bail!("failed to open stream {url}");
        }
        // Keep the capture buffer at one frame so reads track the live
        // edge of the stream instead of a stale backlog.
        cap.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;
        Ok(cap)
    }
}

impl FrameSource for RtspSource {
    fn read_frame(&mut self) -> Result<FrameRead> {
        let mut mat = Mat::default();
        if !self.cap.read(&mut mat)? || mat.empty() {
            return Ok(FrameRead::Disconnected);
        }
        let timestamp_ms = self.cap.get(videoio::CAP_PROP_POS_MSEC)?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let data = rgb.data_bytes()?.to_vec();

        Ok(FrameRead::Frame(Frame {
            data,
            width: self.width as usize,
            height: self.height as usize,
            timestamp_ms,
        }))
    }

    fn reconnect(&mut self) -> Result<()> {
        self.cap.release()?;
        self.cap = Self::connect(&self.url)?;
        Ok(())
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_size(&self) -> (i32, i32) {
        (self.width, self.height)
    }
}

/// Event clip writer over opencv `VideoWriter` (mp4v).
pub struct Mp4Sink {
    writer: VideoWriter,
}

impl Mp4Sink {
    pub fn open(path: &Path, fps: f64, size: (i32, i32)) -> Result<Self> {
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            path.to_str().context("clip path is not valid UTF-8")?,
            fourcc,
            fps,
            core::Size::new(size.0, size.1),
            true,
        )?;
        if !writer.is_opened()? {
            bail!("failed to open clip writer {}", path.display());
        }
        Ok(Self { writer })
    }
}

impl VideoSink for Mp4Sink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mat = frame_to_bgr_mat(frame)?;
        self.writer.write(&mat)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}

/// RGB frame buffer to an owned BGR Mat.
fn frame_to_bgr_mat(frame: &Frame) -> Result<Mat> {
    let mat = Mat::from_slice(&frame.data)?;
    let mat = mat.reshape(3, frame.height as i32)?;
    let mut bgr = Mat::default();
    imgproc::cvt_color(&mat, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

fn category_color(category: &str) -> core::Scalar {
    match category {
        // BGR
        "person" => core::Scalar::new(0.0, 255.0, 0.0, 0.0),
        "vehicle" => core::Scalar::new(255.0, 0.0, 0.0, 0.0),
        _ => core::Scalar::new(255.0, 255.0, 255.0, 0.0),
    }
}

/// Draw boxes, track labels, and a bottom summary line on a copy of the
/// frame, for the persisted evidence image.
pub fn render_annotated(
    frame: &Frame,
    observations: &[ObservedDetection],
    frame_index: u64,
) -> Result<Mat> {
    let mut output = frame_to_bgr_mat(frame)?;

    for obs in observations {
        let color = category_color(&obs.category);
        let [x1, y1, x2, y2] = obs.bbox;
        let rect = core::Rect::new(x1, y1, (x2 - x1).max(1), (y2 - y1).max(1));
        imgproc::rectangle(&mut output, rect, color, 2, imgproc::LINE_8, 0)?;

        let label = format!("ID:{} {} {:.1}", obs.track_id, obs.class_name, obs.confidence);
        imgproc::put_text(
            &mut output,
            &label,
            core::Point::new(x1, (y1 - 10).max(12)),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            color,
            2,
            imgproc::LINE_8,
            false,
        )?;
    }

    let persons = observations.iter().filter(|o| o.category == "person").count();
    let summary = format!("Frame:{frame_index} | Persons:{persons}");
    imgproc::put_text(
        &mut output,
        &summary,
        core::Point::new(10, frame.height as i32 - 20),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.7,
        core::Scalar::new(0.0, 0.0, 255.0, 0.0),
        2,
        imgproc::LINE_8,
        false,
    )?;

    Ok(output)
}

pub fn write_image(path: &Path, mat: &Mat) -> Result<()> {
    let ok = imgcodecs::imwrite(
        path.to_str().context("image path is not valid UTF-8")?,
        mat,
        &core::Vector::new(),
    )?;
    if !ok {
        bail!("imwrite refused {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_converts_to_bgr_mat_of_same_shape() {
        let frame = Frame {
            data: vec![10; 4 * 3 * 3],
            width: 4,
            height: 3,
            timestamp_ms: 0.0,
        };
        let mat = frame_to_bgr_mat(&frame).unwrap();
        assert_eq!(mat.cols(), 4);
        assert_eq!(mat.rows(), 3);
        assert_eq!(mat.channels(), 3);
    }

    #[test]
    fn annotated_render_preserves_dimensions() {
        let frame = Frame {
            data: vec![0; 64 * 48 * 3],
            width: 64,
            height: 48,
            timestamp_ms: 0.0,
        };
        let obs = vec![ObservedDetection {
            track_id: 0,
            category: "person".to_string(),
            class_name: "person".to_string(),
            confidence: 0.8,
            bbox: [5, 5, 20, 30],
            behavior: "center".to_string(),
        }];
        let mat = render_annotated(&frame, &obs, 1).unwrap();
        assert_eq!(mat.cols(), 64);
        assert_eq!(mat.rows(), 48);
    }
}
