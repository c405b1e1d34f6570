//! Surface snapshot saving

use crate::core::FrameData;
use chrono::Local;
use image::{ImageBuffer, Rgba};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("frame is empty")]
    EmptyFrame,
    #[error("frame planes do not match {width}x{height}")]
    BadPlanes { width: u32, height: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Convert YUV I420 frame to RGBA
fn yuv_to_rgba(frame: &FrameData) -> Vec<u8> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let mut rgba = vec![0u8; w * h * 4];

    for row in 0..h {
        let uv_row = row / 2;
        for col in 0..w {
            let y_idx = row * frame.y_stride + col;
            let uv_idx = uv_row * frame.uv_stride + col / 2;

            let y = frame.y_plane[y_idx] as f32 / 255.0;
            let u = frame.u_plane[uv_idx] as f32 / 255.0 - 0.5;
            let v = frame.v_plane[uv_idx] as f32 / 255.0 - 0.5;

            // BT.601 YUV to RGB (full range)
            let r = (y + 1.402 * v).clamp(0.0, 1.0);
            let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 1.0);
            let b = (y + 1.772 * u).clamp(0.0, 1.0);

            let rgba_idx = (row * w + col) * 4;
            rgba[rgba_idx] = (r * 255.0) as u8;
            rgba[rgba_idx + 1] = (g * 255.0) as u8;
            rgba[rgba_idx + 2] = (b * 255.0) as u8;
            rgba[rgba_idx + 3] = 255;
        }
    }

    rgba
}

fn planes_fit(frame: &FrameData) -> bool {
    let (w, h) = (frame.width as usize, frame.height as usize);
    if w == 0 || h == 0 || frame.y_stride < w || frame.uv_stride < w.div_ceil(2) {
        return false;
    }
    let uv_rows = h.div_ceil(2);
    let uv_needed = (uv_rows - 1) * frame.uv_stride + (w - 1) / 2 + 1;
    frame.y_plane.len() >= (h - 1) * frame.y_stride + w
        && frame.u_plane.len() >= uv_needed
        && frame.v_plane.len() >= uv_needed
}

/// Write `frame` as `snapshot_<timestamp>.png` into `dir`
pub fn save_surface_snapshot(frame: &FrameData, dir: &Path) -> Result<PathBuf, SnapshotError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(SnapshotError::EmptyFrame);
    }
    if !planes_fit(frame) {
        return Err(SnapshotError::BadPlanes {
            width: frame.width,
            height: frame.height,
        });
    }

    let rgba = yuv_to_rgba(frame);
    let buffer = ImageBuffer::<Rgba<u8>, _>::from_raw(frame.width, frame.height, rgba).ok_or(
        SnapshotError::BadPlanes {
            width: frame.width,
            height: frame.height,
        },
    )?;

    std::fs::create_dir_all(dir)?;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("snapshot_{}.png", timestamp));
    log_verbose!(
        "SNAPSHOT",
        "Saving {}x{} to {}",
        frame.width,
        frame.height,
        path.display()
    );
    buffer.save(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn gray_frame(width: u32, height: u32) -> FrameData {
        let (w, h) = (width as usize, height as usize);
        FrameData {
            width,
            height,
            y_plane: Arc::new(vec![128; w * h]),
            u_plane: Arc::new(vec![128; (w / 2) * (h / 2)]),
            v_plane: Arc::new(vec![128; (w / 2) * (h / 2)]),
            y_stride: w,
            uv_stride: w / 2,
            timestamp_us: 0,
        }
    }

    #[test]
    fn gray_converts_to_gray() {
        let rgba = yuv_to_rgba(&gray_frame(2, 2));
        assert_eq!(rgba.len(), 16);
        for pixel in rgba.chunks_exact(4) {
            assert_eq!(pixel[3], 255);
            assert!(pixel[0].abs_diff(128) <= 1);
            assert!(pixel[1].abs_diff(128) <= 1);
            assert!(pixel[2].abs_diff(128) <= 1);
        }
    }

    #[test]
    fn writes_png_into_directory() {
        let dir = std::env::temp_dir().join(format!("rtsp-host-snapshot-{}", std::process::id()));
        let path = save_surface_snapshot(&gray_frame(4, 4), &dir).unwrap();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "png");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejects_short_planes() {
        let mut frame = gray_frame(4, 4);
        frame.y_plane = Arc::new(vec![0; 3]);
        assert!(matches!(
            save_surface_snapshot(&frame, &std::env::temp_dir()),
            Err(SnapshotError::BadPlanes { .. })
        ));
        frame.width = 0;
        assert!(matches!(
            save_surface_snapshot(&frame, &std::env::temp_dir()),
            Err(SnapshotError::EmptyFrame)
        ));
    }
}
