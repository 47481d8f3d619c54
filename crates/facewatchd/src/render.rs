//! Headless renderer: logs overlay captions and optionally snapshots the
//! annotated frame to disk.

use facewatch_core::{FaceBox, Frame, MatchResult, Renderer};
use image::{GrayImage, Luma};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const OUTLINE: Luma<u8> = Luma([255]);

pub struct SnapshotRenderer {
    path: Option<PathBuf>,
    interval: Duration,
    last_write: Option<Instant>,
    written: u64,
}

impl SnapshotRenderer {
    pub fn new(path: Option<PathBuf>, interval: Duration) -> Self {
        Self {
            path,
            interval,
            last_write: None,
            written: 0,
        }
    }

    fn due(&self, now: Instant) -> bool {
        self.last_write
            .map_or(true, |last| now.duration_since(last) >= self.interval)
    }

    fn write_snapshot(&mut self, frame: &Frame, matches: &[MatchResult]) {
        let Some(path) = &self.path else {
            return;
        };
        let Some(mut canvas) = GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
        else {
            tracing::warn!(width = frame.width, height = frame.height, "frame buffer size mismatch, snapshot skipped");
            return;
        };
        for m in matches {
            draw_outline(&mut canvas, &m.face);
        }
        match canvas.save(path) {
            Ok(()) => {
                self.written += 1;
                tracing::trace!(path = %path.display(), "snapshot written");
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to write snapshot"),
        }
    }
}

impl Renderer for SnapshotRenderer {
    fn render(&mut self, frame: &Frame, matches: &[MatchResult]) {
        for m in matches {
            tracing::debug!(
                sequence = frame.sequence,
                top = m.face.top,
                left = m.face.left,
                "{}",
                m.caption()
            );
        }

        let now = Instant::now();
        if self.path.is_some() && self.due(now) {
            self.last_write = Some(now);
            self.write_snapshot(frame, matches);
        }
    }

    fn close(&mut self) {
        tracing::debug!(snapshots = self.written, "renderer closed");
    }
}

/// One-pixel rectangle outline, clipped to the canvas.
fn draw_outline(canvas: &mut GrayImage, face: &FaceBox) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let left = face.left.min(w - 1);
    let right = face.right.min(w - 1);
    let top = face.top.min(h - 1);
    let bottom = face.bottom.min(h - 1);

    for x in left..=right {
        canvas.put_pixel(x, top, OUTLINE);
        canvas.put_pixel(x, bottom, OUTLINE);
    }
    for y in top..=bottom {
        canvas.put_pixel(left, y, OUTLINE);
        canvas.put_pixel(right, y, OUTLINE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::new(vec![0; 20 * 10], 20, 10, 1)
    }

    fn matched(face: FaceBox) -> MatchResult {
        MatchResult {
            face,
            label: "alice".into(),
            confidence: 90.0,
        }
    }

    #[test]
    fn test_outline_drawn_on_box_edges() {
        let mut canvas = GrayImage::new(20, 10);
        draw_outline(&mut canvas, &FaceBox { top: 2, right: 8, bottom: 6, left: 3 });
        assert_eq!(canvas.get_pixel(3, 2)[0], 255);
        assert_eq!(canvas.get_pixel(8, 6)[0], 255);
        assert_eq!(canvas.get_pixel(5, 4)[0], 0, "interior untouched");
    }

    #[test]
    fn test_outline_clipped_to_canvas() {
        let mut canvas = GrayImage::new(20, 10);
        draw_outline(&mut canvas, &FaceBox { top: 5, right: 50, bottom: 40, left: 15 });
        assert_eq!(canvas.get_pixel(19, 9)[0], 255);
    }

    #[test]
    fn test_snapshot_written_once_per_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.png");
        let mut renderer = SnapshotRenderer::new(Some(path.clone()), Duration::from_secs(60));

        let face = FaceBox { top: 1, right: 10, bottom: 8, left: 2 };
        renderer.render(&frame(), &[matched(face)]);
        renderer.render(&frame(), &[matched(face)]);
        renderer.close();

        assert_eq!(renderer.written, 1);
        let saved = image::open(&path).unwrap().to_luma8();
        assert_eq!(saved.dimensions(), (20, 10));
        assert_eq!(saved.get_pixel(2, 1)[0], 255);
    }

    #[test]
    fn test_no_path_writes_nothing() {
        let mut renderer = SnapshotRenderer::new(None, Duration::ZERO);
        renderer.render(&frame(), &[]);
        assert_eq!(renderer.written, 0);
    }
}
