//! Raw capture buffer → 8-bit grayscale conversion.

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} buffer: expected {expected} bytes, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Packed YUYV 4:2:2 → grayscale by keeping the luma bytes.
///
/// Each 4-byte group `[Y0, U, Y1, V]` holds two pixels.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    check_len("YUYV", yuyv, expected)?;
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// 8-bit GREY passes through, trimmed to the frame size.
pub fn grey_to_grayscale(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize;
    check_len("GREY", grey, expected)?;
    Ok(grey[..expected].to_vec())
}

/// 16-bit little-endian grayscale → 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    check_len("Y16", y16, expected)?;
    Ok(y16[..expected]
        .chunks_exact(2)
        .map(|px| (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8)
        .collect())
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_keeps_luma() {
        let yuyv = vec![100, 128, 200, 128];
        assert_eq!(yuyv_to_grayscale(&yuyv, 2, 1).unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_yuyv_4x2() {
        let yuyv: Vec<u8> = (0..16).collect();
        assert_eq!(
            yuyv_to_grayscale(&yuyv, 4, 2).unwrap(),
            vec![0, 2, 4, 6, 8, 10, 12, 14]
        );
    }

    #[test]
    fn test_yuyv_short_buffer() {
        let err = yuyv_to_grayscale(&[100, 128], 2, 1).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 4, actual: 2, .. }));
    }

    #[test]
    fn test_grey_trims_padding() {
        let grey = vec![7, 8, 9, 0, 0];
        assert_eq!(grey_to_grayscale(&grey, 3, 1).unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn test_y16_high_byte() {
        // 0x1234 → 0x12, 0xFF00 → 0xFF
        let y16 = vec![0x34, 0x12, 0x00, 0xFF];
        assert_eq!(y16_to_grayscale(&y16, 2, 1).unwrap(), vec![0x12, 0xFF]);
    }
}
