//! Captured frame type and pixel conversion to grayscale.

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short for {format}: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("MJPG decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("MJPG frame is {actual_w}x{actual_h}, stream negotiated {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        actual_w: u32,
        actual_h: u32,
    },
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

/// Packed YUYV 4:2:2 → grayscale: keep the Y of every `[Y0, U, Y1, V]` pair.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = pixel_count(width, height) * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// 8-bit grayscale passthrough, trimmed to the frame size.
pub fn grey_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = pixel_count(width, height);
    buf.get(..expected)
        .map(<[u8]>::to_vec)
        .ok_or(FrameError::InvalidLength {
            format: "GREY",
            expected,
            actual: buf.len(),
        })
}

/// 16-bit little-endian grayscale → 8-bit by keeping the high byte.
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = pixel_count(width, height) * 2;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "Y16",
            expected,
            actual: buf.len(),
        });
    }
    Ok(buf[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// Motion-JPEG frame → luma.
pub fn mjpg_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let luma = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)?.to_luma8();
    if luma.width() != width || luma.height() != height {
        return Err(FrameError::SizeMismatch {
            width,
            height,
            actual_w: luma.width(),
            actual_h: luma.height(),
        });
    }
    Ok(luma.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv: Vec<u8> = (0..16).collect();
        assert_eq!(yuyv_to_grayscale(&yuyv, 4, 2).unwrap(), vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_too_short() {
        let err = yuyv_to_grayscale(&[100, 128], 2, 1).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 4, actual: 2, .. }));
    }

    #[test]
    fn test_grey_trims_padding() {
        let buf = vec![7u8; 10];
        assert_eq!(grey_to_grayscale(&buf, 3, 2).unwrap(), vec![7u8; 6]);
        assert!(grey_to_grayscale(&buf, 4, 4).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // 0x1234 and 0xABCD, little-endian
        let buf = [0x34, 0x12, 0xCD, 0xAB];
        assert_eq!(y16_to_grayscale(&buf, 2, 1).unwrap(), vec![0x12, 0xAB]);
    }

    #[test]
    fn test_mjpg_roundtrip_luma() {
        let img = image::GrayImage::from_pixel(8, 4, image::Luma([200u8]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        let gray = mjpg_to_grayscale(&jpeg, 8, 4).unwrap();
        assert_eq!(gray.len(), 32);
        assert!(gray.iter().all(|&p| (p as i32 - 200).abs() <= 2));
        assert!(matches!(mjpg_to_grayscale(&jpeg, 16, 4), Err(FrameError::SizeMismatch { .. })));
    }
}
