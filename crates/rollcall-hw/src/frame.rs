//! Grayscale frames and the pixel operations the session needs.

/// A captured grayscale camera frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Build a frame from grayscale pixels, flagging it dark if needed.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_THRESHOLD);
        Self {
            data,
            width,
            height,
            sequence,
            is_dark,
        }
    }

    /// Shrink by an integer factor, averaging each `factor` x `factor` block.
    ///
    /// Trailing rows/columns that do not fill a whole block are dropped, so
    /// coordinates found on the result map back by multiplying with `factor`.
    pub fn downscale(&self, factor: u32) -> Frame {
        if factor <= 1 {
            return self.clone();
        }
        let data = downscale_gray(&self.data, self.width, self.height, factor);
        Frame {
            data,
            width: self.width / factor,
            height: self.height / factor,
            sequence: self.sequence,
            is_dark: self.is_dark,
        }
    }

    /// Copy out the rectangle `[left, right) x [top, bottom)`, clamped to the frame.
    pub fn crop(&self, left: u32, top: u32, right: u32, bottom: u32) -> Option<(Vec<u8>, u32, u32)> {
        let right = right.min(self.width);
        let bottom = bottom.min(self.height);
        if right <= left || bottom <= top || self.data.len() < (self.width * self.height) as usize {
            return None;
        }
        let w = (right - left) as usize;
        let h = (bottom - top) as usize;
        let stride = self.width as usize;
        let mut out = Vec::with_capacity(w * h);
        for y in top as usize..bottom as usize {
            let row = y * stride;
            out.extend_from_slice(&self.data[row + left as usize..row + right as usize]);
        }
        Some((out, w as u32, h as u32))
    }
}

/// Share of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// Luma below this is treated as black.
const BLACK_LEVEL: u8 = 32;

/// Keep the luma bytes of a packed YUYV buffer (`Y0 U Y1 V` per pixel pair).
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let needed = (width * height * 2) as usize;
    let packed = yuyv.get(..needed).ok_or(FrameError::ShortBuffer {
        needed,
        got: yuyv.len(),
    })?;
    Ok(packed.chunks_exact(2).map(|px| px[0]).collect())
}

/// True when more than `threshold` of the pixels are black. Empty input is dark.
pub fn is_dark_frame(gray: &[u8], threshold: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let black = gray.iter().filter(|&&p| p < BLACK_LEVEL).count();
    black as f32 / gray.len() as f32 > threshold
}

/// Box-filter downsample of a grayscale buffer by an integer factor.
pub fn downscale_gray(gray: &[u8], width: u32, height: u32, factor: u32) -> Vec<u8> {
    let f = factor.max(1) as usize;
    let w = width as usize;
    let h = height as usize;
    let out_w = w / f;
    let out_h = h / f;
    if gray.len() < w * h || out_w == 0 || out_h == 0 {
        return Vec::new();
    }

    let area = (f * f) as u32;
    let mut out = Vec::with_capacity(out_w * out_h);
    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sum = 0u32;
            for y in oy * f..(oy + 1) * f {
                let row = y * w;
                for x in ox * f..(ox + 1) * f {
                    sum += gray[row + x] as u32;
                }
            }
            out.push(((sum + area / 2) / area) as u8);
        }
    }
    out
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("YUYV buffer too short: need {needed} bytes, got {got}")]
    ShortBuffer { needed: usize, got: usize },
}
