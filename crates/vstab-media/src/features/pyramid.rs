//! Floating point image planes and Gaussian pyramids.
//!
//! Detection and tracking work on `f32` intensities so sub-pixel sampling
//! and gradient accumulation do not round.

use image::GrayImage;

/// Single-channel `f32` image, row major.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_gray(image: &GrayImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data: image.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.data[y * self.width + x] = value;
    }

    /// Pixel at integer coordinates clamped to the border.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.get(x, y)
    }

    /// Bilinear sample with coordinates clamped to the image.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let p00 = self.get(x0, y0);
        let p10 = self.get(x1, y0);
        let p01 = self.get(x0, y1);
        let p11 = self.get(x1, y1);
        (1.0 - fx) * (1.0 - fy) * p00 + fx * (1.0 - fy) * p10 + (1.0 - fx) * fy * p01 + fx * fy * p11
    }

    /// Sobel gradients `(gx, gy)`, normalised to intensity per pixel.
    pub fn sobel(&self) -> (Plane, Plane) {
        let mut gx = Plane::new(self.width, self.height);
        let mut gy = Plane::new(self.width, self.height);
        for y in 0..self.height as isize {
            for x in 0..self.width as isize {
                let p = |dx: isize, dy: isize| self.get_clamped(x + dx, y + dy);
                let sx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
                let sy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
                gx.set(x as usize, y as usize, sx / 8.0);
                gy.set(x as usize, y as usize, sy / 8.0);
            }
        }
        (gx, gy)
    }

    /// Sum over the `(2r+1)^2` window centred on each pixel, border clamped.
    pub fn box_sum(&self, radius: usize) -> Plane {
        let r = radius as isize;
        let mut rows = Plane::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width as isize {
                let mut acc = 0.0;
                for dx in -r..=r {
                    acc += self.get_clamped(x + dx, y as isize);
                }
                rows.set(x as usize, y, acc);
            }
        }
        let mut out = Plane::new(self.width, self.height);
        for y in 0..self.height as isize {
            for x in 0..self.width {
                let mut acc = 0.0;
                for dy in -r..=r {
                    acc += rows.get_clamped(x as isize, y + dy);
                }
                out.set(x, y as usize, acc);
            }
        }
        out
    }

    /// Element-wise product.
    pub fn mul(&self, other: &Plane) -> Plane {
        debug_assert_eq!(self.width, other.width);
        debug_assert_eq!(self.height, other.height);
        Plane {
            width: self.width,
            height: self.height,
            data: self.data.iter().zip(&other.data).map(|(a, b)| a * b).collect(),
        }
    }

    /// Blur with the 5-tap binomial kernel, then keep every other pixel.
    pub fn pyr_down(&self) -> Plane {
        const KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];
        let mut rows = Plane::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width as isize {
                let acc: f32 = KERNEL
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * self.get_clamped(x + k as isize - 2, y as isize))
                    .sum();
                rows.set(x as usize, y, acc);
            }
        }
        let width = self.width.div_ceil(2);
        let height = self.height.div_ceil(2);
        let mut out = Plane::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let sx = (2 * x) as isize;
                let sy = (2 * y) as isize;
                let acc: f32 = KERNEL
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * rows.get_clamped(sx, sy + k as isize - 2))
                    .sum();
                out.set(x, y, acc);
            }
        }
        out
    }
}

/// Gaussian pyramid, finest level first.
#[derive(Debug, Clone)]
pub struct Pyramid {
    pub levels: Vec<Plane>,
}

/// Coarser levels stop once either side would drop below this.
const MIN_LEVEL_SIDE: usize = 16;

impl Pyramid {
    pub fn build(image: &GrayImage, num_levels: usize) -> Self {
        let mut levels = Vec::with_capacity(num_levels.max(1));
        levels.push(Plane::from_gray(image));
        while levels.len() < num_levels {
            let Some(prev) = levels.last() else { break };
            if prev.width() / 2 < MIN_LEVEL_SIDE || prev.height() / 2 < MIN_LEVEL_SIDE {
                break;
            }
            let next = prev.pyr_down();
            levels.push(next);
        }
        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}
