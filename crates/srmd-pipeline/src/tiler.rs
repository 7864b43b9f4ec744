//! Tile planning, padded extraction and stitching.
//!
//! # Geometry
//!
//! ```text
//!   padded (core ± pre_padding, may leave the image)
//!   ┌───────────────────────┐
//!   │   ┌───────────────┐   │
//!   │   │ core          │   │   cores tile the image exactly once
//!   │   └───────────────┘   │
//!   └───────────────────────┘
//! ```
//!
//! The network runs on the padded tile; the stitcher crops
//! `pre_padding × scale` from every side of the result and writes the core
//! into its output rectangle.  Out-of-image samples are replicated from the
//! nearest edge pixel.

use srmd_core::error::{EngineError, Result};
use srmd_core::types::Tensor;

/// Smallest automatic (and smallest explicit) tile edge.
pub const MIN_TILE_SIZE: usize = 32;
/// Largest automatic tile edge.
pub const MAX_TILE_SIZE: usize = 400;
/// Widest overlap border a plan accepts.
pub const MAX_PRE_PADDING: usize = MAX_TILE_SIZE;

// ─── Geometry ────────────────────────────────────────────────────────────────

/// Axis-aligned rectangle inside an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// Rectangle that may extend past the image bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaddedRect {
    pub x: isize,
    pub y: isize,
    pub width: usize,
    pub height: usize,
}

/// One tile of a [`TilePlan`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileDescriptor {
    /// Row-major position in the plan.
    pub index: usize,
    pub col: usize,
    pub row: usize,
    /// Input pixels this tile is responsible for.
    pub core: Rect,
    /// Input pixels fed to the network.
    pub padded: PaddedRect,
    /// Scaled core in the output image.
    pub output: Rect,
}

// ─── Plan ────────────────────────────────────────────────────────────────────

/// Row-major tiling of a `width × height` image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TilePlan {
    width: usize,
    height: usize,
    tile_size: usize,
    pre_padding: usize,
    scale: usize,
    cols: usize,
    rows: usize,
}

/// Plan `ceil(w/T) × ceil(h/T)` tiles.  An image smaller than one tile is a
/// single tile.
pub fn plan_tiles(
    width: usize,
    height: usize,
    tile_size: usize,
    pre_padding: usize,
    scale: usize,
) -> Result<TilePlan> {
    if width == 0 || height == 0 || tile_size == 0 || scale == 0 {
        return Err(EngineError::Configuration(format!(
            "cannot tile {width}x{height} with tile size {tile_size} at scale {scale}"
        )));
    }
    if pre_padding > MAX_PRE_PADDING {
        return Err(EngineError::Configuration(format!(
            "pre_padding must be <= {MAX_PRE_PADDING}, got {pre_padding}"
        )));
    }
    let scaled_edge = width
        .max(height)
        .checked_add(2 * pre_padding)
        .and_then(|edge| edge.checked_mul(scale));
    if scaled_edge.is_none() {
        return Err(EngineError::Configuration(format!(
            "{width}x{height} at scale {scale} does not fit in memory"
        )));
    }
    Ok(TilePlan {
        width,
        height,
        tile_size,
        pre_padding,
        scale,
        cols: width.div_ceil(tile_size),
        rows: height.div_ceil(tile_size),
    })
}

impl TilePlan {
    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(columns, rows)`.
    pub fn grid(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn pre_padding(&self) -> usize {
        self.pre_padding
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    /// Input image size `(width, height)`.
    pub fn image_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Tile `index` in row-major order.
    pub fn get(&self, index: usize) -> Option<TileDescriptor> {
        if index >= self.len() {
            return None;
        }
        let (col, row) = (index % self.cols, index / self.cols);
        let x0 = col * self.tile_size;
        let y0 = row * self.tile_size;
        let x1 = (x0 + self.tile_size).min(self.width);
        let y1 = (y0 + self.tile_size).min(self.height);
        let pad = self.pre_padding;
        let core = Rect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        };
        Some(TileDescriptor {
            index,
            col,
            row,
            core,
            padded: PaddedRect {
                x: x0 as isize - pad as isize,
                y: y0 as isize - pad as isize,
                width: core.width + 2 * pad,
                height: core.height + 2 * pad,
            },
            output: Rect {
                x: core.x * self.scale,
                y: core.y * self.scale,
                width: core.width * self.scale,
                height: core.height * self.scale,
            },
        })
    }

    /// Iterate the tiles; each call starts from the first tile.
    pub fn iter(&self) -> TileIter {
        TileIter {
            plan: *self,
            next: 0,
        }
    }
}

impl<'a> IntoIterator for &'a TilePlan {
    type Item = TileDescriptor;
    type IntoIter = TileIter;

    fn into_iter(self) -> TileIter {
        self.iter()
    }
}

/// Lazy iterator over a [`TilePlan`].
#[derive(Clone, Debug)]
pub struct TileIter {
    plan: TilePlan,
    next: usize,
}

impl Iterator for TileIter {
    type Item = TileDescriptor;

    fn next(&mut self) -> Option<TileDescriptor> {
        let tile = self.plan.get(self.next)?;
        self.next += 1;
        Some(tile)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.plan.len() - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for TileIter {}

// ─── Memory-driven tile size ─────────────────────────────────────────────────

/// Peak bytes one tile of edge `tile_size` needs: two activations of the
/// widest layer on the padded tile, the padded input, and the scaled output
/// (doubled for the TTA accumulator).
pub fn tile_memory_estimate(
    tile_size: usize,
    pre_padding: usize,
    scale: usize,
    widest_layer: usize,
    tta: bool,
) -> usize {
    const F32: usize = std::mem::size_of::<f32>();
    const MAX_CHANNELS: usize = 4;
    let padded = tile_size.saturating_add(pre_padding.saturating_mul(2));
    let padded_px = padded.saturating_mul(padded);
    let scaled_px = padded_px.saturating_mul(scale.saturating_mul(scale));
    let activations = widest_layer.saturating_mul(padded_px).saturating_mul(2);
    let input = padded_px.saturating_mul(MAX_CHANNELS);
    let output = scaled_px.saturating_mul(MAX_CHANNELS * if tta { 2 } else { 1 });
    activations
        .saturating_add(input)
        .saturating_add(output)
        .saturating_mul(F32)
}

/// Largest multiple of 4 in `[MIN_TILE_SIZE, MAX_TILE_SIZE]` whose estimate
/// times `lanes` fits `budget`; `MIN_TILE_SIZE` when none does.
pub fn auto_tile_size(
    budget: usize,
    scale: usize,
    pre_padding: usize,
    widest_layer: usize,
    tta: bool,
    lanes: usize,
) -> usize {
    let lanes = lanes.max(1);
    (MIN_TILE_SIZE..=MAX_TILE_SIZE)
        .rev()
        .step_by(4)
        .find(|&t| {
            tile_memory_estimate(t, pre_padding, scale, widest_layer, tta).saturating_mul(lanes)
                <= budget
        })
        .unwrap_or(MIN_TILE_SIZE)
}

// ─── Extraction ──────────────────────────────────────────────────────────────

/// Copy the padded rectangle of `desc` out of `image`, replicating edge
/// pixels for coordinates outside the image.
pub fn extract(image: &Tensor, desc: &TileDescriptor) -> Tensor {
    let [c, h, w] = image.shape();
    let p = desc.padded;
    let mut tile = Tensor::zeros(c, p.height, p.width);
    let clamp = |v: isize, len: usize| v.clamp(0, len as isize - 1) as usize;
    let cols: Vec<usize> = (0..p.width)
        .map(|dx| clamp(p.x + dx as isize, w))
        .collect();
    for ch in 0..c {
        let src = image.plane(ch);
        let dst = tile.plane_mut(ch);
        for dy in 0..p.height {
            let sy = clamp(p.y + dy as isize, h);
            let src_row = &src[sy * w..(sy + 1) * w];
            let dst_row = &mut dst[dy * p.width..(dy + 1) * p.width];
            for (d, &sx) in dst_row.iter_mut().zip(&cols) {
                *d = src_row[sx];
            }
        }
    }
    tile
}

// ─── Stitching ───────────────────────────────────────────────────────────────

/// Assembles scaled tile outputs into the final image.
pub struct Stitcher {
    plan: TilePlan,
    output: Tensor,
    committed: Vec<bool>,
    remaining: usize,
}

impl Stitcher {
    /// Output of `channels × (h·s) × (w·s)` for `plan`.
    pub fn new(plan: TilePlan, channels: usize) -> Self {
        let (w, h) = plan.image_size();
        Self {
            plan,
            output: Tensor::zeros(channels, h * plan.scale, w * plan.scale),
            committed: vec![false; plan.len()],
            remaining: plan.len(),
        }
    }

    /// Crop the padding off `tile` and write its core into the output.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvariantViolation`] for an unknown or already
    /// committed tile, or a tile whose shape does not match its descriptor.
    pub fn commit(&mut self, desc: &TileDescriptor, tile: &Tensor) -> Result<()> {
        if self.plan.get(desc.index).as_ref() != Some(desc) {
            return Err(EngineError::InvariantViolation(format!(
                "tile {} does not belong to this plan",
                desc.index
            )));
        }
        if self.committed[desc.index] {
            return Err(EngineError::InvariantViolation(format!(
                "tile {} committed twice",
                desc.index
            )));
        }
        let s = self.plan.scale;
        let expected = [
            self.output.channels(),
            desc.padded.height * s,
            desc.padded.width * s,
        ];
        if tile.shape() != expected {
            return Err(EngineError::InvariantViolation(format!(
                "tile {} output is {:?}, expected {:?}",
                desc.index,
                tile.shape(),
                expected
            )));
        }

        let crop = self.plan.pre_padding * s;
        let out = desc.output;
        let tile_w = tile.width();
        let out_w = self.output.width();
        for ch in 0..expected[0] {
            let src = tile.plane(ch);
            let dst = self.output.plane_mut(ch);
            for y in 0..out.height {
                let s_off = (crop + y) * tile_w + crop;
                let d_off = (out.y + y) * out_w + out.x;
                dst[d_off..d_off + out.width].copy_from_slice(&src[s_off..s_off + out.width]);
            }
        }
        self.committed[desc.index] = true;
        self.remaining -= 1;
        Ok(())
    }

    /// Tiles still missing.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// The stitched output, once every tile has been committed.
    pub fn finish(self) -> Result<Tensor> {
        if self.remaining != 0 {
            return Err(EngineError::InvariantViolation(format!(
                "{} of {} tiles never committed",
                self.remaining,
                self.plan.len()
            )));
        }
        Ok(self.output)
    }
}
