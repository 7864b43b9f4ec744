//! Sequential network IR.
//!
//! SRMD is a plain feed-forward CNN: a stack of 3×3 convolutions with ReLU
//! followed by a sub-pixel (pixel-shuffle) upsampler.  The loader lowers the
//! ncnn graph into this flat list of [`Layer`]s; every backend executes the
//! same list in order.

/// Activation fused into a convolution (ncnn `activation_type`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Activation {
    None,
    ReLU,
    LeakyReLU(f32),
    Clip { min: f32, max: f32 },
    Sigmoid,
}

impl Activation {
    #[inline]
    pub fn apply(self, v: f32) -> f32 {
        match self {
            Activation::None => v,
            Activation::ReLU => v.max(0.0),
            Activation::LeakyReLU(slope) => {
                if v < 0.0 {
                    v * slope
                } else {
                    v
                }
            }
            Activation::Clip { min, max } => v.clamp(min, max),
            Activation::Sigmoid => 1.0 / (1.0 + (-v).exp()),
        }
    }
}

/// Explicit zero padding applied before a convolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Padding {
    pub left: usize,
    pub right: usize,
    pub top: usize,
    pub bottom: usize,
}

/// 2-D convolution with weights in `[out, in, kh, kw]` order.
#[derive(Clone, Debug, PartialEq)]
pub struct Conv2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_w: usize,
    pub kernel_h: usize,
    pub stride_w: usize,
    pub stride_h: usize,
    pub dilation_w: usize,
    pub dilation_h: usize,
    pub padding: Padding,
    pub weights: Vec<f32>,
    pub bias: Option<Vec<f32>>,
    pub activation: Activation,
}

impl Conv2d {
    /// Output spatial size for an `in_h × in_w` input, or `None` if the
    /// padded input is smaller than the dilated kernel.
    pub fn output_hw(&self, in_h: usize, in_w: usize) -> Option<(usize, usize)> {
        let eff_kh = self.dilation_h * (self.kernel_h - 1) + 1;
        let eff_kw = self.dilation_w * (self.kernel_w - 1) + 1;
        let ph = in_h + self.padding.top + self.padding.bottom;
        let pw = in_w + self.padding.left + self.padding.right;
        if ph < eff_kh || pw < eff_kw {
            return None;
        }
        Some((
            (ph - eff_kh) / self.stride_h + 1,
            (pw - eff_kw) / self.stride_w + 1,
        ))
    }

    #[inline]
    pub fn weight(&self, oc: usize, ic: usize, ky: usize, kx: usize) -> f32 {
        self.weights[((oc * self.in_channels + ic) * self.kernel_h + ky) * self.kernel_w + kx]
    }
}

/// One step of the sequential network.
#[derive(Clone, Debug, PartialEq)]
pub enum Layer {
    Conv2d(Conv2d),
    /// Standalone (leaky) ReLU; `slope == 0` is a plain ReLU.
    ReLU { slope: f32 },
    /// Depth-to-space: `C·r² × H × W → C × rH × rW` (PyTorch channel order).
    PixelShuffle { factor: usize },
}

/// A fully parsed network ready to upload to a compute device.
#[derive(Clone, Debug, PartialEq)]
pub struct Network {
    /// Human-readable origin (usually the param file stem).
    pub name: String,
    pub input_channels: usize,
    pub layers: Vec<Layer>,
}

impl Network {
    /// Product of all pixel-shuffle factors divided by all conv strides.
    pub fn upscale_factor(&self) -> usize {
        let mut up = 1usize;
        let mut down = 1usize;
        for layer in &self.layers {
            match layer {
                Layer::PixelShuffle { factor } => up *= factor,
                Layer::Conv2d(conv) => down *= conv.stride_h.max(conv.stride_w),
                Layer::ReLU { .. } => {}
            }
        }
        up / down.max(1)
    }

    /// Channel count leaving the last layer.
    pub fn output_channels(&self) -> usize {
        let mut channels = self.input_channels;
        for layer in &self.layers {
            match layer {
                Layer::Conv2d(conv) => channels = conv.out_channels,
                Layer::PixelShuffle { factor } => channels /= factor * factor,
                Layer::ReLU { .. } => {}
            }
        }
        channels
    }

    /// Largest channel count of any intermediate activation.
    pub fn widest_activation(&self) -> usize {
        let mut widest = self.input_channels;
        for layer in &self.layers {
            if let Layer::Conv2d(conv) = layer {
                widest = widest.max(conv.out_channels);
            }
        }
        widest
    }

    /// Total number of weight and bias parameters.
    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| match layer {
                Layer::Conv2d(conv) => {
                    conv.weights.len() + conv.bias.as_ref().map_or(0, |b| b.len())
                }
                _ => 0,
            })
            .sum()
    }

    /// Bytes of device memory the weights occupy as `f32`.
    pub fn weight_bytes(&self) -> usize {
        self.parameter_count() * std::mem::size_of::<f32>()
    }
}
