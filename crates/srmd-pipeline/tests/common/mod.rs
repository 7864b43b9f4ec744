#![allow(dead_code)]

use std::path::Path;

use srmd_model::NoiseVariant;
use srmd_pipeline::{EngineConfig, PixelBuffer, devices};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Write an SRMD-shaped network whose output is the nearest-neighbour
/// upscale of its RGB input: the centre tap of each sub-pixel filter copies
/// the matching colour plane, and the conditioning planes get zero weight.
pub fn write_nearest_model(dir: &Path, variant: NoiseVariant, scale: usize) {
    let in_c = variant.input_channels();
    let out_c = 3 * scale * scale;
    let weight_count = out_c * in_c * 9;
    let param = format!(
        "7767517\n4 4\n\
         Input data 0 1 data 0=0 1=0 2={in_c}\n\
         Convolution conv0 1 1 data c0 0={out_c} 1=3 11=3 4=1 5=1 6={weight_count}\n\
         ReLU relu0 1 1 c0 r0\n\
         PixelShuffle ps 1 1 r0 output 0={scale}\n"
    );

    let mut weights = vec![0.0f32; weight_count];
    for oc in 0..out_c {
        let ic = oc / (scale * scale);
        weights[(oc * in_c + ic) * 9 + 4] = 1.0;
    }
    let mut bin = Vec::new();
    bin.extend(0u32.to_le_bytes());
    bin.extend(weights.iter().flat_map(|v| v.to_le_bytes()));
    bin.extend(std::iter::repeat_n(0.0f32, out_c).flat_map(|v| v.to_le_bytes()));

    let stem = variant.file_stem(scale);
    std::fs::write(dir.join(format!("{stem}.param")), param).expect("write param");
    std::fs::write(dir.join(format!("{stem}.bin")), bin).expect("write bin");
}

/// A model root holding both variants at every supported scale.
pub fn model_root() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    for scale in [2, 3, 4] {
        write_nearest_model(dir.path(), NoiseVariant::NoDenoise, scale);
        write_nearest_model(dir.path(), NoiseVariant::Denoise, scale);
    }
    dir
}

/// Config on the CPU device rooted at `root`.
pub fn cpu_config(root: &Path) -> EngineConfig {
    EngineConfig::default()
        .with_gpu_id(devices::cpu_device_index() as i32)
        .with_model(root)
}

/// Deterministic, non-symmetric test pattern.
pub fn pattern(width: usize, height: usize, channels: usize) -> PixelBuffer {
    let data = (0..width * height * channels)
        .map(|i| ((i * 37 + i / 7) % 256) as u8)
        .collect();
    PixelBuffer::new(width, height, channels, data).expect("pattern buffer")
}

/// Pixel-replicated upscale of `img`'s colour channels.
pub fn nearest_upscale(img: &PixelBuffer, scale: usize) -> Vec<u8> {
    let (w, h, c) = img.geometry();
    let src = img.as_bytes();
    let mut out = Vec::with_capacity(w * h * c * scale * scale);
    for y in 0..h * scale {
        for x in 0..w * scale {
            let i = ((y / scale) * w + x / scale) * c;
            out.extend_from_slice(&src[i..i + c]);
        }
    }
    out
}
