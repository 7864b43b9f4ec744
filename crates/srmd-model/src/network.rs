//! Lowering of a parsed ncnn graph into the sequential network IR.
//!
//! Only straight-line graphs are accepted: `Input` first, then every layer
//! consumes exactly the blob its predecessor produced.  Weights are pulled
//! from the `.bin` stream in layer order, the way ncnn loads them.

use std::path::Path;

use srmd_core::error::{EngineError, Result};
use srmd_core::graph::{Activation, Conv2d, Layer, Network, Padding};
use tracing::warn;

use crate::param::{ParamGraph, ParamLayer};
use crate::weights::WeightReader;

/// ncnn's "same" padding sentinels for `pad_left`.
const PAD_SAME_UPPER: i32 = -233;
const PAD_SAME_LOWER: i32 = -234;

/// Build a [`Network`] from `graph` and the matching `.bin` bytes.
pub fn build_network(
    name: &str,
    graph: &ParamGraph,
    bin: &[u8],
    param_path: &Path,
    bin_path: &Path,
) -> Result<Network> {
    let mut layers = graph.layers.iter();
    let input = layers
        .next()
        .ok_or_else(|| EngineError::parse(param_path, "graph has no layers"))?;
    if input.kind != "Input" || !input.bottoms.is_empty() || input.tops.len() != 1 {
        return Err(EngineError::parse(
            param_path,
            format!(
                "first layer must be a single-output Input, found {} '{}'",
                input.kind, input.name
            ),
        ));
    }

    let mut blob = input.tops[0].as_str();
    let mut channels: Option<usize> = None;
    let mut input_channels: Option<usize> = None;
    let mut reader = WeightReader::new(bin, bin_path);
    let mut lowered = Vec::with_capacity(graph.layers.len());

    for layer in layers {
        if layer.bottoms.len() != 1 || layer.tops.len() != 1 || layer.bottoms[0] != blob {
            return Err(EngineError::parse(
                param_path,
                format!(
                    "layer '{}' breaks the linear chain (expects single input '{blob}')",
                    layer.name
                ),
            ));
        }
        blob = layer.tops[0].as_str();
        let bad = |reason: String| {
            EngineError::parse(param_path, format!("layer '{}': {reason}", layer.name))
        };

        match layer.kind.as_str() {
            "Convolution" => {
                let conv = lower_conv(layer, &mut reader).map_err(|e| match e {
                    LowerError::Param(reason) => bad(reason),
                    LowerError::Engine(err) => err,
                })?;
                if let Some(c) = channels
                    && c != conv.in_channels
                {
                    return Err(bad(format!(
                        "expects {} input channels but receives {c}",
                        conv.in_channels
                    )));
                }
                input_channels.get_or_insert(conv.in_channels);
                channels = Some(conv.out_channels);
                lowered.push(Layer::Conv2d(conv));
            }
            "ReLU" => {
                let slope = layer.params.get_float(0, 0.0).map_err(bad)?;
                lowered.push(Layer::ReLU { slope });
            }
            "PixelShuffle" => {
                let factor = layer.params.get_int(0, 1).map_err(bad)?;
                let mode = layer.params.get_int(1, 0).map_err(bad)?;
                if mode != 0 {
                    return Err(bad(format!("pixel shuffle mode {mode} is not supported")));
                }
                let factor = usize::try_from(factor)
                    .ok()
                    .filter(|f| *f >= 1)
                    .ok_or_else(|| bad(format!("invalid upscale factor {factor}")))?;
                let Some(c) = channels else {
                    return Err(bad("pixel shuffle before any convolution".into()));
                };
                if c % (factor * factor) != 0 {
                    return Err(bad(format!(
                        "{c} channels not divisible by factor² = {}",
                        factor * factor
                    )));
                }
                channels = Some(c / (factor * factor));
                lowered.push(Layer::PixelShuffle { factor });
            }
            "Noop" => {}
            other => return Err(bad(format!("unsupported layer type '{other}'"))),
        }
    }

    if reader.remaining() != 0 {
        warn!(
            path = %bin_path.display(),
            trailing_bytes = reader.remaining(),
            "Weight file has unread trailing bytes"
        );
    }

    let input_channels = input_channels
        .ok_or_else(|| EngineError::parse(param_path, "graph contains no convolution"))?;
    Ok(Network {
        name: name.to_string(),
        input_channels,
        layers: lowered,
    })
}

enum LowerError {
    Param(String),
    Engine(EngineError),
}

impl From<String> for LowerError {
    fn from(reason: String) -> Self {
        Self::Param(reason)
    }
}

fn positive(value: i32, what: &str) -> std::result::Result<usize, String> {
    usize::try_from(value)
        .ok()
        .filter(|v| *v >= 1)
        .ok_or_else(|| format!("{what} must be ≥ 1, got {value}"))
}

fn non_negative(value: i32, what: &str) -> std::result::Result<usize, String> {
    usize::try_from(value).map_err(|_| format!("{what} must be ≥ 0, got {value}"))
}

fn lower_conv(
    layer: &ParamLayer,
    reader: &mut WeightReader<'_>,
) -> std::result::Result<Conv2d, LowerError> {
    let p = &layer.params;
    let out_channels = positive(p.get_int(0, 0)?, "num_output")?;
    let kernel_w = positive(p.get_int(1, 0)?, "kernel_w")?;
    let kernel_h = positive(p.get_int(11, kernel_w as i32)?, "kernel_h")?;
    let dilation_w = positive(p.get_int(2, 1)?, "dilation_w")?;
    let dilation_h = positive(p.get_int(12, dilation_w as i32)?, "dilation_h")?;
    let stride_w = positive(p.get_int(3, 1)?, "stride_w")?;
    let stride_h = positive(p.get_int(13, stride_w as i32)?, "stride_h")?;
    let bias_term = p.get_int(5, 0)? != 0;
    let weight_size = non_negative(p.get_int(6, 0)?, "weight_data_size")?;

    if p.get_int(8, 0)? != 0 {
        return Err("int8 convolution is not supported".to_string().into());
    }
    if p.get_float(18, 0.0)? != 0.0 {
        return Err("non-zero pad value is not supported".to_string().into());
    }

    let pad_left = p.get_int(4, 0)?;
    let padding = if pad_left == PAD_SAME_UPPER || pad_left == PAD_SAME_LOWER {
        if stride_w != 1 || stride_h != 1 {
            return Err("'same' padding requires stride 1".to_string().into());
        }
        let total_w = dilation_w * (kernel_w - 1);
        let total_h = dilation_h * (kernel_h - 1);
        let (left, top) = if pad_left == PAD_SAME_UPPER {
            (total_w / 2, total_h / 2)
        } else {
            (total_w - total_w / 2, total_h - total_h / 2)
        };
        Padding {
            left,
            right: total_w - left,
            top,
            bottom: total_h - top,
        }
    } else {
        let left = non_negative(pad_left, "pad_left")?;
        let right = non_negative(p.get_int(15, pad_left)?, "pad_right")?;
        let pad_top = p.get_int(14, pad_left)?;
        let top = non_negative(pad_top, "pad_top")?;
        let bottom = non_negative(p.get_int(16, pad_top)?, "pad_bottom")?;
        Padding {
            left,
            right,
            top,
            bottom,
        }
    };

    let per_input = out_channels * kernel_w * kernel_h;
    if weight_size == 0 || weight_size % per_input != 0 {
        return Err(format!(
            "weight_data_size {weight_size} is not a multiple of {out_channels}×{kernel_h}×{kernel_w}"
        )
        .into());
    }
    let in_channels = weight_size / per_input;

    let act_params = p.get_float_array(10)?;
    let activation = match p.get_int(9, 0)? {
        0 => Activation::None,
        1 => Activation::ReLU,
        2 => Activation::LeakyReLU(act_params.first().copied().unwrap_or(0.0)),
        3 => Activation::Clip {
            min: act_params.first().copied().unwrap_or(f32::MIN),
            max: act_params.get(1).copied().unwrap_or(f32::MAX),
        },
        4 => Activation::Sigmoid,
        other => return Err(format!("unsupported activation type {other}").into()),
    };

    let weights = reader.read_weights(weight_size).map_err(LowerError::Engine)?;
    let bias = if bias_term {
        Some(reader.read_raw(out_channels).map_err(LowerError::Engine)?)
    } else {
        None
    };

    Ok(Conv2d {
        in_channels,
        out_channels,
        kernel_w,
        kernel_h,
        stride_w,
        stride_h,
        dilation_w,
        dilation_h,
        padding,
        weights,
        bias,
        activation,
    })
}

/// SRMD-specific shape checks: conditioning width on the first convolution,
/// an RGB output, and a pixel shuffle matching the requested scale.
pub fn check_srmd_shape(
    network: &Network,
    expected_input_channels: usize,
    scale: usize,
    path: &Path,
) -> Result<()> {
    if network.input_channels != expected_input_channels {
        return Err(EngineError::parse(
            path,
            format!(
                "first convolution takes {} channels, expected {expected_input_channels}",
                network.input_channels
            ),
        ));
    }
    if network.output_channels() != 3 {
        return Err(EngineError::parse(
            path,
            format!("network produces {} channels, expected 3", network.output_channels()),
        ));
    }
    if network.upscale_factor() != scale {
        return Err(EngineError::parse(
            path,
            format!(
                "network upscales by {}, expected {scale}",
                network.upscale_factor()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::parse_param;

    fn weights(values: &[f32]) -> Vec<u8> {
        let mut bytes = 0u32.to_le_bytes().to_vec();
        bytes.extend(values.iter().flat_map(|v| v.to_le_bytes()));
        bytes
    }

    fn lower(param: &str, bin: &[u8]) -> Result<Network> {
        let graph = parse_param(param, Path::new("t.param"))?;
        build_network("t", &graph, bin, Path::new("t.param"), Path::new("t.bin"))
    }

    #[test]
    fn lowers_linear_graph() {
        let param = "7767517
4 4
Input data 0 1 data
Convolution conv 1 1 data c 0=4 1=1 5=1 6=8 9=1
Noop nop 1 1 c n
PixelShuffle ps 1 1 n out 0=2
";
        let mut bin = weights(&[1.0; 8]);
        bin.extend([0.5f32; 4].iter().flat_map(|v| v.to_le_bytes()));
        let net = lower(param, &bin).unwrap();
        assert_eq!(net.input_channels, 2);
        assert_eq!(net.layers.len(), 2);
        assert_eq!(net.output_channels(), 1);
        assert_eq!(net.upscale_factor(), 2);
        let Layer::Conv2d(conv) = &net.layers[0] else {
            panic!("expected convolution");
        };
        assert_eq!(conv.activation, Activation::ReLU);
        assert_eq!(conv.bias.as_deref(), Some(&[0.5; 4][..]));
    }

    #[test]
    fn same_upper_padding() {
        let param = "7767517
2 2
Input data 0 1 data
Convolution conv 1 1 data c 0=1 1=3 4=-233 6=9
";
        let net = lower(param, &weights(&[0.0; 9])).unwrap();
        let Layer::Conv2d(conv) = &net.layers[0] else {
            panic!("expected convolution");
        };
        assert_eq!(
            conv.padding,
            Padding {
                left: 1,
                right: 1,
                top: 1,
                bottom: 1
            }
        );
    }

    #[test]
    fn rejects_branching_graph() {
        let param = "7767517
3 3
Input data 0 1 data
Convolution a 1 1 data x 0=1 1=1 6=1
Convolution b 1 1 data y 0=1 1=1 6=1
";
        let mut bin = weights(&[1.0]);
        bin.extend(weights(&[1.0]));
        let err = lower(param, &bin).unwrap_err();
        assert!(err.to_string().contains("linear chain"), "{err}");
    }

    #[test]
    fn rejects_unknown_layer_and_channel_mismatch() {
        let param = "7767517
2 2
Input data 0 1 data
Pooling pool 1 1 data p 0=0
";
        assert!(lower(param, &[]).is_err());

        let param = "7767517
3 3
Input data 0 1 data
Convolution a 1 1 data x 0=2 1=1 6=2
Convolution b 1 1 x y 0=1 1=1 6=3
";
        let mut bin = weights(&[1.0, 1.0]);
        bin.extend(weights(&[1.0; 3]));
        let err = lower(param, &bin).unwrap_err();
        assert!(err.to_string().contains("input channels"), "{err}");
    }

    #[test]
    fn truncated_weights_fail() {
        let param = "7767517
2 2
Input data 0 1 data
Convolution conv 1 1 data c 0=1 1=3 6=9
";
        assert!(matches!(
            lower(param, &weights(&[0.0; 4])),
            Err(EngineError::ModelParse { .. })
        ));
    }

    #[test]
    fn srmd_shape_checks() {
        let param = "7767517
3 3
Input data 0 1 data
Convolution conv 1 1 data c 0=12 1=1 6=216
PixelShuffle ps 1 1 c out 0=2
";
        let net = lower(param, &weights(&[0.0; 216])).unwrap();
        let path = Path::new("t.param");
        assert!(check_srmd_shape(&net, 18, 2, path).is_ok());
        assert!(check_srmd_shape(&net, 19, 2, path).is_err());
        assert!(check_srmd_shape(&net, 18, 3, path).is_err());
    }
}
