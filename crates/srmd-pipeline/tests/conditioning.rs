mod common;

use std::sync::{Arc, Mutex};

use srmd_core::backend::{ComputeDevice, DeviceInfo, LoadedNetwork};
use srmd_core::cpu::CpuDevice;
use srmd_core::error::Result;
use srmd_core::graph::Network;
use srmd_core::types::Tensor;
use srmd_model::store::KERNEL_CODE_LEN;
use srmd_pipeline::executor::noise_level;
use srmd_pipeline::{SrmdEngine, devices};

use common::{cpu_config, model_root, nearest_upscale, pattern};

/// CPU device whose networks keep a copy of every input they are given.
struct RecordingDevice {
    inner: CpuDevice,
    inputs: Arc<Mutex<Vec<Tensor>>>,
}

struct RecordingNetwork {
    inner: Arc<dyn LoadedNetwork>,
    inputs: Arc<Mutex<Vec<Tensor>>>,
}

impl ComputeDevice for RecordingDevice {
    fn info(&self) -> &DeviceInfo {
        self.inner.info()
    }

    fn available_memory(&self) -> Result<usize> {
        self.inner.available_memory()
    }

    fn queue_count(&self) -> usize {
        self.inner.queue_count()
    }

    fn load_network(&self, network: Arc<Network>) -> Result<Arc<dyn LoadedNetwork>> {
        Ok(Arc::new(RecordingNetwork {
            inner: self.inner.load_network(network)?,
            inputs: Arc::clone(&self.inputs),
        }))
    }
}

impl LoadedNetwork for RecordingNetwork {
    fn network(&self) -> &Network {
        self.inner.network()
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.inputs.lock().expect("inputs lock").push(input.clone());
        self.inner.forward(input)
    }
}

fn recording_engine(
    root: &std::path::Path,
    noise: i32,
    tta: bool,
) -> (SrmdEngine, Arc<Mutex<Vec<Tensor>>>) {
    let inputs = Arc::new(Mutex::new(Vec::new()));
    let device = Arc::new(RecordingDevice {
        inner: CpuDevice::new(devices::cpu_device_index()),
        inputs: Arc::clone(&inputs),
    });
    let cfg = cpu_config(root)
        .with_noise(noise)
        .with_tile_size(32)
        .with_pre_padding(4)
        .with_tta(tta);
    let engine = SrmdEngine::with_device(cfg, device).expect("engine");
    (engine, inputs)
}

fn kernel_code() -> [f32; KERNEL_CODE_LEN] {
    std::array::from_fn(|i| i as f32 * 0.125 - 0.75)
}

fn write_kernel_code(root: &std::path::Path, stem: &str) {
    let text = kernel_code().map(|v| v.to_string()).join(" ");
    std::fs::write(root.join(format!("{stem}.kcode")), text).expect("write kcode");
}

fn assert_constant(plane: &[f32], value: f32, what: &str) {
    assert!(
        plane.iter().all(|&v| v == value),
        "{what}: expected every sample to be {value}, first is {:?}",
        plane.first()
    );
}

#[test]
fn denoise_network_sees_kernel_code_and_noise_map() {
    let root = model_root();
    write_kernel_code(root.path(), "srmd_x2");
    let (engine, inputs) = recording_engine(root.path(), 7, false);

    let input = pattern(40, 12, 3);
    let out = engine.process(&input).expect("process");
    assert_eq!(out.as_bytes(), nearest_upscale(&input, 2).as_slice());

    let inputs = inputs.lock().expect("inputs lock");
    assert_eq!(inputs.len(), 2, "one pass per tile");
    let code = kernel_code();
    for tensor in inputs.iter() {
        assert_eq!(tensor.channels(), 3 + KERNEL_CODE_LEN + 1);
        for ch in 0..3 {
            assert!(tensor.plane(ch).iter().all(|v| (0.0..=1.0).contains(v)));
        }
        for (i, &value) in code.iter().enumerate() {
            assert_constant(tensor.plane(3 + i), value, &format!("kernel code plane {i}"));
        }
        assert_constant(tensor.plane(3 + KERNEL_CODE_LEN), noise_level(7), "noise map");
    }
    // The first tile's top-left sample is the first input pixel.
    assert_eq!(inputs[0].at(0, 4, 4), input.as_bytes()[0] as f32 / 255.0);
}

#[test]
fn plain_variant_has_no_noise_map_under_tta() {
    let root = model_root();
    write_kernel_code(root.path(), "srmdnf_x2");
    let (engine, inputs) = recording_engine(root.path(), -1, true);

    engine.process(&pattern(20, 20, 4)).expect("process");

    let inputs = inputs.lock().expect("inputs lock");
    assert_eq!(inputs.len(), 8, "eight passes for one tile");
    let code = kernel_code();
    for tensor in inputs.iter() {
        assert_eq!(tensor.channels(), 3 + KERNEL_CODE_LEN);
        for (i, &value) in code.iter().enumerate() {
            assert_constant(tensor.plane(3 + i), value, &format!("kernel code plane {i}"));
        }
    }
}

#[test]
fn missing_kernel_code_conditions_on_zeros() {
    let root = model_root();
    let (engine, inputs) = recording_engine(root.path(), 0, false);

    engine.process(&pattern(8, 8, 3)).expect("process");

    let inputs = inputs.lock().expect("inputs lock");
    let tensor = inputs.first().expect("one pass");
    for i in 0..KERNEL_CODE_LEN {
        assert_constant(tensor.plane(3 + i), 0.0, &format!("kernel code plane {i}"));
    }
    assert_constant(tensor.plane(3 + KERNEL_CODE_LEN), 0.0, "noise map at level 0");
}
