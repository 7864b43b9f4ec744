#![cfg(all(feature = "image", feature = "ndarray"))]

mod common;

use image::{DynamicImage, GrayAlphaImage, LumaA, Rgb, RgbImage};
use ndarray::{Array3, s};
use srmd_pipeline::{PixelBuffer, SrmdEngine};

use common::{cpu_config, model_root, nearest_upscale, pattern};

#[test]
fn rgb_image_keeps_colour_type() {
    let root = model_root();
    let engine = SrmdEngine::new(cpu_config(root.path())).expect("engine");
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(9, 5, |x, y| {
        Rgb([(x * 20) as u8, (y * 40) as u8, 7])
    }));

    let out = engine.process_image(&img).expect("process image");
    assert_eq!((out.width(), out.height()), (18, 10));
    let rgb = out.as_rgb8().expect("still rgb8");
    assert_eq!(rgb.get_pixel(17, 9), &Rgb([160, 160, 7]));
}

#[test]
fn alpha_images_come_back_as_rgba() {
    let root = model_root();
    let engine = SrmdEngine::new(cpu_config(root.path())).expect("engine");
    let img = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(4, 4, LumaA([50, 128])));

    let out = engine.process_image(&img).expect("process image");
    let rgba = out.as_rgba8().expect("rgba8");
    assert_eq!(rgba.dimensions(), (8, 8));
    assert!(rgba.pixels().all(|p| p.0 == [50, 50, 50, 128]));
}

#[test]
fn arrays_are_height_width_channels() {
    let root = model_root();
    let engine = SrmdEngine::new(cpu_config(root.path()).with_scale(3)).expect("engine");
    let input = pattern(7, 5, 3);
    let array = Array3::from_shape_vec((5, 7, 3), input.as_bytes().to_vec()).expect("array");

    let out = engine.process_array(array.view()).expect("process array");
    assert_eq!(out.dim(), (15, 21, 3));
    assert_eq!(out.as_slice().expect("standard layout"), nearest_upscale(&input, 3).as_slice());

    // Non-contiguous views are gathered in logical order.
    let wide = Array3::from_shape_fn((5, 14, 3), |(y, x, c)| array[[y, x / 2, c]]);
    let strided = wide.slice(s![.., ..;2, ..]);
    let out = engine.process_array(strided).expect("strided view");
    assert_eq!(out.as_slice().expect("standard layout"), nearest_upscale(&input, 3).as_slice());

    let bad = Array3::<u8>::zeros((4, 4, 2));
    assert!(engine.process_array(bad.view()).is_err());
    assert!(PixelBuffer::new(4, 4, 2, vec![0; 32]).is_err());
}
