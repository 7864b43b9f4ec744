mod common;

use srmd_pipeline::{AsyncEngine, EngineError, PixelBuffer, SrmdEngine};

use common::{cpu_config, model_root, nearest_upscale, pattern};

#[test]
fn session_reuses_buffers_for_same_geometry() {
    let root = model_root();
    let engine = SrmdEngine::new(cpu_config(root.path())).expect("engine");
    let mut session = engine.streaming();

    let a = pattern(24, 16, 3);
    let b = PixelBuffer::new(24, 16, 3, a.as_bytes().iter().map(|v| 255 - v).collect())
        .expect("inverted");

    let out_a = session.process_bytes(a.as_bytes(), 24, 16, 3).expect("frame a");
    assert_eq!(out_a, nearest_upscale(&a, 2).as_slice());
    let ptr = out_a.as_ptr();

    let out_b = session.process_bytes(b.as_bytes(), 24, 16, 3).expect("frame b");
    assert_eq!(out_b, nearest_upscale(&b, 2).as_slice());
    assert_eq!(out_b.as_ptr(), ptr, "output buffer should be reused");
    assert_eq!(session.reallocations(), 1);

    let c = pattern(10, 10, 4);
    let out_c = session.process_bytes(c.as_bytes(), 10, 10, 4).expect("frame c");
    assert_eq!(out_c.len(), 20 * 20 * 4);
    assert_eq!(session.reallocations(), 2);
    assert_eq!(session.geometry(), Some((10, 10, 4)));

    // The plain path is unaffected by the session.
    assert_eq!(engine.process(&a).expect("process").as_bytes(), nearest_upscale(&a, 2).as_slice());
}

#[test]
fn session_rejects_short_frames() {
    let root = model_root();
    let engine = SrmdEngine::new(cpu_config(root.path())).expect("engine");
    let mut session = engine.streaming();
    let ptr = session
        .process_bytes(&[0; 8 * 8 * 3], 8, 8, 3)
        .expect("first frame")
        .as_ptr();

    match session.process_bytes(&[0; 10], 8, 8, 3) {
        Err(EngineError::InvalidBufferSize { expected, actual }) => {
            assert_eq!((expected, actual), (192, 10));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(session.process_bytes(&[0; 6 * 6 * 2], 6, 6, 2).is_err());
    assert_eq!(session.geometry(), Some((8, 8, 3)));

    let out = session.process_bytes(&[1; 8 * 8 * 3], 8, 8, 3).expect("recovers");
    assert!(out.iter().all(|&v| v == 1));
    assert_eq!(out.as_ptr(), ptr, "output buffer should survive a rejected frame");
    assert_eq!(session.reallocations(), 1);
}

#[tokio::test]
async fn async_engine_serializes_calls() {
    let root = model_root();
    let engine = AsyncEngine::new(SrmdEngine::new(cpu_config(root.path())).expect("engine"));

    let inputs: Vec<PixelBuffer> = (0..4).map(|i| pattern(20 + i, 12, 3)).collect();
    let handles: Vec<_> = inputs
        .iter()
        .cloned()
        .map(|input| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.process(input).await })
        })
        .collect();
    for (handle, input) in handles.into_iter().zip(&inputs) {
        let out = handle.await.expect("join").expect("process");
        assert_eq!(out.as_bytes(), nearest_upscale(input, 2).as_slice());
    }

    engine.set_parameters(-1, 4, 12, 0).await.expect("parameters");
    let err = engine
        .process(pattern(8, 8, 3))
        .await
        .expect_err("model no longer matches");
    assert!(matches!(err, EngineError::ModelNotLoaded(_)));

    engine.load_model(root.path().to_path_buf()).await.expect("reload");
    let out = engine.process(pattern(8, 8, 3)).await.expect("process");
    assert_eq!(out.geometry(), (32, 32, 3));

    let engine = engine.into_inner().expect("sole handle");
    assert_eq!(engine.config().scale, 4);
}
