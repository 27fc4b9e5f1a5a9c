//! Tests for the synthetic engine binding

use prometheus_render_pool::engine::synthetic::{self, SyntheticConfig, SyntheticEngine};
use prometheus_render_pool::engine::{
    AlwaysPause, EngineBinding, EngineError, PixelSize, RenderEngine, RenderProgress,
};

#[test]
fn test_document_rejects_garbage() {
    let mut engine = SyntheticEngine::default().create_instance().unwrap();
    assert!(matches!(
        engine.open_document(b"hello"),
        Err(EngineError::InvalidDocument(_))
    ));
    assert!(matches!(
        engine.open_document(b"%PDF-1.7\n%%EOF\n"),
        Err(EngineError::InvalidDocument(_))
    ));
}

#[test]
fn test_mixed_page_sizes() {
    let bytes = synthetic::document_with_sizes(&[(595.0, 842.0), (842.0, 595.0)]);
    let mut engine = SyntheticEngine::default().create_instance().unwrap();
    let doc = engine.open_document(&bytes).unwrap();
    let landscape = engine.load_page(doc, 1).unwrap();
    assert_eq!(
        engine.page_size_in_pixels(landscape, 72).unwrap(),
        PixelSize { width: 842, height: 595 }
    );
    assert!(engine.page_size_in_pixels(landscape, 0).is_err());
}

#[test]
fn test_instance_accounting() {
    let binding = SyntheticEngine::default();
    let a = binding.create_instance().unwrap();
    let b = binding.create_instance().unwrap();
    assert_eq!(binding.live_instances(), 2);
    drop(a);
    assert_eq!(binding.live_instances(), 1);
    drop(b);
    assert_eq!(binding.instances_created(), 2);
    assert_eq!(binding.live_instances(), 0);

    binding.fail_next_creations(2);
    assert!(binding.create_instance().is_err());
    assert!(binding.create_instance().is_err());
    assert!(binding.create_instance().is_ok());
}

#[test]
fn test_render_steps_and_close() {
    let binding = SyntheticEngine::new(SyntheticConfig::new().with_render_steps(3));
    let mut engine = binding.create_instance().unwrap();
    let doc = engine.open_document(&synthetic::document(1)).unwrap();
    let page = engine.load_page(doc, 0).unwrap();
    let size = PixelSize { width: 6, height: 6 };
    let bitmap = engine.create_bitmap(6, 6, true).unwrap();

    let mut pause = AlwaysPause;
    assert_eq!(
        engine.render_start(bitmap, page, size, &mut pause).unwrap(),
        RenderProgress::ToBeContinued
    );
    assert!(engine.render_start(bitmap, page, size, &mut pause).is_err());
    engine.render_close(page).unwrap();
    assert!(engine.render_continue(page, &mut pause).is_err());
}
