//! Loading engine configuration from disk

use std::io::Write;
use tessera_core::{EngineConfig, Error};

#[test]
fn test_load_config_file() -> Result<(), Error> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        r#"{{"worker_threads": 2, "vector_size": 128, "bloom_filter_enabled": false}}"#
    )?;
    let config = EngineConfig::from_json_file(file.path())?;
    assert_eq!(config.effective_worker_threads(), 2);
    assert_eq!(config.vector_size, 128);
    assert!(!config.bloom_filter_enabled);
    assert_eq!(config.query_cache_capacity, EngineConfig::default().query_cache_capacity);
    Ok(())
}

#[test]
fn test_invalid_config_file_is_rejected() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("engine.json");
    std::fs::write(&path, r#"{"tuples_per_tile_group": 0}"#)?;
    assert!(matches!(EngineConfig::from_json_file(&path), Err(Error::Config(_))));
    assert!(EngineConfig::from_json_file(dir.path().join("missing.json")).is_err());
    Ok(())
}
