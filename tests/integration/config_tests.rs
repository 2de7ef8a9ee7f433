use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use mediadupe::config::{ConfigError, EngineConfig, ENV_PREFIX};
use mediadupe::pipeline::Stage;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_config_load_defaults() {
    // Use figment directly without Env to avoid interference from other tests
    let figment = Figment::from(Serialized::defaults(EngineConfig::default()));
    let config = EngineConfig::from_figment(&figment).unwrap();
    assert_eq!(config.pipeline.stages, Stage::ALL.to_vec());
    assert_eq!(config.pipeline.reserved_cores, 1);
    assert!(config.cache.enabled);
    assert_eq!(
        config.winner.criteria,
        vec!["longer", "resolution", "video-bitrate", "newer", "smaller", "deeper"]
    );
}

#[test]
fn test_config_load_from_env() {
    std::env::set_var("MEDIADUPE_GROUPING__WINDOW", "12");
    std::env::set_var("MEDIADUPE_CATALOG__SEED", "99");

    let figment = Figment::from(Serialized::defaults(EngineConfig::default()))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));
    let config = EngineConfig::from_figment(&figment).unwrap();

    std::env::remove_var("MEDIADUPE_GROUPING__WINDOW");
    std::env::remove_var("MEDIADUPE_CATALOG__SEED");

    assert_eq!(config.grouping.window, 12);
    assert_eq!(config.catalog.seed, 99);
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");

    let toml_content = r#"
[catalog]
patterns = ["mp4", "mov"]
max_depth = 3

[hashing]
block_size = 65536

[cache]
enabled = false

[probe]
visual = false
frame_count = 16

[alignment]
steps = [1.0]

[pipeline]
stages = ["discover", "quick-hash", "group"]
stall_timeout_secs = 60
"#;
    fs::write(&config_path, toml_content).unwrap();

    let figment = Figment::from(Serialized::defaults(EngineConfig::default()))
        .merge(Toml::file(&config_path));
    let config = EngineConfig::from_figment(&figment).unwrap();

    assert_eq!(config.catalog.patterns, vec!["mp4", "mov"]);
    assert_eq!(config.catalog.max_depth, Some(3));
    assert_eq!(config.hashing.block_size, 65_536);
    assert!(!config.cache.enabled);
    assert!(!config.probe.visual);
    assert!(config.probe.audio);
    assert_eq!(config.probe.frame_count, 16);
    assert_eq!(config.alignment.steps, vec![1.0]);
    assert!(!config.pipeline.runs(Stage::Probe));
    assert!(config.pipeline.runs(Stage::Group));
    assert_eq!(config.pipeline.stall_timeout_secs, 60);
}

#[test]
fn test_config_file_rejects_out_of_range() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[scoring]\ndistance_ceiling = 0.0\n").unwrap();

    let err = EngineConfig::load(Some(&config_path)).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "scoring.distance_ceiling",
            ..
        }
    ));
}

#[test]
fn test_config_unknown_stage_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[pipeline]\nstages = [\"render\"]\n").unwrap();

    let err = EngineConfig::load(Some(&config_path)).unwrap_err();
    assert!(matches!(err, ConfigError::Figment(_)));
}
