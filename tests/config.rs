use ags_engine::{EngineConfig, EngineError, SoundcardFormat};

#[test]
fn partial_files_fall_back_to_defaults() {
    let config = EngineConfig::from_toml_str(
        r#"
        bpm = 98.5
        super_threaded = true

        [presets]
        buffer_size = 256
        format = "float"

        [loop]
        enabled = true
        left = 4
        right = 20
        "#,
    )
    .unwrap();

    assert_eq!(config.bpm, 98.5);
    assert!(config.super_threaded);
    assert_eq!(config.presets.buffer_size, 256);
    assert_eq!(config.presets.samplerate, 44100);
    assert_eq!(config.presets.format, SoundcardFormat::Float);
    assert_eq!((config.loop_region.left, config.loop_region.right), (4, 20));
    assert_eq!(config.subdivisions, 4);
    assert_eq!(config.task_queue_capacity, 256);
}

#[test]
fn serialized_config_reads_back() {
    let config = EngineConfig::default()
        .with_bpm(133.0)
        .with_subdivisions(3)
        .with_loop(0, 48)
        .with_pass_through(true);
    let text = config.to_toml_string().unwrap();
    assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
}

#[test]
fn nonsense_is_rejected() {
    let cases = [
        "bpm = 0.0",
        "subdivisions = 0",
        "task_queue_capacity = 0",
        "overrun_tolerance = -1.0",
        "[loop]\nenabled = true\nleft = 8\nright = 8",
        "[presets]\nbuffer_size = 0",
        "[presets]\nchannels = 0",
    ];
    for source in cases {
        let err = EngineConfig::from_toml_str(source).unwrap_err();
        assert!(
            matches!(err, EngineError::InvalidConfig(_) | EngineError::InvalidPresets(_)),
            "{source}: {err}"
        );
    }

    let err = EngineConfig::from_toml_str("bpm = \"fast\"").unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn config_files_load_from_disk() {
    let path = std::env::temp_dir().join(format!("ags-engine-config-{}.toml", std::process::id()));
    std::fs::write(&path, "bpm = 140.0\n").unwrap();
    let config = EngineConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(config.bpm, 140.0);

    let missing = EngineConfig::load(path.with_extension("missing"));
    assert!(matches!(missing, Err(EngineError::Io(_))));
}
