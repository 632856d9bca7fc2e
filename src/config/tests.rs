use std::io::Write;

use super::*;

#[test]
fn defaults_resolve_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.storage.backend, BackendKind::Auto);
    assert_eq!(
        settings.storage.directory,
        PathBuf::from(DEFAULT_STORAGE_DIR)
    );
    assert_eq!(settings.logging.level, LevelFilter::WARN);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(
        settings.objects.decode_failure,
        DecodeFailurePolicy::default()
    );
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.storage.backend = Some("file".to_string());
    raw.logging.level = Some("info".to_string());

    let overrides = GlobalOverrides {
        backend: Some("memory".to_string()),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.storage.backend, BackendKind::Memory);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn unknown_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.storage.backend = Some("cloud".to_string());

    let error = Settings::from_raw(raw).expect_err("invalid backend");
    assert!(matches!(
        error,
        LoadError::Invalid {
            key: "storage.backend",
            ..
        }
    ));
}

#[test]
fn unknown_decode_policy_is_rejected() {
    let mut raw = RawSettings::default();
    raw.objects.decode_failure = Some("panic".to_string());

    let error = Settings::from_raw(raw).expect_err("invalid policy");
    assert!(matches!(
        error,
        LoadError::Invalid {
            key: "objects.decode_failure",
            ..
        }
    ));
}

#[test]
fn empty_storage_directory_is_rejected() {
    let mut raw = RawSettings::default();
    raw.storage.directory = Some(PathBuf::new());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn explicit_config_file_is_layered() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    writeln!(
        file,
        "[storage]\nbackend = \"memory\"\ndirectory = \"/var/lib/state\"\n\n[objects]\ndecode_failure = \"warn\""
    )
    .expect("write config");

    let args = CliArgs::parse_from([
        "persisted-state",
        "--config-file",
        file.path().to_str().expect("utf-8 path"),
        "--log-level",
        "trace",
        "probe",
    ]);
    let settings = load(&args).expect("settings load");

    assert_eq!(settings.storage.backend, BackendKind::Memory);
    assert_eq!(
        settings.storage.directory,
        PathBuf::from("/var/lib/state")
    );
    assert_eq!(settings.objects.decode_failure, DecodeFailurePolicy::Warn);
    assert_eq!(settings.logging.level, LevelFilter::TRACE);
}

#[test]
fn missing_command_parses() {
    let args = CliArgs::parse_from(["persisted-state"]);
    assert!(args.command.is_none());
}

#[test]
fn parse_get_object_arguments() {
    let args = CliArgs::parse_from([
        "persisted-state",
        "get-object",
        "prefs",
        "--default",
        "{}",
    ]);

    match args.command.expect("command") {
        Command::GetObject(get) => {
            assert_eq!(get.key, "prefs");
            assert_eq!(get.default, "{}");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_set_with_global_overrides_after_subcommand() {
    let args = CliArgs::parse_from([
        "persisted-state",
        "set",
        "theme",
        "dark",
        "--backend",
        "memory",
        "--storage-dir",
        "/tmp/state",
    ]);

    assert_eq!(args.overrides.backend.as_deref(), Some("memory"));
    assert_eq!(
        args.overrides.storage_dir,
        Some(PathBuf::from("/tmp/state"))
    );
    match args.command.expect("command") {
        Command::Set(set) => {
            assert_eq!(set.key, "theme");
            assert_eq!(set.value, "dark");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}
