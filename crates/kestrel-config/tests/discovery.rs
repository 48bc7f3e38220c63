use std::path::PathBuf;

use kestrel_config::{
    discover_config_path, is_config_file, load_for_workspace, with_config_env_lock, KestrelConfig,
    KESTREL_CONFIG_ENV_VAR,
};

#[test]
fn missing_config_yields_defaults() {
    with_config_env_lock(|| {
        std::env::remove_var(KESTREL_CONFIG_ENV_VAR);
        let tmp = tempfile::tempdir().expect("tempdir");
        let (config, path) = load_for_workspace(tmp.path()).expect("load");
        assert_eq!(config, KestrelConfig::default());
        assert!(path.is_none());
    });
}

#[test]
fn kestrel_toml_wins_over_legacy_location() {
    with_config_env_lock(|| {
        std::env::remove_var(KESTREL_CONFIG_ENV_VAR);
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join(".kestrel")).expect("mkdir");
        std::fs::write(
            tmp.path().join(".kestrel/config.toml"),
            "[build]\nvariant = \"release\"\n",
        )
        .expect("write legacy");
        std::fs::write(
            tmp.path().join("kestrel.toml"),
            "[build]\nvariant = \"staging\"\nprefer_wrapper = false\n",
        )
        .expect("write config");

        let (config, path) = load_for_workspace(tmp.path()).expect("load");
        assert_eq!(config.build.variant, "staging");
        assert!(!config.build.prefer_wrapper);
        assert_eq!(
            path.expect("path").file_name().and_then(|n| n.to_str()),
            Some("kestrel.toml")
        );
    });
}

#[test]
fn env_var_overrides_discovery_relative_to_root() {
    with_config_env_lock(|| {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("custom.toml"), "[logging]\nlevel = \"debug\"\n")
            .expect("write");
        std::env::set_var(KESTREL_CONFIG_ENV_VAR, "custom.toml");
        let discovered = discover_config_path(tmp.path());
        std::env::remove_var(KESTREL_CONFIG_ENV_VAR);

        let discovered = discovered.expect("discovered");
        assert!(discovered.ends_with("custom.toml"));
        let config = KestrelConfig::load_from_path(&discovered).expect("load");
        assert_eq!(config.logging.level, "debug");
    });
}

#[test]
fn unknown_keys_are_rejected() {
    let err = KestrelConfig::load_from_str("[build]\nmavne_path = \"mvn\"\n").unwrap_err();
    assert!(err.to_string().contains("mavne_path"), "{err}");
}

#[test]
fn config_file_names_are_recognized() {
    let root = PathBuf::from("/ws");
    assert!(is_config_file(&root, &root.join("kestrel.toml")));
    assert!(is_config_file(&root, &root.join(".kestrel/config.toml")));
    assert!(!is_config_file(&root, &root.join("app/kestrel.toml")));
}
