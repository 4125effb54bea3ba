use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use smart_cane::config::{CaneConfig, ConfigError};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CANE_CONFIG",
        "CANE_SOURCE_URL",
        "CANE_SOURCE_FPS",
        "CANE_MIN_INTERVAL_MS",
        "CANE_CONFIDENCE_THRESHOLD",
        "CANE_MODEL_PATH",
        "CANE_INFERENCE_TIMEOUT_MS",
        "CANE_GEMINI_API_KEY",
        "CANE_GEMINI_PROMPT",
        "CANE_GEMINI_MODEL",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CaneConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://front_camera");
    assert_eq!(cfg.min_interval, Duration::from_millis(100));
    assert_eq!(cfg.detector.confidence_threshold, 0.10);
    assert_eq!(cfg.detector.model_path, None);
    assert_eq!(cfg.detector.timeout, None);
    assert_eq!(cfg.jpeg_quality, 50);
    assert_eq!(cfg.gemini.model, "gemini-2.5-flash");
    assert!(cfg.stop_region().is_none());
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "source": {"url": "dir:///var/cane/frames", "fps": 15, "width": 1280, "height": 720},
            "throttle": {"min_interval_ms": 200},
            "detector": {"model_path": "/opt/cane/doors.json", "confidence_threshold": 0.3, "timeout_ms": 250},
            "scan": {"jpeg_quality": 70},
            "gemini": {"api_key": "file-key", "prompt": "Describe the scene."},
            "stop": {"latitude": 37.5665, "longitude": 126.978}
        }"#,
    );

    std::env::set_var("CANE_CONFIG", file.path());
    std::env::set_var("CANE_MIN_INTERVAL_MS", "150");
    std::env::set_var("CANE_GEMINI_API_KEY", "env-key");
    std::env::set_var("CANE_INFERENCE_TIMEOUT_MS", "0");

    let cfg = CaneConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "dir:///var/cane/frames");
    assert_eq!(cfg.source.fps, 15);
    assert_eq!((cfg.source.width, cfg.source.height), (1280, 720));
    assert_eq!(cfg.min_interval, Duration::from_millis(150));
    assert_eq!(cfg.limiter().min_interval(), Duration::from_millis(150));
    assert_eq!(cfg.detector.model_path, Some(PathBuf::from("/opt/cane/doors.json")));
    assert_eq!(cfg.engine_settings().confidence_threshold, 0.3);
    assert_eq!(cfg.detector.timeout, None);
    assert_eq!(cfg.jpeg_quality, 70);

    let cloud = cfg.cloud().expect("cloud settings");
    assert_eq!(cloud.api_key, "env-key");
    assert_eq!(cloud.prompt, "Describe the scene.");

    let region = cfg.stop_region().expect("stop region");
    assert_eq!(region.id, "stop-geo");
    assert_eq!(region.radius_m, 10.0);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
[source]
url = "stub://hallway"
fps = 24

[detector]
confidence_threshold = 0.25
input_width = 320
input_height = 320

[stop]
latitude = 37.5
longitude = 127.0
radius_m = 25.0
"#,
    );
    std::env::set_var("CANE_CONFIG", file.path());

    let cfg = CaneConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://hallway");
    assert_eq!(cfg.source.fps, 24);
    assert_eq!(cfg.detector.confidence_threshold, 0.25);
    assert_eq!(cfg.detector.input_width, 320);
    assert_eq!(cfg.stop.unwrap().radius_m, 25.0);

    clear_env();
}

#[test]
fn cloud_settings_are_required_on_use() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("CANE_GEMINI_PROMPT", "What is in front of me?");

    let cfg = CaneConfig::load().expect("load config");
    assert!(matches!(
        cfg.cloud(),
        Err(ConfigError::MissingField("gemini.api_key"))
    ));

    std::env::set_var("CANE_GEMINI_API_KEY", "k");
    std::env::set_var("CANE_GEMINI_MODEL", "gemini-2.5-pro");
    let cloud = CaneConfig::load().unwrap().cloud().unwrap();
    assert_eq!(cloud.model, "gemini-2.5-pro");

    clear_env();
}

#[test]
fn blank_cloud_settings_in_file_count_as_missing() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
[gemini]
api_key = ""
prompt = "   "
"#,
    );
    std::env::set_var("CANE_CONFIG", file.path());

    let cfg = CaneConfig::load().expect("load config");
    assert!(matches!(
        cfg.cloud(),
        Err(ConfigError::MissingField("gemini.api_key"))
    ));

    std::env::set_var("CANE_GEMINI_API_KEY", "k");
    let cfg = CaneConfig::load().expect("load config");
    assert!(matches!(
        cfg.cloud(),
        Err(ConfigError::MissingField("gemini.prompt"))
    ));

    clear_env();
}

#[test]
fn rejects_out_of_range_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CANE_CONFIDENCE_THRESHOLD", "1.0");
    assert!(matches!(CaneConfig::load(), Err(ConfigError::Invalid(_))));
    clear_env();

    std::env::set_var("CANE_MIN_INTERVAL_MS", "0");
    assert!(matches!(CaneConfig::load(), Err(ConfigError::Invalid(_))));
    clear_env();

    std::env::set_var("CANE_SOURCE_FPS", "fast");
    assert!(matches!(
        CaneConfig::load(),
        Err(ConfigError::InvalidEnv {
            key: "CANE_SOURCE_FPS",
            ..
        })
    ));
    clear_env();

    let file = config_file(".json", r#"{"scan": {"jpeg_quality": 0}}"#);
    std::env::set_var("CANE_CONFIG", file.path());
    assert!(matches!(CaneConfig::load(), Err(ConfigError::Invalid(_))));
    clear_env();
}

#[test]
fn reports_unreadable_and_malformed_files() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CANE_CONFIG", "/nonexistent/cane.json");
    assert!(matches!(CaneConfig::load(), Err(ConfigError::Read { .. })));

    let file = config_file(".json", r#"{"source": {"url": 7}}"#);
    std::env::set_var("CANE_CONFIG", file.path());
    assert!(matches!(CaneConfig::load(), Err(ConfigError::Parse { .. })));

    let file = config_file(".json", r#"{"sorce": {}}"#);
    std::env::set_var("CANE_CONFIG", file.path());
    assert!(matches!(CaneConfig::load(), Err(ConfigError::Parse { .. })));

    clear_env();
}
