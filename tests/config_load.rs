use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use motion_keep::config::MotionKeepConfig;
use motion_keep::ScoringMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MOTIONKEEP_CONFIG",
        "MOTIONKEEP_DB_PATH",
        "MOTIONKEEP_FRAMES_DIR",
        "MOTIONKEEP_API_ADDR",
        "MOTIONKEEP_BUFFER_CAPACITY",
        "MOTIONKEEP_RETENTION_SECS",
        "MOTIONKEEP_KEEP_ALL_FRAMES",
        "MOTIONKEEP_SWEEP_INTERVAL_SECS",
        "MOTIONKEEP_MOTION_THRESHOLD",
        "MOTIONKEEP_SCORING",
        "MOTIONKEEP_FETCH_TIMEOUT_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MotionKeepConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "data/frames.db");
    assert_eq!(cfg.frames_dir.to_str(), Some("data/uploads"));
    assert_eq!(cfg.api_addr, "127.0.0.1:8000");
    assert_eq!(cfg.retention.buffer_capacity, 3);
    assert_eq!(cfg.retention.retention, Duration::from_secs(86_400));
    assert!(!cfg.retention.keep_all_frames);
    assert_eq!(cfg.retention.sweep_interval, Duration::from_secs(3_600));
    assert_eq!(cfg.motion.threshold, 200_000.0);
    assert_eq!(cfg.motion.scoring, ScoringMode::PerSource);
    assert_eq!(cfg.fetch_timeout, Duration::from_secs(8));
    assert!(cfg.streams.is_empty());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "db_path": "/var/lib/motionkeep/frames.db",
            "frames_dir": "/var/lib/motionkeep/uploads",
            "api": { "addr": "0.0.0.0:9000" },
            "retention": {
                "buffer_capacity": 5,
                "seconds": 43200,
                "keep_all_frames": true,
                "sweep_interval_secs": 600
            },
            "motion": { "threshold": 150000.0, "scoring": "shared" },
            "fetch": { "timeout_ms": 2500 },
            "streams": [
                { "name": "porch", "url": "http://10.0.0.7/snap.jpg", "interval_secs": 0.2 },
                { "name": "yard", "url": "https://cam.yard.local/frame" }
            ]
        }"#,
    );

    std::env::set_var("MOTIONKEEP_CONFIG", file.path());
    std::env::set_var("MOTIONKEEP_BUFFER_CAPACITY", "4");
    std::env::set_var("MOTIONKEEP_KEEP_ALL_FRAMES", "false");
    std::env::set_var("MOTIONKEEP_SCORING", "per_source");

    let cfg = MotionKeepConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "/var/lib/motionkeep/frames.db");
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.retention.buffer_capacity, 4);
    assert_eq!(cfg.retention.retention, Duration::from_secs(43_200));
    assert!(!cfg.retention.keep_all_frames);
    assert_eq!(cfg.retention.sweep_interval, Duration::from_secs(600));
    assert_eq!(cfg.motion.threshold, 150_000.0);
    assert_eq!(cfg.motion.scoring, ScoringMode::PerSource);
    assert_eq!(cfg.fetch_timeout, Duration::from_millis(2_500));

    assert_eq!(cfg.streams.len(), 2);
    assert_eq!(cfg.streams[0].name(), "porch");
    assert_eq!(cfg.streams[0].interval_secs(), 0.5);
    assert_eq!(cfg.streams[1].interval_secs(), 3.0);

    let policy = cfg.retention_policy();
    assert_eq!(policy.buffer_capacity, 4);
    assert_eq!(cfg.sweeper_config().interval, Duration::from_secs(600));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MOTIONKEEP_BUFFER_CAPACITY", "0");
    assert!(MotionKeepConfig::load().is_err());
    clear_env();

    std::env::set_var("MOTIONKEEP_RETENTION_SECS", "soon");
    assert!(MotionKeepConfig::load().is_err());
    clear_env();

    std::env::set_var("MOTIONKEEP_SCORING", "global");
    assert!(MotionKeepConfig::load().is_err());
    clear_env();

    std::env::set_var("MOTIONKEEP_MOTION_THRESHOLD", "-1");
    assert!(MotionKeepConfig::load().is_err());
    clear_env();

    std::env::set_var("MOTIONKEEP_SWEEP_INTERVAL_SECS", "18446744073709551615");
    let err = MotionKeepConfig::load().unwrap_err();
    assert!(err.to_string().contains("sweep interval"));
    clear_env();

    let slow_stream = write_config(
        r#"{ "streams": [ { "name": "cam", "url": "http://cam/", "interval_secs": 1e20 } ] }"#,
    );
    std::env::set_var("MOTIONKEEP_CONFIG", slow_stream.path());
    let err = MotionKeepConfig::load().unwrap_err();
    assert!(format!("{:#}", err).contains("invalid stream interval"));
    clear_env();

    let bad_stream = write_config(
        r#"{ "streams": [ { "name": "cam", "url": "rtsp://cam/live" } ] }"#,
    );
    std::env::set_var("MOTIONKEEP_CONFIG", bad_stream.path());
    let err = MotionKeepConfig::load().unwrap_err();
    assert!(format!("{:#}", err).contains("configured stream 'cam'"));
    clear_env();

    let duplicate = write_config(
        r#"{ "streams": [
            { "name": "cam", "url": "http://a/" },
            { "name": "cam", "url": "http://b/" }
        ] }"#,
    );
    std::env::set_var("MOTIONKEEP_CONFIG", duplicate.path());
    assert!(MotionKeepConfig::load().is_err());
    clear_env();

    assert!(MotionKeepConfig::load_from(Some(std::path::Path::new(
        "/nonexistent/motionkeep.json"
    )))
    .is_err());
}
