use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;
use tenant_gateway::config::{ConfigLoader, QueueBackend};

const VALID_KEY: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

const MANAGED_VARS: &[&str] = &[
    "GATEWAY_PROFILE",
    "GATEWAY_API_BIND_ADDR",
    "GATEWAY_LOG_LEVEL",
    "GATEWAY_CRYPTO_KEY",
    "GATEWAY_OPERATOR_TOKEN",
    "GATEWAY_OPERATOR_TOKENS",
    "GATEWAY_BRIDGE_BASE_URL",
    "GATEWAY_BRIDGE_SIGNING_SECRET",
    "GATEWAY_QUEUE_BACKEND",
    "GATEWAY_AUTO_REPLY_PROVIDER_TIMEOUT_SECONDS",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        for var in MANAGED_VARS {
            env::remove_var(var);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.queue.backend, QueueBackend::Database);
    assert!(cfg.crypto_key.is_none());
    assert!(cfg.bridge_base_url.is_none());
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "GATEWAY_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "GATEWAY_API_BIND_ADDR=192.168.0.10:5000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "GATEWAY_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "GATEWAY_PROFILE=test\nGATEWAY_API_BIND_ADDR=127.0.0.1:4000\nGATEWAY_OPERATOR_TOKEN=test-token-for-layered-test\n",
    );

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.operator_tokens, vec!["test-token-for-layered-test"]);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "GATEWAY_API_BIND_ADDR=127.0.0.1:3000\nGATEWAY_QUEUE_BACKEND=database\n",
    );

    unsafe {
        env::set_var("GATEWAY_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("GATEWAY_QUEUE_BACKEND", "memory");
        env::set_var("GATEWAY_CRYPTO_KEY", VALID_KEY);
    }

    let cfg = loader(&temp_dir).load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.queue.backend, QueueBackend::Memory);
    assert_eq!(cfg.crypto_key.as_ref().map(Vec::len), Some(32));

    clear_env();
}

#[test]
fn operator_tokens_accept_a_comma_separated_list() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("GATEWAY_PROFILE", "production");
        env::set_var("GATEWAY_OPERATOR_TOKENS", "alpha, beta,,gamma");
    }

    let cfg = loader(&temp_dir).load().expect("tokens configured");
    assert_eq!(cfg.operator_tokens, vec!["alpha", "beta", "gamma"]);

    clear_env();
}

#[test]
fn production_profile_requires_operator_tokens() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("GATEWAY_PROFILE", "production");
    }

    let err = loader(&temp_dir)
        .load()
        .expect_err("missing tokens should fail outside local/test");
    assert!(err.to_string().contains("no operator tokens configured"));

    clear_env();
}

#[test]
fn bridge_url_requires_a_signing_secret() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("GATEWAY_BRIDGE_BASE_URL", "http://127.0.0.1:7000");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("bridge url without secret should fail");
    assert!(err.to_string().contains("GATEWAY_BRIDGE_SIGNING_SECRET"));

    unsafe {
        env::set_var("GATEWAY_BRIDGE_SIGNING_SECRET", "s3cret");
    }
    let cfg = loader(&temp_dir).load().expect("bridge fully configured");
    assert_eq!(cfg.bridge_base_url.as_deref(), Some("http://127.0.0.1:7000"));

    clear_env();
}

#[test]
fn crypto_key_must_be_32_bytes() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        // "short" in base64.
        env::set_var("GATEWAY_CRYPTO_KEY", "c2hvcnQ=");
    }
    let err = loader(&temp_dir).load().expect_err("short key should fail");
    assert!(err.to_string().contains("exactly 32 bytes"));

    unsafe {
        env::set_var("GATEWAY_CRYPTO_KEY", "not base64!!");
    }
    let err = loader(&temp_dir).load().expect_err("bad base64 should fail");
    assert!(err.to_string().contains("invalid base64"));

    clear_env();
}

#[test]
fn unknown_queue_backend_is_rejected() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("GATEWAY_QUEUE_BACKEND", "redis");
    }
    let err = loader(&temp_dir).load().expect_err("unknown backend");
    assert!(err.to_string().contains("unknown queue backend 'redis'"));

    clear_env();
}

#[test]
fn provider_timeout_stays_under_ten_seconds() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("GATEWAY_AUTO_REPLY_PROVIDER_TIMEOUT_SECONDS", "10");
    }
    let err = loader(&temp_dir).load().expect_err("timeout too long");
    assert!(err.to_string().contains("provider timeout"));

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("GATEWAY_API_BIND_ADDR", "not-an-addr");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}
