use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use wicket::config::{CONFIG_ENV, Config, PORT_ENV};

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.server.port, 8080);
    assert!(cfg.server.ipv6);
    assert_eq!(cfg.server.virtual_path, "/");
    assert_eq!(cfg.site.physical_path, PathBuf::from("."));
    assert!(cfg.site.directory_listing);
    assert!(!cfg.site.require_authentication);
    assert_eq!(cfg.limits.max_header_bytes, 32 * 1024);
    assert_eq!(cfg.limits.read_buffer_bytes, 1024);
    assert_eq!(cfg.limits.first_byte_poll(), Duration::from_millis(100));
}

#[test]
fn test_config_empty_yaml_is_default() {
    let cfg = Config::from_yaml_str("  \n").unwrap();
    assert_eq!(cfg.server.port, 8080);
}

#[test]
fn test_config_partial_yaml() {
    let cfg = Config::from_yaml_str(
        "server:\n  port: 9000\n  virtual_path: app/\nsite:\n  directory_listing: false\n",
    )
    .unwrap();

    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.virtual_path, "/app");
    assert_eq!(cfg.server.backlog, 1024);
    assert!(!cfg.site.directory_listing);
    assert_eq!(cfg.limits.body_idle_timeout(), Duration::from_secs(30));
}

#[test]
fn test_config_physical_path_made_absolute() {
    let cfg = Config::from_yaml_str("site:\n  physical_path: public\n").unwrap();
    assert!(cfg.site.physical_path.is_absolute());
    assert!(cfg.site.physical_path.ends_with("public"));

    let cfg = Config::from_yaml_str("").unwrap();
    assert!(cfg.site.physical_path.is_absolute());
}

#[test]
fn test_config_zero_read_buffer_falls_back() {
    let cfg = Config::from_yaml_str("limits:\n  read_buffer_bytes: 0\n").unwrap();
    assert_eq!(cfg.limits.read_buffer_bytes, 1024);
    assert_eq!(cfg.limits.framer_limits().max_header_bytes, 32 * 1024);
}

#[test]
fn test_config_invalid_yaml_is_error() {
    assert!(Config::from_yaml_str("server: [not, a, map]").is_err());
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::from_yaml_str("server:\n  name: Test\n").unwrap();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.server.name, cfg2.server.name);
}

// Environment variables are process-wide, so every env-driven case lives
// in this one test.
#[test]
fn test_config_from_environment() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "server:\n  port: 7000\n  virtual_path: /site").unwrap();

    unsafe {
        std::env::remove_var(PORT_ENV);
        std::env::set_var(CONFIG_ENV, file.path());
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.port, 7000);
    assert_eq!(cfg.server.virtual_path, "/site");

    unsafe {
        std::env::set_var(PORT_ENV, "3000");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.port, 3000);

    unsafe {
        std::env::set_var(PORT_ENV, "not-a-port");
    }
    assert!(Config::load().is_err());

    unsafe {
        std::env::set_var(CONFIG_ENV, "/definitely/not/here.yaml");
        std::env::remove_var(PORT_ENV);
    }
    assert!(Config::load().is_err());

    unsafe {
        std::env::remove_var(CONFIG_ENV);
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.port, 8080);
}
