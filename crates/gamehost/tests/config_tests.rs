//! Configuration loading tests against real files.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use gamehost::config::{AppConfig, ServerConfig};
use gamehost::container::RuntimeType;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file
}

#[test]
fn missing_config_file_yields_defaults() {
    let config = AppConfig::load(Some(Path::new("/nonexistent/gamehost.toml"))).unwrap();
    assert!(config.daemon.runtime.is_none());
    assert!(config.servers.is_empty());
}

#[test]
fn app_config_round_trip() {
    let file = write_temp(
        r#"
        [daemon]
        runtime = "docker"
        scripts_dir = "/srv/gamehost/scripts"

        [[servers]]
        id = "abc123"
        env = { SERVER_PORT = "27015", SERVER_NAME = "arena" }

        [[servers]]
        id = "def456"
        scripts_dir = "/srv/special/scripts"
        "#,
    );

    let config = AppConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.daemon.runtime, Some(RuntimeType::Docker));
    assert_eq!(config.scripts_dir(), Path::new("/srv/gamehost/scripts"));
    assert_eq!(config.servers.len(), 2);
    assert_eq!(
        config.servers[0].env_pairs(),
        vec![
            ("SERVER_NAME".to_string(), "arena".to_string()),
            ("SERVER_PORT".to_string(), "27015".to_string()),
        ]
    );
    assert_eq!(
        config.servers[1].scripts_dir.as_deref(),
        Some("/srv/special/scripts")
    );
}

#[test]
fn malformed_config_is_an_error() {
    let file = write_temp("daemon = \"not a table\"");
    assert!(AppConfig::load(Some(file.path())).is_err());
}

#[test]
fn server_config_parses_scripts_and_ports() {
    let file = write_temp(
        r##"
        image = "lloesche/valheim-server"
        name = "valheim-1"
        env = { SERVER_NAME = "midgard" }
        volumes = [["/srv/valheim/data", "/config"]]

        [[ports]]
        host_port = 2456
        container_port = 2456
        protocol = "udp"

        [scripts]
        StartScript = "#!/bin/bash\nexec /usr/local/bin/run-server\n"
        backup = "#!/bin/bash\ntar czf /config/backup.tgz /config/worlds\n"
        "##,
    );

    let config = ServerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.image, "lloesche/valheim-server");
    assert_eq!(config.ports[0].protocol, "udp");
    assert_eq!(config.scripts.len(), 2);
    assert!(config.scripts["StartScript"].starts_with("#!/bin/bash"));

    let container = config.to_container_config(Path::new("/srv/scripts/valheim-1"));
    assert!(container.validate().is_ok());
    assert_eq!(container.volumes.len(), 2);
}

#[test]
fn server_config_requires_image() {
    let file = write_temp(r#"name = "no-image""#);
    assert!(ServerConfig::from_file(file.path()).is_err());
}
