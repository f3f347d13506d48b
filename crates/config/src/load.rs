//! Layered configuration loading.
//!
//! Precedence, lowest first: built-in defaults, the configuration file,
//! `CAPSTORE_`-prefixed environment variables (`__` separates nested keys,
//! e.g. `CAPSTORE_ARCHIVE__INTERVAL_SECS=2`).

use crate::Config;
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "CAPSTORE_";
/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "CAPSTORE_CONFIG";
pub const SYSTEM_CONFIG: &str = "/etc/capstore/config.toml";

impl Config {
    /// Load, merge and validate the configuration.
    ///
    /// `path` is the file given on the command line, if any. Without it the
    /// file named by `CAPSTORE_CONFIG`, then [`SYSTEM_CONFIG`], then the
    /// per-user configuration directory are tried in that order.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(explicit) if !explicit.is_file() => exn::bail!(ErrorKind::NotFound(explicit.to_path_buf())),
            Some(explicit) => Some(explicit.to_path_buf()),
            None => Self::locate()?,
        };
        match &file {
            Some(f) => tracing::debug!(file = %f.display(), "Loading configuration"),
            None => tracing::debug!("No configuration file found; using defaults and environment"),
        }
        Self::from_figment(Self::figment(file.as_deref())?)
    }

    /// Build the provider stack without extracting it.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            figment = match file.extension().and_then(|e| e.to_str()) {
                Some("toml") => figment.merge(Toml::file_exact(file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(file)),
                Some("json") => figment.merge(Json::file_exact(file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    fn locate() -> Result<Option<PathBuf>> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path));
            }
            return Ok(Some(path));
        }
        let user = ProjectDirs::from("", "", "capstore").map(|dirs| dirs.config_dir().join("config.toml"));
        Ok([Some(PathBuf::from(SYSTEM_CONFIG)), user].into_iter().flatten().find(|p| p.is_file()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstore_storage::ContentType;
    use figment::Jail;
    use time::macros::offset;

    const TOML: &str = r#"
        utc_offset = "+02:00"

        [service]
        user = "vpt"
        mode = "750"

        [archive]
        interval_secs = 3

        [hot_retention]
        captures = 150

        [[devices]]
        id = "capture1"
        base_path = "/var/www/html/stream/capture1"

        [[devices]]
        id = "capture2"
        base_path = "/var/www/html/stream/capture2"
        hot_path = "/mnt/ram/capture2"
        ram_size_mb = 100
    "#;

    #[test]
    fn test_load_toml_merges_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("capstore.toml", TOML)?;
            let config = Config::load(Some(Path::new("capstore.toml"))).unwrap();
            assert_eq!(config.utc_offset, offset!(+2));
            assert_eq!(config.service.user.as_deref(), Some("vpt"));
            assert_eq!(config.service.mode, 0o750);
            assert_eq!(config.archive.interval_secs, 3);
            // Untouched siblings keep their defaults.
            assert_eq!(config.archive.min_age_ms, 500);
            assert_eq!(*config.hot_retention.get(ContentType::Captures), 150);
            assert_eq!(*config.hot_retention.get(ContentType::Segments), 10);
            assert_eq!(config.devices.len(), 2);
            let capture2 = config.devices.iter().find(|d| d.id == "capture2").unwrap();
            assert_eq!(capture2.hot_path(), Path::new("/mnt/ram/capture2"));
            assert_eq!(config.ram_size_mb(capture2), 100);
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("capstore.toml", TOML)?;
            jail.set_env("CAPSTORE_ARCHIVE__INTERVAL_SECS", "1");
            jail.set_env("CAPSTORE_COLD_RETENTION_HOURS__CAPTURES", "6");
            let config = Config::load(Some(Path::new("capstore.toml"))).unwrap();
            assert_eq!(config.archive.interval_secs, 1);
            assert_eq!(*config.cold_retention_hours.get(ContentType::Captures), 6);
            Ok(())
        });
    }

    #[test]
    fn test_environment_mode_is_octal() {
        Jail::expect_with(|jail| {
            jail.create_file("capstore.toml", TOML)?;
            jail.set_env("CAPSTORE_SERVICE__MODE", "2770");
            let config = Config::load(Some(Path::new("capstore.toml"))).unwrap();
            assert_eq!(config.service.mode, 0o2770);

            jail.set_env("CAPSTORE_SERVICE__MODE", "0o750");
            let config = Config::load(Some(Path::new("capstore.toml"))).unwrap();
            assert_eq!(config.service.mode, 0o750);

            jail.set_env("CAPSTORE_SERVICE__MODE", "2779");
            let err = Config::load(Some(Path::new("capstore.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }

    #[test]
    fn test_integer_mode_in_file() {
        Jail::expect_with(|jail| {
            jail.create_file("capstore.toml", &TOML.replace(r#"mode = "750""#, "mode = 2775"))?;
            let config = Config::load(Some(Path::new("capstore.toml"))).unwrap();
            assert_eq!(config.service.mode, 0o2775);
            Ok(())
        });
    }

    #[test]
    fn test_config_env_names_file() {
        Jail::expect_with(|jail| {
            jail.create_file("elsewhere.toml", TOML)?;
            jail.set_env(CONFIG_ENV, "elsewhere.toml");
            let config = Config::load(None).unwrap();
            assert_eq!(config.devices.len(), 2);
            Ok(())
        });
    }

    #[test]
    fn test_load_json() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "capstore.json",
                r#"{"devices": [{"id": "capture1", "base_path": "/srv/capture1"}], "sweep": {"interval_secs": 10}}"#,
            )?;
            let config = Config::load(Some(Path::new("capstore.json"))).unwrap();
            assert_eq!(config.sweep.interval_secs, 10);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|_jail| {
            let err = Config::load(Some(Path::new("nope.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::NotFound(_)));
            Ok(())
        });
    }

    #[test]
    fn test_unsupported_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("capstore.ini", "x = 1")?;
            let err = Config::load(Some(Path::new("capstore.ini"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("capstore.toml", TOML)?;
            jail.set_env("CAPSTORE_UTC_OFFSET", "Mars/Olympus");
            let err = Config::load(Some(Path::new("capstore.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }

    #[test]
    fn test_defaults_round_trip_through_figment() {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let config: Config = figment.extract().unwrap();
        assert_eq!(config, Config::default());
    }
}
