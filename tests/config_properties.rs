//! Property-based tests for configuration validity and loading.

#[cfg(test)]
mod tests {
    use dbhandler::{load_config, DbhConfig, DriverType};
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn arb_driver() -> impl Strategy<Value = Option<DriverType>> {
        prop_oneof![
            Just(None),
            Just(Some(DriverType::Sqlite)),
            Just(Some(DriverType::Postgres)),
            Just(Some(DriverType::Mysql)),
        ]
    }

    fn arb_text() -> impl Strategy<Value = String> {
        prop_oneof![Just(String::new()), "[ \\t]{1,3}", "[a-z][a-z0-9_./]{0,15}"]
    }

    proptest! {
        #[test]
        fn validity_matches_rule(driver in arb_driver(), host in arb_text(), name in arb_text()) {
            let config = DbhConfig {
                driver,
                host: host.clone(),
                name: name.clone(),
                ..DbhConfig::default()
            };
            let expected = match driver {
                None => false,
                Some(d) => !name.is_empty() && (d.is_file_based() || !host.is_empty()),
            };
            prop_assert_eq!(config.is_valid(), expected);
            prop_assert_eq!(config.validate().is_ok(), expected);
        }

        #[test]
        fn presets_are_valid_for_non_empty_names(host in "[a-z]{1,12}", name in "[a-z]{1,12}") {
            prop_assert!(DbhConfig::postgres(&host, &name).is_valid());
            prop_assert!(DbhConfig::mysql(&host, &name).is_valid());
            prop_assert!(DbhConfig::sqlite(&name).is_valid());
        }

        #[test]
        fn driver_names_parse_case_insensitively(index in 0usize..3, upper in any::<bool>()) {
            let driver = DriverType::ALL[index];
            let text = if upper { driver.as_str().to_uppercase() } else { driver.as_str().to_string() };
            prop_assert_eq!(text.parse::<DriverType>().unwrap(), driver);
        }
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "driver = \"mysql\"\nhost = \"db.local\"\nname = \"shop\"\nport = 3307\n\n[log]\nid = \"shop\"\nlevel = \"debug\""
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.driver, Some(DriverType::Mysql));
        assert_eq!(config.port, 3307);
        assert_eq!(config.log.id, "shop");
        assert!(config.is_valid());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/definitely/not/here/db.toml");
        assert!(matches!(result, Err(dbhandler::DbhError::Io(_))));
    }
}
