//! External table configuration loaded from TOML.

use chainsql::{
    ExternalTables, ExternalTablesConfig, MySqlDriver, SqlBuilder, StaticConventions, args,
};
use std::sync::Arc;

const CONFIG: &str = r#"
[[external_tables]]
name = "geo"
tables = ["country", "region"]

[[external_tables]]
name = "billing"
tables = ["invoice"]
"#;

#[test]
fn config_parses_all_databases() {
    let config: ExternalTablesConfig = toml::from_str(CONFIG).unwrap();
    let tables = ExternalTables::new(config).unwrap();
    assert_eq!(tables.database_of("country"), Some("geo"));
    assert_eq!(tables.database_of("invoice"), Some("billing"));
    assert_eq!(tables.database_of("user"), None);
}

#[test]
fn builder_output_is_prefixed() {
    let config: ExternalTablesConfig = toml::from_str(CONFIG).unwrap();
    let driver = MySqlDriver::new().with_external_tables(ExternalTables::new(config).unwrap());
    let mut b = SqlBuilder::new("user", Arc::new(driver), Arc::new(StaticConventions::new()));
    b.add_where("country.code", args!["CZ"]).unwrap();
    assert_eq!(
        b.build_select_query(None).unwrap(),
        "SELECT `user`.* FROM `user` LEFT JOIN `geo`.`country` ON `user`.`country_id` = `geo`.`country`.`id` WHERE (`geo`.`country`.`code` = ?)"
    );
}

#[test]
fn external_base_table() {
    let config: ExternalTablesConfig = toml::from_str(CONFIG).unwrap();
    let driver = MySqlDriver::new().with_external_tables(ExternalTables::new(config).unwrap());
    let mut b = SqlBuilder::new("invoice", Arc::new(driver), Arc::new(StaticConventions::new()));
    b.add_where("id", args![1]).unwrap();
    assert_eq!(
        b.build_select_query(None).unwrap(),
        "SELECT `billing`.`invoice`.* FROM `billing`.`invoice` WHERE (`id` = ?)"
    );
    assert_eq!(b.build_insert_query(), "INSERT INTO `billing`.`invoice`");
}
