use std::collections::HashSet;
use std::path::Path;

use config::{Config, ConfigError, File, FileFormat};
use hex::encode;
use serde::Deserialize;
use sha2::{Digest, Sha256};

pub const DEFAULT_SQLITE_DB: &str = "datasweep.sqlite";
pub const MEBIBYTES: u64 = 1024 * 1024;

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct DatasweepConfig {
    pub object_store: ObjectStore,
    pub catalog: Catalog,
    #[serde(default)]
    pub frontend: Frontend,
    #[serde(default)]
    pub misc: Misc,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStore {
    Local(Local),
    #[serde(rename = "memory")]
    InMemory(InMemory),
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Local {
    pub data_dir: String,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct InMemory {}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Catalog {
    Sqlite(Sqlite),
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Sqlite {
    pub dsn: String,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Default, Clone)]
pub struct Frontend {
    pub http: Option<HttpFrontend>,
}

/// A caller allowed in through the HTTP frontend. Only the SHA-256 hash of their bearer
/// token is kept.
#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct HttpUser {
    pub id: i64,
    pub email: String,
    pub token_sha256: String,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct HttpFrontend {
    pub bind_host: String,
    pub bind_port: u16,
    pub upload_data_max_length: u64,
    pub users: Vec<HttpUser>,
}

impl Default for HttpFrontend {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_port: 8080,
            upload_data_max_length: 256 * MEBIBYTES,
            users: vec![],
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Misc {
    pub max_datasets_per_user: usize,
}

impl Default for Misc {
    fn default() -> Self {
        Self {
            max_datasets_per_user: 10,
        }
    }
}

pub fn str_to_hex_hash(input: &str) -> String {
    encode(Sha256::digest(input.as_bytes()))
}

pub fn validate_config(config: DatasweepConfig) -> Result<DatasweepConfig, ConfigError> {
    let in_memory_catalog =
        matches!(config.catalog, Catalog::Sqlite(Sqlite { ref dsn }) if dsn.contains(":memory:"));

    let in_memory_object_store = matches!(config.object_store, ObjectStore::InMemory(_));

    if in_memory_catalog ^ in_memory_object_store {
        return Err(ConfigError::Message(
            "You are using an in-memory catalog with a non in-memory \
        object store or vice versa. This will cause consistency issues \
        if the process is restarted."
                .to_string(),
        ));
    }

    if config.misc.max_datasets_per_user == 0 {
        return Err(ConfigError::Message(
            "misc.max_datasets_per_user must be at least 1".to_string(),
        ));
    }

    if let Some(http) = &config.frontend.http {
        let mut ids = HashSet::new();
        for user in &http.users {
            if !ids.insert(user.id) {
                return Err(ConfigError::Message(format!(
                    "User id {} is configured more than once",
                    user.id
                )));
            }
            if user.token_sha256.len() != 64
                || !user.token_sha256.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(ConfigError::Message(format!(
                    "token_sha256 of user {} isn't a hex SHA-256 hash",
                    user.id
                )));
            }
        }
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<DatasweepConfig, ConfigError> {
    let path = path
        .to_str()
        .ok_or_else(|| ConfigError::Message(format!("Invalid config path {path:?}")))?;
    let config = Config::builder().add_source(File::with_name(path));

    config.build()?.try_deserialize().and_then(validate_config)
}

// Load a config from a string (to test our structs are defined correctly)
pub fn load_config_from_string(
    config_str: &str,
    skip_validation: bool,
) -> Result<DatasweepConfig, ConfigError> {
    let config =
        Config::builder().add_source(File::from_str(config_str, FileFormat::Toml));

    if skip_validation {
        config.build()?.try_deserialize()
    } else {
        config.build()?.try_deserialize().and_then(validate_config)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{
        load_config_from_string, str_to_hex_hash, Catalog, DatasweepConfig, Frontend,
        HttpFrontend, HttpUser, Local, Misc, ObjectStore, Sqlite, MEBIBYTES,
    };

    // sha256 of "ada-token"
    const ADA_TOKEN_HASH: &str =
        "54a976f1f7ea57f6add41516b340083a827ac641daefa7ce4e5f13cc1f9351d8";

    fn basic_config() -> String {
        format!(
            r#"
[object_store]
type = "local"
data_dir = "./datasweep-data"

[catalog]
type = "sqlite"
dsn = "./datasweep.sqlite"

[frontend.http]
bind_host = "0.0.0.0"
bind_port = 80

[[frontend.http.users]]
id = 1
email = "ada@example.com"
token_sha256 = "{ADA_TOKEN_HASH}"
"#
        )
    }

    const TEST_CONFIG_ERROR: &str = r#"
    [object_store]
    type = "local""#;

    #[test]
    fn test_parse_config_basic() {
        let config = load_config_from_string(&basic_config(), false).unwrap();

        assert_eq!(
            config,
            DatasweepConfig {
                object_store: ObjectStore::Local(Local {
                    data_dir: "./datasweep-data".to_string(),
                }),
                catalog: Catalog::Sqlite(Sqlite {
                    dsn: "./datasweep.sqlite".to_string(),
                }),
                frontend: Frontend {
                    http: Some(HttpFrontend {
                        bind_host: "0.0.0.0".to_string(),
                        bind_port: 80,
                        upload_data_max_length: 256 * MEBIBYTES,
                        users: vec![HttpUser {
                            id: 1,
                            email: "ada@example.com".to_string(),
                            token_sha256: ADA_TOKEN_HASH.to_string(),
                        }],
                    })
                },
                misc: Misc {
                    max_datasets_per_user: 10
                },
            }
        )
    }

    #[test]
    fn test_parse_config_erroneous() {
        let error = load_config_from_string(TEST_CONFIG_ERROR, false).unwrap_err();
        assert!(error.to_string().contains("missing field `data_dir`"))
    }

    #[rstest]
    #[case::memory_catalog_on_disk_store(
        "[object_store]\ntype = \"local\"\ndata_dir = \"./d\"\n[catalog]\ntype = \"sqlite\"\ndsn = \":memory:\"",
        "You are using an in-memory catalog with a non in-memory"
    )]
    #[case::no_datasets_allowed(
        "[object_store]\ntype = \"memory\"\n[catalog]\ntype = \"sqlite\"\ndsn = \":memory:\"\n[misc]\nmax_datasets_per_user = 0",
        "max_datasets_per_user"
    )]
    #[case::duplicate_user(
        "[object_store]\ntype = \"memory\"\n[catalog]\ntype = \"sqlite\"\ndsn = \":memory:\"\n\
        [[frontend.http.users]]\nid = 1\nemail = \"a@b\"\ntoken_sha256 = \"54a976f1f7ea57f6add41516b340083a827ac641daefa7ce4e5f13cc1f9351d8\"\n\
        [[frontend.http.users]]\nid = 1\nemail = \"c@d\"\ntoken_sha256 = \"54a976f1f7ea57f6add41516b340083a827ac641daefa7ce4e5f13cc1f9351d8\"",
        "configured more than once"
    )]
    #[case::plaintext_token(
        "[object_store]\ntype = \"memory\"\n[catalog]\ntype = \"sqlite\"\ndsn = \":memory:\"\n\
        [[frontend.http.users]]\nid = 1\nemail = \"a@b\"\ntoken_sha256 = \"secret\"",
        "isn't a hex SHA-256 hash"
    )]
    fn test_parse_config_invalid(#[case] config: &str, #[case] message: &str) {
        let error = load_config_from_string(config, false).unwrap_err();
        assert!(error.to_string().contains(message), "{error}");
        assert!(load_config_from_string(config, true).is_ok());
    }

    #[test]
    fn test_str_to_hex_hash() {
        assert_eq!(
            str_to_hex_hash("password"),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }
}
