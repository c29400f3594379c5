use super::{DatabaseError, Repository};
use crate::config::AppConfig;
use crate::database::{now_secs, Database};
use rusqlite::params;

pub struct ConfigRepository {
    db: Database,
}

impl Repository for ConfigRepository {
    fn database(&self) -> &Database {
        &self.db
    }
}

impl ConfigRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Load the configuration, falling back to defaults for missing or unparsable keys.
    pub fn get_config(&self) -> Result<AppConfig, DatabaseError> {
        let mut config = AppConfig::default();

        let pairs = self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM app_config")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut pairs = Vec::new();
            for row in rows {
                pairs.push(row?);
            }
            Ok(pairs)
        })?;

        for (key, value) in pairs {
            apply_setting(&mut config, &key, &value);
        }

        Ok(config)
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<(), DatabaseError> {
        let timestamp = now_secs();
        let configs = vec![
            (
                "supported_extensions",
                serde_json::to_string(&config.supported_extensions)?,
            ),
            ("thumbnail_width", config.thumbnail_width.to_string()),
            (
                "thumbnail_seek_percent",
                config.thumbnail_seek_percent.to_string(),
            ),
            (
                "thumbnail_schema_suffix",
                config.thumbnail_schema_suffix.clone(),
            ),
            ("ffmpeg_command", config.ffmpeg_command.clone()),
            ("ffprobe_command", config.ffprobe_command.clone()),
            ("tool_timeout_secs", config.tool_timeout_secs.to_string()),
            (
                "rename_sequence_width",
                config.rename_sequence_width.to_string(),
            ),
            ("path_case", config.path_case.to_string()),
        ];

        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            for (key, value) in configs {
                tx.execute(
                    "INSERT OR REPLACE INTO app_config (key, value, updated_at) VALUES (?1, ?2, ?3)",
                    params![key, value, timestamp],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Set one key from its string form. Returns false for unknown keys or bad values.
    pub fn set_value(&self, key: &str, value: &str) -> Result<bool, DatabaseError> {
        let mut config = self.get_config()?;
        let before = config.clone();
        if !apply_setting(&mut config, key, value) {
            return Ok(false);
        }
        if config != before {
            self.save_config(&config)?;
        }
        Ok(true)
    }
}

fn apply_setting(config: &mut AppConfig, key: &str, value: &str) -> bool {
    match key {
        "supported_extensions" => match serde_json::from_str::<Vec<String>>(value) {
            Ok(extensions) => {
                config.supported_extensions = extensions
                    .into_iter()
                    .map(|ext| {
                        let ext = ext.trim().to_lowercase();
                        if ext.starts_with('.') {
                            ext
                        } else {
                            format!(".{}", ext)
                        }
                    })
                    .collect();
                true
            }
            Err(_) => false,
        },
        "thumbnail_width" => parse_into(value, &mut config.thumbnail_width),
        "thumbnail_seek_percent" => match value.parse::<u8>() {
            Ok(percent) if percent <= 100 => {
                config.thumbnail_seek_percent = percent;
                true
            }
            _ => false,
        },
        "thumbnail_schema_suffix" => {
            config.thumbnail_schema_suffix = value.to_string();
            true
        }
        "ffmpeg_command" if !value.is_empty() => {
            config.ffmpeg_command = value.to_string();
            true
        }
        "ffprobe_command" if !value.is_empty() => {
            config.ffprobe_command = value.to_string();
            true
        }
        "tool_timeout_secs" => parse_into(value, &mut config.tool_timeout_secs),
        "rename_sequence_width" => parse_into(value, &mut config.rename_sequence_width),
        "path_case" => match value.parse() {
            Ok(path_case) => {
                config.path_case = path_case;
                true
            }
            Err(_) => false,
        },
        _ => false,
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) -> bool {
    match value.trim().parse::<T>() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathCase;

    #[test]
    fn test_defaults_when_empty() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.config().get_config().unwrap(), AppConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.config();

        let config = AppConfig {
            thumbnail_width: 480,
            path_case: PathCase::Insensitive,
            supported_extensions: vec![".mp4".to_string()],
            ..Default::default()
        };
        repo.save_config(&config).unwrap();

        assert_eq!(repo.get_config().unwrap(), config);
    }

    #[test]
    fn test_set_value() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.config();

        assert!(repo.set_value("thumbnail_width", "640").unwrap());
        assert!(repo
            .set_value("supported_extensions", r#"["MP4", ".mkv"]"#)
            .unwrap());
        assert!(!repo.set_value("thumbnail_seek_percent", "150").unwrap());
        assert!(!repo.set_value("no_such_key", "1").unwrap());

        let config = repo.get_config().unwrap();
        assert_eq!(config.thumbnail_width, 640);
        assert_eq!(config.supported_extensions, vec![".mp4", ".mkv"]);
        assert_eq!(config.thumbnail_seek_percent, 20);
    }

    #[test]
    fn test_unparsable_value_falls_back_to_default() {
        let db = Database::open_in_memory().unwrap();
        db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO app_config (key, value, updated_at) VALUES ('thumbnail_width', 'wide', 0)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.config().get_config().unwrap().thumbnail_width, 320);
    }
}
