use crate::error::ConfigurationError;
use crate::util;
use std::env;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn default_mongodb_uri() -> String {
    env::var("MONGODB_URI").unwrap_or("mongodb://localhost:27017".to_string())
}

fn default_mongodb_db() -> String {
    env::var("MONGODB_DB_NAME").unwrap_or("cez".to_string())
}

fn default_public_content() -> PathBuf {
    PathBuf::from(env::var("PUBLIC_CONTENT_PATH").unwrap_or("./public".to_string()))
}

fn default_media_root() -> PathBuf {
    PathBuf::from(env::var("MEDIA_ROOT").unwrap_or("./media".to_string()))
}

fn default_site_url() -> String {
    env::var("SITE_URL").unwrap_or("http://localhost:8000".to_string())
}

fn default_admin_usernames() -> Vec<String> {
    vec![String::from("admin")]
}

fn true_bool() -> bool {
    true
}

fn default_activation_timeout_days() -> u32 {
    3
}

fn default_password_cost() -> u32 {
    12
}

fn default_chat_buffer() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub host: String,
    #[serde(default = "MailConfig::default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl MailConfig {
    fn default_port() -> u16 {
        587
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    file_path: PathBuf,

    #[serde(default = "default_mongodb_uri")]
    pub mongodb_uri: String,
    #[serde(default = "default_mongodb_db")]
    pub mongodb_db: String,

    #[serde(default = "default_public_content")]
    pub public_content: PathBuf,
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,
    #[serde(default = "default_site_url")]
    pub site_url: String,

    #[serde(default = "default_admin_usernames")]
    pub admin_usernames: Vec<String>,
    #[serde(default)]
    pub teacher_usernames: Vec<String>,

    #[serde(default = "true_bool")]
    pub auto_activate: bool,
    #[serde(default = "default_activation_timeout_days")]
    pub activation_timeout_days: u32,
    #[serde(default = "default_password_cost")]
    pub password_cost: u32,

    #[serde(default = "default_chat_buffer")]
    pub chat_buffer: usize,

    #[serde(default)]
    pub mail: Option<MailConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            file_path: config_dir().join("settings.yml"),
            mongodb_uri: default_mongodb_uri(),
            mongodb_db: default_mongodb_db(),
            public_content: default_public_content(),
            media_root: default_media_root(),
            site_url: default_site_url(),
            admin_usernames: default_admin_usernames(),
            teacher_usernames: vec![],
            auto_activate: true,
            activation_timeout_days: default_activation_timeout_days(),
            password_cost: default_password_cost(),
            chat_buffer: default_chat_buffer(),
            mail: None,
        }
    }
}

#[inline]
fn config_dir() -> PathBuf {
    PathBuf::from(env::var("CONFIG_DIR").unwrap_or("./config".to_string()))
}

impl Config {
    pub fn load() -> Result<Config, ConfigurationError> {
        Config::load_from(config_dir())
    }

    pub fn load_from(dir: impl AsRef<Path>) -> Result<Config, ConfigurationError> {
        let config_file = util::find_first_subpath(
            dir.as_ref(),
            &["settings.yml", "settings.yaml"],
            Path::exists,
        )
        .ok_or_else(|| ConfigurationError::NotFound(dir.as_ref().to_path_buf()))?;

        let file = File::open(&config_file)?;
        let mut config: Config = serde_yaml::from_reader(BufReader::new(file))?;
        config.file_path = config_file;

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigurationError> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.file_path)?;
        let mut out = BufWriter::new(file);
        serde_yaml::to_writer(&mut out, self)?;
        out.flush()?;
        Ok(())
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Config {
        self.file_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        match Config::load_from(dir.path()) {
            Err(ConfigurationError::NotFound(path)) => assert_eq!(path, dir.path()),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn partial_config_gets_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(
            dir.path().join("settings.yml"),
            "mongodb_db: cez_test\nauto_activate: false\nteacher_usernames: [mr_green]\n",
        )
        .expect("write config");

        let config = Config::load_from(dir.path()).expect("config loads");
        assert_eq!(config.mongodb_db, "cez_test");
        assert!(!config.auto_activate);
        assert_eq!(config.teacher_usernames, vec!["mr_green".to_string()]);
        assert_eq!(config.activation_timeout_days, 3);
        assert_eq!(config.chat_buffer, 64);
        assert!(config.mail.is_none());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = Config::default().with_file_path(dir.path().join("settings.yml"));
        config.password_cost = 4;
        config.mail = Some(MailConfig {
            host: "smtp.example.com".to_string(),
            port: 465,
            username: "cez".to_string(),
            password: "secret".to_string(),
            from: "cez@example.com".to_string(),
        });
        config.save().expect("config saves");

        let loaded = Config::load_from(dir.path()).expect("config loads");
        assert_eq!(loaded.password_cost, 4);
        assert_eq!(loaded.mail.map(|m| m.port), Some(465));
    }
}
