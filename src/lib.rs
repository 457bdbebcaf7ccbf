extern crate tracing_futures;

#[macro_use]
extern crate rocket;
#[macro_use]
extern crate serde;

use bson::doc;
use error::BackendError;
use mongodb::{Client, Database};
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedHeaders, AllowedOrigins};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::chat::ChatRooms;
use crate::config::Config;
use crate::data::storage::MediaStore;
use crate::error::ConfigurationError;
use crate::mail::Mailer;
use crate::route::mount_api;
use crate::security::Security;

pub mod chat;
pub mod config;
pub mod data;
pub mod error;
pub mod mail;
pub mod middleware;
pub mod resp;
pub mod role;
pub mod route;
pub mod security;
pub mod util;

fn load_config() -> Result<Config, ConfigurationError> {
    tracing::info!("Loading configuration...");
    match Config::load() {
        Ok(c) => {
            tracing::info!("Configuration loaded.");
            Ok(c)
        }
        Err(ConfigurationError::NotFound(dir)) => {
            tracing::warn!("No configuration in '{}', using defaults.", dir.display());
            let c = Config::default();
            if c.save().is_err() {
                tracing::warn!("Unable to save generated configuration.");
            }
            Ok(c)
        }
        Err(other) => {
            tracing::error!("Configuration error: {}", other);
            Err(other)
        }
    }
}

async fn connect(c: &Config) -> Result<Database, BackendError> {
    tracing::info!("Connecting to MongoDB: {}", c.mongodb_uri);
    let client = Client::with_uri_str(c.mongodb_uri.as_str()).await?;

    tracing::info!("Using MongoDB database: {}", c.mongodb_db);
    let db = client.database(c.mongodb_db.as_str());

    if let Err(e) = db.run_command(doc! { "ping": 1 }, None).await {
        tracing::error!("Unable to connect to MongoDB.");
        return Err(e.into());
    }

    tracing::info!("Ensuring database indexes...");
    data::ensure_indexes(&db).await?;

    Ok(db)
}

/// Builds the server from already loaded parts.
pub fn assemble(
    c: Config,
    security: Security,
    db: Database,
    mailer: Mailer,
) -> Result<Rocket<Build>, BackendError> {
    let media = MediaStore::new(c.media_root.clone());
    let rooms = ChatRooms::new(c.chat_buffer);

    tracing::info!("Setting up CORS...");
    let cors = rocket_cors::CorsOptions {
        allowed_origins: AllowedOrigins::All,
        allowed_methods: vec![Method::Get, Method::Put, Method::Post, Method::Delete]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: AllowedHeaders::All,
        allow_credentials: true,
        ..Default::default()
    }
    .to_cors()?;

    let r = rocket::build()
        .manage(c)
        .manage(security)
        .manage(db)
        .manage(media)
        .manage(mailer)
        .manage(rooms)
        .attach(cors);

    Ok(mount_api(r))
}

pub async fn create(log_level: Option<Level>) -> Result<Rocket<Build>, BackendError> {
    if let Some(l) = log_level {
        let subscriber = FmtSubscriber::builder().with_max_level(l).finish();

        if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Unable to set global logger: {}", err);
        };
        if tracing_log::LogTracer::init().is_err() {
            tracing::debug!("log records are already forwarded");
        }
    }

    tracing::info!("Reading .env file...");
    if dotenv::dotenv().is_err() {
        tracing::warn!("Unable to load .env file.");
    }

    let c = load_config()?;

    tracing::info!("Initializing security material...");
    let security = Security::load(c.password_cost)?;

    let db = connect(&c).await?;

    let mailer = Mailer::from_config(c.mail.as_ref())?;
    if !mailer.is_configured() {
        tracing::warn!("SMTP isn't configured, mail will only be logged.");
    }

    tracing::info!("Starting HTTP server...");
    assemble(c, security, db, mailer)
}
