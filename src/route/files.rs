use std::path::{Path, PathBuf};

use rocket::fs::NamedFile;
use rocket::State;

use crate::config::Config;
use crate::data::storage::{MediaStore, COURSE_IMAGES, PROFILE_PICTURES};

/// Media categories anyone can fetch. Course files and submissions go
/// through their own authorized routes.
static PUBLIC_MEDIA: &[&str] = &[PROFILE_PICTURES, COURSE_IMAGES];
/// Public media is served by extension, so only image types get through.
static PUBLIC_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

async fn app_index_file(c: &Config) -> Option<NamedFile> {
    let index = c.public_content.join("index.html");
    match NamedFile::open(&index).await {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::error!("'{}' can't be opened: {}", index.display(), e);
            None
        }
    }
}

#[utoipa::path(responses((status = 200, description = "Web application entry point")))]
#[get("/")]
pub async fn app(c: &State<Config>) -> Option<NamedFile> {
    app_index_file(c).await
}

#[get("/<path..>", rank = 10)]
pub async fn app_path(path: PathBuf, c: &State<Config>) -> Option<NamedFile> {
    // Unmatched API paths shouldn't render the application.
    if path.starts_with("api") || path.starts_with("media") {
        return None;
    }

    match NamedFile::open(c.public_content.join(&path)).await {
        Ok(file) => Some(file),
        Err(_) => app_index_file(c).await,
    }
}

#[get("/media/default.png")]
pub async fn default_picture(c: &State<Config>) -> Option<NamedFile> {
    NamedFile::open(c.public_content.join("default.png")).await.ok()
}

#[get("/media/<category>/<file>", rank = 2)]
pub async fn public_media(
    category: &str,
    file: &str,
    media: &State<MediaStore>,
) -> Option<NamedFile> {
    if !PUBLIC_MEDIA.contains(&category) {
        return None;
    }
    // Stored names are generated, so anything with a separator is bogus.
    if file.contains(['/', '\\']) || file.starts_with('.') {
        return None;
    }
    let extension = Path::new(file).extension()?.to_str()?.to_ascii_lowercase();
    if !PUBLIC_EXTENSIONS.contains(&extension.as_str()) {
        return None;
    }

    NamedFile::open(media.root().join(Path::new(category).join(file)))
        .await
        .ok()
}
