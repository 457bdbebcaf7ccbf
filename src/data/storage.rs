use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rocket::fs::{NamedFile, TempFile};
use rocket::http::{Header, Status};
use uuid::Uuid;

use crate::resp::problem::{problems, Problem};
use crate::util::file_basename;

pub static PROFILE_PICTURES: &str = "profile_pics";
pub static COURSE_IMAGES: &str = "course_images";
pub static COURSE_FILES: &str = "course_files";
pub static SUBMISSIONS: &str = "submissions";

pub static DEFAULT_PICTURE_URL: &str = "/media/default.png";

/// Profile pictures larger than this (in either dimension) are shrunk to fit.
pub const THUMBNAIL_SIZE: u32 = 256;
/// Same for course images.
pub const COURSE_IMAGE_SIZE: u32 = 1024;

/// Extension of every stored image. Images are re-encoded, so the upload's
/// own name never decides how public media is served.
pub static IMAGE_EXTENSION: &str = "png";

/// An uploaded file kept under the media root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Name the file was uploaded with, without any directories.
    pub name: String,
    /// Location relative to the media root.
    pub path: String,
}

impl StoredFile {
    pub fn media_url(&self) -> String {
        format!("/media/{}", self.path)
    }
}

#[derive(Responder)]
pub struct Download {
    file: NamedFile,
    disposition: Header<'static>,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn upload_name(file: &TempFile<'_>) -> String {
    file.raw_name()
        .map(|n| n.dangerous_unsafe_unsanitized_raw().as_str())
        .map(file_basename)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| file.name().map(str::to_string))
        .unwrap_or_else(|| "upload".to_string())
}

/// Decodes `source` by its content and writes it to `target` as a PNG that
/// fits a `size`×`size` box.
fn reencode_image(source: &Path, target: &Path, size: u32) -> Result<(), image::ImageError> {
    let img = image::ImageReader::open(source)?
        .with_guessed_format()?
        .decode()?;

    let img = if img.width() > size || img.height() > size {
        img.thumbnail(size, size)
    } else {
        img
    };

    img.to_rgba8()
        .save_with_format(target, image::ImageFormat::Png)
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> MediaStore {
        MediaStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, file: &StoredFile) -> PathBuf {
        self.root.join(&file.path)
    }

    /// Copies an uploaded file into `category` under a fresh name.
    pub async fn store(
        &self,
        category: &str,
        field: &str,
        file: &mut TempFile<'_>,
    ) -> Result<StoredFile, Problem> {
        if file.len() == 0 {
            return Err(problems::bad_field(field, "The submitted file is empty."));
        }

        let name = upload_name(file);

        let extension = extension_of(&name).or_else(|| {
            file.content_type()
                .and_then(|ct| ct.extension())
                .map(|ext| ext.as_str().to_ascii_lowercase())
        });

        let id = Uuid::new_v4();
        let path = match extension {
            Some(ext) => format!("{}/{}.{}", category, id, ext),
            None => format!("{}/{}", category, id),
        };

        let stored = StoredFile { name, path };
        let target = self.resolve(&stored);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        file.copy_to(&target).await?;

        tracing::debug!("stored upload '{}' as '{}'", stored.name, stored.path);
        Ok(stored)
    }

    pub async fn remove(&self, file: &StoredFile) -> Result<(), Problem> {
        match tokio::fs::remove_file(self.resolve(file)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("stored file '{}' was already missing", file.path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes files belonging to deleted records. Failures are only logged.
    pub async fn remove_all<'a>(&self, files: impl IntoIterator<Item = &'a StoredFile>) {
        for file in files {
            if let Err(e) = self.remove(file).await {
                tracing::warn!("unable to remove stored file '{}': {}", file.path, e);
            }
        }
    }

    pub async fn download(&self, file: &StoredFile) -> Result<Download, Problem> {
        let named = NamedFile::open(self.resolve(file)).await.map_err(|_| {
            Problem::new_untyped(Status::NotFound, "Stored file is missing.")
                .insert_str("name", &file.name)
                .clone()
        })?;

        let safe_name: String = file
            .name
            .chars()
            .filter(|c| *c != '"' && !c.is_control())
            .collect();

        Ok(Download {
            file: named,
            disposition: Header::new(
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", safe_name),
            ),
        })
    }

    /// Stores an uploaded image in `category`, re-encoded as a PNG that fits a
    /// `size`×`size` box.
    pub async fn store_image(
        &self,
        category: &str,
        field: &str,
        file: &mut TempFile<'_>,
        size: u32,
    ) -> Result<StoredFile, Problem> {
        if file.len() == 0 {
            return Err(problems::bad_field(field, "The submitted file is empty."));
        }

        let staging = self
            .root
            .join(category)
            .join(format!("{}.upload", Uuid::new_v4()));
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        file.copy_to(&staging).await?;

        let stored = self
            .import_image(&staging, category, upload_name(file), size)
            .await;

        if let Err(e) = tokio::fs::remove_file(&staging).await {
            tracing::warn!("unable to remove staged upload '{}': {}", staging.display(), e);
        }
        stored
    }

    /// Decodes the image at `source` and stores it in `category` under a fresh
    /// name. Anything that doesn't decode as a supported image is rejected.
    pub async fn import_image(
        &self,
        source: &Path,
        category: &str,
        name: String,
        size: u32,
    ) -> Result<StoredFile, Problem> {
        let stored = StoredFile {
            name,
            path: format!("{}/{}.{}", category, Uuid::new_v4(), IMAGE_EXTENSION),
        };
        let target = self.resolve(&stored);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let source = source.to_path_buf();
        let output = target.clone();
        let encoded = tokio::task::spawn_blocking(move || reencode_image(&source, &output, size))
            .await
            .map_err(|e| {
                tracing::error!("image task failed: {}", e);
                Problem::new_untyped(Status::InternalServerError, "Unable to process image.")
            })?;

        if let Err(e) = encoded {
            self.remove_all([&stored]).await;
            return Err(e.into());
        }

        tracing::debug!("stored image '{}' as '{}'", stored.name, stored.path);
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_sanitized() {
        assert_eq!(extension_of("report.PDF"), Some("pdf".to_string()));
        assert_eq!(extension_of("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(extension_of("no_extension"), None);
        assert_eq!(extension_of("weird.ex/e"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn media_urls() {
        let file = StoredFile {
            name: "me.png".to_string(),
            path: "profile_pics/abc.png".to_string(),
        };
        assert_eq!(file.media_url(), "/media/profile_pics/abc.png");

        let store = MediaStore::new("/srv/media");
        assert_eq!(store.resolve(&file), PathBuf::from("/srv/media/profile_pics/abc.png"));
    }

    #[tokio::test]
    async fn removing_missing_file_is_fine() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = MediaStore::new(dir.path());
        let file = StoredFile {
            name: "gone.txt".to_string(),
            path: "course_files/gone.txt".to_string(),
        };
        assert!(store.remove(&file).await.is_ok());
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        image::RgbImage::new(width, height)
            .save_with_format(path, image::ImageFormat::Png)
            .expect("write test image");
    }

    #[tokio::test]
    async fn large_pictures_are_thumbnailed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = MediaStore::new(dir.path().join("media"));
        let source = dir.path().join("me.png");
        write_png(&source, 512, 300);

        let stored = store
            .import_image(&source, PROFILE_PICTURES, "me.png".to_string(), THUMBNAIL_SIZE)
            .await
            .expect("stored image");

        let (w, h) = image::image_dimensions(store.resolve(&stored)).expect("dimensions");
        assert!(w <= THUMBNAIL_SIZE && h <= THUMBNAIL_SIZE);
        assert_eq!(w, THUMBNAIL_SIZE);
        assert_eq!(stored.name, "me.png");
    }

    #[tokio::test]
    async fn small_pictures_keep_their_size() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = MediaStore::new(dir.path().join("media"));
        let source = dir.path().join("small.gif");
        image::RgbImage::new(64, 32)
            .save_with_format(&source, image::ImageFormat::Gif)
            .expect("write test image");

        let stored = store
            .import_image(&source, COURSE_IMAGES, "small.gif".to_string(), COURSE_IMAGE_SIZE)
            .await
            .expect("stored image");

        assert!(stored.path.starts_with("course_images/"));
        assert!(stored.path.ends_with(".png"));
        assert_eq!(
            image::image_dimensions(store.resolve(&stored)).expect("dimensions"),
            (64, 32)
        );
    }

    #[tokio::test]
    async fn markup_named_images_are_stored_as_png() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = MediaStore::new(dir.path().join("media"));

        // A valid picture with a script glued to its end.
        let source = dir.path().join("avatar.html");
        write_png(&source, 16, 16);
        let mut bytes = std::fs::read(&source).expect("read test image");
        bytes.extend_from_slice(b"<script>alert(document.cookie)</script>");
        std::fs::write(&source, bytes).expect("write test image");

        let stored = store
            .import_image(&source, PROFILE_PICTURES, "avatar.html".to_string(), THUMBNAIL_SIZE)
            .await
            .expect("stored image");

        assert!(stored.path.ends_with(".png"), "stored as {}", stored.path);
        let written = std::fs::read(store.resolve(&stored)).expect("stored file");
        assert!(!written.windows(7).any(|w| w == b"<script"));
        assert_eq!(
            image::guess_format(&written).expect("known format"),
            image::ImageFormat::Png
        );
    }

    #[tokio::test]
    async fn non_images_are_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = MediaStore::new(dir.path().join("media"));
        let source = dir.path().join("notes.png");
        std::fs::write(&source, b"<html>definitely not a picture</html>").expect("write");

        let problem = store
            .import_image(&source, PROFILE_PICTURES, "notes.png".to_string(), THUMBNAIL_SIZE)
            .await
            .expect_err("not an image");
        assert_eq!(problem.status, Status::BadRequest);

        let leftovers = std::fs::read_dir(dir.path().join("media").join(PROFILE_PICTURES))
            .map(|it| it.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }
}
