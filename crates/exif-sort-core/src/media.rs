use std::path::{Path, PathBuf};

/// Extensions picked up from the source directory, compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["raw", "jpeg", "jpg"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    /// Location in the source tree
    pub path: PathBuf,
    /// Just the filename
    pub filename: String,
    /// Filename without the extension
    pub base_name: String,
    /// Extension as written on disk (case preserved), without the dot
    pub extension: String,
}

impl ImageFile {
    /// Build an `ImageFile` for a path whose extension is one of [`IMAGE_EXTENSIONS`].
    ///
    /// Names that are not valid UTF-8 are kept, with the invalid bytes
    /// replaced; see [`ImageFile::has_lossy_name`].
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_string_lossy().into_owned();
        if !is_image_extension(&extension) {
            return None;
        }
        Some(Self {
            path: path.to_path_buf(),
            filename: path.file_name()?.to_string_lossy().into_owned(),
            base_name: path.file_stem()?.to_string_lossy().into_owned(),
            extension,
        })
    }

    /// The on-disk name is not valid UTF-8, so the output name differs from it.
    pub fn has_lossy_name(&self) -> bool {
        self.path.file_name().is_some_and(|name| name.to_str().is_none())
    }
}

pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known))
}
