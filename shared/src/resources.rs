//! Where campaign files come from: a local directory on the master, an
//! in-memory cache of fetched assets on a player

use crate::campaign::CampaignData;
use crate::error::CampaignError;
use chrono::Local;
use log::info;
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

/// Document file name, relative to the campaign root and the bulk channel
pub const DATA_FILE: &str = "data.json";
/// Backups of the previous document are written here on save
pub const BACKUP_DIR: &str = "backups";

/// Supplies image pixel dimensions for fragment geometry
pub trait ImageSource {
    fn pixel_size(&self, path: &str) -> Result<(u32, u32), CampaignError>;
}

/// Resolves a request path under `root`, refusing anything that could escape it.
pub fn sanitize_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    let mut resolved = root.to_path_buf();
    let mut depth = 0;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (depth > 0).then_some(resolved)
}

/// Campaign directory on the master's disk
#[derive(Debug, Clone)]
pub struct CampaignDir {
    root: PathBuf,
}

impl CampaignDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_path(&self) -> PathBuf {
        self.root.join(DATA_FILE)
    }

    pub fn load(&self) -> Result<CampaignData, CampaignError> {
        let path = self.data_path();
        let text = fs::read_to_string(&path).map_err(|e| CampaignError::io(path.display().to_string(), e))?;
        let data = serde_json::from_str(&text)?;
        info!("Loaded campaign from {}", path.display());
        Ok(data)
    }

    /// Writes the document, after copying the previous file into `backups/`.
    ///
    /// Keys are written sorted with two-space indentation. The new file is
    /// written next to the old one and renamed over it, so a failed save
    /// leaves the previous document in place. Returns the backup path when a
    /// previous file existed.
    pub fn save(&self, data: &CampaignData) -> Result<Option<PathBuf>, CampaignError> {
        let path = self.data_path();
        let backup = if path.exists() {
            let dir = self.root.join(BACKUP_DIR);
            fs::create_dir_all(&dir).map_err(|e| CampaignError::io(dir.display().to_string(), e))?;
            let backup = backup_path(&dir, &Local::now().format("%Y-%m-%dT%H%M%S").to_string());
            fs::copy(&path, &backup).map_err(|e| CampaignError::io(backup.display().to_string(), e))?;
            info!("Backed up previous campaign to {}", backup.display());
            Some(backup)
        } else {
            None
        };

        // A Value's object keys are ordered, which sorts the output.
        let text = serde_json::to_string_pretty(&serde_json::to_value(data)?)?;
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, text).map_err(|e| CampaignError::io(temp.display().to_string(), e))?;
        fs::rename(&temp, &path).map_err(|e| CampaignError::io(path.display().to_string(), e))?;
        info!("Saved campaign to {}", path.display());
        Ok(backup)
    }
}

/// First unused backup name for `stamp`; saves within the same second get
/// a counter suffix.
fn backup_path(dir: &Path, stamp: &str) -> PathBuf {
    let mut candidate = dir.join(format!("data-{stamp}.json"));
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("data-{stamp}-{counter}.json"));
        counter += 1;
    }
    candidate
}

impl ImageSource for CampaignDir {
    fn pixel_size(&self, path: &str) -> Result<(u32, u32), CampaignError> {
        let full = sanitize_path(&self.root, path).ok_or_else(|| CampaignError::MissingAsset(path.to_string()))?;
        image::image_dimensions(&full).map_err(|source| CampaignError::Image {
            path: path.to_string(),
            source,
        })
    }
}

/// Asset bytes fetched over the bulk channel, keyed by campaign path
#[derive(Debug, Default, Clone)]
pub struct AssetCache {
    assets: HashMap<String, Vec<u8>>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(path.into(), bytes);
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.assets.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.assets.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl ImageSource for AssetCache {
    fn pixel_size(&self, path: &str) -> Result<(u32, u32), CampaignError> {
        let bytes = self
            .get(path)
            .ok_or_else(|| CampaignError::MissingAsset(path.to_string()))?;
        let image_error = |source| CampaignError::Image {
            path: path.to_string(),
            source,
        };
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| image_error(image::ImageError::IoError(e)))?
            .into_dimensions()
            .map_err(image_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::fixtures::two_page_data;
    use image::{ImageFormat, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbaImage::new(width, height)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_sanitize_path_rejects_escapes() {
        let root = Path::new("/campaign");
        assert_eq!(
            sanitize_path(root, "/maps/cave.png"),
            Some(PathBuf::from("/campaign/maps/cave.png"))
        );
        assert_eq!(sanitize_path(root, "/../etc/passwd"), None);
        assert_eq!(sanitize_path(root, "maps/../../x"), None);
        assert_eq!(sanitize_path(root, "/"), None);
    }

    #[test]
    fn test_asset_cache_reads_png_dimensions() {
        let mut cache = AssetCache::new();
        cache.insert("hero.png", png_bytes(64, 32));
        assert_eq!(cache.pixel_size("hero.png").unwrap(), (64, 32));
        assert!(matches!(
            cache.pixel_size("missing.png"),
            Err(CampaignError::MissingAsset(_))
        ));
    }

    #[test]
    fn test_campaign_dir_reads_image_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("map.png"), png_bytes(20, 10)).unwrap();
        let campaign_dir = CampaignDir::new(dir.path());
        assert_eq!(campaign_dir.pixel_size("map.png").unwrap(), (20, 10));
    }

    #[test]
    fn test_save_writes_backup_of_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let campaign_dir = CampaignDir::new(dir.path());
        let mut data = two_page_data();

        // First save has nothing to back up.
        assert_eq!(campaign_dir.save(&data).unwrap(), None);

        data.players_page = 1;
        let backup = campaign_dir.save(&data).unwrap().expect("backup expected");
        assert!(backup.starts_with(dir.path().join(BACKUP_DIR)));

        let previous: CampaignData = serde_json::from_str(&fs::read_to_string(&backup).unwrap()).unwrap();
        assert_eq!(previous.players_page, 0);
        assert_eq!(campaign_dir.load().unwrap(), data);
    }

    #[test]
    fn test_saves_in_the_same_second_keep_every_backup() {
        let dir = tempfile::tempdir().unwrap();
        let campaign_dir = CampaignDir::new(dir.path());
        let mut data = two_page_data();
        campaign_dir.save(&data).unwrap();

        let mut backups = Vec::new();
        for page in [1, 0, 1] {
            data.players_page = page;
            backups.push(campaign_dir.save(&data).unwrap().unwrap());
        }

        backups.sort();
        backups.dedup();
        assert_eq!(backups.len(), 3);
        assert_eq!(fs::read_dir(dir.path().join(BACKUP_DIR)).unwrap().count(), 3);
        assert!(!dir.path().join("data.json.tmp").exists());
    }

    #[test]
    fn test_backup_path_adds_counter_when_taken() {
        let dir = tempfile::tempdir().unwrap();
        let first = backup_path(dir.path(), "2024-01-01T120000");
        assert!(first.ends_with("data-2024-01-01T120000.json"));

        fs::write(&first, "{}").unwrap();
        let second = backup_path(dir.path(), "2024-01-01T120000");
        assert!(second.ends_with("data-2024-01-01T120000-1.json"));
    }
}
