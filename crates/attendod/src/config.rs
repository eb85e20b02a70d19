use std::net::SocketAddr;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server listens on (default: 0.0.0.0:3000).
    pub bind_addr: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Scratch directory for uploaded images while a request is in flight.
    pub upload_dir: PathBuf,
    /// Euclidean distance below which a face counts as recognized.
    pub match_threshold: f32,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
    /// Cloud image store credentials; `None` disables uploading.
    pub cloudinary: Option<CloudinaryConfig>,
}

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub api_base: String,
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    /// Folder registered images are uploaded into.
    pub folder: String,
}

const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

impl Config {
    /// Load configuration from `ATTENDO_*` and `CLOUDINARY_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let model_dir = var("ATTENDO_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(attendo_core::default_model_dir);

        let db_path = var("ATTENDO_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| attendo_core::data_dir().join("attendance.db"));

        let bind_addr = parsed(&var, "ATTENDO_BIND_ADDR")
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let match_threshold = match parsed::<f32>(&var, "ATTENDO_MATCH_THRESHOLD") {
            Some(t) if t.is_finite() && t > 0.0 => t,
            Some(t) => {
                tracing::warn!(value = t, "ATTENDO_MATCH_THRESHOLD must be a positive number; using default");
                attendo_core::DEFAULT_MATCH_THRESHOLD
            }
            None => attendo_core::DEFAULT_MATCH_THRESHOLD,
        };

        Self {
            bind_addr,
            model_dir,
            db_path,
            upload_dir: var("ATTENDO_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            match_threshold,
            max_upload_bytes: parsed(&var, "ATTENDO_MAX_UPLOAD_BYTES")
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            cloudinary: CloudinaryConfig::from_lookup(&var),
        }
    }
}

impl CloudinaryConfig {
    /// Present only when cloud name, key and secret are all set and non-empty.
    fn from_lookup(var: &impl Fn(&str) -> Option<String>) -> Option<Self> {
        Some(Self {
            api_base: var("CLOUDINARY_API_BASE")
                .unwrap_or_else(|| "https://api.cloudinary.com".to_string()),
            cloud_name: var("CLOUDINARY_CLOUD_NAME")?,
            api_key: var("CLOUDINARY_API_KEY")?,
            api_secret: var("CLOUDINARY_API_SECRET")?,
            folder: var("ATTENDO_IMAGE_FOLDER").unwrap_or_else(|| "face-images".to_string()),
        })
    }
}

/// Parse `key`, logging and discarding values that don't parse.
fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
