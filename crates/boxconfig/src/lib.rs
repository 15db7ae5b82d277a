use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Session description loaded from `shadebox.toml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SandboxConfig {
    pub version: u32,
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub surface: SurfaceSettings,
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default)]
    pub light: LightSettings,
    #[serde(default)]
    pub material: MaterialSettings,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SurfaceSettings {
    #[serde(default = "default_size")]
    pub size: [u32; 2],
    #[serde(default)]
    pub fps: Option<f32>,
    #[serde(default = "default_clear_color")]
    pub clear_color: [f64; 4],
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self {
            size: default_size(),
            fps: None,
            clear_color: default_clear_color(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraSettings {
    #[serde(default = "default_eye")]
    pub eye: [f32; 3],
    #[serde(default)]
    pub target: [f32; 3],
    #[serde(default = "default_fov")]
    pub fov_degrees: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
    /// Degrees per second the eye orbits around the target; zero disables it.
    #[serde(default)]
    pub orbit_speed: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            eye: default_eye(),
            target: [0.0; 3],
            fov_degrees: default_fov(),
            near: default_near(),
            far: default_far(),
            orbit_speed: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LightSettings {
    #[serde(default = "default_light_position")]
    pub position: [f32; 3],
    #[serde(default = "default_white")]
    pub color: [f32; 3],
}

impl Default for LightSettings {
    fn default() -> Self {
        Self {
            position: default_light_position(),
            color: default_white(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaterialSettings {
    #[serde(default = "default_ambient")]
    pub ambient: [f32; 3],
    #[serde(default = "default_diffuse")]
    pub diffuse: [f32; 3],
    #[serde(default = "default_white")]
    pub specular: [f32; 3],
    #[serde(default = "default_shininess")]
    pub shininess: f32,
}

impl Default for MaterialSettings {
    fn default() -> Self {
        Self {
            ambient: default_ambient(),
            diffuse: default_diffuse(),
            specular: default_white(),
            shininess: default_shininess(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub tag: String,
    #[serde(default)]
    pub kind: Option<FileKindSetting>,
    #[serde(default)]
    pub stage: Option<StageSetting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKindSetting {
    Shader,
    Image,
    Geometry,
    Dependency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageSetting {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_size() -> [u32; 2] {
    [1280, 720]
}

fn default_clear_color() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

fn default_eye() -> [f32; 3] {
    [0.0, 0.0, 3.0]
}

fn default_fov() -> f32 {
    60.0
}

fn default_near() -> f32 {
    0.1
}

fn default_far() -> f32 {
    100.0
}

fn default_light_position() -> [f32; 3] {
    [4.0, 4.0, 4.0]
}

fn default_white() -> [f32; 3] {
    [1.0; 3]
}

fn default_ambient() -> [f32; 3] {
    [0.1; 3]
}

fn default_diffuse() -> [f32; 3] {
    [0.8; 3]
}

fn default_shininess() -> f32 {
    32.0
}

/// Durations are written either as humantime strings (`"250ms"`) or as a
/// plain number of seconds.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(f64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Text(text) => humantime::parse_duration(text.trim())
            .map_err(|err| de::Error::custom(format!("invalid duration '{text}': {err}"))),
        RawDuration::Seconds(seconds) if seconds.is_finite() && seconds >= 0.0 => {
            Ok(Duration::from_secs_f64(seconds))
        }
        RawDuration::Seconds(seconds) => Err(de::Error::custom(format!(
            "duration must be a non-negative number of seconds, got {seconds}"
        ))),
    }
}

/// Longest poll interval we accept; anything slower stops feeling "live".
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);

impl SandboxConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SandboxConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads, parses and validates a config file, then rebases relative paths
    /// onto the directory that contains it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    /// Joins every relative file and include path onto `base`.
    pub fn rebase(&mut self, base: &Path) {
        for entry in &mut self.files {
            if entry.path.is_relative() {
                entry.path = base.join(&entry.path);
            }
        }
        for dir in &mut self.include_dirs {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    pub fn files_tagged<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a FileEntry> + 'a {
        self.files.iter().filter(move |entry| entry.tag == tag)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval must be greater than zero".into(),
            ));
        }

        if self.poll_interval > MAX_POLL_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "poll_interval must be at most {}",
                humantime::format_duration(MAX_POLL_INTERVAL)
            )));
        }

        let [width, height] = self.surface.size;
        if width == 0 || height == 0 {
            return Err(ConfigError::Invalid(format!(
                "surface.size must be non-zero, got {width}x{height}"
            )));
        }

        if let Some(fps) = self.surface.fps {
            if fps < 0.0 {
                return Err(ConfigError::Invalid("surface.fps must be >= 0".into()));
            }
        }

        if !(self.camera.fov_degrees > 0.0 && self.camera.fov_degrees < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "camera.fov_degrees must be within (0, 180), got {}",
                self.camera.fov_degrees
            )));
        }

        if self.camera.near <= 0.0 || self.camera.far <= self.camera.near {
            return Err(ConfigError::Invalid(
                "camera planes must satisfy 0 < near < far".into(),
            ));
        }

        if self.material.shininess < 0.0 {
            return Err(ConfigError::Invalid(
                "material.shininess must be >= 0".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for entry in &self.files {
            if entry.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "file entry tagged '{}' has an empty path",
                    entry.tag
                )));
            }

            if entry.tag.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "file '{}' must have a non-empty tag",
                    entry.path.display()
                )));
            }

            if entry.stage.is_some()
                && !matches!(entry.kind, None | Some(FileKindSetting::Shader))
            {
                return Err(ConfigError::Invalid(format!(
                    "file '{}' sets a shader stage but is not a shader",
                    entry.path.display()
                )));
            }

            if !seen.insert((entry.path.clone(), entry.tag.clone())) {
                return Err(ConfigError::Invalid(format!(
                    "file '{}' is listed twice under tag '{}'",
                    entry.path.display(),
                    entry.tag
                )));
            }
        }

        Ok(())
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            version: 1,
            poll_interval: default_poll_interval(),
            include_dirs: Vec::new(),
            surface: SurfaceSettings::default(),
            camera: CameraSettings::default(),
            light: LightSettings::default(),
            material: MaterialSettings::default(),
            files: Vec::new(),
        }
    }
}
