//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\studio-live\
//!   macOS:   ~/Library/Application Support/studio-live/
//!   Linux:   ~/.config/studio-live/
//!
//! Output dir (generated images, video, speech):
//!   Windows: %USERPROFILE%\Downloads\studio-live\
//!   macOS:   ~/Downloads/studio-live/
//!   Linux:   ~/Downloads/studio-live/ (or the current directory)

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Default directory for generated media when a command is given a bare
    /// file name.
    pub output_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "studio-live";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let output_dir = dirs::download_dir()
            .map(|d| d.join(Self::APP_NAME))
            .unwrap_or_else(|| PathBuf::from("."));

        let settings_file = config_dir.join("settings.toml");

        Self {
            config_dir,
            settings_file,
            output_dir,
        }
    }

    /// Resolve a user-supplied output path.  Absolute paths and paths with a
    /// directory component are used as given; bare file names land in
    /// [`output_dir`](Self::output_dir).
    pub fn resolve_output(&self, name: &str) -> PathBuf {
        let path = PathBuf::from(name);
        let bare = path.parent().map_or(true, |p| p.as_os_str().is_empty());
        if path.is_absolute() || !bare {
            path
        } else {
            self.output_dir.join(path)
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
