//! Runner configuration.

use std::path::PathBuf;

use ash::vk;
use dear_imgui_rs::ConfigFlags;

use crate::error::{AppError, AppResult};

/// How swapchains pace presentation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPolicy {
    /// Wait for vertical blank (FIFO, always available).
    #[default]
    Vsync,
    /// Prefer MAILBOX, then IMMEDIATE, then fall back to FIFO.
    Unlimited,
}

impl PresentPolicy {
    /// Present modes to request, most preferred first.
    pub fn requested_modes(self) -> &'static [vk::PresentModeKHR] {
        match self {
            PresentPolicy::Vsync => &[vk::PresentModeKHR::FIFO],
            PresentPolicy::Unlimited => &[
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
                vk::PresentModeKHR::FIFO,
            ],
        }
    }
}

/// Basic runner configuration
pub struct RunnerConfig {
    /// Number of OS windows, each driven by its own worker thread.
    pub window_count: usize,
    /// Title prefix; the window index is appended.
    pub window_title: String,
    /// Logical window size.
    pub window_size: (f64, f64),
    /// Minimum swapchain image count requested (at least 2).
    pub min_image_count: u32,
    pub present: PresentPolicy,
    /// Initial clear color (straight alpha; premultiplied when cleared).
    pub clear_color: [f32; 4],
    /// Enable `VK_LAYER_KHRONOS_validation` and route its messages into `tracing`.
    pub validation: bool,
    /// `Io::config_flags` applied to every window's context. With
    /// `VIEWPORTS_ENABLE`, ImGui windows can be dragged out into their own
    /// platform windows.
    pub io_config_flags: ConfigFlags,
    /// Per-window ini file; `None` disables settings persistence.
    pub ini_filename: Option<PathBuf>,
    /// Texture descriptor sets each window's renderer may allocate.
    pub max_textures: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            window_count: 3,
            window_title: "Dear ImGui winit+Vulkan threaded example".to_string(),
            window_size: (1280.0, 720.0),
            min_image_count: 2,
            present: PresentPolicy::Vsync,
            clear_color: [0.45, 0.55, 0.60, 1.00],
            validation: cfg!(debug_assertions),
            io_config_flags: ConfigFlags::NAV_ENABLE_KEYBOARD
                | ConfigFlags::NAV_ENABLE_GAMEPAD
                | ConfigFlags::DOCKING_ENABLE
                | ConfigFlags::VIEWPORTS_ENABLE,
            ini_filename: None,
            max_textures: 128,
        }
    }
}

// `ConfigFlags` carries no derives; copy it through its bits.
impl Clone for RunnerConfig {
    fn clone(&self) -> Self {
        Self {
            window_count: self.window_count,
            window_title: self.window_title.clone(),
            window_size: self.window_size,
            min_image_count: self.min_image_count,
            present: self.present,
            clear_color: self.clear_color,
            validation: self.validation,
            io_config_flags: self.config_flags(),
            ini_filename: self.ini_filename.clone(),
            max_textures: self.max_textures,
        }
    }
}

impl std::fmt::Debug for RunnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerConfig")
            .field("window_count", &self.window_count)
            .field("window_title", &self.window_title)
            .field("window_size", &self.window_size)
            .field("min_image_count", &self.min_image_count)
            .field("present", &self.present)
            .field("clear_color", &self.clear_color)
            .field("validation", &self.validation)
            .field(
                "io_config_flags",
                &format_args!("{:#x}", self.io_config_flags.bits()),
            )
            .field("ini_filename", &self.ini_filename)
            .field("max_textures", &self.max_textures)
            .finish()
    }
}

pub const ENV_WINDOWS: &str = "DEAR_THREADED_WINDOWS";
pub const ENV_UNLIMITED_FPS: &str = "DEAR_THREADED_UNLIMITED_FPS";
pub const ENV_VALIDATION: &str = "DEAR_THREADED_VALIDATION";
pub const ENV_VIEWPORTS: &str = "DEAR_THREADED_VIEWPORTS";

impl RunnerConfig {
    /// Defaults overlaid with `DEAR_THREADED_*` environment variables.
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up through `lookup` (keys are the `ENV_*` names).
    pub fn with_overrides<F>(mut self, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_WINDOWS) {
            self.window_count = raw.trim().parse().map_err(|_| {
                AppError::InvalidConfig(format!("{ENV_WINDOWS}={raw:?} is not a window count"))
            })?;
        }
        if let Some(raw) = lookup(ENV_UNLIMITED_FPS) {
            self.present = if parse_flag(ENV_UNLIMITED_FPS, &raw)? {
                PresentPolicy::Unlimited
            } else {
                PresentPolicy::Vsync
            };
        }
        if let Some(raw) = lookup(ENV_VALIDATION) {
            self.validation = parse_flag(ENV_VALIDATION, &raw)?;
        }
        if let Some(raw) = lookup(ENV_VIEWPORTS) {
            let mut flags = self.config_flags();
            flags.set(ConfigFlags::VIEWPORTS_ENABLE, parse_flag(ENV_VIEWPORTS, &raw)?);
            self.io_config_flags = flags;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.window_count == 0 {
            return Err(AppError::InvalidConfig(
                "window_count must be at least 1".to_string(),
            ));
        }
        if self.min_image_count < 2 {
            return Err(AppError::InvalidConfig(format!(
                "min_image_count must be >= 2 (got {})",
                self.min_image_count
            )));
        }
        if self.max_textures == 0 {
            return Err(AppError::InvalidConfig(
                "max_textures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// A copy of [`RunnerConfig::io_config_flags`].
    pub fn config_flags(&self) -> ConfigFlags {
        ConfigFlags::from_bits_retain(self.io_config_flags.bits())
    }

    /// Whether windows get ImGui platform windows of their own.
    pub fn viewports_enabled(&self) -> bool {
        self.io_config_flags.contains(ConfigFlags::VIEWPORTS_ENABLE)
    }

    /// Title of the window with the given index.
    pub fn title_for(&self, index: usize) -> String {
        format!("{} #{}", self.window_title, index + 1)
    }

    /// Ini file of the window with the given index: `imgui.ini` becomes
    /// `imgui-1.ini`, `imgui-2.ini`, ... so windows never share settings.
    pub fn ini_filename_for(&self, index: usize) -> Option<PathBuf> {
        let path = self.ini_filename.as_ref()?;
        let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let mut name = format!("{stem}-{}", index + 1);
        if let Some(ext) = path.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        Some(path.with_file_name(name))
    }
}

fn parse_flag(key: &str, raw: &str) -> AppResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(AppError::InvalidConfig(format!(
            "{key}={raw:?} is not a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_demo() {
        let cfg = RunnerConfig::default();
        assert_eq!(cfg.window_count, 3);
        assert_eq!(cfg.min_image_count, 2);
        assert_eq!(cfg.present, PresentPolicy::Vsync);
        assert_eq!(cfg.clear_color, [0.45, 0.55, 0.60, 1.00]);
        assert!(cfg.io_config_flags.contains(ConfigFlags::DOCKING_ENABLE));
        assert!(cfg.io_config_flags.contains(ConfigFlags::VIEWPORTS_ENABLE));
        assert!(cfg.viewports_enabled());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn clones_keep_the_config_flags() {
        let cfg = RunnerConfig {
            io_config_flags: ConfigFlags::NAV_ENABLE_KEYBOARD,
            window_count: 7,
            ..Default::default()
        };
        let copy = cfg.clone();
        assert_eq!(copy.io_config_flags.bits(), cfg.io_config_flags.bits());
        assert_eq!(copy.window_count, 7);
        assert!(!copy.viewports_enabled());
        assert!(format!("{copy:?}").contains("window_count: 7"));
    }

    #[test]
    fn viewports_can_be_switched_off() {
        let cfg = RunnerConfig::default()
            .with_overrides(lookup(&[(ENV_VIEWPORTS, "off")]))
            .unwrap();
        assert!(!cfg.viewports_enabled());
        assert!(cfg.io_config_flags.contains(ConfigFlags::DOCKING_ENABLE));

        let cfg = cfg.with_overrides(lookup(&[(ENV_VIEWPORTS, "1")])).unwrap();
        assert!(cfg.viewports_enabled());
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = RunnerConfig::default()
            .with_overrides(lookup(&[
                (ENV_WINDOWS, " 5 "),
                (ENV_UNLIMITED_FPS, "yes"),
                (ENV_VALIDATION, "0"),
            ]))
            .unwrap();
        assert_eq!(cfg.window_count, 5);
        assert_eq!(cfg.present, PresentPolicy::Unlimited);
        assert!(!cfg.validation);
    }

    #[test]
    fn bad_overrides_are_rejected() {
        let err = RunnerConfig::default()
            .with_overrides(lookup(&[(ENV_WINDOWS, "three")]))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));

        let err = RunnerConfig::default()
            .with_overrides(lookup(&[(ENV_WINDOWS, "0")]))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));

        let err = RunnerConfig::default()
            .with_overrides(lookup(&[(ENV_VALIDATION, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));
    }

    #[test]
    fn min_image_count_below_two_is_invalid() {
        let cfg = RunnerConfig {
            min_image_count: 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn present_policy_always_ends_with_fifo() {
        for policy in [PresentPolicy::Vsync, PresentPolicy::Unlimited] {
            assert_eq!(
                policy.requested_modes().last(),
                Some(&vk::PresentModeKHR::FIFO)
            );
        }
    }

    #[test]
    fn ini_files_are_per_window() {
        let mut cfg = RunnerConfig::default();
        assert_eq!(cfg.ini_filename_for(0), None);

        cfg.ini_filename = Some(PathBuf::from("settings/imgui.ini"));
        assert_eq!(
            cfg.ini_filename_for(0),
            Some(PathBuf::from("settings/imgui-1.ini"))
        );
        assert_eq!(
            cfg.ini_filename_for(2),
            Some(PathBuf::from("settings/imgui-3.ini"))
        );

        cfg.ini_filename = Some(PathBuf::from("layout"));
        assert_eq!(cfg.ini_filename_for(1), Some(PathBuf::from("layout-2")));
    }

    #[test]
    fn titles_are_numbered_from_one() {
        let cfg = RunnerConfig::default();
        assert!(cfg.title_for(0).ends_with("#1"));
        assert!(cfg.title_for(2).ends_with("#3"));
    }
}
