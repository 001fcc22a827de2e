//! Host configuration loaded from environment variables (and `.env`).

pub mod validation;

use std::str::FromStr;
use std::time::Duration;

use image_processor::{DitherMode, DitherParams, PreprocessOptions};
use print_bridge::ImagePipeline;
use thermal_printer::{SessionConfig, VariantPreference};

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub server_port: u16,
    pub bind_address: String,
    pub printer_variant: VariantPreference,
    /// Printer to connect to at startup.
    pub printer_address: Option<String>,
    pub scan_timeout_secs: u64,
    pub dither_mode: DitherMode,
    /// Luminance cutoff, values below are black.
    pub black_point: u8,
    /// Unsharp-mask sigma; 0 disables sharpening.
    pub sharpen_sigma: f32,
    pub gamma: f32,
    pub auto_rotate: bool,
    pub rotate_print: bool,
    pub print_width: u16,
    pub ble_fallback_mtu: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            server_port: 8080,
            bind_address: "127.0.0.1".into(),
            printer_variant: VariantPreference::Auto,
            printer_address: None,
            scan_timeout_secs: 10,
            dither_mode: DitherMode::FloydSteinberg,
            black_point: 128,
            sharpen_sigma: 0.0,
            gamma: 1.0,
            auto_rotate: false,
            rotate_print: false,
            print_width: thermal_printer::DEFAULT_PRINT_WIDTH,
            ble_fallback_mtu: thermal_printer::session::FALLBACK_MTU,
        }
    }
}

impl HostConfig {
    /// Load from the process environment.
    pub fn load() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Invalid values are logged and
    /// replaced by their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> Option<String> {
            let value = lookup(key)?.trim().to_string();
            if value.is_empty() {
                return None;
            }
            match validation::validate_setting(key, &value) {
                Ok(()) => Some(value),
                Err(e) => {
                    tracing::warn!("Ignoring invalid {key}={value:?}: {e}");
                    None
                }
            }
        };

        let d = Self::default();
        Self {
            server_port: parse_or(get("SERVER_PORT"), d.server_port),
            bind_address: get("BIND_ADDRESS").unwrap_or(d.bind_address),
            printer_variant: parse_or(get("PRINTER_VARIANT"), d.printer_variant),
            printer_address: get("PRINTER_ADDRESS"),
            scan_timeout_secs: parse_or(get("SCAN_TIMEOUT_SECS"), d.scan_timeout_secs),
            dither_mode: parse_or(get("DITHER_MODE"), d.dither_mode),
            black_point: parse_or(get("BLACK_POINT"), d.black_point),
            sharpen_sigma: parse_or(get("SHARPEN_SIGMA"), d.sharpen_sigma),
            gamma: parse_or(get("GAMMA"), d.gamma),
            auto_rotate: get("AUTO_ROTATE").map_or(d.auto_rotate, |v| v == "true"),
            rotate_print: get("ROTATE_PRINT").map_or(d.rotate_print, |v| v == "true"),
            print_width: parse_or(get("PRINT_WIDTH"), d.print_width),
            ble_fallback_mtu: parse_or(get("BLE_FALLBACK_MTU"), d.ble_fallback_mtu),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.server_port)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            scan_window: Duration::from_secs(self.scan_timeout_secs),
            default_width: self.print_width,
            fallback_mtu: self.ble_fallback_mtu,
        }
    }

    pub fn image_pipeline(&self) -> ImagePipeline {
        let mut preprocess = PreprocessOptions::new(u32::from(self.print_width))
            .with_gamma(self.gamma)
            .with_auto_rotate(self.auto_rotate)
            .with_rotate_180(self.rotate_print);
        if self.sharpen_sigma > 0.0 {
            preprocess = preprocess.with_sharpen(self.sharpen_sigma, 0);
        }
        ImagePipeline {
            preprocess,
            mode: self.dither_mode,
            params: DitherParams {
                threshold: self.black_point,
            },
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}
