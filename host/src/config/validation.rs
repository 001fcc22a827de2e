//! Setting value validation.

use std::net::IpAddr;
use std::sync::LazyLock;

use image_processor::DitherMode;
use regex::Regex;
use thermal_printer::VariantPreference;

static RE_MAC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:\-]){5}([0-9A-Fa-f]{2})$").unwrap()
});
static RE_UUID_NO_HYPHEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{32}$").unwrap());
static RE_UUID_HYPHEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}$")
        .unwrap()
});

/// Validate a setting value. Returns `Ok(())` if valid, or an error message.
pub fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    match key {
        "SERVER_PORT" => validate_int_range(value, 1, 65535)?,
        "BIND_ADDRESS" => {
            value
                .parse::<IpAddr>()
                .map_err(|_| "must be an IP address")?;
        }
        "PRINTER_VARIANT" => {
            value.parse::<VariantPreference>()?;
        }
        "PRINTER_ADDRESS" => {
            if !RE_MAC.is_match(value)
                && !RE_UUID_NO_HYPHEN.is_match(value)
                && !RE_UUID_HYPHEN.is_match(value)
            {
                return Err("invalid address format (expected MAC or UUID)".into());
            }
        }
        "SCAN_TIMEOUT_SECS" => validate_int_range(value, 1, 120)?,
        "DITHER_MODE" => {
            value.parse::<DitherMode>().map_err(|e| e.to_string())?;
        }
        "BLACK_POINT" => validate_int_range(value, 0, 255)?,
        "SHARPEN_SIGMA" => validate_float_range(value, 0.0, 10.0)?,
        "GAMMA" => validate_float_range(value, 0.1, 5.0)?,
        "PRINT_WIDTH" => validate_int_range(value, 8, 2048)?,
        // Valid ATT MTU range.
        "BLE_FALLBACK_MTU" => validate_int_range(value, 23, 517)?,
        "AUTO_ROTATE" | "ROTATE_PRINT" => {
            if value != "true" && value != "false" {
                return Err("must be 'true' or 'false'".into());
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_int_range(value: &str, min: i64, max: i64) -> Result<(), String> {
    let v: i64 = value.parse().map_err(|_| "must be an integer")?;
    if v < min || v > max {
        return Err(format!("must be between {min} and {max}"));
    }
    Ok(())
}

fn validate_float_range(value: &str, min: f32, max: f32) -> Result<(), String> {
    let v: f32 = value.parse().map_err(|_| "must be a number")?;
    if !(min..=max).contains(&v) {
        return Err(format!("must be between {min} and {max}"));
    }
    Ok(())
}
