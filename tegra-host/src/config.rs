// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use host1x_common::settings::{parse_bool, HostSettings};
use ini::Ini;
use log::{debug, info, warn};
use std::path::PathBuf;

/// Locate host1x.ini in the user's config directories.
pub fn find_config_path() -> Option<PathBuf> {
    // $XDG_CONFIG_HOME/tegra-host/host1x.ini
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(&xdg).join("tegra-host").join("host1x.ini");
        if path.exists() {
            return Some(path);
        }
    }

    // ~/.config/tegra-host/host1x.ini
    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(&home)
            .join(".config")
            .join("tegra-host")
            .join("host1x.ini");
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Load engine settings, falling back to defaults when no usable file exists.
pub fn load_config(path: Option<&PathBuf>) -> HostSettings {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                warn!("Config file not found: {}", p.display());
                return HostSettings::default();
            }
            p.clone()
        }
        None => match find_config_path() {
            Some(p) => p,
            None => {
                info!("No host1x.ini found, using defaults");
                return HostSettings::default();
            }
        },
    };

    info!("Loading config from: {}", config_path.display());

    match Ini::load_from_file(&config_path) {
        Ok(conf) => settings_from_ini(&conf),
        Err(e) => {
            warn!("Failed to parse config: {}", e);
            HostSettings::default()
        }
    }
}

fn read_bool(value: &str, key: &str, current: bool) -> bool {
    parse_bool(value).unwrap_or_else(|| {
        warn!("Ignoring {} = {:?}: not a boolean", key, value);
        current
    })
}

fn read_number<T: std::str::FromStr + Copy>(value: &str, key: &str, current: T) -> T {
    value.trim().parse().unwrap_or_else(|_| {
        warn!("Ignoring {} = {:?}: not a number", key, value);
        current
    })
}

/// Apply the `[Host1x]` and `[Debug]` sections over the defaults.
pub fn settings_from_ini(conf: &Ini) -> HostSettings {
    let mut settings = HostSettings::default();

    // [Host1x]
    if let Some(section) = conf.section(Some("Host1x")) {
        if let Some(words) = section.get("push_buffer_words") {
            settings.push_buffer_words =
                read_number(words, "push_buffer_words", settings.push_buffer_words);
            debug!("Push buffer: {} words", settings.push_buffer_words());
        }
        if let Some(ms) = section.get("wait_timeout_ms") {
            settings.wait_timeout_ms = read_number(ms, "wait_timeout_ms", settings.wait_timeout_ms);
        }
        if let Some(ms) = section.get("submit_timeout_ms") {
            settings.submit_timeout_ms =
                read_number(ms, "submit_timeout_ms", settings.submit_timeout_ms);
        }
        if let Some(irq) = section.get("irq_thread") {
            settings.irq_thread = read_bool(irq, "irq_thread", settings.irq_thread);
        }
    }

    // [Debug]
    if let Some(section) = conf.section(Some("Debug")) {
        if let Some(dump) = section.get("dump_on_timeout") {
            settings.dump_on_timeout = read_bool(dump, "dump_on_timeout", settings.dump_on_timeout);
        }
        if let Some(dump) = section.get("dump_on_exit") {
            settings.dump_on_exit = read_bool(dump, "dump_on_exit", settings.dump_on_exit);
        }
    }

    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_override_defaults() {
        let conf = Ini::load_from_str(
            "[Host1x]\n\
             push_buffer_words = 300\n\
             wait_timeout_ms = 250\n\
             irq_thread = false\n\
             [Debug]\n\
             dump_on_exit = 1\n",
        )
        .unwrap();
        let s = settings_from_ini(&conf);
        assert_eq!(s.push_buffer_words, 300);
        assert_eq!(s.push_buffer_words(), 512);
        assert_eq!(s.wait_timeout_ms, 250);
        assert!(!s.irq_thread);
        assert!(s.dump_on_exit);
        assert_eq!(s.submit_timeout_ms, HostSettings::default().submit_timeout_ms);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let conf = Ini::load_from_str("[Host1x]\nwait_timeout_ms = soon\nirq_thread = maybe\n").unwrap();
        let s = settings_from_ini(&conf);
        let d = HostSettings::default();
        assert_eq!(s.wait_timeout_ms, d.wait_timeout_ms);
        assert_eq!(s.irq_thread, d.irq_thread);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let s = load_config(Some(&PathBuf::from("/nonexistent/host1x.ini")));
        assert_eq!(s.wait_timeout_ms, HostSettings::default().wait_timeout_ms);
    }
}
