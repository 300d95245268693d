// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;

use crate::types::DEFAULT_PUSH_BUFFER_WORDS;

/// Engine settings, populated from the config INI.
#[derive(Debug, Clone)]
pub struct HostSettings {
    // Host1x
    pub push_buffer_words: usize,
    pub wait_timeout_ms: u64,
    pub submit_timeout_ms: u64,
    pub irq_thread: bool,

    // Debug
    pub dump_on_timeout: bool,
    pub dump_on_exit: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            push_buffer_words: DEFAULT_PUSH_BUFFER_WORDS,
            wait_timeout_ms: 2000,
            submit_timeout_ms: 10_000,
            irq_thread: true,
            dump_on_timeout: true,
            dump_on_exit: false,
        }
    }
}

impl HostSettings {
    /// Default timeout used by syncpoint waits that do not pass one.
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Timeout for blocking `begin` on serialized modules.
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    /// Round the configured push buffer size up to a power of two, minimum 16 words.
    pub fn push_buffer_words(&self) -> usize {
        self.push_buffer_words.max(16).next_power_of_two()
    }
}

/// Parse a boolean setting written as `1`/`0` or `true`/`false`.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_buffer_rounding() {
        let mut s = HostSettings::default();
        assert_eq!(s.push_buffer_words(), 1024);
        s.push_buffer_words = 1000;
        assert_eq!(s.push_buffer_words(), 1024);
        s.push_buffer_words = 3;
        assert_eq!(s.push_buffer_words(), 16);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool(" true "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
