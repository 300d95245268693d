// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod error;
pub mod settings;
pub mod types;

pub use error::{BusyResource, Host1xError, Host1xResult, IdKind, RegistrationError};
pub use types::*;
