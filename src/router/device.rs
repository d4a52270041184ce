// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User-agent based device classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// User-agent substrings that mark a mobile client. Case-sensitive.
pub const MOBILE_MARKERS: [&str; 6] = [
    "Android",
    "iPhone",
    "SymbianOS",
    "Windows Phone",
    "iPad",
    "iPod",
];

/// Coarse device category; only used to pick an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Desktop => write!(f, "desktop"),
            DeviceClass::Mobile => write!(f, "mobile"),
        }
    }
}

/// Mobile if any marker occurs in `user_agent`; missing or unknown agents are desktop.
pub fn classify(user_agent: Option<&str>) -> DeviceClass {
    match user_agent {
        Some(ua) if MOBILE_MARKERS.iter().any(|marker| ua.contains(marker)) => {
            DeviceClass::Mobile
        }
        _ => DeviceClass::Desktop,
    }
}
