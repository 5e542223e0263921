// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;

use serde::Deserialize;

use crate::error::Fallible;
use crate::remote::auth::Persistence;

pub const CONFIG_FILE: &str = "flashy.toml";
pub const DATABASE_FILE: &str = "flashy.db";

/// Server settings, read from `flashy.toml` in the data directory.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub open_browser: bool,
    pub persistence: Persistence,
    /// Initial theme.
    pub dark_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            open_browser: true,
            persistence: Persistence::Local,
            dark_mode: false,
        }
    }
}

/// Command-line flags that take precedence over the file.
#[derive(Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub no_open: bool,
}

impl Config {
    pub fn parse(text: &str) -> Fallible<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load the config from `directory`, or the defaults if there is no file.
    pub fn load(directory: &Path) -> Fallible<Self> {
        let path = directory.join(CONFIG_FILE);
        if !path.exists() {
            log::debug!("No {CONFIG_FILE}, using defaults.");
            return Ok(Self::default());
        }
        log::debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(&path)?;
        Self::parse(&text)
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if overrides.no_open {
            self.open_browser = false;
        }
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
