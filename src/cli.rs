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

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::serve::server::start_server;
use crate::config::Config;
use crate::config::Overrides;
use crate::error::Fallible;
use crate::error::fail;

#[derive(Parser, Debug, PartialEq)]
#[command(version, about, long_about = None)]
enum Command {
    /// Serve the study app over HTTP.
    Serve {
        /// Path to the data directory. Defaults to the current directory.
        directory: Option<String>,
        /// Address to bind to.
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,
        /// Don't open a browser once the server is up.
        #[arg(long)]
        no_open: bool,
    },
}

pub async fn entrypoint() -> Fallible<()> {
    let cli: Command = Command::parse();
    match cli {
        Command::Serve {
            directory,
            host,
            port,
            no_open,
        } => {
            let directory: PathBuf = match directory {
                Some(dir) => PathBuf::from(dir),
                None => std::env::current_dir()?,
            };
            if !directory.exists() {
                return fail("directory does not exist.");
            }
            let config = Config::load(&directory)?.apply(Overrides {
                host,
                port,
                no_open,
            });
            start_server(directory, config).await
        }
    }
}
