// Copyright 2026 BadCompany
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

//! Tracing setup for embedders. The library itself only emits events; an
//! embedding binary calls [`init_tracing`] once at startup.

use anyhow::Result;

use crate::core::constants::config;

/// Initialize the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` if set, then from the
/// `SANDBRIDGE_LOG_LEVEL` environment variable. `SANDBRIDGE_LOG_FORMAT=json`
/// switches to line-delimited JSON output. Logs go to stderr so relayed
/// protocol traffic on stdout stays clean.
pub fn init_tracing() -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let configured = std::env::var(config::ENV_LOG_LEVEL).ok();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.as_deref().unwrap_or_default()))
        .unwrap_or_else(|_| EnvFilter::new("sandbridge=info,warn"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    if std::env::var(config::ENV_LOG_FORMAT).as_deref() == Ok("json") {
        subscriber.json().try_init().map_err(|e| anyhow::anyhow!(e))?;
    } else {
        subscriber.try_init().map_err(|e| anyhow::anyhow!(e))?;
    }

    Ok(())
}
