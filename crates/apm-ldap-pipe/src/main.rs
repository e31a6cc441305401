// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::ffi::OsString;
use std::process::ExitCode;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use apm_ldap::{ApmLdapFilter, FilterResult, LogFilter};

const ENV_PREFIX: &str = "APM_LDAP_";
const LOG_LEVEL_VAR: &str = "APM_LDAP_LOG_LEVEL";

/// Keeps the variables whose name and value are valid UTF-8; `env::vars` would panic on the rest.
fn utf8_vars<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                let key = key.unwrap_or_else(|key| key.to_string_lossy().into_owned());
                if key.starts_with(ENV_PREFIX) {
                    warn!("Ignoring environment variable {key}: not valid UTF-8");
                }
                None
            }
        })
}

/// Maps `APM_LDAP_<NAME>` variables onto filter properties named `<name>`.
fn properties_from_env<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter(|(key, _)| key != LOG_LEVEL_VAR)
        .filter_map(|(key, value)| {
            key.strip_prefix(ENV_PREFIX)
                .filter(|name| !name.is_empty())
                .map(|name| (name.to_ascii_lowercase(), value))
        })
        .collect()
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var(LOG_LEVEL_VAR)
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = match EnvFilter::try_new(format!("apm_ldap={log_level},{log_level}")) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    let properties = properties_from_env(utf8_vars(env::vars_os()));
    let filter = match ApmLdapFilter::from_properties(properties).await {
        Ok(filter) => filter,
        Err(e) => {
            error!("Error creating filter: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut batch = Vec::new();
    if let Err(e) = tokio::io::stdin().read_to_end(&mut batch).await {
        error!("Unable to read batch from stdin: {e}");
        filter.close().await;
        return ExitCode::FAILURE;
    }

    let output = match filter.apply(&batch).await {
        FilterResult::Modified(output) => output,
        FilterResult::NoTouch => batch,
    };

    let mut stdout = tokio::io::stdout();
    let written = match stdout.write_all(&output).await {
        Ok(()) => stdout.flush().await,
        Err(e) => Err(e),
    };

    info!("Batch processed: {:?}", filter.stats());
    filter.close().await;

    match written {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Unable to write batch to stdout: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_properties_from_env() {
        let properties = properties_from_env(vars(&[
            ("APM_LDAP_LOOKUP_KEY", "ldapPath"),
            ("APM_LDAP_PORT", "5140"),
            ("APM_LDAP_LOG_LEVEL", "debug"),
            ("HOME", "/root"),
            ("APM_LDAP_", "ignored"),
        ]));

        assert_eq!(
            properties,
            vars(&[("lookup_key", "ldapPath"), ("port", "5140")])
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_variables_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let invalid = || OsString::from_vec(vec![0x66, 0x6f, 0xff]);
        let os_vars = vec![
            (OsString::from("APM_LDAP_LOOKUP_KEY"), OsString::from("ldapPath")),
            (OsString::from("APM_LDAP_PORT"), OsString::from("5140")),
            (OsString::from("APM_LDAP_RETRIES"), invalid()),
            (invalid(), OsString::from("value")),
        ];

        let properties = properties_from_env(utf8_vars(os_vars));
        assert_eq!(
            properties,
            vars(&[("lookup_key", "ldapPath"), ("port", "5140")])
        );
    }

    #[test]
    fn test_properties_feed_filter_config() {
        let properties = properties_from_env(vars(&[
            ("APM_LDAP_LOOKUP_KEY", "ldapPath"),
            ("APM_LDAP_PORT", "5140"),
            ("APM_LDAP_RETRIES", "1"),
        ]));

        let config = apm_ldap::FilterConfig::from_properties(properties).unwrap();
        assert_eq!(config.port, 5140);
        assert_eq!(config.retries, 1);
    }
}
