//! Command implementations for the `cadence` binary

use std::path::Path;

use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use cadence_client::config::{apply_env_overrides, default_config_path, load_settings};
use cadence_client::{Connection, ConnectionState, Settings};
use cadence_core::Error;
use cadence_transport::WebSocketConnector;

use crate::output::CliEvent;

/// Overrides given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides<'a> {
    pub config: Option<&'a Path>,
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Resolve settings: config file, then `CADENCE_URL`, then CLI flags.
pub fn resolve_settings(overrides: &Overrides<'_>) -> Result<Settings> {
    let mut settings = match overrides.config.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => load_settings(&path),
        None => {
            warn!("No config directory on this platform, using defaults");
            Settings::default()
        }
    };

    apply_env_overrides(&mut settings);
    if let Some(url) = &overrides.url {
        settings.connection.url = Some(url.clone());
    }
    if let Some(timeout_ms) = overrides.timeout_ms {
        settings.invoke.timeout_ms = timeout_ms;
    }

    settings.validate()?;
    Ok(settings)
}

/// Parse a positional call argument: JSON if it parses, a plain string otherwise.
pub fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn backend_url(settings: &Settings) -> Result<&str> {
    settings.connection.url.as_deref().ok_or_else(|| {
        eyre!("no backend URL: pass --url, set CADENCE_URL, or add connection.url to config.toml")
    })
}

/// Open a connection and wait until it is ready, bounded by the invoke timeout.
async fn open(settings: &Settings) -> Result<Connection> {
    let url = backend_url(settings)?;

    let connector = WebSocketConnector::new(url)?;
    let connection = Connection::new(settings);
    connection.connect(connector)?;

    let deadline = settings.invoke.timeout();
    match tokio::time::timeout(deadline, connection.wait_ready()).await {
        Ok(Ok(())) => Ok(connection),
        Ok(Err(e)) => Err(e).wrap_err_with(|| format!("could not connect to {url}")),
        Err(_) => {
            let state = connection.state();
            connection.disconnect().await;
            bail!("{url} not ready after {}ms (state: {state})", deadline.as_millis())
        }
    }
}

/// `cadence invoke <method> [args..]`
pub async fn invoke(settings: &Settings, method: &str, raw_args: &[String]) -> Result<()> {
    let args: Vec<Value> = raw_args.iter().map(|raw| parse_arg(raw)).collect();
    let connection = open(settings).await?;

    let outcome = connection.invoker().invoke(method, args).await;
    connection.disconnect().await;

    match outcome {
        Ok(result) => {
            CliEvent::result(method, result).emit();
            Ok(())
        }
        Err(Error::Remote(payload)) => bail!("{method} failed on the server: {payload}"),
        Err(e) if e.is_recoverable() => {
            Err(e).wrap_err_with(|| format!("{method} did not complete; try again"))
        }
        Err(e) => Err(e.into()),
    }
}

/// `cadence listen <channel>..` - print pushes until Ctrl-C.
pub async fn listen(settings: &Settings, channels: &[String]) -> Result<()> {
    let url = backend_url(settings)?;

    let connection = Connection::new(settings);
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Value)>();

    // Subscribe before connecting so the first handshake registers them.
    for channel in channels {
        let mut stream = connection.channels().stream(channel);
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(payload) = stream.recv().await {
                if tx.send((stream.channel().to_string(), payload)).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut states = connection.state_changes();
    connection.connect(WebSocketConnector::new(url)?)?;
    info!("Listening on {:?}", channels);

    loop {
        tokio::select! {
            Some((channel, payload)) = rx.recv() => CliEvent::push(channel, payload).emit(),
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                CliEvent::state(&state).emit();
                if state == ConnectionState::Disconnected {
                    bail!("gave up reconnecting to {url}");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    connection.disconnect().await;
    Ok(())
}

/// `cadence status` - connect, print the handshake, disconnect.
pub async fn status(settings: &Settings) -> Result<()> {
    let connection = open(settings).await?;
    let session = connection.session();

    CliEvent::Status {
        state: connection.state().to_string(),
        token: session.as_ref().map(|s| s.token.clone()),
        settings: Value::Object(connection.settings()),
        established_at: session.as_ref().map(|s| s.established_at.to_rfc3339()),
        timestamp: CliEvent::now(),
    }
    .emit();

    connection.disconnect().await;
    Ok(())
}

/// `cadence init` - write a default config file.
pub fn init(config: Option<&Path>) -> Result<()> {
    let path = config
        .map(Path::to_path_buf)
        .or_else(default_config_path)
        .ok_or_else(|| eyre!("no config directory on this platform; pass --config"))?;
    cadence_client::config::init_config_file(&path)?;
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arg_json_and_plain_strings() {
        assert_eq!(parse_arg("42"), json!(42));
        assert_eq!(parse_arg(r#"{"id":3}"#), json!({ "id": 3 }));
        assert_eq!(parse_arg("\"quoted\""), json!("quoted"));
        assert_eq!(parse_arg("miles davis"), json!("miles davis"));
        assert_eq!(parse_arg("null"), Value::Null);
    }

    #[test]
    fn test_cli_flags_override_config_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "[connection]\nurl = \"ws://file:1/ws\"\n[invoke]\ntimeout_ms = 1000\n",
        )
        .unwrap();

        let settings = resolve_settings(&Overrides {
            config: Some(&path),
            url: Some("ws://flag:2/ws".to_string()),
            timeout_ms: Some(250),
        })
        .unwrap();

        assert_eq!(settings.connection.url.as_deref(), Some("ws://flag:2/ws"));
        assert_eq!(settings.invoke.timeout_ms, 250);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let err = resolve_settings(&Overrides {
            config: Some(&temp.path().join("missing.toml")),
            url: Some("http://not-a-socket".to_string()),
            timeout_ms: None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("ws://"));
    }
}
