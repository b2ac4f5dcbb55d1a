//! GNOME proxy settings through the `gsettings` tool.

use std::ffi::OsStr;
use std::io;
use std::process::Command;

use crate::registrar::{InterceptorModes, ProxySettings, Registrar, RegistrarError};

const PROGRAM: &str = "gsettings";
const SCHEMA: &str = "org.gnome.system.proxy";
const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.0/8", "::1"];

/// Drives `org.gnome.system.proxy` for the current user session.
#[derive(Debug, Default, Clone, Copy)]
pub struct GsettingsRegistrar;

impl GsettingsRegistrar {
    /// `gsettings` invocations that install `settings`, in order.
    pub fn set_commands(settings: &ProxySettings) -> Vec<Vec<String>> {
        let host = quote(&settings.address.ip().to_string());
        let port = settings.address.port().to_string();
        let mut commands = Vec::new();

        for (mode, scheme) in [(InterceptorModes::HTTP, "http"), (InterceptorModes::HTTPS, "https")] {
            let schema = format!("{SCHEMA}.{scheme}");
            if settings.modes.contains(mode) {
                commands.push(args(["set", schema.as_str(), "host", host.as_str()]));
                commands.push(args(["set", schema.as_str(), "port", port.as_str()]));
            } else {
                commands.push(args(["reset", schema.as_str(), "host"]));
                commands.push(args(["reset", schema.as_str(), "port"]));
            }
        }

        let mut ignored: Vec<&str> = Vec::new();
        if settings.bypass_local {
            ignored.extend(LOCAL_HOSTS);
        }
        for entry in &settings.overrides {
            if !ignored.contains(&entry.as_str()) {
                ignored.push(entry.as_str());
            }
        }
        let list = format!(
            "[{}]",
            ignored.iter().map(|host| quote(host)).collect::<Vec<_>>().join(", ")
        );
        commands.push(args(["set", SCHEMA, "ignore-hosts", list.as_str()]));
        commands.push(args(["set", SCHEMA, "mode", "'manual'"]));
        commands
    }

    /// `gsettings` invocations that restore direct connections.
    pub fn clear_commands() -> Vec<Vec<String>> {
        let http = format!("{SCHEMA}.http");
        let https = format!("{SCHEMA}.https");
        vec![
            args(["set", SCHEMA, "mode", "'none'"]),
            args(["reset", http.as_str(), "host"]),
            args(["reset", http.as_str(), "port"]),
            args(["reset", https.as_str(), "host"]),
            args(["reset", https.as_str(), "port"]),
            args(["reset", SCHEMA, "ignore-hosts"]),
        ]
    }

    fn run_all(commands: Vec<Vec<String>>) -> Result<(), RegistrarError> {
        for command in commands {
            run_command(&command)?;
        }
        Ok(())
    }
}

impl Registrar for GsettingsRegistrar {
    fn set_proxy(&self, settings: &ProxySettings) -> Result<(), RegistrarError> {
        Self::run_all(Self::set_commands(settings))?;
        tracing::info!(address = %settings.address, modes = %settings.modes, "System proxy set (gsettings)");
        Ok(())
    }

    fn clear_proxy(&self) -> Result<(), RegistrarError> {
        Self::run_all(Self::clear_commands())?;
        tracing::info!("System proxy cleared (gsettings)");
        Ok(())
    }
}

fn run_command<S: AsRef<OsStr>>(args: &[S]) -> Result<(), RegistrarError> {
    let output = Command::new(PROGRAM).args(args).output().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            RegistrarError::CommandNotFound(PROGRAM.to_string())
        } else {
            RegistrarError::Io(e)
        }
    })?;

    if output.status.success() {
        Ok(())
    } else {
        let rendered: Vec<_> = args.iter().map(|arg| arg.as_ref().to_string_lossy()).collect();
        Err(RegistrarError::CommandFailed {
            command: format!("{PROGRAM} {}", rendered.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

/// Render a GVariant string literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
