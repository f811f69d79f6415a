use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use console::style;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::config::{AppConfig, default_config_path};
use crate::core::engine::WorkflowEngine;
use crate::core::lifecycle::LifecycleManager;
use crate::core::services::all_descriptors;
use crate::core::terminal::{self, GuideSection, print_error};
use crate::interfaces::web::{ApiServer, ApiServerConfig};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Start the workflow engine and its HTTP API")
        .command("services", "List supported services and their actions")
        .command("config-path", "Print the default config file location")
        .command("help", "Show this help")
        .print();

    GuideSection::new("Serve options")
        .command("--config <path>", "Config file (default: platform config dir)")
        .command("--api-host <host>", "Bind address, overrides config and env")
        .command("--api-port <port>", "Bind port, overrides config and env")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("devcascade").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServeFlags {
    pub config: Option<PathBuf>,
    pub api_host: Option<String>,
    pub api_port: Option<u16>,
}

pub(crate) fn parse_serve_flags(args: &[String], start: usize) -> Result<ServeFlags> {
    let mut flags = ServeFlags::default();
    let mut i = start;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config" | "-c", Some(v)) => {
                flags.config = Some(PathBuf::from(v));
                i += 2;
            }
            ("--api-host", Some(v)) => {
                flags.api_host = Some(v.clone());
                i += 2;
            }
            ("--api-port", Some(v)) => {
                let port = v
                    .parse()
                    .map_err(|_| anyhow!("--api-port expects a port number, got '{}'", v))?;
                flags.api_port = Some(port);
                i += 2;
            }
            ("--config" | "-c" | "--api-host" | "--api-port", None) => {
                return Err(anyhow!("{} needs a value", args[i]));
            }
            (other, _) => {
                return Err(anyhow!(
                    "unknown option '{}' for serve (see 'devcascade help')",
                    other
                ));
            }
        }
    }
    Ok(flags)
}

async fn serve(flags: ServeFlags) -> Result<()> {
    let log_tx = crate::logging::init();

    let mut config = AppConfig::load(flags.config.as_deref()).await?;
    if let Some(host) = flags.api_host {
        config.api.host = host;
    }
    if let Some(port) = flags.api_port {
        config.api.port = port;
    }

    let engine = Arc::new(WorkflowEngine::from_config(&config)?);
    let extractor = engine.extractor_name();

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
        engine,
        log_tx,
        api_host: config.api.host.clone(),
        api_port: config.api.port,
        api_token: config.api.api_token.clone(),
    }))));
    lifecycle.start().await?;

    terminal::print_banner();
    terminal::print_link(
        "API",
        &format!("http://{}:{}/api", config.api.host, config.api.port),
    );
    terminal::print_status("Intent extractor", extractor);
    terminal::print_status(
        "Auth",
        if config.api.api_token.is_some() {
            "bearer token"
        } else {
            "open (loopback only)"
        },
    );
    println!(
        "\n  Press {} to stop.\n",
        style("Ctrl+C").bold().yellow()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    lifecycle.shutdown().await?;
    terminal::print_goodbye();
    Ok(())
}

fn print_services() {
    for desc in all_descriptors() {
        let mut section = GuideSection::new(&format!(
            "{} ({})",
            desc.display_name, desc.service_type
        ));
        for action in desc.actions {
            let optional: Vec<String> = action.optional.iter().map(|p| format!("{}?", p)).collect();
            let params = action
                .required
                .iter()
                .map(|p| p.to_string())
                .chain(optional)
                .collect::<Vec<_>>()
                .join(", ");
            section = section.command(action.name, &format!("({})", params));
        }
        section.print();
    }
    println!();
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");

    match cmd {
        "serve" => serve(parse_serve_flags(&args, 2)?).await,
        "services" => {
            print_services();
            Ok(())
        }
        "config-path" => {
            match default_config_path() {
                Some(path) => println!("{}", path.display()),
                None => print_error("No platform config directory available."),
            }
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{}'", other));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn serve_flags_default_to_none() {
        let flags = parse_serve_flags(&args(&["devcascade", "serve"]), 2).unwrap();
        assert_eq!(flags, ServeFlags::default());
    }

    #[test]
    fn serve_flags_are_parsed_in_any_order() {
        let flags = parse_serve_flags(
            &args(&[
                "devcascade",
                "serve",
                "--api-port",
                "9000",
                "--config",
                "/tmp/dc.toml",
                "--api-host",
                "0.0.0.0",
            ]),
            2,
        )
        .unwrap();
        assert_eq!(flags.api_port, Some(9000));
        assert_eq!(flags.api_host.as_deref(), Some("0.0.0.0"));
        assert_eq!(flags.config, Some(PathBuf::from("/tmp/dc.toml")));
    }

    #[test]
    fn bad_or_missing_values_are_errors() {
        assert!(parse_serve_flags(&args(&["devcascade", "serve", "--api-port", "x"]), 2).is_err());
        assert!(parse_serve_flags(&args(&["devcascade", "serve", "--config"]), 2).is_err());
    }

    #[test]
    fn unknown_options_are_rejected() {
        let err = parse_serve_flags(&args(&["devcascade", "serve", "--api-prot", "9000"]), 2)
            .unwrap_err();
        assert!(err.to_string().contains("--api-prot"));
        assert!(parse_serve_flags(&args(&["devcascade", "serve", "extra"]), 2).is_err());
    }
}
