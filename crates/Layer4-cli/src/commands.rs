//! Subcommand implementations

use crate::app::App;
use anyhow::{bail, Context, Result};
use berth_core::{DeployConfig, DeploymentUpdate, RequestResolver};
use berth_foundation::{Deployment, DeploymentKey, SecurityContext};
use berth_task::{InboundRequest, TaskId};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

/// Run the supervisor and the mailbox sweeper until Ctrl-C
pub async fn serve(app: &App) -> Result<()> {
    let supervisor = app.supervisor();
    let started = supervisor.start_all(&app.registry).await;

    app.open_all_mailboxes().await?;
    let sweeper = app.sweeper();
    sweeper.start().await;

    info!(
        home = %app.paths.home().display(),
        agents = started,
        "Berth serving, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    sweeper.stop().await;
    supervisor.stop_all().await;
    Ok(())
}

pub async fn deploy(app: &App, domain: &str, path: &str, mut config: DeployConfig) -> Result<()> {
    if config.image.is_none() {
        config.image = Some(app.settings.default_image.clone());
    }
    let deployment = app.registry.deploy_agent(domain, path, config).await?;
    print_json(&deployment)
}

pub async fn update(app: &App, domain: &str, path: &str, updates: DeploymentUpdate) -> Result<()> {
    let deployment = app.registry.update_deployment(domain, path, updates).await?;
    print_json(&deployment)
}

pub async fn remove(app: &App, domain: &str, path: &str) -> Result<()> {
    let deployment = app.registry.remove_deployment(domain, path).await?;
    println!("Removed {}", deployment.key());
    Ok(())
}

pub async fn sync(app: &App, domain: &str, path: &str) -> Result<()> {
    let deployment = app.registry.sync_deployment(domain, path).await?;
    print_json(&deployment)
}

pub async fn list(app: &App) -> Result<()> {
    let deployments = app.registry.list().await;
    if deployments.is_empty() {
        println!("No deployments.");
        return Ok(());
    }

    println!("{:<40} {:<16} {:<24} {:<8}", "ROUTE", "AGENT", "IMAGE", "ENABLED");
    println!("{}", "-".repeat(90));
    for deployment in deployments {
        println!(
            "{:<40} {:<16} {:<24} {:<8}",
            deployment.key().route(),
            deployment.agent,
            deployment.image,
            deployment.enabled
        );
    }
    Ok(())
}

pub async fn resolve(app: &App, host: &str, path: &str) -> Result<()> {
    match resolve_deployment(app, host, path).await {
        Some(deployment) => print_json(&deployment),
        None => bail!("No deployment serves {}{}", host, path),
    }
}

/// Options for `berth exec`
pub struct ExecOptions {
    pub method: String,
    pub command: Option<String>,
    pub params: Vec<String>,
    pub caller: Option<String>,
    pub timeout: Option<Duration>,
}

/// Dispatch one task and print the response
pub async fn exec(app: &App, host: &str, path: &str, options: ExecOptions) -> Result<()> {
    let Some(deployment) = resolve_deployment(app, host, path).await else {
        bail!("No deployment serves {}{}", host, path);
    };

    let mut request = InboundRequest::new(options.method, path);
    if let Some(body) = exec_body(options.command, options.params) {
        request = request
            .with_header("content-type", "application/json")
            .with_body(body.to_string());
    }
    let security = match options.caller {
        Some(caller) => SecurityContext::authenticated(caller),
        None => SecurityContext::anonymous(),
    };

    let response = app
        .orchestrator()
        .handle(&deployment, &request, &security, options.timeout)
        .await;
    print_json(&response)?;

    if !response.success {
        bail!(
            "Task failed ({})",
            response.error_code().unwrap_or("UNKNOWN")
        );
    }
    Ok(())
}

pub async fn cancel(app: &App, host: &str, path: &str, task_id: &str) -> Result<()> {
    let key = DeploymentKey::new(host, path);
    if app.registry.get(&key).await.is_none() {
        bail!("No deployment at {}", key);
    }
    let id = TaskId::parse(task_id)?;
    app.orchestrator().cancel_task(&key, &id).await?;
    println!("Cancelled {}", id);
    Ok(())
}

/// Sweep stale mailbox artifacts once
pub async fn gc(app: &App, max_age: Option<Duration>) -> Result<()> {
    app.open_all_mailboxes().await?;
    let report = match max_age {
        Some(max_age) => {
            berth_task::MailboxSweeper::new(app.mailboxes.clone(), max_age, max_age)
                .sweep_all()
                .await
        }
        None => app.sweeper().sweep_all().await,
    };
    println!(
        "Removed {} artifacts ({} responses, {} errors, {} markers, {} locks)",
        report.total(),
        report.responses,
        report.errors,
        report.markers,
        report.locks
    );
    Ok(())
}

async fn resolve_deployment(app: &App, host: &str, path: &str) -> Option<Deployment> {
    RequestResolver::new(app.registry.clone())
        .resolve(host, path)
        .await
}

/// JSON body for `exec`; `None` when neither a command nor params were given
fn exec_body(command: Option<String>, params: Vec<String>) -> Option<Value> {
    if command.is_none() && params.is_empty() {
        return None;
    }
    let mut body = serde_json::Map::new();
    if let Some(command) = command {
        body.insert("command".to_string(), Value::String(command));
    }
    let params: Vec<Value> = params.into_iter().map(parse_param).collect();
    body.insert("params".to_string(), Value::Array(params));
    Some(Value::Object(body))
}

/// JSON literals pass through, anything else is a string
fn parse_param(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

/// `KEY=VALUE` pairs into an environment map
pub fn environment(pairs: Vec<(String, String)>) -> BTreeMap<String, String> {
    pairs.into_iter().collect()
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exec_body() {
        assert_eq!(exec_body(None, vec![]), None);
        assert_eq!(
            exec_body(
                Some("echo".into()),
                vec!["hello".into(), "42".into(), "{\"a\":1}".into()]
            ),
            Some(json!({ "command": "echo", "params": ["hello", 42, { "a": 1 }] }))
        );
        assert_eq!(
            exec_body(None, vec!["x".into()]),
            Some(json!({ "params": ["x"] }))
        );
    }
}
