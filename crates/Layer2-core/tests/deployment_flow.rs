//! Deploy → resolve → dispatch, end to end against the in-memory runtime
//!
//! `cargo test -p berth-core --test deployment_flow`

use berth_core::{
    ContainerManager, DeployConfig, DeploymentRegistry, MemoryRuntime, NoopSync, RequestResolver,
};
use berth_foundation::{BerthPaths, SecurityContext};
use berth_task::{
    DirMailboxFactory, InboundRequest, MailboxRegistry, OrchestratorConfig, TaskMailbox,
    TaskOrchestrator,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_request_reaches_most_specific_deployment() {
    let dir = TempDir::new().unwrap();
    let paths = BerthPaths::new(dir.path());

    let runtime = Arc::new(MemoryRuntime::new());
    let containers = Arc::new(ContainerManager::new(runtime.clone(), paths.clone()));
    let mailboxes = Arc::new(MailboxRegistry::new(Arc::new(
        DirMailboxFactory::new(paths.clone()).with_poll_interval(Duration::from_millis(10)),
    )));
    let registry = Arc::new(
        DeploymentRegistry::new(paths.clone(), containers, Arc::new(NoopSync))
            .with_mailboxes(mailboxes.clone()),
    );

    registry
        .deploy_agent("example.com", "/a", DeployConfig::new("outer"))
        .await
        .unwrap();
    registry
        .deploy_agent("example.com", "/a/b", DeployConfig::new("inner"))
        .await
        .unwrap();
    assert_eq!(runtime.creations(), 2);

    let resolver = RequestResolver::new(registry.clone());
    let deployment = resolver
        .resolve("example.com", "/a/b/greet")
        .await
        .unwrap();
    assert_eq!(deployment.agent, "inner");

    // Executor for the resolved deployment's mailbox
    let mailbox = mailboxes.get_or_open(&deployment.key()).await.unwrap();
    let executor = tokio::spawn(async move {
        loop {
            if let Some(task) = mailbox.dequeue().await.unwrap() {
                let reply = json!({ "command": task.command, "caller": task.params[0] });
                mailbox.mark_complete(&task.id, reply).await.unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let orchestrator = TaskOrchestrator::new(mailboxes, OrchestratorConfig::default());
    let response = orchestrator
        .handle(
            &deployment,
            &InboundRequest::new("GET", "/a/b/greet"),
            &SecurityContext::authenticated("u1"),
            Some(Duration::from_secs(10)),
        )
        .await;
    executor.await.unwrap();

    assert!(response.success);
    assert_eq!(
        response.data,
        Some(json!({ "command": "greet", "caller": "u1" }))
    );

    // Removing the deployment drops its container and state
    registry.remove_deployment("example.com", "/a/b").await.unwrap();
    assert_eq!(runtime.container_names(), vec!["berth-example.com-a-036cbe16".to_string()]);
    assert_eq!(
        resolver.resolve("example.com", "/a/b/greet").await.unwrap().agent,
        "outer"
    );
}
