use blockyard::config::KubernetesConfig;
use blockyard::domain::{ResourceNames, ServerName};
use blockyard::k8s::{ClusterApi, ExecBehavior, InMemoryCluster, resources};
use blockyard::services::{ExecErrorKind, RemoteExecutor};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn running_server(cluster: &InMemoryCluster) -> ResourceNames {
    let config = KubernetesConfig::default();
    let names = ResourceNames::derive(&ServerName::new("alice-survival").unwrap(), &config);
    let deployment = resources::deployment(&names, &config, &BTreeMap::new());
    cluster.create_deployment(&deployment).await.unwrap();
    names
}

fn executor(cluster: &Arc<InMemoryCluster>, timeout: Duration) -> RemoteExecutor {
    RemoteExecutor::new(cluster.clone(), timeout)
}

#[tokio::test]
async fn test_console_command_is_wrapped() {
    let cluster = Arc::new(InMemoryCluster::new());
    let names = running_server(&cluster).await;
    cluster.set_exec_behavior(ExecBehavior::Succeed {
        stdout: "There are 0 of a max of 20 players online".to_string(),
        stderr: String::new(),
    });

    let output = executor(&cluster, Duration::from_secs(5))
        .console(&names, "list")
        .await
        .unwrap();
    assert!(output.stdout.contains("players online"));

    let log = cluster.exec_log();
    assert_eq!(log.len(), 1);
    assert_eq!(
        log[0].1,
        vec!["mc-send-to-console".to_string(), "list".to_string()]
    );
}

#[tokio::test]
async fn test_console_command_is_one_argument() {
    let cluster = Arc::new(InMemoryCluster::new());
    let names = running_server(&cluster).await;

    executor(&cluster, Duration::from_secs(5))
        .console(&names, "say hi; rm -rf /data")
        .await
        .unwrap();

    let log = cluster.exec_log();
    assert_eq!(log.len(), 1);
    assert_eq!(
        log[0].1,
        vec![
            "mc-send-to-console".to_string(),
            "say hi; rm -rf /data".to_string(),
        ]
    );
    assert!(!log[0].1.iter().any(|arg| arg == "/bin/bash" || arg == "-c"));
}

#[tokio::test]
async fn test_timeout_keeps_partial_output() {
    let cluster = Arc::new(InMemoryCluster::new());
    let names = running_server(&cluster).await;
    cluster.set_exec_behavior(ExecBehavior::Hang {
        stdout: "Saving the game".to_string(),
    });

    let started = Instant::now();
    let err = executor(&cluster, Duration::from_millis(200))
        .exec_in_workload(&names, "mc-send-to-console save-all")
        .await
        .unwrap_err();

    assert!(matches!(err.kind, ExecErrorKind::Timeout(_)));
    assert_eq!(err.output.stdout, "Saving the game");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_stream_error_keeps_partial_output() {
    let cluster = Arc::new(InMemoryCluster::new());
    let names = running_server(&cluster).await;
    cluster.set_exec_behavior(ExecBehavior::Break {
        stdout: "Saved the ga".to_string(),
        error: "connection reset".to_string(),
    });

    let err = executor(&cluster, Duration::from_secs(5))
        .exec_in_workload(&names, "mc-send-to-console save-all")
        .await
        .unwrap_err();

    assert!(matches!(err.kind, ExecErrorKind::Stream(_)));
    assert_eq!(err.output.stdout, "Saved the ga");
}

#[tokio::test]
async fn test_non_zero_exit_keeps_output() {
    let cluster = Arc::new(InMemoryCluster::new());
    let names = running_server(&cluster).await;
    cluster.set_exec_behavior(ExecBehavior::Fail {
        stdout: "partial".to_string(),
        stderr: "mc-send-to-console: pipe not found".to_string(),
        message: "command terminated with exit code 1".to_string(),
    });

    let err = executor(&cluster, Duration::from_secs(5))
        .exec_in_workload(&names, "mc-send-to-console list")
        .await
        .unwrap_err();

    assert!(matches!(err.kind, ExecErrorKind::NonZeroExit(_)));
    assert_eq!(err.output.stdout, "partial");
    assert!(err.output.stderr.contains("pipe not found"));
}

#[tokio::test]
async fn test_no_pod_when_scaled_down() {
    let cluster = Arc::new(InMemoryCluster::new());
    let names = running_server(&cluster).await;
    cluster.scale_deployment(&names.workload, 0).await.unwrap();

    let err = executor(&cluster, Duration::from_secs(5))
        .exec_in_workload(&names, "mc-send-to-console list")
        .await
        .unwrap_err();

    assert!(matches!(err.kind, ExecErrorKind::NoRunningPod(_)));
    assert!(cluster.exec_log().is_empty());
}
