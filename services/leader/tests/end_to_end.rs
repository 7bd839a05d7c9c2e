//! Leader and in-process agents talking over each transport

use agent::test_utils::{scripted_manager, CallLog};
use agent::{ActorManagers, Agent};
use async_trait::async_trait;
use cluster_config::{BusSettings, ClusterConfig, TransportKind};
use leader::{AgentLauncher, HandleError, Leader, ResourceError};
use network::{create_client, unique_endpoint, Backends, ClusterClient};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use types::{ActorConfig, ActorInputMessage, ActorKey, ActorState, AgentKey, FailureCause};

fn config(transport: TransportKind) -> ClusterConfig {
    ClusterConfig {
        transport,
        bus: BusSettings {
            producer_cache_capacity: 16,
            heartbeat_interval_ms: 20,
            heartbeat_timeout_ms: 150,
        },
        ..ClusterConfig::default()
    }
}

async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Starts agents inside the test process on the shared backends
struct InProcessLauncher {
    config: ClusterConfig,
    backends: Backends,
    log: CallLog,
    started: Mutex<Vec<(AgentKey, Arc<Agent>, Arc<dyn ClusterClient>)>>,
}

impl InProcessLauncher {
    fn client_of(&self, key: &AgentKey) -> Option<Arc<dyn ClusterClient>> {
        self.started
            .lock()
            .iter()
            .find(|(started, _, _)| started == key)
            .map(|(_, _, client)| Arc::clone(client))
    }
}

#[async_trait]
impl AgentLauncher for InProcessLauncher {
    async fn launch(&self, key: &AgentKey) -> anyhow::Result<()> {
        let client = create_client(&self.config, unique_endpoint("agent"), &self.backends)?;
        let managers = ActorManagers::embedded(scripted_manager(&self.log));
        let agent = Agent::start(key.clone(), Arc::clone(&client), managers).await?;
        self.started.lock().push((key.clone(), agent, client));
        Ok(())
    }
}

struct Cluster {
    leader: Leader,
    launcher: Arc<InProcessLauncher>,
}

fn launcher(transport: TransportKind) -> Arc<InProcessLauncher> {
    Arc::new(InProcessLauncher {
        config: config(transport),
        backends: Backends::in_memory(),
        log: CallLog::default(),
        started: Mutex::new(Vec::new()),
    })
}

async fn leader_on(launcher: &InProcessLauncher) -> Leader {
    let client = create_client(&launcher.config, unique_endpoint("leader"), &launcher.backends)
        .unwrap();
    Leader::start(client).await.unwrap()
}

async fn cluster(transport: TransportKind, agents: &[&str]) -> Cluster {
    let launcher = launcher(transport);
    let leader = leader_on(&launcher).await;
    let handles = leader.agents(launcher.clone());
    for key in agents {
        let handle = handles.create(AgentKey::new(*key)).await.unwrap();
        within(handle.stages().created.wait()).await.unwrap();
    }
    assert_eq!(leader.agent_registry().len(), agents.len());
    Cluster { leader, launcher }
}

fn calls_of(log: &CallLog, actor: &str) -> Vec<String> {
    let prefix = format!("{actor}:");
    log.entries()
        .into_iter()
        .filter(|entry| entry.starts_with(&prefix))
        .collect()
}

async fn actor_runs_through_its_lifecycle(transport: TransportKind) {
    let cluster = cluster(transport, &["ag-1", "ag-2"]).await;
    let handle = cluster
        .leader
        .actors()
        .create(ActorConfig::new("a1", "Echo"))
        .await
        .unwrap();

    let agent = within(handle.stages().created.wait()).await.unwrap();
    assert_eq!(&agent, handle.agent());

    handle.bootstrap().await.unwrap();
    let info = within(handle.stages().initialized.wait()).await.unwrap();
    assert_eq!(info.pid, Some(std::process::id()));

    handle
        .send(ActorInputMessage::message(
            ActorKey::new("peer"),
            serde_json::json!({ "n": 1 }),
        ))
        .await
        .unwrap();
    let log = cluster.launcher.log.clone();
    assert!(eventually(|| calls_of(&log, "a1").len() == 2).await);

    handle.close().await.unwrap();
    within(handle.stages().closed.wait()).await.unwrap();
    assert!(matches!(
        handle.stages().failed.peek(),
        Some(Err(HandleError::SignedOff { .. }))
    ));
    assert!(cluster
        .leader
        .actor_registry()
        .by_key(&ActorKey::new("a1"))
        .is_none());
    assert_eq!(
        calls_of(&log, "a1"),
        vec![
            "a1:init".to_string(),
            r#"a1:message from peer: {"n":1}"#.to_string(),
            "a1:close".to_string()
        ]
    );

    cluster.leader.close().await.unwrap();
}

async fn failed_bootstrap_fails_the_handle(transport: TransportKind) {
    let cluster = cluster(transport, &["ag-1"]).await;
    let handle = cluster
        .leader
        .actors()
        .create(ActorConfig::new("a1", "FailInit"))
        .await
        .unwrap();
    within(handle.stages().created.wait()).await.unwrap();

    handle.bootstrap().await.unwrap();
    let cause = within(handle.stages().failed.wait()).await.unwrap();
    assert_eq!(cause.kind, FailureCause::KIND_ACTOR);
    assert_eq!(
        handle.stages().initialized.peek(),
        Some(Err(HandleError::Failed(cause)))
    );
    assert!(cluster.leader.actor_registry().is_empty());

    cluster.leader.close().await.unwrap();
}

async fn lost_agent_fails_its_actors(transport: TransportKind) {
    let cluster = cluster(transport, &["ag-1"]).await;
    let handle = cluster
        .leader
        .actors()
        .create(ActorConfig::new("a1", "Echo"))
        .await
        .unwrap();
    within(handle.stages().created.wait()).await.unwrap();

    let agent_client = cluster.launcher.client_of(handle.agent()).unwrap();
    agent_client.close().await.unwrap();

    let cause = within(handle.stages().failed.wait()).await.unwrap();
    assert!(cause.is_disconnect());
    assert!(matches!(
        handle.stages().initialized.peek(),
        Some(Err(HandleError::Failed(_)))
    ));
    let agents = Arc::clone(cluster.leader.agent_registry());
    assert!(eventually(|| agents.is_empty()).await);

    // Nowhere left to place anything
    assert!(matches!(
        cluster
            .leader
            .actors()
            .create(ActorConfig::new("a2", "Echo"))
            .await,
        Err(ResourceError::NoAgents)
    ));
}

async fn unknown_class_fails_the_handle(transport: TransportKind) {
    let cluster = cluster(transport, &["ag-1"]).await;
    let actors = Arc::clone(cluster.leader.actor_registry());
    let baseline = actors.listener_count();

    let handle = cluster
        .leader
        .actors()
        .create(ActorConfig::new("a1", "NoSuchClass"))
        .await
        .unwrap();
    let cause = within(handle.stages().failed.wait()).await.unwrap();
    assert_eq!(cause.kind, FailureCause::KIND_VALIDATION);
    assert_eq!(
        handle.stages().created.peek(),
        Some(Err(HandleError::Failed(cause)))
    );
    assert_eq!(actors.listener_count(), baseline);
    assert!(actors.is_empty());
    let resources = Arc::clone(cluster.leader.resources());
    assert!(eventually(|| resources.tracked_actors().is_empty()).await);

    // Same key, valid class
    let retry = cluster
        .leader
        .actors()
        .create(ActorConfig::new("a1", "Echo"))
        .await
        .unwrap();
    within(retry.stages().created.wait()).await.unwrap();

    cluster.leader.close().await.unwrap();
}

async fn late_leader_sees_running_agents_and_actors(transport: TransportKind) {
    let launcher = launcher(transport);
    for key in ["ag-1", "ag-2"] {
        launcher.launch(&AgentKey::new(key)).await.unwrap();
    }

    let first = leader_on(&launcher).await;
    let agents = Arc::clone(first.agent_registry());
    assert!(eventually(|| agents.len() == 2).await);
    let handle = first
        .actors()
        .create(ActorConfig::new("a1", "Echo"))
        .await
        .unwrap();
    within(handle.stages().created.wait()).await.unwrap();
    handle.bootstrap().await.unwrap();
    within(handle.stages().initialized.wait()).await.unwrap();

    let late = leader_on(&launcher).await;
    let (late_agents, late_actors) = (
        Arc::clone(late.agent_registry()),
        Arc::clone(late.actor_registry()),
    );
    assert!(eventually(|| late_agents.len() == 2).await);
    assert!(
        eventually(|| {
            late_actors
                .by_key(&ActorKey::new("a1"))
                .is_some_and(|actor| actor.state == ActorState::Initialized)
        })
        .await
    );
    assert_eq!(late_actors.all(), first.actor_registry().all());

    // The late leader can place work too
    let placed = late
        .actors()
        .create(ActorConfig::new("a2", "Echo"))
        .await
        .unwrap();
    within(placed.stages().created.wait()).await.unwrap();
    assert!(launcher.client_of(placed.agent()).is_some());
}

#[tokio::test]
async fn bus_actor_lifecycle() {
    actor_runs_through_its_lifecycle(TransportKind::Bus).await;
}

#[tokio::test]
async fn group_actor_lifecycle() {
    actor_runs_through_its_lifecycle(TransportKind::Group).await;
}

#[tokio::test]
async fn bus_failed_bootstrap() {
    failed_bootstrap_fails_the_handle(TransportKind::Bus).await;
}

#[tokio::test]
async fn group_failed_bootstrap() {
    failed_bootstrap_fails_the_handle(TransportKind::Group).await;
}

#[tokio::test]
async fn bus_lost_agent() {
    lost_agent_fails_its_actors(TransportKind::Bus).await;
}

#[tokio::test]
async fn group_lost_agent() {
    lost_agent_fails_its_actors(TransportKind::Group).await;
}

#[tokio::test]
async fn bus_unknown_class() {
    unknown_class_fails_the_handle(TransportKind::Bus).await;
}

#[tokio::test]
async fn group_unknown_class() {
    unknown_class_fails_the_handle(TransportKind::Group).await;
}

#[tokio::test]
async fn bus_late_leader() {
    late_leader_sees_running_agents_and_actors(TransportKind::Bus).await;
}

#[tokio::test]
async fn group_late_leader() {
    late_leader_sees_running_agents_and_actors(TransportKind::Group).await;
}
