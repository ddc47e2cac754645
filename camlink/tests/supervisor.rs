mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use camlink::Error;
use camlink::channel::Channel;
use camlink::config::AgentConfig;
use camlink::scheduler::{ChannelSelector, Scheduler, SchedulerConfig};
use camlink::supervisor::{
    RetryPolicy, StaticProbe, Supervisor, SupervisorHandle, SupervisorPhase,
};

use common::{FakeBackend, FrameSink, closed_port, test_channels, wait_until};

const WAIT: Duration = Duration::from_secs(5);

fn agent_config(autostart: bool) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.backend.host = "127.0.0.1".to_string();
    config.registration = RetryPolicy::new(3, Duration::from_millis(20));
    config.health_interval = Duration::from_millis(50);
    config.reconnect_backoff = Duration::from_millis(50);
    config.autostart = autostart;
    config
}

struct Agent {
    handle: SupervisorHandle,
    task: JoinHandle<camlink::Result<()>>,
    root: CancellationToken,
}

fn spawn_agent(config: &AgentConfig, backend: Arc<FakeBackend>, channels: Vec<Channel>) -> Agent {
    let root = CancellationToken::new();
    let channel_count = channels.len();
    let (scheduler, _scheduler_task) = Scheduler::new(
        channels,
        SchedulerConfig::from_agent(config),
        root.child_token(),
    )
    .spawn();
    let (handle, task) = Supervisor::new(
        config,
        backend,
        Arc::new(StaticProbe::default()),
        scheduler,
        channel_count,
        root.clone(),
    )
    .spawn();
    Agent { handle, task, root }
}

async fn wait_running(handle: &SupervisorHandle, epoch: u64) -> bool {
    wait_until(WAIT, || async move {
        handle.status().await.is_ok_and(|s| {
            s.phase == SupervisorPhase::Running && s.epoch == epoch && s.registration.is_some()
        })
    })
    .await
}

#[tokio::test]
async fn test_registration_binds_streamers_and_autostarts() {
    let mut sink = FrameSink::bind().await;
    let backend = FakeBackend::new(vec![sink.port]);
    let agent = spawn_agent(&agent_config(true), backend.clone(), test_channels(1, 20));

    assert!(wait_running(&agent.handle, 1).await);
    sink.next_frame(WAIT).await;

    let status = agent.handle.status().await.unwrap();
    let registration = status.registration.unwrap();
    assert_eq!(registration.epoch, 1);
    assert_eq!(registration.port_base, sink.port);
    assert_eq!(registration.channel_count, 1);
    assert_eq!(status.scheduler.port_base, Some(sink.port));
    assert!(status.scheduler.channels[0].state.is_running());

    let (_, request) = backend.registrations.lock()[0].clone();
    assert_eq!(request.channel_count, 1);
    assert_eq!(request.owner, "echo");

    agent.root.cancel();
    assert!(agent.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_health_failure_triggers_single_recovery() {
    let mut sink = FrameSink::bind().await;
    let backend = FakeBackend::new(vec![sink.port]);
    let agent = spawn_agent(&agent_config(true), backend.clone(), test_channels(1, 20));

    assert!(wait_running(&agent.handle, 1).await);
    sink.next_frame(WAIT).await;

    backend.fail_next_health.store(1, Ordering::SeqCst);
    assert!(wait_running(&agent.handle, 2).await);

    // Several healthy polls later nothing else has happened.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = agent.handle.status().await.unwrap();
    assert_eq!(status.recoveries, 1);
    assert_eq!(status.epoch, 2);
    assert_eq!(backend.registration_count(), 2);
    assert!(
        status
            .last_recovery_reason
            .is_some_and(|reason| reason.contains("Health check failed"))
    );

    // Autostart reconnects after re-registration.
    assert!(
        wait_until(WAIT, || {
            let connections = sink.connections.load(Ordering::SeqCst);
            async move { connections == 2 }
        })
        .await
    );

    agent.root.cancel();
    assert!(agent.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_stream_failure_recovers_onto_new_ports() {
    let dead_port = closed_port().await;
    let mut sink = FrameSink::bind().await;
    let backend = FakeBackend::new(vec![dead_port, sink.port]);
    let agent = spawn_agent(&agent_config(true), backend.clone(), test_channels(1, 20));

    // The first binding cannot connect; one problem leads to one recovery.
    sink.next_frame(WAIT).await;
    assert!(wait_running(&agent.handle, 2).await);

    let status = agent.handle.status().await.unwrap();
    assert_eq!(status.recoveries, 1);
    assert_eq!(backend.registration_count(), 2);
    assert_eq!(status.registration.unwrap().port_base, sink.port);
    let reason = status.last_recovery_reason.unwrap();
    assert!(reason.contains(&dead_port.to_string()), "{}", reason);

    agent.root.cancel();
    assert!(agent.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_registration_exhaustion_is_fatal() {
    let backend = FakeBackend::with_failures(vec![1], u32::MAX);
    let mut config = agent_config(false);
    config.registration = RetryPolicy::new(3, Duration::from_millis(10));
    let agent = spawn_agent(&config, backend.clone(), test_channels(1, 20));

    let result = tokio::time::timeout(WAIT, agent.task).await.unwrap().unwrap();
    match result {
        Err(e @ Error::RegistrationExhausted { attempts: 3, .. }) => assert!(e.is_fatal()),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(backend.registration_count(), 3);
}

#[tokio::test]
async fn test_commands_are_served_while_registering() {
    let backend = FakeBackend::with_failures(vec![1], 2);
    let mut config = agent_config(false);
    config.registration = RetryPolicy::new(5, Duration::from_millis(200));
    let agent = spawn_agent(&config, backend.clone(), test_channels(2, 20));

    let status = agent.handle.status().await.unwrap();
    assert_eq!(status.phase, SupervisorPhase::Registering);
    assert!(status.registration.is_none());
    assert!(matches!(
        agent.handle.start(ChannelSelector::All).await,
        Err(Error::NotRegistered)
    ));

    // Restart while registering changes nothing.
    agent.handle.restart().await.unwrap();
    assert!(wait_running(&agent.handle, 1).await);
    assert_eq!(agent.handle.status().await.unwrap().recoveries, 0);
    assert_eq!(backend.registration_count(), 3);

    agent.root.cancel();
    assert!(agent.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_restart_command_reregisters() {
    let sink = FrameSink::bind().await;
    let backend = FakeBackend::new(vec![sink.port]);
    let agent = spawn_agent(&agent_config(false), backend.clone(), test_channels(1, 20));

    assert!(wait_running(&agent.handle, 1).await);
    agent.handle.start(ChannelSelector::Index(0)).await.unwrap();

    agent.handle.restart().await.unwrap();
    assert!(wait_running(&agent.handle, 2).await);

    let status = agent.handle.status().await.unwrap();
    assert_eq!(status.recoveries, 1);
    assert_eq!(status.last_recovery_reason.as_deref(), Some("restart requested"));
    // Without autostart channels stay stopped after recovery.
    assert!(!status.scheduler.channels[0].state.is_running());
    assert_eq!(backend.registration_count(), 2);

    agent.root.cancel();
    assert!(agent.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_shutdown_command_stops_everything() {
    let mut sink = FrameSink::bind().await;
    let backend = FakeBackend::new(vec![sink.port]);
    let agent = spawn_agent(&agent_config(true), backend, test_channels(1, 20));

    assert!(wait_running(&agent.handle, 1).await);
    sink.next_frame(WAIT).await;

    agent.handle.shutdown().await.unwrap();
    assert!(agent.root.is_cancelled());
    assert!(agent.task.await.unwrap().is_ok());
}
