//! Bridge Controller
//!
//! Sequences startup (check link, spawn reader, wait for the autopilot's
//! identity, spawn streamer) and shutdown (signal stop, join both loops)
//! through the shared lifecycle state machine.

use offboard_shared::state_machine::{
    is_valid_transition, LifecycleEvent, LifecycleState, LifecycleStateMachine, TransitionResult,
};
use offboard_shared::timing;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::autopilot::{
    run_reader, run_streamer, snapshot_complete, CommandDispatcher, INITIAL_POSITION_KINDS,
};
use crate::context::{BridgeContext, InitialPosition, WriterStatus};
use crate::error::{BridgeError, Result};
use crate::transport::VehicleLink;

const IDENTITY_POLL: Duration = Duration::from_millis(timing::IDENTITY_POLL_MS);
const WRITER_POLL: Duration = Duration::from_millis(timing::WRITER_POLL_MS);
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_millis(timing::SHUTDOWN_JOIN_TIMEOUT_MS);

/// Optional startup gates
#[derive(Debug, Clone, Copy, Default)]
pub struct StartupOptions {
    /// Record local position and attitude before streaming
    pub wait_for_initial_position: bool,
    /// Wait until every streamed telemetry kind has arrived once
    pub wait_for_full_snapshot: bool,
}

/// Owns the reader and streamer tasks of one session
pub struct BridgeController {
    ctx: Arc<BridgeContext>,
    link: Arc<dyn VehicleLink>,
    options: StartupOptions,
    fsm: RwLock<LifecycleStateMachine>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl BridgeController {
    pub fn new(ctx: Arc<BridgeContext>, link: Arc<dyn VehicleLink>, options: StartupOptions) -> Self {
        Self {
            ctx,
            link,
            options,
            fsm: RwLock::new(LifecycleStateMachine::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        self.fsm.read().await.state()
    }

    /// Only true once both loops have been joined
    pub async fn can_close_transport(&self) -> bool {
        self.fsm.read().await.can_close_transport()
    }

    /// Bring both loops up
    ///
    /// Returns once the streamer is sending. A stop request while waiting
    /// yields `Cancelled`; `stop()` still has to be called to join.
    pub async fn start(&self) -> Result<()> {
        if !self.link.is_running() {
            error!("[LIFECYCLE] Vehicle link is not open");
            self.fault("vehicle link is not open").await;
            return Err(BridgeError::PortNotOpen);
        }
        self.transition(LifecycleEvent::StartRequested).await?;
        info!("[LIFECYCLE] Starting");

        self.spawn("reader", run_reader(self.ctx.clone(), self.link.clone()))
            .await;

        let ctx = &self.ctx;
        self.wait_until("autopilot identity", IDENTITY_POLL, move || async move {
            ctx.telemetry.identity().is_some()
        })
        .await?;

        if self.options.wait_for_initial_position {
            self.wait_until("initial position", IDENTITY_POLL, move || async move {
                for kind in INITIAL_POSITION_KINDS {
                    if !ctx.telemetry.has_received(kind).await {
                        return false;
                    }
                }
                true
            })
            .await?;
            self.record_initial_position().await;
        }

        if self.options.wait_for_full_snapshot {
            self.wait_until("full telemetry snapshot", IDENTITY_POLL, move || async move {
                snapshot_complete(ctx)
            })
            .await?;
        }

        self.spawn("streamer", run_streamer(self.ctx.clone(), self.link.clone()))
            .await;
        self.wait_until("setpoint streamer", WRITER_POLL, move || async move {
            ctx.run_state.writer_status() == WriterStatus::Streaming
        })
        .await?;

        self.transition(LifecycleEvent::LoopsLive).await?;
        info!("[LIFECYCLE] Running");
        Ok(())
    }

    /// Signal stop and join both loops
    ///
    /// Safe to call more than once. A loop that does not finish within the
    /// join window is aborted and reported as a fatal shutdown defect.
    pub async fn stop(&self) -> Result<()> {
        self.ctx.run_state.request_stop();

        let state = self.state().await;
        match state {
            LifecycleState::Stopped => return Ok(()),
            LifecycleState::Failed => {}
            _ => {
                self.transition(LifecycleEvent::StopRequested).await?;
                info!("[LIFECYCLE] Stopping");
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let mut outcome = Ok(());
        for (name, mut handle) in tasks {
            match timeout(SHUTDOWN_JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => debug!("[LIFECYCLE] {} joined", name),
                Ok(Err(e)) if e.is_panic() => {
                    error!("[LIFECYCLE] {} panicked", name);
                    self.fault(&format!("{} panicked", name)).await;
                    if outcome.is_ok() {
                        outcome = Err(BridgeError::TaskPanicked {
                            task: name,
                            reason: e.to_string(),
                        });
                    }
                }
                Ok(Err(_)) => debug!("[LIFECYCLE] {} was cancelled", name),
                Err(_) => {
                    handle.abort();
                    error!(
                        "[LIFECYCLE] {} did not stop within {:?}, aborted",
                        name, SHUTDOWN_JOIN_TIMEOUT
                    );
                    self.fault(&format!("{} did not stop", name)).await;
                    if outcome.is_ok() {
                        outcome = Err(BridgeError::ShutdownTimeout {
                            task: name,
                            timeout: SHUTDOWN_JOIN_TIMEOUT,
                        });
                    }
                }
            }
        }

        if self.state().await == LifecycleState::Stopping {
            self.transition(LifecycleEvent::LoopsJoined).await?;
            info!("[LIFECYCLE] Stopped");
        }
        outcome
    }

    /// Leave off-board mode, then stop
    pub async fn handle_quit(&self, dispatcher: &CommandDispatcher) -> Result<()> {
        info!("[LIFECYCLE] Quit requested");
        if let Err(e) = dispatcher.disable_offboard_control().await {
            warn!("[LIFECYCLE] Could not leave off-board mode: {}", e);
        }
        self.stop().await
    }

    async fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.tasks.lock().await.push((name, handle));
        debug!("[LIFECYCLE] Spawned {}", name);
    }

    /// Poll `ready` every `period` until it holds or a stop is requested
    async fn wait_until<F, Fut>(&self, what: &str, period: Duration, mut ready: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let stop = self.ctx.run_state.stop_token();
        loop {
            if ready().await {
                debug!("[LIFECYCLE] {} ready", what);
                return Ok(());
            }
            tokio::select! {
                _ = stop.cancelled() => {
                    info!("[LIFECYCLE] Stop requested while waiting for {}", what);
                    return Err(BridgeError::Cancelled);
                }
                _ = sleep(period) => {}
            }
        }
    }

    async fn record_initial_position(&self) {
        let snapshot = self.ctx.telemetry.snapshot().await;
        let (Some(local), Some(attitude)) = (snapshot.local_position_ned, snapshot.attitude) else {
            return;
        };
        let (local, attitude) = (local.value, attitude.value);
        let position = InitialPosition {
            x: local.x,
            y: local.y,
            z: local.z,
            vx: local.vx,
            vy: local.vy,
            vz: local.vz,
            yaw: attitude.yaw,
            yaw_rate: attitude.yawspeed,
        };
        if self.ctx.set_initial_position(position) {
            info!(
                "[LIFECYCLE] Initial position ({:.2}, {:.2}, {:.2}) yaw {:.2}",
                position.x, position.y, position.z, position.yaw
            );
        }
    }

    async fn transition(&self, event: LifecycleEvent) -> Result<LifecycleState> {
        let mut fsm = self.fsm.write().await;
        let before = fsm.state();
        match fsm.process_event(event) {
            TransitionResult::Success(state) => {
                debug_assert!(
                    is_valid_transition(before, state),
                    "state machine moved {} -> {}",
                    before,
                    state
                );
                Ok(state)
            }
            TransitionResult::Invalid { from, event } => {
                warn!("[LIFECYCLE] Rejected {:?} in state {}", event, from);
                Err(BridgeError::InvalidTransition { from, event })
            }
            TransitionResult::Failed { reason } => {
                error!("[LIFECYCLE] Failed: {}", reason);
                Ok(LifecycleState::Failed)
            }
        }
    }

    async fn fault(&self, reason: &str) {
        let _ = self
            .transition(LifecycleEvent::Fault {
                reason: reason.to_string(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autopilot::FcConfig;
    use crate::transport::mock::MockLink;
    use mavlink::ardupilotmega::{
        MavMessage, ATTITUDE_DATA, HEARTBEAT_DATA, LOCAL_POSITION_NED_DATA,
    };

    fn controller(link: Arc<MockLink>, options: StartupOptions) -> (Arc<BridgeContext>, BridgeController) {
        let ctx = Arc::new(BridgeContext::new(FcConfig::default()));
        let controller = BridgeController::new(ctx.clone(), link, options);
        (ctx, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_stop_reaches_stopped() {
        let link = Arc::new(MockLink::new());
        link.push(1, 1, MavMessage::HEARTBEAT(HEARTBEAT_DATA::default()));
        let (ctx, controller) = controller(link.clone(), StartupOptions::default());

        controller.start().await.unwrap();
        assert_eq!(controller.state().await, LifecycleState::Running);
        assert!(ctx.run_state.is_reading());
        assert_eq!(ctx.run_state.writer_status(), WriterStatus::Streaming);
        assert!(!controller.can_close_transport().await);

        controller.stop().await.unwrap();
        assert_eq!(controller.state().await, LifecycleState::Stopped);
        assert!(controller.can_close_transport().await);
        assert!(!ctx.run_state.is_reading());
        assert_eq!(ctx.run_state.writer_status(), WriterStatus::Idle);
        assert!(!link.sent().is_empty());

        // Second stop is a no-op
        controller.stop().await.unwrap();
        assert_eq!(controller.state().await, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_closed_link_fails_start() {
        let (_, controller) = controller(Arc::new(MockLink::closed()), StartupOptions::default());

        let result = controller.start().await;
        assert!(matches!(result, Err(BridgeError::PortNotOpen)));
        assert_eq!(controller.state().await, LifecycleState::Failed);
        assert!(!controller.can_close_transport().await);
    }

    #[tokio::test]
    async fn test_stop_from_idle() {
        let (_, controller) = controller(Arc::new(MockLink::new()), StartupOptions::default());

        controller.stop().await.unwrap();
        assert_eq!(controller.state().await, LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let link = Arc::new(MockLink::new());
        link.push(1, 1, MavMessage::HEARTBEAT(HEARTBEAT_DATA::default()));
        let (_, controller) = controller(link, StartupOptions::default());

        controller.start().await.unwrap();
        let result = controller.start().await;
        assert!(matches!(
            result,
            Err(BridgeError::InvalidTransition {
                from: LifecycleState::Running,
                ..
            })
        ));
        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_waiting_for_identity() {
        let (ctx, controller) = controller(Arc::new(MockLink::new()), StartupOptions::default());
        let controller = Arc::new(controller);

        let starting = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.start().await })
        };
        sleep(IDENTITY_POLL * 3).await;
        assert_eq!(controller.state().await, LifecycleState::Starting);

        ctx.run_state.request_stop();
        let result = starting.await.unwrap();
        assert!(matches!(result, Err(BridgeError::Cancelled)));

        controller.stop().await.unwrap();
        assert_eq!(controller.state().await, LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_position_gate() {
        let link = Arc::new(MockLink::new());
        link.push(1, 1, MavMessage::HEARTBEAT(HEARTBEAT_DATA::default()));
        link.push(
            1,
            1,
            MavMessage::LOCAL_POSITION_NED(LOCAL_POSITION_NED_DATA {
                x: 1.0,
                y: 2.0,
                z: -3.0,
                ..Default::default()
            }),
        );
        link.push(
            1,
            1,
            MavMessage::ATTITUDE(ATTITUDE_DATA {
                yaw: 0.5,
                yawspeed: 0.1,
                ..Default::default()
            }),
        );
        let options = StartupOptions {
            wait_for_initial_position: true,
            ..Default::default()
        };
        let (ctx, controller) = controller(link, options);

        controller.start().await.unwrap();
        let position = ctx.initial_position().expect("initial position recorded");
        assert_eq!((position.x, position.y, position.z), (1.0, 2.0, -3.0));
        assert_eq!((position.yaw, position.yaw_rate), (0.5, 0.1));

        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_task_is_a_shutdown_defect() {
        let (_, controller) = controller(Arc::new(MockLink::new()), StartupOptions::default());
        controller
            .spawn("stuck", std::future::pending::<()>())
            .await;

        let result = controller.stop().await;
        assert!(matches!(
            result,
            Err(BridgeError::ShutdownTimeout { task: "stuck", .. })
        ));
        assert_eq!(controller.state().await, LifecycleState::Failed);
        assert!(!controller.can_close_transport().await);
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let (_, controller) = controller(Arc::new(MockLink::new()), StartupOptions::default());
        controller
            .spawn("broken", async { panic!("boom") })
            .await;

        let result = controller.stop().await;
        assert!(matches!(result, Err(BridgeError::TaskPanicked { task: "broken", .. })));
        assert_eq!(controller.state().await, LifecycleState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_disables_offboard_then_stops() {
        let link = Arc::new(MockLink::new());
        link.push(1, 1, MavMessage::HEARTBEAT(HEARTBEAT_DATA::default()));
        let (ctx, controller) = controller(link.clone(), StartupOptions::default());
        let dispatcher = CommandDispatcher::new(ctx.clone(), link.clone());

        controller.start().await.unwrap();
        dispatcher.enable_offboard_control().await.unwrap();
        assert!(ctx.run_state.is_offboard_active());

        controller.handle_quit(&dispatcher).await.unwrap();
        assert!(!ctx.run_state.is_offboard_active());
        assert_eq!(controller.state().await, LifecycleState::Stopped);

        let toggles = link
            .sent()
            .into_iter()
            .filter(|m| matches!(m, MavMessage::COMMAND_LONG(_)))
            .count();
        assert_eq!(toggles, 2);
    }
}
