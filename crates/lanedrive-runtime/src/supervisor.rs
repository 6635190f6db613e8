//! [`Supervisor`] – operator-side policy on top of a gateway session.
//!
//! The session only moves frames.  The supervisor consumes the
//! [`EventBus`][lanedrive_middleware::EventBus] stream and decides what the
//! operator sees and what the robot is allowed to do:
//!
//! * every payload is folded into the shared [`Dashboard`];
//! * every battery reading goes through the [`BatteryGuard`]; a low reading
//!   halts the base with a zero `/cmd_vel` and raises
//!   [`Advisory::LowBattery`], on *every* such reading;
//! * operator commands go through [`Supervisor::command`], which refuses to
//!   start driving while the guard inhibits it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lanedrive_middleware::SessionHandle;
use lanedrive_types::{BridgeError, CommandIntent, Connectivity, DriveCommand, Event, EventPayload};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::battery_guard::{BatteryGuard, BatteryVerdict};
use crate::dashboard::{Dashboard, DriveStatus};

/// Something the operator should be told about right away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    Connectivity(Connectivity),
    /// Battery at or below the threshold; the base was told to halt.
    LowBattery(u8),
    SendFailed(String),
}

/// State shared between the supervisor task and the console.
#[derive(Debug, Default)]
pub struct OperatorState {
    pub guard: BatteryGuard,
    pub dashboard: Dashboard,
}

#[derive(Clone)]
pub struct Supervisor {
    session: SessionHandle,
    shared: Arc<Mutex<OperatorState>>,
}

impl Supervisor {
    pub fn new(session: SessionHandle, low_battery_percent: u8) -> Self {
        Self {
            session,
            shared: Arc::new(Mutex::new(OperatorState {
                guard: BatteryGuard::new(low_battery_percent),
                dashboard: Dashboard::new(),
            })),
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Lock the shared state. A poisoned lock is recovered; the state is
    /// plain data and stays consistent between statements.
    pub fn state(&self) -> MutexGuard<'_, OperatorState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn drive_permitted(&self) -> bool {
        self.state().guard.drive_permitted()
    }

    /// Snapshot of the dashboard lines.
    pub fn render(&self) -> Vec<String> {
        self.state().dashboard.render()
    }

    /// Apply one bus event. Returns an advisory when the operator should be
    /// told.
    pub async fn handle(&self, event: &Event) -> Option<Advisory> {
        let verdict = {
            let mut state = self.state();
            state.dashboard.record(&event.payload);
            match event.payload {
                EventPayload::Battery { percent } => Some((percent, state.guard.evaluate(percent))),
                _ => None,
            }
        };

        match &event.payload {
            EventPayload::Battery { .. } => match verdict {
                Some((percent, BatteryVerdict::Low)) => {
                    self.halt_for_low_battery(percent).await;
                    Some(Advisory::LowBattery(percent))
                }
                _ => None,
            },
            EventPayload::Connectivity(state) => Some(Advisory::Connectivity(*state)),
            EventPayload::CommandSendFailed(reason) => Some(Advisory::SendFailed(reason.clone())),
            _ => None,
        }
    }

    /// Consume `events` until the bus closes, forwarding advisories.
    pub async fn run(self, mut events: broadcast::Receiver<Event>, advisories: mpsc::UnboundedSender<Advisory>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(advisory) = self.handle(&event).await {
                        // The console may have gone; keep supervising anyway.
                        let _ = advisories.send(advisory);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "supervisor lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("event bus closed; supervisor exiting");
    }

    /// Send an operator command, updating the drive status on success.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::InvalidCommand`] for a start request while the
    ///   battery guard inhibits driving; nothing is sent.
    /// * Anything [`SessionHandle::send_command`] returns.
    pub async fn command(&self, intent: CommandIntent) -> Result<(), BridgeError> {
        if intent == CommandIntent::Drive(DriveCommand::Start) && !self.drive_permitted() {
            info!("start refused: battery low");
            return Err(BridgeError::InvalidCommand(
                "battery low: driving is inhibited".to_string(),
            ));
        }

        self.session.send_command(intent.clone()).await?;

        if let Some(status) = status_after(&intent) {
            self.state().dashboard.set_status(status);
        }
        Ok(())
    }

    async fn halt_for_low_battery(&self, percent: u8) {
        warn!(percent, "battery low; halting base");
        self.state().dashboard.set_status(DriveStatus::LowBattery);
        let halt = CommandIntent::Velocity { linear: 0.0, angular: 0.0 };
        match self.session.send_command(halt).await {
            Ok(()) => {}
            Err(BridgeError::NotConnected) => debug!("halt not sent: session not connected"),
            Err(e) => warn!(error = %e, "halt command failed"),
        }
    }
}

fn status_after(intent: &CommandIntent) -> Option<DriveStatus> {
    match intent {
        CommandIntent::Drive(DriveCommand::Start) => Some(DriveStatus::Driving),
        CommandIntent::Drive(DriveCommand::Stop) => Some(DriveStatus::Stopped),
        CommandIntent::Drive(DriveCommand::Emergency) | CommandIntent::EmergencyStop => {
            Some(DriveStatus::EmergencyStop)
        }
        CommandIntent::Velocity { linear, .. } if *linear > 0.0 => Some(DriveStatus::Driving),
        CommandIntent::Velocity { .. } => Some(DriveStatus::Stopped),
        CommandIntent::GoalPose { .. } => Some(DriveStatus::GoalSent),
        _ => None,
    }
}
