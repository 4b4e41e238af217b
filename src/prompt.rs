//! One-time "enable notifications" prompt.
//!
//! [`PromptMachine`] is the pure state machine: it consumes [`PromptEvent`]s
//! and answers with the side effect the host should run, if any.
//! [`PromptController`] is the async adapter that owns the settle timer,
//! feeds it engine snapshots and runs the enable on accept.
//!
//! ```text
//! Idle ──settled, not subscribed──► Evaluating ──delay──► Visible(Full|ExplainOnly)
//!   ▲                                   │                    │         │
//!   └──────subscribed (silent)──────────┘             accept │         │ dismiss
//!                                                            ▼         ▼
//!                                                        Accepted   Dismissed
//! ```

// Rust guideline compliant 2026-02

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::platform::Permission;
use crate::reconcile::{EngineSnapshot, ReconciliationEngine, SubscriptionState};

/// What the visible prompt offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Accept and dismiss.
    Full,
    /// Permission is blocked: explain how to unblock, dismiss only.
    ExplainOnly,
}

/// Prompt visibility as the host should render it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "visibility", content = "mode")]
pub enum PromptVisibility {
    /// Hidden, nothing pending.
    Idle,
    /// Hidden, waiting for the settle delay.
    Evaluating,
    /// Shown.
    Visible(PromptMode),
    /// Closed by the user for this session.
    Dismissed,
    /// User accepted; enable ran or is running.
    Accepted,
}

impl PromptVisibility {
    /// Whether the host should render the prompt.
    pub fn is_visible(self) -> bool {
        matches!(self, Self::Visible(_))
    }
}

/// Engine facts the prompt depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptInputs {
    /// Host supports push.
    pub supported: bool,
    /// Engine finished its first probe.
    pub settled: bool,
    /// A registrar operation is in progress.
    pub loading: bool,
    /// Derived subscription flag.
    pub is_subscribed: bool,
    /// Current permission.
    pub permission: Permission,
}

impl From<&EngineSnapshot> for PromptInputs {
    fn from(snap: &EngineSnapshot) -> Self {
        Self {
            supported: snap.state != SubscriptionState::Unsupported,
            settled: snap.is_settled(),
            loading: snap.loading,
            is_subscribed: snap.is_subscribed(),
            permission: snap.permission,
        }
    }
}

/// Input to [`PromptMachine::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptEvent {
    /// Engine published new facts.
    Inputs(PromptInputs),
    /// Settle timer for `window` fired.
    SettleElapsed(u64),
    /// User pressed accept.
    Accept,
    /// User pressed dismiss.
    Dismiss,
    /// Enable triggered by accept completed.
    EnableFinished {
        /// Enable succeeded.
        ok: bool,
        /// Permission is `Denied` after the attempt.
        permission_denied: bool,
    },
}

/// Side effect requested by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptCommand {
    /// Arm the settle timer for `window`; any earlier window is void.
    StartSettleTimer(u64),
    /// Run `enable_notifications`.
    Enable,
}

/// Pure prompt state machine.
#[derive(Debug, Clone)]
pub struct PromptMachine {
    visibility: PromptVisibility,
    inputs: Option<PromptInputs>,
    window: u64,
    window_started_denied: bool,
    /// Subscribed during a window; quiet for the rest of the mount.
    silenced: bool,
    /// Unsupported host.
    held: bool,
}

impl Default for PromptMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptMachine {
    /// Fresh machine in `Idle`.
    pub fn new() -> Self {
        Self {
            visibility: PromptVisibility::Idle,
            inputs: None,
            window: 0,
            window_started_denied: false,
            silenced: false,
            held: false,
        }
    }

    /// Current visibility.
    pub fn visibility(&self) -> PromptVisibility {
        self.visibility
    }

    fn open_window(&mut self, permission: Permission) -> PromptCommand {
        self.window += 1;
        self.window_started_denied = permission == Permission::Denied;
        self.visibility = PromptVisibility::Evaluating;
        PromptCommand::StartSettleTimer(self.window)
    }

    fn can_start(&self, inputs: &PromptInputs) -> bool {
        !self.held && !self.silenced && inputs.settled && !inputs.loading && !inputs.is_subscribed
    }

    /// Feed one event.
    pub fn step(&mut self, event: PromptEvent) -> Option<PromptCommand> {
        match event {
            PromptEvent::Inputs(inputs) => self.on_inputs(inputs),
            PromptEvent::SettleElapsed(window) => self.on_settle(window),
            PromptEvent::Accept => match self.visibility {
                PromptVisibility::Visible(PromptMode::Full) => {
                    self.visibility = PromptVisibility::Accepted;
                    Some(PromptCommand::Enable)
                }
                _ => None,
            },
            PromptEvent::Dismiss => {
                if self.visibility.is_visible() {
                    log::debug!("[WebPush] Prompt dismissed for this session");
                    self.visibility = PromptVisibility::Dismissed;
                }
                None
            }
            PromptEvent::EnableFinished { ok, permission_denied } => {
                self.on_enable_finished(ok, permission_denied)
            }
        }
    }

    fn on_inputs(&mut self, inputs: PromptInputs) -> Option<PromptCommand> {
        self.inputs = Some(inputs);

        if !inputs.supported {
            self.held = true;
            if matches!(
                self.visibility,
                PromptVisibility::Evaluating | PromptVisibility::Visible(_)
            ) {
                self.visibility = PromptVisibility::Idle;
            }
            return None;
        }

        match self.visibility {
            PromptVisibility::Evaluating | PromptVisibility::Visible(_) if inputs.is_subscribed => {
                log::debug!("[WebPush] Subscribed while prompt pending, staying quiet");
                self.silenced = true;
                self.visibility = PromptVisibility::Idle;
                None
            }
            PromptVisibility::Visible(_) if inputs.loading => {
                self.visibility = PromptVisibility::Idle;
                None
            }
            PromptVisibility::Idle if self.can_start(&inputs) => {
                Some(self.open_window(inputs.permission))
            }
            _ => None,
        }
    }

    fn on_settle(&mut self, window: u64) -> Option<PromptCommand> {
        if window != self.window || self.visibility != PromptVisibility::Evaluating {
            return None;
        }
        let inputs = self.inputs?;
        if inputs.is_subscribed {
            self.silenced = true;
            self.visibility = PromptVisibility::Idle;
            return None;
        }
        if inputs.loading {
            // Re-armed once loading clears
            self.visibility = PromptVisibility::Idle;
            return None;
        }
        let mode = if self.window_started_denied {
            PromptMode::ExplainOnly
        } else {
            PromptMode::Full
        };
        self.visibility = PromptVisibility::Visible(mode);
        None
    }

    fn on_enable_finished(&mut self, ok: bool, permission_denied: bool) -> Option<PromptCommand> {
        if self.visibility != PromptVisibility::Accepted {
            return None;
        }
        if ok {
            return None;
        }
        if permission_denied {
            log::info!("[WebPush] Permission blocked after accept, prompt closed");
            self.visibility = PromptVisibility::Dismissed;
            return None;
        }
        let permission = self.inputs.map_or(Permission::Default, |i| i.permission);
        Some(self.open_window(permission))
    }
}

#[derive(Debug)]
enum Action {
    Accept,
    Dismiss,
    EnableFinished { ok: bool, permission_denied: bool },
}

/// Mounted prompt: drives a [`PromptMachine`] from an engine.
///
/// Dropping the controller unmounts it. An enable already running finishes,
/// but its result is discarded.
#[derive(Debug)]
pub struct PromptController {
    visibility: watch::Receiver<PromptVisibility>,
    actions: mpsc::UnboundedSender<Action>,
    task: JoinHandle<()>,
}

impl PromptController {
    /// Mount against `engine`, showing the prompt after `settle_delay`.
    pub fn mount(engine: Arc<ReconciliationEngine>, settle_delay: Duration) -> Self {
        let (visibility_tx, visibility) = watch::channel(PromptVisibility::Idle);
        let (actions, actions_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_prompt(
            engine,
            settle_delay,
            visibility_tx,
            actions.clone(),
            actions_rx,
        ));
        Self {
            visibility,
            actions,
            task,
        }
    }

    /// Current visibility.
    pub fn visibility(&self) -> PromptVisibility {
        *self.visibility.borrow()
    }

    /// Receiver notified on every visibility change.
    pub fn watch(&self) -> watch::Receiver<PromptVisibility> {
        self.visibility.clone()
    }

    /// User accepted. Ignored unless the prompt is `Visible(Full)`.
    pub fn accept(&self) {
        if self.actions.send(Action::Accept).is_err() {
            log::debug!("[WebPush] Prompt task gone, accept ignored");
        }
    }

    /// User dismissed.
    pub fn dismiss(&self) {
        if self.actions.send(Action::Dismiss).is_err() {
            log::debug!("[WebPush] Prompt task gone, dismiss ignored");
        }
    }
}

impl Drop for PromptController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_prompt(
    engine: Arc<ReconciliationEngine>,
    settle_delay: Duration,
    visibility: watch::Sender<PromptVisibility>,
    actions_tx: mpsc::UnboundedSender<Action>,
    mut actions: mpsc::UnboundedReceiver<Action>,
) {
    let mut machine = PromptMachine::new();
    let mut snapshots = engine.subscribe();
    let mut deadline: Option<(u64, Instant)> = None;

    let initial = PromptInputs::from(&*snapshots.borrow_and_update());
    let mut command = machine.step(PromptEvent::Inputs(initial));

    loop {
        match command.take() {
            Some(PromptCommand::StartSettleTimer(window)) => {
                deadline = Some((window, Instant::now() + settle_delay));
            }
            Some(PromptCommand::Enable) => {
                let engine = Arc::clone(&engine);
                let tx = actions_tx.clone();
                tokio::spawn(async move {
                    let ok = engine.enable_notifications().await;
                    let permission_denied = engine.snapshot().permission == Permission::Denied;
                    if tx.send(Action::EnableFinished { ok, permission_denied }).is_err() {
                        log::debug!("[WebPush] Prompt unmounted, enable result dropped");
                    }
                });
            }
            None => {}
        }
        visibility.send_if_modified(|current| {
            let next = machine.visibility();
            let changed = *current != next;
            *current = next;
            changed
        });

        let sleep_until = deadline.map_or_else(Instant::now, |(_, at)| at);
        let event = tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return;
                }
                let inputs = PromptInputs::from(&*snapshots.borrow_and_update());
                PromptEvent::Inputs(inputs)
            }
            Some(action) = actions.recv() => match action {
                Action::Accept => PromptEvent::Accept,
                Action::Dismiss => PromptEvent::Dismiss,
                Action::EnableFinished { ok, permission_denied } => {
                    PromptEvent::EnableFinished { ok, permission_denied }
                }
            },
            () = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                // Windows start at 1, so 0 never matches
                let window = deadline.take().map_or(0, |(window, _)| window);
                PromptEvent::SettleElapsed(window)
            }
        };
        command = machine.step(event);
    }
}
