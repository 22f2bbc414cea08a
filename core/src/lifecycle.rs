//! Component lifecycle state machine.
//!
//! Every container level (domain, server, service, context) embeds a
//! [`LifecycleManager`]. The manager owns the current [`LifecycleState`],
//! checks requested transitions against a fixed 12×12 matrix and notifies
//! subscribed [`ComponentListener`]s about accepted changes.
//!
//! # Phases
//!
//! The [`Lifecycle`] trait drives the four phases `init`, `start`, `stop` and
//! `destroy`. Each phase moves the component into a transient state, runs the
//! matching hook, then settles in the phase's terminal state:
//!
//! ```text
//! init()    : ─► INITIALIZING ─► on_init()    ─► INITIALIZED
//! start()   : ─► STARTING     ─► on_start()   ─► STARTED
//! stop()    : ─► STOPPING     ─► on_stop()    ─► STOPPED
//! destroy() : ─► DESTROYING   ─► on_destroy() ─► DESTROYED
//!                                  │
//!                                  └─ Err ─► FAILED (error returned)
//! ```
//!
//! Calling a phase while already inside the same phase group (e.g. `start()`
//! on a `STARTED` component) is a silent no-op. The matrix has no edge from
//! `NEW` or `DESTROYED` to `STARTING`, so `start()` runs `init()` first in
//! those states.

use crate::error::LifecycleError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// States a component moves through
///
/// The discriminants double as row/column indices of the transition matrix.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Freshly constructed
    #[default]
    New = 0,
    /// `on_init` is running
    Initializing = 1,
    /// Initialization finished
    Initialized = 2,
    /// `on_start` is running
    Starting = 3,
    /// Running and serving requests
    Started = 4,
    /// `on_stop` is running
    Stopping = 5,
    /// Stopped, may be restarted or destroyed
    Stopped = 6,
    /// `on_destroy` is running
    Destroying = 7,
    /// Destroyed
    Destroyed = 8,
    /// A hook failed
    Failed = 9,
    /// Stop has been requested by the component itself
    MustStop = 10,
    /// Destroy has been requested by the component itself
    MustDestroy = 11,
}

/// Group a state belongs to
///
/// Two states in the same group are considered "already there" by the phase
/// operations, which makes repeated `init`/`start`/`stop`/`destroy` calls
/// idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateGroup {
    /// `NEW`
    New,
    /// `INITIALIZING`, `INITIALIZED`
    Init,
    /// `STARTING`, `STARTED`
    Start,
    /// `STOPPING`, `STOPPED`
    Stop,
    /// `DESTROYING`, `DESTROYED`
    Destroy,
    /// `FAILED`
    Failed,
    /// `MUST_STOP`
    MustStop,
    /// `MUST_DESTROY`
    MustDestroy,
}

impl LifecycleState {
    /// All states in matrix order
    pub const ALL: [Self; 12] = [
        Self::New,
        Self::Initializing,
        Self::Initialized,
        Self::Starting,
        Self::Started,
        Self::Stopping,
        Self::Stopped,
        Self::Destroying,
        Self::Destroyed,
        Self::Failed,
        Self::MustStop,
        Self::MustDestroy,
    ];

    /// Row/column index in the transition matrix
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Group used to detect idempotent phase calls
    #[must_use]
    pub const fn group(self) -> StateGroup {
        match self {
            Self::New => StateGroup::New,
            Self::Initializing | Self::Initialized => StateGroup::Init,
            Self::Starting | Self::Started => StateGroup::Start,
            Self::Stopping | Self::Stopped => StateGroup::Stop,
            Self::Destroying | Self::Destroyed => StateGroup::Destroy,
            Self::Failed => StateGroup::Failed,
            Self::MustStop => StateGroup::MustStop,
            Self::MustDestroy => StateGroup::MustDestroy,
        }
    }

    /// Whether ordinary operations may run in this state
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::MustStop)
    }

    /// Whether this is a settled state (not in the middle of a phase)
    #[must_use]
    pub const fn is_end_state(self) -> bool {
        matches!(
            self,
            Self::New
                | Self::Initialized
                | Self::Started
                | Self::Stopped
                | Self::Destroyed
                | Self::Failed
        )
    }

    /// Canonical upper-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Initializing => "INITIALIZING",
            Self::Initialized => "INITIALIZED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Destroying => "DESTROYING",
            Self::Destroyed => "DESTROYED",
            Self::Failed => "FAILED",
            Self::MustStop => "MUST_STOP",
            Self::MustDestroy => "MUST_DESTROY",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a requested transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Illegal; the state is left unchanged and an error is raised
    Deny,
    /// Legal; the state changes
    Accept,
    /// Already there; nothing happens
    Ignore,
}

impl Transition {
    const fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Accept,
            2 => Self::Ignore,
            _ => Self::Deny,
        }
    }
}

/// Transition matrix, rows = from-state, columns = to-state (0 deny, 1 accept, 2 ignore).
///
/// Some direct jumps (e.g. `NEW → STARTED`) are legal; `MUST_DESTROY` only
/// leads to `FAILED`.
#[rustfmt::skip]
const TRANSITION_CODES: [[u8; 12]; 12] = [
    //  NEW INZG INZD STRG STRD STPG STPD DSTG DSTD FAIL MSTP MDST
    [   2,   1,   1,   0,   1,   1,   1,   1,   1,   1,   1,   1 ], // NEW
    [   0,   2,   1,   0,   0,   0,   0,   0,   0,   1,   0,   0 ], // INITIALIZING
    [   0,   0,   2,   1,   1,   0,   0,   1,   1,   1,   0,   1 ], // INITIALIZED
    [   0,   0,   0,   2,   1,   0,   0,   0,   0,   1,   0,   0 ], // STARTING
    [   0,   0,   0,   0,   2,   1,   1,   0,   0,   1,   0,   0 ], // STARTED
    [   0,   0,   0,   0,   0,   2,   1,   0,   0,   1,   0,   0 ], // STOPPING
    [   0,   0,   0,   1,   1,   0,   2,   1,   1,   1,   0,   1 ], // STOPPED
    [   0,   0,   0,   0,   0,   0,   0,   2,   1,   1,   0,   0 ], // DESTROYING
    [   0,   1,   1,   0,   0,   0,   0,   0,   2,   0,   0,   0 ], // DESTROYED
    [   0,   0,   0,   0,   0,   0,   0,   1,   1,   2,   0,   1 ], // FAILED
    [   0,   0,   0,   0,   0,   1,   1,   0,   0,   1,   2,   0 ], // MUST_STOP
    [   0,   0,   0,   0,   0,   0,   0,   0,   0,   1,   0,   0 ], // MUST_DESTROY
];

/// Look up the matrix entry for `(from, to)`
#[must_use]
pub const fn transition(from: LifecycleState, to: LifecycleState) -> Transition {
    Transition::from_code(TRANSITION_CODES[from.index()][to.index()])
}

/// The four lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// `init()`
    Init,
    /// `start()`
    Start,
    /// `stop()`
    Stop,
    /// `destroy()`
    Destroy,
}

impl Phase {
    /// State entered before the hook runs
    #[must_use]
    pub const fn transient(self) -> LifecycleState {
        match self {
            Self::Init => LifecycleState::Initializing,
            Self::Start => LifecycleState::Starting,
            Self::Stop => LifecycleState::Stopping,
            Self::Destroy => LifecycleState::Destroying,
        }
    }

    /// State entered after the hook succeeded
    #[must_use]
    pub const fn settled(self) -> LifecycleState {
        match self {
            Self::Init => LifecycleState::Initialized,
            Self::Start => LifecycleState::Started,
            Self::Stop => LifecycleState::Stopped,
            Self::Destroy => LifecycleState::Destroyed,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Notification delivered to component listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentEvent {
    /// An accepted lifecycle transition
    StateChanged {
        /// Component name
        component: String,
        /// Previous state
        from: LifecycleState,
        /// New state
        to: LifecycleState,
    },

    /// The component was released by one owner or accepted by another
    OwnerChanged {
        /// Component name
        component: String,
        /// Name of the previous owner, if any
        previous: Option<String>,
        /// Name of the new owner, if any
        current: Option<String>,
    },
}

/// Subscriber for component events
///
/// Listeners run synchronously on the thread that performed the change, after
/// the state lock has been released.
pub trait ComponentListener: Send + Sync {
    /// Called once per accepted transition or ownership change
    fn on_event(&self, event: &ComponentEvent);
}

impl<F> ComponentListener for F
where
    F: Fn(&ComponentEvent) + Send + Sync,
{
    fn on_event(&self, event: &ComponentEvent) {
        self(event);
    }
}

/// Handle returned by [`LifecycleManager::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Result of [`LifecycleManager::wait_for`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convergence {
    /// Last state observed
    pub state: LifecycleState,
    /// Whether the predicate held before the retry budget ran out
    pub converged: bool,
    /// Number of polls performed
    pub polls: usize,
}

/// Lifecycle state holder embedded in every component
pub struct LifecycleManager {
    component: String,
    state: Mutex<LifecycleState>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ComponentListener>)>>,
    next_listener: AtomicU64,
}

impl LifecycleManager {
    /// Create a manager in state `NEW`
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            state: Mutex::new(LifecycleState::New),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Name of the owning component
    #[must_use]
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether ordinary operations may run right now
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state().is_available()
    }

    /// Request a transition to `to`
    ///
    /// Returns [`Transition::Accept`] when the state changed and
    /// [`Transition::Ignore`] when the matrix marks the pair as a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::TransitionDenied`] when the matrix denies the
    /// pair; the state is left unchanged.
    pub fn change_state(&self, to: LifecycleState) -> Result<Transition, LifecycleError> {
        let from = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let from = *state;
            match transition(from, to) {
                Transition::Deny => {
                    return Err(LifecycleError::TransitionDenied {
                        component: self.component.clone(),
                        from,
                        to,
                    });
                },
                Transition::Ignore => return Ok(Transition::Ignore),
                Transition::Accept => *state = to,
            }
            from
        };

        self.announce_transition(from, to);
        Ok(Transition::Accept)
    }

    /// Enter the transient state of `phase`
    ///
    /// Returns `false` when the component already is in the phase's group, in
    /// which case nothing changed and the hook must not run.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::TransitionDenied`] when the matrix denies the
    /// move into the transient state.
    pub fn begin(&self, phase: Phase) -> Result<bool, LifecycleError> {
        let target = phase.transient();
        let from = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let from = *state;
            if from.group() == target.group() {
                tracing::trace!(
                    component = %self.component,
                    state = %from,
                    %phase,
                    "Phase already reached, ignoring"
                );
                return Ok(false);
            }
            match transition(from, target) {
                Transition::Deny => {
                    return Err(LifecycleError::TransitionDenied {
                        component: self.component.clone(),
                        from,
                        to: target,
                    });
                },
                Transition::Ignore => return Ok(false),
                Transition::Accept => *state = target,
            }
            from
        };

        self.announce_transition(from, target);
        Ok(true)
    }

    /// Force the component into `FAILED`, bypassing the matrix
    pub fn fail(&self) {
        let from = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let from = *state;
            if from == LifecycleState::Failed {
                return;
            }
            *state = LifecycleState::Failed;
            from
        };

        tracing::error!(component = %self.component, from = %from, "Component forced into FAILED");
        self.announce_transition(from, LifecycleState::Failed);
    }

    /// Subscribe a listener
    pub fn add_listener(&self, listener: Arc<dyn ComponentListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Unsubscribe a listener
    ///
    /// Returns `true` if the listener was subscribed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of subscribed listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Deliver an event to every listener
    pub fn notify(&self, event: &ComponentEvent) {
        let listeners: Vec<Arc<dyn ComponentListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener.on_event(event);
        }
    }

    /// Poll the state until `predicate` holds or the retry budget is spent
    ///
    /// This is a bounded polling loop, not a timeout: at most `retries + 1`
    /// observations are made, `interval` apart.
    pub async fn wait_for<P>(&self, predicate: P, retries: usize, interval: Duration) -> Convergence
    where
        P: Fn(LifecycleState) -> bool + Send,
    {
        let mut polls = 0;
        loop {
            let state = self.state();
            polls += 1;
            if predicate(state) {
                return Convergence { state, converged: true, polls };
            }
            if polls > retries {
                tracing::debug!(
                    component = %self.component,
                    state = %state,
                    polls,
                    "Lifecycle state did not converge"
                );
                return Convergence { state, converged: false, polls };
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn announce_transition(&self, from: LifecycleState, to: LifecycleState) {
        tracing::debug!(component = %self.component, %from, %to, "Lifecycle transition");
        self.notify(&ComponentEvent::StateChanged {
            component: self.component.clone(),
            from,
            to,
        });
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("component", &self.component)
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Components with a managed lifecycle
///
/// Implementors only provide [`lifecycle`](Lifecycle::lifecycle) and override
/// whichever hooks they need; the phase operations are provided.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use bindlet_core::lifecycle::{Lifecycle, LifecycleManager, LifecycleState};
///
/// struct Cache {
///     lifecycle: LifecycleManager,
/// }
///
/// #[async_trait]
/// impl Lifecycle for Cache {
///     fn lifecycle(&self) -> &LifecycleManager {
///         &self.lifecycle
///     }
///
///     async fn on_start(&self) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
///
/// # tokio_test_block(async {
/// let cache = Cache { lifecycle: LifecycleManager::new("cache") };
/// cache.start().await?;
/// assert_eq!(cache.state(), LifecycleState::Started);
/// # Ok::<(), bindlet_core::LifecycleError>(())
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// The embedded state holder
    fn lifecycle(&self) -> &LifecycleManager;

    /// Hook run while `INITIALIZING`
    async fn on_init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Hook run while `STARTING`
    async fn on_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Hook run while `STOPPING`
    async fn on_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Hook run while `DESTROYING`
    async fn on_destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Current state
    fn state(&self) -> LifecycleState {
        self.lifecycle().state()
    }

    /// Run the init phase
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] if the transition is denied or the hook fails.
    async fn init(&self) -> Result<(), LifecycleError> {
        run_phase(self, Phase::Init).await
    }

    /// Run the start phase
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] if the transition is denied or the hook fails.
    async fn start(&self) -> Result<(), LifecycleError> {
        run_phase(self, Phase::Start).await
    }

    /// Run the stop phase
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] if the transition is denied or the hook fails.
    async fn stop(&self) -> Result<(), LifecycleError> {
        run_phase(self, Phase::Stop).await
    }

    /// Run the destroy phase
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] if the transition is denied or the hook fails.
    async fn destroy(&self) -> Result<(), LifecycleError> {
        run_phase(self, Phase::Destroy).await
    }
}

/// Drive one phase: enter the transient state, run the hook, settle
///
/// `start` on a `NEW` or `DESTROYED` component runs the init phase first.
///
/// # Errors
///
/// Returns [`LifecycleError::TransitionDenied`] if either transition is denied,
/// or [`LifecycleError::HookFailed`] (after forcing `FAILED`) if the hook fails.
pub async fn run_phase<L>(target: &L, phase: Phase) -> Result<(), LifecycleError>
where
    L: Lifecycle + ?Sized,
{
    if phase == Phase::Start
        && matches!(target.lifecycle().state(), LifecycleState::New | LifecycleState::Destroyed)
    {
        run_single_phase(target, Phase::Init).await?;
    }
    run_single_phase(target, phase).await
}

async fn run_single_phase<L>(target: &L, phase: Phase) -> Result<(), LifecycleError>
where
    L: Lifecycle + ?Sized,
{
    let manager = target.lifecycle();
    if !manager.begin(phase)? {
        return Ok(());
    }

    let outcome = match phase {
        Phase::Init => target.on_init().await,
        Phase::Start => target.on_start().await,
        Phase::Stop => target.on_stop().await,
        Phase::Destroy => target.on_destroy().await,
    };

    if let Err(source) = outcome {
        tracing::error!(
            component = %manager.component(),
            %phase,
            error = %source,
            "Lifecycle hook failed"
        );
        manager.fail();
        return Err(LifecycleError::HookFailed {
            component: manager.component().to_string(),
            state: phase.transient(),
            source,
        });
    }

    manager.change_state(phase.settled())?;
    Ok(())
}
