use crate::core::{Command, CommandTime, History};
use crate::error::{PlaybackError, Result};
use crate::playback::clock::{VirtualClock, CLOCK_TICK};
use crate::playback::gate::ManualGate;
use crate::playback::{validate_timing, PlaybackConfig, PlaybackMode, PlaybackStatus};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Re-check cadence while paused (`play` also wakes the pull directly)
const PAUSED_POLL: Duration = Duration::from_secs(1);

/// Re-check cadence while waiting for a command to become eligible
const READY_POLL: Duration = Duration::from_millis(50);

/// Everything guarded by the engine lock
struct EngineState {
    history: History,
    position: usize,
    mode: PlaybackMode,
    paused: bool,
    rate: f64,
    interval: Duration,
    clock: VirtualClock,
}

impl EngineState {
    fn has_next(&self) -> bool {
        self.position < self.history.len()
    }

    /// Bring the clock up to `now` under the current settings
    fn advance(&mut self, now: Instant) {
        self.clock.advance(now, self.rate, !self.paused);
    }

    fn pause_at(&mut self, now: Instant) -> bool {
        if self.paused {
            return false;
        }
        self.advance(now);
        self.clock.pause(now, self.rate);
        self.paused = true;
        true
    }

    fn play_at(&mut self, now: Instant) -> bool {
        if !self.paused {
            return false;
        }
        self.clock.resume(now);
        self.paused = false;
        true
    }

    /// Whether the command at `position` may be released in the current mode
    fn is_due(&self) -> bool {
        match self.mode {
            PlaybackMode::Manual => false,
            PlaybackMode::Realtime => match (self.clock.current_time(), self.history.get(self.position)) {
                (Some(now), Some(next)) => now >= next.time,
                _ => false,
            },
            PlaybackMode::EventInterval => self.clock.since_last_event() >= self.interval,
        }
    }

    fn release(&mut self, now: Instant) -> Option<Command> {
        let command = self.history.get(self.position)?.clone();
        self.advance(now);
        self.clock.mark_release(command.time);
        self.position += 1;
        Some(command)
    }

    fn current_mut(&mut self) -> Result<&mut Command> {
        let idx = self.position.checked_sub(1).ok_or(PlaybackError::NoCurrentCommand)?;
        self.history.get_mut(idx).ok_or(PlaybackError::NoCurrentCommand)
    }
}

/// What the pull should wait on before looking again
enum Wait {
    Paused,
    Gate,
    Poll,
}

/// Marks a pull in progress; a second concurrent pull is refused
struct PullGuard<'a>(&'a AtomicBool);

impl<'a> PullGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| PullGuard(flag))
            .map_err(|_| PlaybackError::ConcurrentPull)
    }
}

impl Drop for PullGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Playback engine for recorded command histories
///
/// The engine is shared (`Arc`) between one consumer calling [`next`],
/// the clock task started by [`spawn_clock`], and any number of
/// controllers calling the control operations. The lock is never held
/// across an await point.
///
/// [`next`]: PlaybackEngine::next
/// [`spawn_clock`]: PlaybackEngine::spawn_clock
pub struct PlaybackEngine {
    state: Mutex<EngineState>,
    gate: ManualGate,
    resumed: Notify,
    pulling: AtomicBool,
    cancel: CancellationToken,
}

impl PlaybackEngine {
    pub fn new(history: History, config: PlaybackConfig) -> Result<Self> {
        config.validate()?;

        let now = Instant::now();
        let clock = VirtualClock::new(history.start_time(), now);

        Ok(Self {
            state: Mutex::new(EngineState {
                history,
                position: 0,
                mode: config.mode,
                paused: config.paused,
                rate: config.rate,
                interval: config.interval,
                clock,
            }),
            gate: ManualGate::new(),
            resumed: Notify::new(),
            pulling: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pull the next command, waiting until the current mode allows it
    ///
    /// Returns `Ok(None)` once every command has been released. Only one
    /// pull may be pending at a time; a concurrent pull fails with
    /// [`PlaybackError::ConcurrentPull`]. Cancelling the engine makes a
    /// waiting pull return [`PlaybackError::Cancelled`].
    pub async fn next(&self) -> Result<Option<Command>> {
        let _guard = PullGuard::acquire(&self.pulling)?;

        loop {
            if self.cancel.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }

            let wait = {
                let now = Instant::now();
                let mut state = self.state();
                if !state.has_next() {
                    return Ok(None);
                }
                state.advance(now);
                if state.paused {
                    Wait::Paused
                } else if state.mode == PlaybackMode::Manual {
                    Wait::Gate
                } else if state.is_due() {
                    return Ok(state.release(now));
                } else {
                    Wait::Poll
                }
            };

            match wait {
                Wait::Paused => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(PlaybackError::Cancelled),
                        _ = self.resumed.notified() => {}
                        _ = tokio::time::sleep(PAUSED_POLL) => {}
                    }
                }
                Wait::Poll => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(PlaybackError::Cancelled),
                        _ = tokio::time::sleep(READY_POLL) => {}
                    }
                }
                Wait::Gate => {
                    // the sleep arm lets a mode switch or pause take effect mid-wait
                    let released = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(PlaybackError::Cancelled),
                        _ = self.gate.acquire() => true,
                        _ = tokio::time::sleep(READY_POLL) => false,
                    };
                    if released {
                        if let Some(command) = self.take_gate_release(Instant::now()) {
                            return Ok(command);
                        }
                    }
                }
            }
        }
    }

    /// Release a command for a gate permit the pull just consumed
    ///
    /// A pause or mode switch can land between the gate waking and the
    /// lock being taken; the permit is then handed back and `None` returned.
    fn take_gate_release(&self, now: Instant) -> Option<Option<Command>> {
        let mut state = self.state();
        if state.paused || state.mode != PlaybackMode::Manual {
            drop(state);
            self.gate.release();
            return None;
        }
        debug!("Manual release of command {}", state.position);
        Some(state.release(now))
    }

    /// Advance the virtual clock to `now`
    ///
    /// Returns false once the history is exhausted.
    pub(crate) fn tick(&self, now: Instant) -> bool {
        let mut state = self.state();
        state.advance(now);
        state.has_next()
    }

    /// Run the virtual clock until cancelled or the history is exhausted
    pub async fn run_clock(&self) {
        let mut ticker = tokio::time::interval(CLOCK_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.tick(Instant::now()) {
                break;
            }
        }

        debug!("Playback clock stopped");
    }

    /// Start the virtual clock on the current runtime
    pub fn spawn_clock(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_clock().await })
    }

    /// Stop the clock and interrupt any waiting pull
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token cancelled together with this engine
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Pause playback
    pub fn pause(&self) {
        let mut state = self.state();
        if state.pause_at(Instant::now()) {
            info!("Playback paused at {:?}", state.clock.current_time());
        }
    }

    /// Start/resume playback
    pub fn play(&self) {
        let resumed = {
            let mut state = self.state();
            state.play_at(Instant::now())
        };
        if resumed {
            info!("Playback resumed");
            self.resumed.notify_waiters();
        }
    }

    /// Set the paused flag through `pause`/`play`
    pub fn set_paused(&self, paused: bool) {
        if paused {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Toggle between paused and playing, returning the new paused state
    pub fn toggle_pause(&self) -> bool {
        let paused = self.state().paused;
        self.set_paused(!paused);
        !paused
    }

    /// Run `f` with playback paused, then restore the original play state
    ///
    /// Keeps time accrued under the old settings separate from time accrued
    /// under the new ones.
    fn with_paused<T>(&self, f: impl FnOnce(&mut EngineState) -> Result<T>) -> Result<T> {
        let mut state = self.state();
        let now = Instant::now();
        let originally_paused = state.paused;

        state.pause_at(now);
        let result = f(&mut state);
        if !originally_paused {
            state.play_at(now);
        }
        result
    }

    /// Replace rate and interval together, validating both
    pub fn set_timing(&self, rate: f64, interval: Duration) -> Result<()> {
        self.with_paused(|state| {
            validate_timing(rate, interval)?;
            state.rate = rate;
            state.interval = interval;
            debug!("Timing set to rate {} interval {:?}", rate, interval);
            Ok(())
        })
    }

    /// Double the rate and halve the interval
    pub fn speedup(&self) -> Result<()> {
        self.with_paused(|state| {
            let rate = state.rate * 2.0;
            let interval = state.interval / 2;
            validate_timing(rate, interval)?;
            state.rate = rate;
            state.interval = interval;
            info!("Playback rate {}x, interval {:?}", rate, interval);
            Ok(())
        })
    }

    /// Halve the rate and double the interval
    pub fn slowdown(&self) -> Result<()> {
        self.with_paused(|state| {
            let rate = state.rate * 0.5;
            let interval = state
                .interval
                .checked_mul(2)
                .ok_or(PlaybackError::InvalidInterval(state.interval))?;
            validate_timing(rate, interval)?;
            state.rate = rate;
            state.interval = interval;
            info!("Playback rate {}x, interval {:?}", rate, interval);
            Ok(())
        })
    }

    pub fn set_mode(&self, mode: PlaybackMode) {
        let mut state = self.state();
        // settle the clock under the old mode first
        state.advance(Instant::now());
        state.mode = mode;
        info!("Playback mode {}", mode);
    }

    /// Set the mode by name; unrecognized names select `Manual`
    pub fn set_mode_str(&self, mode: &str) {
        self.set_mode(PlaybackMode::parse_or_manual(mode));
    }

    /// Cycle to the next playback mode, returning it
    pub fn change_mode(&self) -> PlaybackMode {
        let mut state = self.state();
        state.advance(Instant::now());
        state.mode = state.mode.next();
        info!("Playback mode {}", state.mode);
        state.mode
    }

    /// Move the virtual clock to `time` without releasing anything
    pub fn goto_time(&self, time: impl Into<CommandTime>) -> Result<()> {
        let time = DateTime::<Utc>::try_from(time.into())
            .map_err(|e| PlaybackError::InvalidArgument(e.to_string()))?;

        self.with_paused(|state| {
            let origin = state
                .history
                .start_time()
                .ok_or_else(|| PlaybackError::InvalidArgument("cannot seek in an empty history".to_string()))?;
            state.clock.seek(time, origin);
            info!("Playback moved to {}", time);
            Ok(())
        })
    }

    /// Let one manual-mode pull through
    pub fn release_manual_gate(&self) {
        self.gate.release();
    }

    /// Toggle the flag on the last released command, returning the new value
    pub fn flag_current(&self) -> Result<bool> {
        let mut state = self.state();
        let command = state.current_mut()?;
        command.flagged = !command.flagged;
        Ok(command.flagged)
    }

    /// Attach a comment to the last released command
    pub fn set_comment(&self, text: impl Into<String>) -> Result<()> {
        let mut state = self.state();
        state.current_mut()?.comment = text.into();
        Ok(())
    }

    /// The last released command, if any
    pub fn current_command(&self) -> Option<Command> {
        let state = self.state();
        state.position.checked_sub(1).and_then(|idx| state.history.get(idx).cloned())
    }

    /// Copy of the full history, annotations included
    pub fn history(&self) -> History {
        self.state().history.clone()
    }

    pub fn status(&self) -> PlaybackStatus {
        let state = self.state();
        PlaybackStatus {
            current_time: state.clock.current_time(),
            mode: state.mode,
            paused: state.paused,
            rate: state.rate,
            interval: state.interval,
            position: state.position,
            len: state.history.len(),
            elapsed: state.clock.elapsed(Instant::now(), state.rate, state.paused),
        }
    }

    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        self.state().clock.current_time()
    }

    pub fn mode(&self) -> PlaybackMode {
        self.state().mode
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    pub fn rate(&self) -> f64 {
        self.state().rate
    }

    pub fn interval(&self) -> Duration {
        self.state().interval
    }

    /// Number of commands released so far
    pub fn position(&self) -> usize {
        self.state().position
    }

    pub fn len(&self) -> usize {
        self.state().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().history.is_empty()
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
