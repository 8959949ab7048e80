//! Loop controller: the single task that owns the automation state.
//!
//! The controller is an actor. Commands arrive through a [`LoopHandle`];
//! captures, injections, navigations and timers run as spawned tasks that post
//! a completion event back, and OCR runs on its own thread behind the work
//! queue. Nothing else touches controller state, so no locking is needed.
//!
//! Every piece of loop work is tagged with the run generation it was issued
//! under. Stopping bumps the generation, so completions that arrive later are
//! recognised as stale and dropped without causing a transition. In-flight
//! flags are cleared by completions regardless of generation.

use anyhow::{Context, Result};
use image::RgbaImage;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::automation::config::AutomationConfig;
use crate::automation::ocr_worker::spawn_ocr_worker;
use crate::automation::queue::{create_result_channel, create_work_queue, OcrDone, OcrJob, Origin};
use crate::automation::state::{LoopEvent, LoopState, LoopStatus};
use crate::capture::{CaptureTarget, Capturer, Region, RegionStore};
use crate::error::AutomationError;
use crate::ocr::{Normalizer, OcrMode, OcrResult, TextExtractor, Token};
use crate::page::{is_page_loaded, InjectionOutcome, Injector, Navigator, PageRenderer};

/// Capacity of the status broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// How long start waits for the page to answer the readiness check.
const PAGE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// The outside world the controller drives.
pub struct Collaborators {
    pub renderer: Arc<dyn PageRenderer>,
    pub capturer: Arc<dyn Capturer>,
    pub extractor: Box<dyn TextExtractor>,
    /// Where confirmed regions are remembered; `None` disables persistence.
    pub region_store: Option<RegionStore>,
}

enum Command {
    Start(oneshot::Sender<Result<(), AutomationError>>),
    Stop(oneshot::Sender<bool>),
    CaptureOnce(oneshot::Sender<Result<OcrResult, AutomationError>>),
    InjectOnce(
        Option<String>,
        oneshot::Sender<Result<InjectionOutcome, AutomationError>>,
    ),
    NavigateOnce(oneshot::Sender<Result<bool, AutomationError>>),
    SetRegion(Option<Region>, oneshot::Sender<Result<(), AutomationError>>),
    SetFullPage(bool, oneshot::Sender<Result<(), AutomationError>>),
    UpdateConfig(Box<AutomationConfig>, oneshot::Sender<Result<(), AutomationError>>),
    Status(oneshot::Sender<LoopStatus>),
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Navigate,
    Capture,
}

/// Completions posted back to the controller by its spawned tasks.
enum Event {
    Captured {
        origin: Origin,
        result: Result<RgbaImage, AutomationError>,
    },
    Injected {
        origin: Origin,
        token: Token,
        outcome: InjectionOutcome,
        reply: Option<oneshot::Sender<Result<InjectionOutcome, AutomationError>>>,
    },
    SaveChecked {
        origin: Origin,
        saved: bool,
    },
    Navigated {
        origin: Origin,
        dispatched: bool,
        reply: Option<oneshot::Sender<Result<bool, AutomationError>>>,
    },
    Due {
        generation: u64,
        step: Step,
    },
}

/// Everything one cycle needs, taken from the config when the cycle starts.
struct CycleSnapshot {
    target: CaptureTarget,
    mode: OcrMode,
    normalizer: Normalizer,
    injector: Injector,
    save_delay: Duration,
    capture_delay: Duration,
    verify_save: bool,
}

impl CycleSnapshot {
    fn take(
        config: &AutomationConfig,
        region: Option<Region>,
        renderer: &Arc<dyn PageRenderer>,
    ) -> Result<Self, AutomationError> {
        let target = config.capture_target(region).ok_or_else(|| {
            AutomationError::InvalidRegion("no capture region selected".to_string())
        })?;
        if let CaptureTarget::Region(region) = &target {
            region.validate()?;
        }

        Ok(Self {
            target,
            mode: config.tesseract_mode.resolve(&target),
            normalizer: Normalizer::from_config(config, target.is_full_page()),
            injector: Injector::new(
                renderer.clone(),
                &config.field_selector,
                &config.notification_selector,
            ),
            save_delay: Duration::from_millis(config.save_delay_ms),
            capture_delay: Duration::from_millis(config.capture_delay_ms),
            verify_save: config.verify_save,
        })
    }
}

struct ManualCapture {
    snapshot: CycleSnapshot,
    reply: oneshot::Sender<Result<OcrResult, AutomationError>>,
}

struct LoopController {
    config: AutomationConfig,
    region: Option<Region>,
    region_store: Option<RegionStore>,

    state: LoopState,
    generation: u64,
    cycles: u64,
    last_token: Option<Token>,
    cycle: Option<CycleSnapshot>,
    manual: Option<ManualCapture>,

    /// Capture or its OCR outstanding, and for whom
    capture_pending: Option<Origin>,
    /// The frame has been handed to the OCR worker
    ocr_pending: bool,
    injection_in_flight: bool,
    navigation_in_flight: bool,
    worker_alive: bool,

    renderer: Arc<dyn PageRenderer>,
    capturer: Arc<dyn Capturer>,
    navigator: Navigator,
    jobs: Sender<OcrJob>,
    events_tx: UnboundedSender<Event>,
    broadcast: broadcast::Sender<LoopEvent>,
}

/// Cloneable front end of a running controller.
#[derive(Clone)]
pub struct LoopHandle {
    commands: UnboundedSender<Command>,
    events: broadcast::Sender<LoopEvent>,
}

/// Starts the OCR worker thread and the controller task.
///
/// Must be called from within a tokio runtime. The returned join handle
/// completes after [`LoopHandle::shutdown`] or once every handle is dropped.
pub fn spawn_loop(
    config: AutomationConfig,
    collaborators: Collaborators,
) -> Result<(LoopHandle, JoinHandle<()>)> {
    let Collaborators {
        renderer,
        capturer,
        extractor,
        region_store,
    } = collaborators;

    let (jobs, job_receiver) = create_work_queue();
    let (results_tx, results_rx) = create_result_channel();
    spawn_ocr_worker(job_receiver, extractor, results_tx)
        .context("Failed to spawn OCR worker thread")?;

    let region = match (&region_store, config.remember_region) {
        (Some(store), true) => store.load(),
        _ => None,
    };
    if let Some(region) = &region {
        info!("Restored capture region {}", region);
    }

    let (commands_tx, commands_rx) = unbounded_channel();
    let (events_tx, events_rx) = unbounded_channel();
    let (broadcast_tx, _) = broadcast::channel(EVENT_CAPACITY);

    let controller = LoopController {
        config,
        region,
        region_store,
        state: LoopState::Idle,
        generation: 0,
        cycles: 0,
        last_token: None,
        cycle: None,
        manual: None,
        capture_pending: None,
        ocr_pending: false,
        injection_in_flight: false,
        navigation_in_flight: false,
        worker_alive: true,
        navigator: Navigator::new(renderer.clone()),
        renderer,
        capturer,
        jobs,
        events_tx,
        broadcast: broadcast_tx.clone(),
    };

    let task = tokio::spawn(controller.run(commands_rx, events_rx, results_rx));
    let handle = LoopHandle {
        commands: commands_tx,
        events: broadcast_tx,
    };
    Ok((handle, task))
}

impl LoopHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AutomationError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| AutomationError::ControllerClosed)?;
        rx.await.map_err(|_| AutomationError::ControllerClosed)
    }

    /// Starts the loop. Fails with `InvalidRegion` when there is nothing to
    /// capture and `PageNotLoaded` when the page has not loaded.
    pub async fn start(&self) -> Result<(), AutomationError> {
        self.request(Command::Start).await?
    }

    /// Stops the loop. Returns whether it was running.
    pub async fn stop(&self) -> Result<bool, AutomationError> {
        self.request(Command::Stop).await
    }

    /// Captures and OCRs once without touching the loop.
    pub async fn capture_once(&self) -> Result<OcrResult, AutomationError> {
        self.request(Command::CaptureOnce).await?
    }

    /// Writes `text`, or the last captured token, into the target field.
    pub async fn inject_once(
        &self,
        text: Option<String>,
    ) -> Result<InjectionOutcome, AutomationError> {
        self.request(|reply| Command::InjectOnce(text, reply)).await?
    }

    /// Advances the page once and forgets the last token.
    pub async fn navigate_once(&self) -> Result<bool, AutomationError> {
        self.request(Command::NavigateOnce).await?
    }

    /// Replaces (or clears) the capture region. Takes effect next cycle.
    /// Clearing is refused with `Busy` while the loop runs without full-page
    /// capture.
    pub async fn set_region(&self, region: Option<Region>) -> Result<(), AutomationError> {
        self.request(|reply| Command::SetRegion(region, reply)).await?
    }

    pub async fn set_full_page(&self, enabled: bool) -> Result<(), AutomationError> {
        self.request(|reply| Command::SetFullPage(enabled, reply))
            .await?
    }

    /// Replaces the configuration. Takes effect next cycle.
    pub async fn update_config(&self, config: AutomationConfig) -> Result<(), AutomationError> {
        self.request(|reply| Command::UpdateConfig(Box::new(config), reply))
            .await?
    }

    pub async fn status(&self) -> Result<LoopStatus, AutomationError> {
        self.request(Command::Status).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.events.subscribe()
    }

    /// Asks the controller to exit. In-flight work is abandoned.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl LoopController {
    async fn run(
        mut self,
        mut commands: UnboundedReceiver<Command>,
        mut events: UnboundedReceiver<Event>,
        mut results: UnboundedReceiver<OcrDone>,
    ) {
        info!("Loop controller started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = events.recv() => self.handle_event(event),
                done = results.recv(), if self.worker_alive => match done {
                    Some(done) => self.handle_ocr_done(done),
                    None => self.worker_stopped(),
                },
            }
        }

        if self.state.is_active() {
            self.stop();
        }
        info!("Loop controller finished");
    }

    fn publish(&self, event: LoopEvent) {
        // No subscribers is fine
        let _ = self.broadcast.send(event);
    }

    fn set_state(&mut self, state: LoopState) {
        debug_assert!(
            self.state.can_move_to(state),
            "illegal transition {} -> {}",
            self.state,
            state
        );
        debug!("State: {} -> {}", self.state, state);
        self.state = state;
        self.publish(LoopEvent::StateChanged(state));
    }

    /// Whether a loop completion still belongs to the running loop.
    fn is_current(&self, origin: Origin) -> bool {
        matches!(origin, Origin::Loop(g) if g == self.generation && self.state.is_active())
    }

    fn status(&self) -> LoopStatus {
        LoopStatus {
            state: self.state,
            region: self.region,
            full_page: self.config.full_page,
            last_token: self.last_token.clone(),
            cycles: self.cycles,
            injection_in_flight: self.injection_in_flight,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = self.start().await;
                match &result {
                    Err(e) if e.is_fatal() => {
                        warn!("Loop not started: {}", e);
                        self.publish(LoopEvent::Error(e.clone()));
                    }
                    Err(e) => info!("Start ignored: {}", e),
                    Ok(()) => {}
                }
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            Command::CaptureOnce(reply) => self.capture_once(reply),
            Command::InjectOnce(text, reply) => self.inject_once(text, reply),
            Command::NavigateOnce(reply) => self.navigate_once(reply),
            Command::SetRegion(region, reply) => {
                let _ = reply.send(self.set_region(region));
            }
            Command::SetFullPage(enabled, reply) => {
                let config = AutomationConfig {
                    full_page: enabled,
                    ..self.config.clone()
                };
                let result = self.check_target(&config, self.region);
                if result.is_ok() {
                    info!("Full-page capture {}", if enabled { "on" } else { "off" });
                    self.config = config;
                }
                let _ = reply.send(result);
            }
            Command::UpdateConfig(config, reply) => {
                let result = self.check_target(&config, self.region);
                if result.is_ok() {
                    info!("Configuration replaced");
                    self.config = *config;
                }
                let _ = reply.send(result);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => {}
        }
    }

    async fn start(&mut self) -> Result<(), AutomationError> {
        if self.state.is_active() {
            return Err(AutomationError::AlreadyRunning);
        }
        if self.capture_pending.is_some() || self.injection_in_flight || self.navigation_in_flight
        {
            return Err(AutomationError::Busy(
                "previous operation still in flight".to_string(),
            ));
        }

        // Validate before touching the page
        CycleSnapshot::take(&self.config, self.region, &self.renderer)?;

        let check = is_page_loaded(self.renderer.as_ref());
        let loaded = tokio::time::timeout(PAGE_CHECK_TIMEOUT, check)
            .await
            .unwrap_or_else(|_| {
                warn!("Page did not answer the readiness check in {:?}", PAGE_CHECK_TIMEOUT);
                false
            });
        if !loaded {
            return Err(AutomationError::PageNotLoaded);
        }

        self.generation += 1;
        self.cycles = 0;
        info!("Starting automation loop (run {})", self.generation);
        self.publish(LoopEvent::Started);
        self.begin_capture();
        Ok(())
    }

    fn stop(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.generation += 1;
        self.cycle = None;
        info!("Automation loop stopped after {} cycles", self.cycles);
        self.set_state(LoopState::Idle);
        self.publish(LoopEvent::Stopped);
        true
    }

    /// A running loop must always have something to capture.
    fn check_target(
        &self,
        config: &AutomationConfig,
        region: Option<Region>,
    ) -> Result<(), AutomationError> {
        if self.state.is_active() && config.capture_target(region).is_none() {
            return Err(AutomationError::Busy(
                "automation loop is running and needs a capture target".to_string(),
            ));
        }
        Ok(())
    }

    fn set_region(&mut self, region: Option<Region>) -> Result<(), AutomationError> {
        self.check_target(&self.config, region)?;
        match region {
            Some(region) => {
                region.validate()?;
                info!("Capture region set to {}", region);
                if let (Some(store), true) = (&self.region_store, self.config.remember_region) {
                    if let Err(e) = store.save(&region) {
                        warn!("Failed to remember region: {:#}", e);
                    }
                }
            }
            None => {
                info!("Capture region cleared");
                if let Some(store) = &self.region_store {
                    if let Err(e) = store.clear() {
                        warn!("Failed to forget region: {:#}", e);
                    }
                }
            }
        }
        self.region = region;
        self.publish(LoopEvent::RegionChanged(region));
        Ok(())
    }

    fn spawn_capture(&mut self, origin: Origin, target: CaptureTarget) {
        self.capture_pending = Some(origin);
        let capturer = self.capturer.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = capturer.capture(target).await;
            let _ = events.send(Event::Captured { origin, result });
        });
    }

    fn spawn_injection(
        &mut self,
        origin: Origin,
        injector: Injector,
        token: Token,
        reply: Option<oneshot::Sender<Result<InjectionOutcome, AutomationError>>>,
    ) {
        self.injection_in_flight = true;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = injector.inject(token.as_str()).await;
            let _ = events.send(Event::Injected {
                origin,
                token,
                outcome,
                reply,
            });
        });
    }

    fn spawn_save_check(&self, origin: Origin, injector: Injector, after: Duration) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let saved = injector.verify_saved().await;
            let _ = events.send(Event::SaveChecked { origin, saved });
        });
    }

    fn spawn_navigation(
        &mut self,
        origin: Origin,
        reply: Option<oneshot::Sender<Result<bool, AutomationError>>>,
    ) {
        self.navigation_in_flight = true;
        let navigator = self.navigator.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let dispatched = navigator.next().await;
            let _ = events.send(Event::Navigated {
                origin,
                dispatched,
                reply,
            });
        });
    }

    fn schedule(&self, step: Step, after: Duration) {
        let generation = self.generation;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(Event::Due { generation, step });
        });
    }

    fn submit_ocr(&mut self, origin: Origin, image: RgbaImage, mode: OcrMode, normalizer: Normalizer) {
        let job = OcrJob::new(origin, image, mode, normalizer);
        if self.worker_alive && self.jobs.send(job).is_ok() {
            self.ocr_pending = true;
            return;
        }
        self.worker_alive = false;
        self.handle_ocr_done(OcrDone {
            origin,
            result: worker_gone(),
            captured_at: chrono::Local::now(),
        });
    }

    // ---- loop cycle ----

    fn begin_capture(&mut self) {
        let snapshot = match CycleSnapshot::take(&self.config, self.region, &self.renderer) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Commands keep a target in place while running, so only a
                // stop can end the loop; try again after the capture delay
                error!("Cannot capture this cycle: {}", e);
                self.publish(LoopEvent::Error(e));
                self.schedule(
                    Step::Capture,
                    Duration::from_millis(self.config.capture_delay_ms),
                );
                return;
            }
        };

        info!("Cycle {}: capturing {}", self.cycles + 1, snapshot.target);
        self.set_state(self.state.next());
        self.spawn_capture(Origin::Loop(self.generation), snapshot.target);
        self.cycle = Some(snapshot);
    }

    fn begin_injection(&mut self, token: Token) {
        let Some(injector) = self.cycle.as_ref().map(|c| c.injector.clone()) else {
            return;
        };
        self.set_state(LoopState::Injecting);
        self.spawn_injection(Origin::Loop(self.generation), injector, token, None);
    }

    fn begin_navigation(&mut self) {
        self.set_state(self.state.next());
        self.last_token = None;
        self.spawn_navigation(Origin::Loop(self.generation), None);
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Captured { origin, result } => self.handle_captured(origin, result),
            Event::Injected {
                origin,
                token,
                outcome,
                reply,
            } => self.handle_injected(origin, token, outcome, reply),
            Event::SaveChecked { origin, saved } => {
                if origin == Origin::Manual || self.is_current(origin) {
                    if saved {
                        info!("Save notification seen");
                    } else {
                        info!("No save notification seen");
                    }
                    self.publish(LoopEvent::SaveVerified(saved));
                }
            }
            Event::Navigated {
                origin,
                dispatched,
                reply,
            } => self.handle_navigated(origin, dispatched, reply),
            Event::Due { generation, step } => {
                if generation != self.generation || !self.state.is_active() {
                    debug!("Dropping stale {:?} timer", step);
                    return;
                }
                match step {
                    Step::Navigate => self.begin_navigation(),
                    Step::Capture => self.begin_capture(),
                }
            }
        }
    }

    fn handle_captured(&mut self, origin: Origin, result: Result<RgbaImage, AutomationError>) {
        if origin == Origin::Manual {
            let Some(snapshot) = self.manual.as_ref().map(|m| &m.snapshot) else {
                self.capture_pending = None;
                return;
            };
            let (target, mode, normalizer) =
                (snapshot.target, snapshot.mode, snapshot.normalizer.clone());
            match result {
                Ok(image) => {
                    self.publish(LoopEvent::Captured(target));
                    self.submit_ocr(origin, image, mode, normalizer);
                }
                Err(e) => {
                    self.capture_pending = None;
                    warn!("Manual capture failed: {}", e);
                    self.publish(LoopEvent::Error(e.clone()));
                    if let Some(manual) = self.manual.take() {
                        let _ = manual.reply.send(Err(e));
                    }
                }
            }
            return;
        }

        if !self.is_current(origin) {
            self.capture_pending = None;
            debug!("Dropping stale capture");
            return;
        }
        let Some(snapshot) = self.cycle.as_ref() else {
            self.capture_pending = None;
            return;
        };
        let (target, mode, normalizer) =
            (snapshot.target, snapshot.mode, snapshot.normalizer.clone());

        match result {
            Ok(image) => {
                self.publish(LoopEvent::Captured(target));
                self.set_state(self.state.next());
                self.submit_ocr(origin, image, mode, normalizer);
            }
            Err(e) => {
                self.capture_pending = None;
                warn!("{}; writing failure marker", e);
                self.publish(LoopEvent::Error(e.clone()));
                let result = OcrResult::capture_failed(e);
                self.publish(LoopEvent::TextExtracted {
                    raw_text: result.raw_text,
                    token: result.token.clone(),
                });
                self.begin_injection(result.token);
            }
        }
    }

    fn handle_ocr_done(&mut self, done: OcrDone) {
        self.capture_pending = None;
        self.ocr_pending = false;
        debug!("OCR result {:?} after capture", done.latency(chrono::Local::now()));
        let OcrDone { origin, result, .. } = done;

        if origin == Origin::Manual {
            self.report_ocr_failure(&result);
            self.finish_manual_capture(result);
            return;
        }

        if !self.is_current(origin) {
            debug!("Dropping stale OCR result");
            return;
        }
        self.report_ocr_failure(&result);

        let token = result.token.clone().or_failure();
        info!("OCR: {:?} -> '{}'", result.raw_text, token);
        self.publish(LoopEvent::TextExtracted {
            raw_text: result.raw_text,
            token: token.clone(),
        });
        self.last_token = Some(token.clone());
        self.begin_injection(token);
    }

    /// Engine outages and engine errors both end up as the failure marker;
    /// this keeps them apart in the log and on the event stream.
    fn report_ocr_failure(&self, result: &OcrResult) {
        if let Some(failure) = &result.failure {
            match failure {
                AutomationError::EngineUnavailable(_) => error!("{}", failure),
                _ => warn!("{}", failure),
            }
            self.publish(LoopEvent::Error(failure.clone()));
        }
    }

    fn handle_injected(
        &mut self,
        origin: Origin,
        token: Token,
        outcome: InjectionOutcome,
        reply: Option<oneshot::Sender<Result<InjectionOutcome, AutomationError>>>,
    ) {
        self.injection_in_flight = false;

        if let Some(reply) = reply {
            let selector = self.config.field_selector.clone();
            self.report_injection(&token, &outcome, &selector);
            if outcome.is_confirmed() && self.config.verify_save {
                let injector = Injector::new(
                    self.renderer.clone(),
                    &self.config.field_selector,
                    &self.config.notification_selector,
                );
                let after = Duration::from_millis(self.config.save_delay_ms / 2);
                self.spawn_save_check(Origin::Manual, injector, after);
            }
            let _ = reply.send(Ok(outcome));
            return;
        }

        if !self.is_current(origin) {
            debug!("Dropping stale injection result");
            return;
        }
        let Some(cycle) = self.cycle.as_ref() else {
            return;
        };
        let injector = cycle.injector.clone();
        let save_delay = cycle.save_delay;
        let verify_save = cycle.verify_save;

        self.report_injection(&token, &outcome, injector.field_selector());

        if outcome.is_confirmed() {
            if verify_save {
                self.spawn_save_check(origin, injector, save_delay / 2);
            }
            debug!("Navigating in {:?}", save_delay);
            self.schedule(Step::Navigate, save_delay);
        } else {
            self.begin_navigation();
        }
    }

    fn report_injection(&self, token: &Token, outcome: &InjectionOutcome, selector: &str) {
        if let Some(e) = outcome.error(selector) {
            self.publish(LoopEvent::Error(e));
        } else {
            info!("Wrote '{}'", token);
        }
        self.publish(LoopEvent::Injected {
            token: token.clone(),
            confirmed: outcome.is_confirmed(),
        });
    }

    fn handle_navigated(
        &mut self,
        origin: Origin,
        dispatched: bool,
        reply: Option<oneshot::Sender<Result<bool, AutomationError>>>,
    ) {
        self.navigation_in_flight = false;

        if let Some(reply) = reply {
            self.publish(LoopEvent::Navigated(dispatched));
            let _ = reply.send(Ok(dispatched));
            return;
        }

        if !self.is_current(origin) {
            debug!("Dropping stale navigation result");
            return;
        }

        self.cycles += 1;
        self.publish(LoopEvent::Navigated(dispatched));
        let delay = self
            .cycle
            .as_ref()
            .map(|c| c.capture_delay)
            .unwrap_or_else(|| Duration::from_millis(self.config.capture_delay_ms));
        debug!("Next capture in {:?}", delay);
        self.schedule(Step::Capture, delay);
    }

    fn worker_stopped(&mut self) {
        error!("OCR worker stopped unexpectedly");
        self.worker_alive = false;
        // A frame still being captured is answered when it arrives
        if let (true, Some(origin)) = (self.ocr_pending, self.capture_pending) {
            self.handle_ocr_done(OcrDone {
                origin,
                result: worker_gone(),
                captured_at: chrono::Local::now(),
            });
        }
    }

    // ---- single-step controls ----

    fn refuse_while_running(&self) -> Result<(), AutomationError> {
        if self.state.is_active() {
            return Err(AutomationError::Busy("automation loop is running".to_string()));
        }
        Ok(())
    }

    fn capture_once(&mut self, reply: oneshot::Sender<Result<OcrResult, AutomationError>>) {
        let check = self.refuse_while_running().and_then(|_| {
            if self.capture_pending.is_some() {
                return Err(AutomationError::Busy("capture already in flight".to_string()));
            }
            CycleSnapshot::take(&self.config, self.region, &self.renderer)
        });
        let snapshot = match check {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        info!("Manual capture of {}", snapshot.target);
        self.spawn_capture(Origin::Manual, snapshot.target);
        self.manual = Some(ManualCapture { snapshot, reply });
    }

    fn finish_manual_capture(&mut self, result: OcrResult) {
        match &result.token {
            Token::Failure => {
                self.last_token = Some(Token::Failure);
            }
            Token::Text(text) => {
                let verdict = match self.manual.as_ref() {
                    Some(manual) => manual.snapshot.normalizer.validate_token(text),
                    None => Normalizer::from_config(&self.config, self.config.full_page)
                        .validate_token(text),
                };
                match verdict {
                    Ok(()) => self.last_token = Some(result.token.clone()),
                    Err(reason) => {
                        info!("Capture rejected: {}", reason);
                        self.last_token = None;
                        self.publish(LoopEvent::Rejected(reason));
                    }
                }
            }
        }
        self.publish(LoopEvent::TextExtracted {
            raw_text: result.raw_text.clone(),
            token: result.token.clone(),
        });

        match self.manual.take() {
            Some(manual) => {
                let _ = manual.reply.send(Ok(result));
            }
            None => debug!("Manual OCR finished with nobody waiting"),
        }
    }

    fn inject_once(
        &mut self,
        text: Option<String>,
        reply: oneshot::Sender<Result<InjectionOutcome, AutomationError>>,
    ) {
        if let Err(e) = self.refuse_while_running() {
            let _ = reply.send(Err(e));
            return;
        }
        if self.injection_in_flight {
            let _ = reply.send(Err(AutomationError::InjectionInFlight));
            return;
        }

        let token = match text.filter(|t| !t.trim().is_empty()) {
            Some(text) => Some(Token::Text(text)),
            None => self.last_token.clone().filter(|t| !t.is_empty()),
        };
        let Some(token) = token else {
            let _ = reply.send(Err(AutomationError::NothingToInject));
            return;
        };

        let injector = Injector::new(
            self.renderer.clone(),
            &self.config.field_selector,
            &self.config.notification_selector,
        );
        self.spawn_injection(Origin::Manual, injector, token, Some(reply));
    }

    fn navigate_once(&mut self, reply: oneshot::Sender<Result<bool, AutomationError>>) {
        if let Err(e) = self.refuse_while_running() {
            let _ = reply.send(Err(e));
            return;
        }
        if self.navigation_in_flight {
            let _ = reply.send(Err(AutomationError::Busy(
                "navigation already in flight".to_string(),
            )));
            return;
        }

        // A stale token must never be written to the next item
        self.last_token = None;
        self.spawn_navigation(Origin::Manual, Some(reply));
    }
}

fn worker_gone() -> OcrResult {
    OcrResult {
        raw_text: String::new(),
        token: Token::Failure,
        failure: Some(AutomationError::EngineUnavailable(
            "OCR worker is not running".to_string(),
        )),
    }
}
