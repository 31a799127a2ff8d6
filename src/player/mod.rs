//! Player — the top-level real-time driver.
//!
//! The player owns the source-text handle, the cached AST (lazily re-parsed
//! whenever the text changes), the shared event queue, the head arena and the
//! processor fan-out. One cooperative, single-threaded scheduling loop drives
//! everything: each tick drains every queued action due within the lookahead
//! window, then gives each processor a chance to pump its own pending work.
//!
//! Live reload is content-driven: every read of the AST compares the
//! provider's current text against the last parsed text. A failed parse is
//! reported and the previous good AST stays in effect. An editing mistake
//! must never stop a performance.

pub mod head;
pub mod queue;

pub use head::Head;
pub use queue::{EventQueue, EventRef, ScheduledEvent};

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::dsl::{self, Assign, ErrorReporter, Expr, LogReporter};
use crate::eval::{evaluate, Env, Message, Value};

/// Where the player reads source text from. Content comparison on every AST
/// read is the whole live-reload protocol: mutate the text, and the next
/// step that resolves a declaration sees the new program.
pub trait CodeProvider {
    fn code(&self) -> String;
}

impl CodeProvider for String {
    fn code(&self) -> String {
        self.clone()
    }
}

impl CodeProvider for Rc<RefCell<String>> {
    fn code(&self) -> String {
        self.borrow().clone()
    }
}

/// A thread-shared code buffer, for feeding edits from a watcher thread.
#[derive(Clone, Default)]
pub struct SharedCode {
    inner: Arc<Mutex<String>>,
}

impl SharedCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(code.into())),
        }
    }

    pub fn set(&self, code: impl Into<String>) {
        *self.inner.lock().expect("code lock poisoned") = code.into();
    }
}

impl CodeProvider for SharedCode {
    fn code(&self) -> String {
        self.inner.lock().expect("code lock poisoned").clone()
    }
}

/// Per-Tracks-step telemetry, for observability only.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInfo {
    pub time: f64,
    pub head_id: String,
    pub step_index: usize,
    pub note_on_count: usize,
}

/// A plugin observing playback. Every hook is optional; absent hooks are
/// no-ops. `poll` is the cooperative pump: it is invoked once per scheduler
/// tick with the current player-relative time.
pub trait MessageProcessor {
    fn started(&mut self) {}
    fn process(&mut self, _time: f64, _head_id: &str, _messages: &[Message]) {}
    fn step_played(&mut self, _info: &StepInfo) {}
    fn head_ended(&mut self, _head_id: &str) {}
    fn ended(&mut self) {}
    fn stopped(&mut self) {}
    fn poll(&mut self, _now: f64) {}
}

/// Payload of the player's event queue.
#[derive(Debug, Clone)]
pub enum Action {
    /// Resume the head with this id.
    Wake(String),
}

/// A monotonic clock returning seconds.
pub type ClockFn = Box<dyn Fn() -> f64>;

/// Wall clock starting at zero when created.
pub fn system_clock() -> ClockFn {
    let epoch = Instant::now();
    Box::new(move || epoch.elapsed().as_secs_f64())
}

/// Fatal, synchronous `start` failures: programmer contract violations, as
/// opposed to live-editing mistakes which only ever log.
#[derive(Debug, Clone, PartialEq)]
pub enum StartError {
    UnknownEntryPoint(String),
    NotSequenceLike(String),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::UnknownEntryPoint(name) => {
                write!(f, "cannot find entry point \"{name}\"")
            }
            StartError::NotSequenceLike(name) => {
                write!(f, "entry point \"{name}\" should evaluate to a sequence")
            }
        }
    }
}

impl std::error::Error for StartError {}

const DEFAULT_LOOKAHEAD: f64 = 0.1;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct Player {
    code: Box<dyn CodeProvider>,
    clock: ClockFn,
    processors: Vec<Box<dyn MessageProcessor>>,
    reporter: Box<dyn ErrorReporter>,

    latest_code: Option<String>,
    ast: Rc<Vec<Expr>>,

    pub(crate) queue: EventQueue<Action>,
    pub(crate) heads: HashMap<String, Head>,

    speed: f64,
    start_time: f64,
    stopped: bool,
    reached_end: bool,
    lookahead: f64,
    poll_interval: Duration,
    rng: Rc<RefCell<ChaCha8Rng>>,
    head_counter: u64,
}

impl Player {
    pub fn new(
        code: Box<dyn CodeProvider>,
        clock: ClockFn,
        processors: Vec<Box<dyn MessageProcessor>>,
    ) -> Self {
        Self {
            code,
            clock,
            processors,
            reporter: Box::new(LogReporter),
            latest_code: None,
            ast: Rc::new(Vec::new()),
            queue: EventQueue::new(),
            heads: HashMap::new(),
            speed: 1.0,
            start_time: 0.0,
            stopped: true,
            reached_end: false,
            lookahead: DEFAULT_LOOKAHEAD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            rng: Rc::new(RefCell::new(ChaCha8Rng::from_entropy())),
            head_counter: 0,
        }
    }

    /// Lookahead window in seconds: events due within `now + lookahead` are
    /// executed on the current tick.
    pub fn with_lookahead(mut self, seconds: f64) -> Self {
        self.lookahead = seconds.max(0.0);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Seed the `randf` builtin for deterministic playback.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.borrow_mut() = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Global playback speed. Writable live through `$ player speed: x`;
    /// non-positive or non-finite values are ignored.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) {
        if speed > 0.0 && speed.is_finite() {
            self.speed = speed;
        } else {
            log::warn!("ignoring speed {speed}");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether the root head has walked off the end of its sequence.
    pub fn has_ended(&self) -> bool {
        self.reached_end
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// The current AST, re-parsed if the provider's text changed since the
    /// last read. A failed parse is reported and the previous AST retained.
    fn current_ast(&mut self) -> Rc<Vec<Expr>> {
        let code = self.code.code();
        if self.latest_code.as_deref() != Some(code.as_str()) {
            match dsl::parse(&code) {
                Ok(ast) => self.ast = Rc::new(ast),
                Err(error) => self.reporter.report(&error),
            }
            self.latest_code = Some(code);
        }
        self.ast.clone()
    }

    /// Look up a top-level declaration by name in the current AST.
    pub fn find_declaration(&mut self, name: &str) -> Option<Assign> {
        let ast = self.current_ast();
        ast.iter().find_map(|expr| match expr {
            Expr::Assign(assign) if assign.name == name => Some(assign.clone()),
            _ => None,
        })
    }

    /// Builtin bindings overlaid with every top-level declaration evaluated
    /// as a primitive. Declarations see builtins and the declarations before
    /// them. Sequence-valued declarations carry no primitive value here:
    /// they are walked structurally by heads, not read as data.
    pub fn root_env(&mut self) -> Env {
        let mut env = Env::new();

        let rng = self.rng.clone();
        env.insert(
            "randf".to_string(),
            Value::Builtin(Rc::new(move |_env| {
                Value::Number(rng.borrow_mut().gen::<f64>())
            })),
        );

        let ast = self.current_ast();
        for expr in ast.iter() {
            if let Expr::Assign(assign) = expr {
                let value = evaluate(&assign.value, &env);
                env.insert(assign.name.clone(), value);
            }
        }

        env
    }

    /// Validate and launch the named entry point, record the start time and
    /// fire processors' `started`. Restarts stop the previous run first.
    pub fn start(&mut self, entry_point: &str) -> Result<(), StartError> {
        if !self.stopped {
            self.stop();
        }

        self.check_entry_point(entry_point)?;

        // Heads from a previous run die here; their queued wakes resolve to
        // nothing. Queued entries themselves are deliberately not purged.
        self.heads.clear();
        self.reached_end = false;
        self.stopped = false;

        self.spawn_root(entry_point);
        self.start_time = (self.clock)();
        self.each_processor(|p| p.started());
        info!("started \"{entry_point}\"");

        self.tick();
        Ok(())
    }

    /// Idempotent. Tells processors to self-silence; does not retroactively
    /// cancel queued actions (the loop simply stops draining them).
    pub fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.each_processor(|p| p.stopped());
            info!("stopped");
        }
    }

    /// The entry point must reduce, possibly through variable aliasing, to a
    /// sequence-like declaration.
    fn check_entry_point(&mut self, entry_point: &str) -> Result<(), StartError> {
        let mut name = entry_point.to_string();

        for _ in 0..32 {
            let Some(declaration) = self.find_declaration(&name) else {
                return Err(StartError::UnknownEntryPoint(entry_point.to_string()));
            };
            match declaration.value.as_ref() {
                Expr::Variable(var) => name = var.name.clone(),
                Expr::Sequence(_)
                | Expr::Binary(_)
                | Expr::Logical(_)
                | Expr::Call(_)
                | Expr::Ternary(_) => return Ok(()),
                _ => return Err(StartError::NotSequenceLike(entry_point.to_string())),
            }
        }

        Err(StartError::NotSequenceLike(entry_point.to_string()))
    }

    /// Forward an action to the shared event queue.
    pub fn schedule(&mut self, when: f64, action: Action) -> EventRef {
        self.queue.add(when, action)
    }

    /// Fan a message batch out to every processor.
    pub fn post(&mut self, time: f64, head_id: &str, messages: &[Message]) {
        debug!("post t={time:.3} head={head_id} {} messages", messages.len());
        for processor in &mut self.processors {
            processor.process(time, head_id, messages);
        }
    }

    pub(crate) fn emit_step(&mut self, info: &StepInfo) {
        for processor in &mut self.processors {
            processor.step_played(info);
        }
    }

    pub(crate) fn each_processor(&mut self, mut f: impl FnMut(&mut dyn MessageProcessor)) {
        for processor in &mut self.processors {
            f(processor.as_mut());
        }
    }

    pub(crate) fn root_ended(&mut self) {
        self.reached_end = true;
        self.each_processor(|p| p.ended());
        info!("program ended");
    }

    pub(crate) fn next_head_id(&mut self, base: &str) -> String {
        let id = format!("{base}{}", self.head_counter);
        self.head_counter += 1;
        id
    }

    pub(crate) fn next_join_id(&mut self) -> u64 {
        let id = self.head_counter;
        self.head_counter += 1;
        id
    }

    /// One cooperative scheduling pass: drain every action due within the
    /// lookahead window in time order, then pump the processors.
    pub fn tick(&mut self) {
        if self.stopped {
            return;
        }

        let now = (self.clock)() - self.start_time;

        while let Some(entry) = self.queue.next(now + self.lookahead) {
            match entry.event {
                Action::Wake(id) => self.wake(&id),
            }
        }

        self.each_processor(|p| p.poll(now));
    }

    /// Blocking scheduling loop for simple hosts: tick, sleep the poll
    /// interval, repeat until the program ends or the player is stopped.
    pub fn run(&mut self) {
        loop {
            self.tick();
            if self.stopped || self.reached_end {
                break;
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

/// Format a player-relative time as `mm:ss:mmm`.
pub fn format_time(seconds: f64) -> String {
    let minutes = (seconds / 60.0).floor() as u64;
    let whole_seconds = (seconds % 60.0).floor() as u64;
    let millis = ((seconds * 1000.0) % 1000.0).floor() as u64;
    format!("{minutes:02}:{whole_seconds:02}:{millis:03}")
}

/// Logs every posted message batch and the end of the program. Handy as a
/// second processor next to the MIDI one.
#[derive(Debug, Default)]
pub struct PrintProcessor;

impl MessageProcessor for PrintProcessor {
    fn process(&mut self, time: f64, head_id: &str, messages: &[Message]) {
        info!("{} {head_id} {messages:?}", format_time(time));
    }

    fn ended(&mut self) {
        info!("ended");
    }
}
