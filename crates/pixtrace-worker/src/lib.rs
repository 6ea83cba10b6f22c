//! WASM bridge running the pixtrace session inside the plugin UI.
//!
//! The page constructs a [`PluginBridge`] with a `post` callback. Every
//! message arriving from the host sandbox is passed to
//! [`PluginBridge::handle_message`] as the JSON string it was sent as;
//! user actions go through the other exported methods. Outbound
//! messages (pixel requests, vector commits and UI notifications) are
//! handed to `post` as JSON strings in the same wire format.
//!
//! Tracing runs in small steps on the browser's timer queue, so the
//! page stays responsive while a large image or a batch is converted.

mod outbox;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use gloo_timers::future::TimeoutFuture;
use log::{Level, LevelFilter, Log, Metadata, Record};
use pixtrace_core::protocol::{HostMessage, UiMessage, encode, parse_host_message};
use pixtrace_core::{Clock, Preset, Session, SessionConfig, SystemClock, TraceOptions};
use pixtrace_engines::default_engines;
use wasm_bindgen::prelude::*;

use crate::outbox::{QueuedHost, drain};

type BridgeSession = Session<QueuedHost, SystemClock>;

/// `log` sink writing to the browser console.
struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[{}] {}", record.target(), record.args()));
        match record.level() {
            Level::Error => web_sys::console::error_1(&line),
            Level::Warn => web_sys::console::warn_1(&line),
            Level::Info => web_sys::console::info_1(&line),
            Level::Debug | Level::Trace => web_sys::console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}

/// Module entry point: panic messages and log records go to the console.
#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}

/// Change the console log level (`off`, `error`, `warn`, `info`,
/// `debug`, `trace`).
///
/// # Errors
///
/// Throws on an unknown level name.
#[wasm_bindgen(js_name = setLogLevel)]
pub fn set_log_level(level: &str) -> Result<(), JsError> {
    let filter: LevelFilter = level
        .parse()
        .map_err(|_| JsError::new(&format!("unknown log level {level:?}")))?;
    log::set_max_level(filter);
    Ok(())
}

/// Identifies the live turn pump. Starting a pump retires the previous
/// one, which notices on its next wake-up and exits without a turn.
#[derive(Debug, Default)]
struct PumpGeneration(Cell<u64>);

impl PumpGeneration {
    fn start(&self) -> u64 {
        let next = self.0.get().wrapping_add(1);
        self.0.set(next);
        next
    }

    fn is_live(&self, generation: u64) -> bool {
        self.0.get() == generation
    }
}

struct Shared {
    session: RefCell<BridgeSession>,
    post: js_sys::Function,
    pump: PumpGeneration,
}

impl Shared {
    /// Post everything queued since the last flush. Runs with the
    /// session released so `post` may call back into the bridge.
    fn flush(&self) {
        let messages = drain(&mut *self.session.borrow_mut());
        for message in &messages {
            match encode(message) {
                Ok(json) => {
                    if let Err(e) = self.post.call1(&JsValue::NULL, &JsValue::from_str(&json)) {
                        log::error!("post callback failed: {e:?}");
                    }
                }
                Err(e) => log::error!("dropping outbound message: {e}"),
            }
        }
    }

    /// One scheduling turn. Returns how long to wait before the next
    /// one, or `None` when nothing is in flight or scheduled.
    fn turn(&self) -> Option<u32> {
        let (busy, deadline) = {
            let mut session = self.session.borrow_mut();
            let busy = session.run_turn();
            (busy, session.next_deadline())
        };
        self.flush();
        if busy {
            return Some(0);
        }
        deadline.map(|due| {
            let wait = due.saturating_duration_since(SystemClock.now());
            u32::try_from(wait.as_millis()).unwrap_or(u32::MAX)
        })
    }
}

/// Start a turn pump, replacing any running one.
///
/// A pump sleeping until the preview debounce deadline would otherwise
/// hold back work that arrived meanwhile (a convert, exported pixels).
fn pump(shared: &Rc<Shared>) {
    let generation = shared.pump.start();
    let shared = Rc::clone(shared);
    wasm_bindgen_futures::spawn_local(async move {
        while let Some(wait) = shared.turn() {
            TimeoutFuture::new(wait).await;
            if !shared.pump.is_live(generation) {
                return;
            }
        }
    });
}

/// The session as seen from JavaScript.
#[wasm_bindgen]
pub struct PluginBridge {
    shared: Rc<Shared>,
}

#[wasm_bindgen]
impl PluginBridge {
    /// Create a session. `post` receives every outbound message as a
    /// JSON string; `config_json` optionally overrides the session
    /// tunables.
    ///
    /// # Errors
    ///
    /// Throws if `config_json` is not a valid session configuration.
    #[wasm_bindgen(constructor)]
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(post: js_sys::Function, config_json: Option<String>) -> Result<Self, JsError> {
        let config: SessionConfig = match config_json {
            Some(json) => serde_json::from_str(&json)?,
            None => SessionConfig::default(),
        };
        let session = Session::new(QueuedHost::default(), default_engines(), SystemClock, config);
        Ok(Self {
            shared: Rc::new(Shared {
                session: RefCell::new(session),
                post,
                pump: PumpGeneration::default(),
            }),
        })
    }

    /// Apply one message from the host sandbox.
    ///
    /// # Errors
    ///
    /// Throws on malformed or unknown messages.
    #[wasm_bindgen(js_name = handleMessage)]
    pub fn handle_message(&self, json: &str) -> Result<(), JsError> {
        let message = parse_host_message(json)?;
        self.act(|session| match message {
            HostMessage::Init {
                plugin_version,
                defaults,
            } => {
                log::info!(
                    "host ready (plugin version {})",
                    plugin_version.as_deref().unwrap_or("unknown")
                );
                if let Some(preset) = defaults.preset {
                    session.apply_preset(preset);
                }
            }
            other => {
                if let Some(event) = other.into_event() {
                    session.handle_event(event);
                }
            }
        });
        Ok(())
    }

    /// Replace the trace options (JSON `TraceOptions`).
    ///
    /// # Errors
    ///
    /// Throws on malformed or out-of-range options; the current options
    /// are kept.
    #[wasm_bindgen(js_name = setOptions)]
    pub fn set_options(&self, json: &str) -> Result<(), JsError> {
        let options: TraceOptions = serde_json::from_str(json)?;
        self.act(|session| session.set_options(options))?;
        Ok(())
    }

    /// Apply a named preset.
    ///
    /// # Errors
    ///
    /// Throws on an unknown preset name.
    #[wasm_bindgen(js_name = applyPreset)]
    pub fn apply_preset(&self, name: &str) -> Result<(), JsError> {
        let preset: Preset = name.parse()?;
        self.act(|session| session.apply_preset(preset));
        Ok(())
    }

    /// Preview the first selected node right away. Returns the request
    /// id, or `undefined` with nothing selected.
    #[wasm_bindgen(js_name = previewNow)]
    pub fn preview_now(&self) -> Option<String> {
        self.act(BridgeSession::request_preview_now)
            .map(|id| id.to_string())
    }

    /// Convert every selected node. Returns the batch request id.
    ///
    /// # Errors
    ///
    /// Throws when nothing is selected or a conversion is running.
    pub fn convert(&self) -> Result<String, JsError> {
        let id = self.act(BridgeSession::request_convert)?;
        Ok(id.to_string())
    }

    /// Tell the sandbox the UI is ready for `INIT`.
    #[wasm_bindgen(js_name = uiReady)]
    pub fn ui_ready(&self) {
        self.act(|session| session.host_mut().push(UiMessage::UiReady));
    }

    /// Ask the sandbox to close the plugin.
    pub fn close(&self) {
        self.act(|session| session.host_mut().push(UiMessage::ClosePlugin));
    }

    /// The current options as JSON.
    ///
    /// # Errors
    ///
    /// Throws if serialization fails.
    pub fn options(&self) -> Result<String, JsError> {
        Ok(serde_json::to_string(self.shared.session.borrow().options())?)
    }
}

impl PluginBridge {
    /// Run `f` on the session, post what it produced and make sure the
    /// pump is running.
    fn act<T>(&self, f: impl FnOnce(&mut BridgeSession) -> T) -> T {
        let out = f(&mut *self.shared.session.borrow_mut());
        self.shared.flush();
        pump(&self.shared);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_a_pump_retires_the_previous_one() {
        let pump = PumpGeneration::default();
        let first = pump.start();
        assert!(pump.is_live(first));

        let second = pump.start();
        assert!(!pump.is_live(first));
        assert!(pump.is_live(second));
    }
}
