// Keymapper Event Replay
// Timestamped text scripts of input events, for testing configurations

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use tokio::time::{sleep_until, Instant};

use super::worker::{EventWorker, InputEvent, WorkerError};
use crate::key::key_from_name;
use crate::{InputDevice, KeyEvent, KeyEventAction, MotionEvent};

/// Errors raised while reading or running a script
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Line {line}: invalid key {name}")]
    InvalidKey { line: usize, name: String },

    #[error("Invalid script pattern: {0}")]
    Pattern(regex::Error),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// One scheduled event, `at` being the offset from the script start
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStep {
    pub at: Duration,
    pub event: InputEvent,
}

/// What happened to one step when it was replayed
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step: ScriptStep,
    pub consumed: bool,
}

struct Patterns {
    key: Regex,
    motion: Regex,
    disconnect: Regex,
    reset: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            key: Regex::new(concat!(
                r"(?i)^(\d+)\s+(down|up|repeat)\s+(\S+)",
                r"(?:\s+@(\S+))?(?:\s+scan=(\d+))?$",
            ))?,
            motion: Regex::new(concat!(
                r"(?i)^(\d+)\s+motion\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)",
                r"(?:\s+@(\S+))?$",
            ))?,
            disconnect: Regex::new(r"(?i)^(\d+)\s+disconnect\s+@(\S+)$")?,
            reset: Regex::new(r"(?i)^(\d+)\s+reset$")?,
        })
    }
}

fn patterns() -> Result<&'static Patterns, ReplayError> {
    static PATTERNS: OnceLock<Result<Patterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(Patterns::compile)
        .as_ref()
        .map_err(|e| ReplayError::Pattern(e.clone()))
}

/// Parser state: device ids are handed out in order of first mention
#[derive(Default)]
struct DeviceTable {
    ids: IndexMap<String, i32>,
}

impl DeviceTable {
    /// `internal` names the built-in keyboard, anything else an external
    /// device with that descriptor
    fn device(&mut self, name: &str) -> InputDevice {
        let next = self.ids.len() as i32 + 1;
        let id = *self.ids.entry(name.to_string()).or_insert(next);
        if name.eq_ignore_ascii_case("internal") {
            InputDevice::internal(id, "Built-in Keyboard")
        } else {
            InputDevice::external(id, name)
        }
    }

    fn descriptor(&mut self, name: &str) -> String {
        self.device(name).descriptor
    }
}

/// Parse a replay script.
///
/// One event per line, blank lines and `#` comments ignored:
///
/// ```text
/// 0    down A
/// 120  up   A @internal
/// 300  down BTN_A @usb-pad scan=304
/// 400  motion -1 0 @usb-pad
/// 900  disconnect @usb-pad
/// 950  reset
/// ```
///
/// Times are milliseconds from the start of the script and may not go
/// backwards.
pub fn parse_script(content: &str) -> Result<Vec<ScriptStep>, ReplayError> {
    let patterns = patterns()?;
    let mut devices = DeviceTable::default();
    let mut steps = Vec::new();
    let mut last = Duration::ZERO;

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let text = raw.split('#').next().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }

        let step = if let Some(caps) = patterns.key.captures(text) {
            let name = &caps[3];
            let key = key_from_name(name).ok_or_else(|| ReplayError::InvalidKey {
                line,
                name: name.to_string(),
            })?;
            let action: KeyEventAction = caps[2].parse().map_err(|_| ReplayError::Parse {
                line,
                message: format!("unknown key action '{}'", &caps[2]),
            })?;
            let mut event = KeyEvent::new(key, action);
            if let Some(device) = caps.get(4) {
                event = event.with_device(devices.device(device.as_str()));
            }
            if let Some(scan) = caps.get(5) {
                event = event.with_scan_code(parse_number(scan.as_str(), line)?);
            }
            ScriptStep {
                at: parse_millis(&caps[1], line)?,
                event: InputEvent::Key(event),
            }
        } else if let Some(caps) = patterns.motion.captures(text) {
            let mut motion =
                MotionEvent::new(parse_axis(&caps[2], line)?, parse_axis(&caps[3], line)?);
            if let Some(device) = caps.get(4) {
                motion = motion.with_device(devices.device(device.as_str()));
            }
            ScriptStep {
                at: parse_millis(&caps[1], line)?,
                event: InputEvent::Motion(motion),
            }
        } else if let Some(caps) = patterns.disconnect.captures(text) {
            ScriptStep {
                at: parse_millis(&caps[1], line)?,
                event: InputEvent::DeviceDisconnected(devices.descriptor(&caps[2])),
            }
        } else if let Some(caps) = patterns.reset.captures(text) {
            ScriptStep {
                at: parse_millis(&caps[1], line)?,
                event: InputEvent::Reset,
            }
        } else {
            return Err(ReplayError::Parse {
                line,
                message: format!("unrecognized event '{}'", text),
            });
        };

        if step.at < last {
            return Err(ReplayError::Parse {
                line,
                message: format!("time {}ms is before the previous event", step.at.as_millis()),
            });
        }
        last = step.at;
        steps.push(step);
    }

    Ok(steps)
}

/// Read and parse a script file
pub fn load_script<P: AsRef<Path>>(path: P) -> Result<Vec<ScriptStep>, ReplayError> {
    let content = std::fs::read_to_string(path)?;
    parse_script(&content)
}

/// Feed the steps to the worker at their scheduled times
pub async fn run_script(
    worker: &EventWorker,
    steps: &[ScriptStep],
) -> Result<Vec<StepOutcome>, ReplayError> {
    let start = Instant::now();
    let mut outcomes = Vec::with_capacity(steps.len());

    for step in steps {
        sleep_until(start + step.at).await;
        let consumed = worker.process(step.event.clone()).await?;
        log::debug!("{:>6}ms {:?} consumed={}", step.at.as_millis(), step.event, consumed);
        outcomes.push(StepOutcome {
            step: step.clone(),
            consumed,
        });
    }

    Ok(outcomes)
}

fn parse_number<T: std::str::FromStr>(text: &str, line: usize) -> Result<T, ReplayError> {
    text.parse().map_err(|_| ReplayError::Parse {
        line,
        message: format!("number out of range: {}", text),
    })
}

fn parse_millis(text: &str, line: usize) -> Result<Duration, ReplayError> {
    parse_number(text, line).map(Duration::from_millis)
}

fn parse_axis(text: &str, line: usize) -> Result<f32, ReplayError> {
    let value: f32 = parse_number(text, line)?;
    if !(-1.0..=1.0).contains(&value) {
        return Err(ReplayError::Parse {
            line,
            message: format!("axis value {} outside -1..1", text),
        });
    }
    Ok(value)
}
