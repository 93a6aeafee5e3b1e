use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use super::models::PortDescriptor;
use crate::serial::Transport;

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_DISCOVERY_STEP: Duration = Duration::from_millis(250);

// Elapsed time is accounted in whole steps; a zero step would never exhaust.
const MIN_STEP: Duration = Duration::from_millis(1);

/// Arduino Uno and compatible boards.
pub const UNO_HWIDS: &[&str] = &["2341:0043", "2341:0001", "2341:0243", "2A03:0043"];

/// Common USB-serial bridge chipsets and dev boards, from the PlatformIO udev
/// rules. Matched unanchored against the upper-cased `VVVV:PPPP` id.
pub const BRIDGE_HWID_PATTERNS: &[&str] = &[
    r"1D50:6018",
    r"10C4:EA[67][013]",
    r"10C4:80A9",
    r"0403:6015",
    r"067B:2303",
    r"1A86:7523",
    r"1A86:55D3",
    r"1A86:55D4",
    r"2341:[08][023].*",
    r"2A03:[08][02].*",
    r"03EB:6124",
    r"16D0:0753",
    r"1EAF:000[34]",
    r"1781:0C9F",
    r"16C0:05DC",
    r"16C0:04[789B].",
    r"16C0:04[789A].",
    r"16C0:04[789ABCD].",
    r"1CBE:00FD",
    r"0451:F432",
    r"28E9:0189",
    r"1A86:7522",
    r"2886:[08]02D",
    r"2E8A:[01].*",
    r"0D28:0204",
    r"0483:5740",
    r"03EB:204F",
    r"0403:60[01][104]",
    r"0403:8220",
    r"0403:8A9[89]",
    r"0403:A6D0",
    r"0403:BCA[01]",
    r"0403:BCD[9A]",
    r"0403:BDC8",
    r"0403:C14[01]",
    r"0403:CFF8",
    r"0451:C32A",
    r"0483:.*",
    r"0640:0028",
    r"0640:.*",
    r"09FB:6001",
    r"0FBB:1000",
    r"1366:.*",
    r"138E:9000",
    r"1457:5118",
    r"15BA:.*",
    r"1781:0C63",
    r"9E88:9E8F",
    r"C251:2710",
    r"03EB:2107",
    r"303A:1001",
    r"2FE3:0100",
];

static BRIDGE_HWIDS: Lazy<Vec<Regex>> = Lazy::new(|| compile_patterns(BRIDGE_HWID_PATTERNS));

fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                log::error!("Skipping invalid hardware id pattern {}: {}", pattern, e);
                None
            }
        })
        .collect()
}

/// Result of one discovery attempt, and of the whole retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Matched(T),
    /// Nothing yet; poll again after a step.
    Retry,
    /// Budget spent without a match.
    Exhausted,
}

/// Decides whether an enumerated USB port is the target device.
pub trait PortMatcher: Send + Sync {
    fn matches(&self, port: &PortDescriptor) -> bool;
}

impl<F> PortMatcher for F
where
    F: Fn(&PortDescriptor) -> bool + Send + Sync,
{
    fn matches(&self, port: &PortDescriptor) -> bool {
        self(port)
    }
}

/// Matches ports by vendor:product id against an exact short-list and a
/// table of regular expressions.
#[derive(Debug, Clone)]
pub struct HardwareIdMatcher {
    exact: Vec<String>,
    patterns: Vec<Regex>,
}

impl HardwareIdMatcher {
    pub fn new<I, S>(exact: I, patterns: Vec<Regex>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            exact: exact.into_iter().map(|id| id.as_ref().to_uppercase()).collect(),
            patterns,
        }
    }

    pub fn from_patterns(exact: &[&str], patterns: &[&str]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(exact, patterns))
    }

    /// Arduino boards plus the USB-serial bridge table.
    pub fn arduino() -> Self {
        Self::new(UNO_HWIDS, BRIDGE_HWIDS.clone())
    }

    /// Pure predicate over a literal `VVVV:PPPP` string; case-insensitive.
    pub fn matches_id(&self, vendor_product_id: &str) -> bool {
        let id = vendor_product_id.to_uppercase();
        self.exact.iter().any(|known| *known == id)
            || self.patterns.iter().any(|re| re.is_match(&id))
    }
}

impl Default for HardwareIdMatcher {
    fn default() -> Self {
        Self::arduino()
    }
}

impl PortMatcher for HardwareIdMatcher {
    fn matches(&self, port: &PortDescriptor) -> bool {
        port.vendor_product_id
            .as_deref()
            .is_some_and(|id| self.matches_id(id))
    }
}

/// Drive `attempt` until it matches or the time budget is spent.
///
/// After every `Retry` the loop checks the accumulated budget, adds one
/// `step` to it and sleeps `step` of real time before the next attempt, so a
/// never-matching attempt runs `timeout / step + 1` times.
pub async fn retry<T, F, Fut>(mut attempt: F, timeout: Duration, step: Duration) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RetryOutcome<T>>,
{
    let step = step.max(MIN_STEP);
    let mut elapsed = Duration::ZERO;
    loop {
        match attempt().await {
            RetryOutcome::Matched(value) => return RetryOutcome::Matched(value),
            RetryOutcome::Exhausted => return RetryOutcome::Exhausted,
            RetryOutcome::Retry => {
                if elapsed >= timeout {
                    return RetryOutcome::Exhausted;
                }
                elapsed += step;
            }
        }
        tokio::time::sleep(step).await;
    }
}

/// Poll the transport's port list until a USB port satisfies `matcher`.
///
/// Enumeration failures count as an empty list. Running out of budget is a
/// normal outcome and yields `None`.
pub async fn find_target_port<M>(
    transport: &dyn Transport,
    matcher: &M,
    timeout: Duration,
    step: Duration,
) -> Option<PortDescriptor>
where
    M: PortMatcher + ?Sized,
{
    let mut attempts = 0u32;
    let outcome = retry(
        || {
            attempts += 1;
            let attempt = attempts;
            async move {
                let ports = match transport.available_ports().await {
                    Ok(ports) => ports,
                    Err(e) => {
                        log::debug!("Port enumeration failed on attempt {}: {}", attempt, e);
                        Vec::new()
                    }
                };
                match ports.into_iter().find(|p| p.is_usb() && matcher.matches(p)) {
                    Some(port) => RetryOutcome::Matched(port),
                    None => {
                        log::debug!("No matching port on attempt {}", attempt);
                        RetryOutcome::Retry
                    }
                }
            }
        },
        timeout,
        step,
    )
    .await;

    match outcome {
        RetryOutcome::Matched(port) => {
            log::info!("Found target port {} ({:?})", port.name, port.vendor_product_id);
            Some(port)
        }
        RetryOutcome::Retry | RetryOutcome::Exhausted => {
            log::info!("No target port found within {:?}", timeout);
            None
        }
    }
}
