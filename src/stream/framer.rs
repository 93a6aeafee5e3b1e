use std::collections::{BTreeMap, VecDeque};

use super::parser::{classify_line, LineKind};
use super::types::{LineRecord, DEFAULT_MAX_LINES, DEFAULT_MAX_LINE_LENGTH};
use crate::events::SessionEvent;

/// Turns a stream of text chunks into a bounded scrollback of lines and the
/// structured events found in them.
///
/// A line still being received is kept as the "open" record and amended in
/// place as more text arrives, so a slow device shows up as one growing
/// line rather than many fragments. An open line that reaches the length
/// limit is completed as if a newline had arrived.
#[derive(Debug)]
pub struct LineFramer {
    pending: String,
    lines: VecDeque<LineRecord>,
    capacity: usize,
    max_line_length: usize,
    // Index into `lines` of the record mirroring `pending`.
    open: Option<usize>,
    sensor_channels: Vec<u16>,
    aux_value: Option<u8>,
    values: BTreeMap<String, String>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_LINES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_limits(capacity, DEFAULT_MAX_LINE_LENGTH)
    }

    /// Both limits are clamped to at least one.
    pub fn with_limits(capacity: usize, max_line_length: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pending: String::new(),
            lines: VecDeque::with_capacity(capacity),
            capacity,
            max_line_length: max_line_length.max(1),
            open: None,
            sensor_channels: Vec::new(),
            aux_value: None,
            values: BTreeMap::new(),
        }
    }

    /// Consume one chunk and return the events it produced, in order.
    pub fn feed(&mut self, chunk: &str) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if chunk.is_empty() {
            return events;
        }

        // Only the new chunk can hold a newline; `pending` never does.
        if chunk.contains('\n') {
            self.pending.push_str(chunk);
            let buffered = std::mem::take(&mut self.pending);
            let mut pieces: Vec<&str> = buffered.split('\n').collect();
            let tail = pieces.pop().unwrap_or_default();
            for (i, piece) in pieces.into_iter().enumerate() {
                self.complete(piece, i == 0, &mut events);
            }
            self.pending = tail.to_string();
            if self.pending.is_empty() {
                return events;
            }
        } else {
            self.pending.push_str(chunk);
        }

        if self.pending.len() >= self.max_line_length {
            let overflow = std::mem::take(&mut self.pending);
            log::debug!("closing unterminated line at {} bytes", overflow.len());
            self.complete(&overflow, true, &mut events);
            return events;
        }

        let text = self.pending.clone();
        match self.open {
            Some(index) => self.lines[index].text = text.clone(),
            None => self.push(text.clone(), true),
        }
        events.push(SessionEvent::NewLine {
            text,
            complete: false,
        });
        events
    }

    // `first` marks the piece that continues the open record, if there is one.
    fn complete(&mut self, piece: &str, first: bool, events: &mut Vec<SessionEvent>) {
        let line = piece.trim().to_string();
        self.classify(&line, events);

        match self.open.take() {
            Some(index) if first => self.lines[index].text = line.clone(),
            _ => self.push(line.clone(), false),
        }
        events.push(SessionEvent::NewLine {
            text: line,
            complete: true,
        });
    }

    fn classify(&mut self, line: &str, events: &mut Vec<SessionEvent>) {
        match classify_line(line) {
            LineKind::SensorFrame { channels, aux } => {
                self.sensor_channels = channels.clone();
                self.aux_value = Some(aux);
                events.push(SessionEvent::Sensor { channels, aux });
            }
            LineKind::NamedValue { name, value } => {
                log::debug!("value {} = {}", name, value);
                self.values.insert(name.clone(), value.clone());
                events.push(SessionEvent::Value { name, value });
            }
            LineKind::AlertMessage(message) => events.push(SessionEvent::Alert { message }),
            LineKind::AlertToken(id) => events.push(SessionEvent::AlertPlay { id }),
            LineKind::Plain => {}
        }
    }

    fn push(&mut self, text: String, open: bool) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
            self.open = self.open.and_then(|index| index.checked_sub(1));
        }
        self.lines.push_back(LineRecord::new(text));
        if open {
            self.open = Some(self.lines.len() - 1);
        }
    }

    pub fn lines(&self) -> &VecDeque<LineRecord> {
        &self.lines
    }

    /// The record still receiving text, if any.
    pub fn open_line(&self) -> Option<&LineRecord> {
        self.open.and_then(|index| self.lines.get(index))
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    pub fn sensor_channels(&self) -> &[u16] {
        &self.sensor_channels
    }

    pub fn aux_value(&self) -> Option<u8> {
        self.aux_value
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn clear_values(&mut self) {
        self.values.clear();
    }

    /// Drop scrollback and any partial line. Cached readings are kept.
    pub fn clear_lines(&mut self) {
        self.lines.clear();
        self.pending.clear();
        self.open = None;
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}
