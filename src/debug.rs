use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// JSON-lines trace of fill events, one object per line.
#[derive(Clone)]
pub(crate) struct FillTrace {
    inner: Arc<Mutex<TraceState>>,
}

struct TraceState {
    writer: Box<dyn Write + Send>,
    counters: HashMap<String, u64>,
}

impl FillTrace {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::with_writer(Box::new(BufWriter::new(file))))
    }

    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TraceState {
                writer,
                counters: HashMap::new(),
            })),
        }
    }

    pub fn log_event(&self, event: JsonValue) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{event}");
        }
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let mut counters: Vec<(String, u64)> = state.counters.drain().collect();
            counters.sort_by(|a, b| a.0.cmp(&b.0));
            let counts: Map<String, JsonValue> = counters
                .into_iter()
                .map(|(key, value)| (key, json!(value)))
                .collect();
            let line = json!({
                "type": "debug.summary",
                "context": context,
                "counts": counts,
            });
            let _ = writeln!(state.writer, "{line}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn events_and_summary_are_json_lines() {
        let buf = SharedBuf::default();
        let trace = FillTrace::with_writer(Box::new(buf.clone()));
        trace.log_event(json!({"type": "fill.page_break", "from_page": 1}));
        trace.increment("fill.page_break", 1);
        trace.increment("fill.page_break", 2);
        trace.emit_summary("report \"q3\"");
        trace.flush();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<JsonValue> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["from_page"], 1);
        assert_eq!(lines[1]["counts"]["fill.page_break"], 3);
        assert_eq!(lines[1]["context"], "report \"q3\"");
    }
}
