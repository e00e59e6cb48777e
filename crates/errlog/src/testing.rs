//! Test helpers shared by the unit tests of this crate

use errlog_core::{Result, Severity};
use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::destination::{SyslogConnector, SyslogSink};
use crate::facility::Facility;

/// Captured syslog traffic
#[derive(Default)]
pub struct MemorySyslog {
    pub facility: Option<Facility>,
    pub messages: Mutex<Vec<(Severity, String)>>,
}

impl SyslogSink for MemorySyslog {
    fn send(&self, severity: Severity, message: &str) -> io::Result<()> {
        self.messages.lock().push((severity, message.to_string()));
        Ok(())
    }
}

/// Connector handing out [`MemorySyslog`] sinks and remembering them
#[derive(Default)]
pub struct MemoryConnector {
    sinks: Mutex<Vec<Arc<MemorySyslog>>>,
}

impl MemoryConnector {
    pub fn connections(&self) -> Vec<String> {
        self.sinks
            .lock()
            .iter()
            .filter_map(|s| s.facility.map(|f| f.to_string()))
            .collect()
    }

    pub fn sink(&self, index: usize) -> Arc<MemorySyslog> {
        Arc::clone(&self.sinks.lock()[index])
    }
}

impl SyslogConnector for MemoryConnector {
    fn connect(&self, facility: Facility, _ident: &str) -> Result<Arc<dyn SyslogSink>> {
        let sink = Arc::new(MemorySyslog {
            facility: Some(facility),
            messages: Mutex::new(Vec::new()),
        });
        self.sinks.lock().push(Arc::clone(&sink));
        Ok(sink)
    }
}

/// Script that appends its stdin to `out`
pub fn sink_script(dir: &Path, out: &Path) -> String {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("sink.sh");
    std::fs::write(&script, format!("#!/bin/sh\nexec cat >> {}\n", out.display())).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script.display().to_string()
}

pub fn wait_for<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

pub fn lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
