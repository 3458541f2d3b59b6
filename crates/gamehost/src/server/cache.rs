//! Per-script output cache.
//!
//! Output chunks arriving from the multiplexer are grouped by script name and
//! target stream into append-only text buffers. Once a session's close is
//! observed the exec id is sealed: late fragments for it are ignored, but the
//! accumulated text stays readable until it is explicitly removed or the
//! whole cache is cleared.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::mux::StreamTarget;

/// Accumulated output of one script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScriptLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Append-only output buffers, keyed by script name.
#[derive(Debug, Default)]
pub struct OutputCache {
    buffers: HashMap<String, ScriptLogs>,
    sealed: HashSet<String>,
}

impl OutputCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk to the (script, target) buffer, creating it on first
    /// use. Returns `false` without mutating anything when the exec id has
    /// already been sealed by a close event.
    pub fn append(&mut self, exec_id: &str, script: &str, target: StreamTarget, chunk: &str) -> bool {
        if self.sealed.contains(exec_id) {
            return false;
        }

        let logs = self.buffers.entry(script.to_string()).or_default();
        match target {
            StreamTarget::Stdout => logs.stdout.push_str(chunk),
            StreamTarget::Stderr => logs.stderr.push_str(chunk),
        }
        true
    }

    /// Stop accepting fragments for an exec id. Its buffers stay readable.
    pub fn seal(&mut self, exec_id: &str) {
        self.sealed.insert(exec_id.to_string());
    }

    /// Evict one script's buffers. Other scripts are unaffected.
    pub fn remove(&mut self, script: &str) {
        self.buffers.remove(script);
    }

    /// Evict everything; used on container stop.
    pub fn clear(&mut self) {
        self.buffers.clear();
        self.sealed.clear();
    }

    /// Value-copied snapshot of all buffers. Later mutation never alters a
    /// previously returned snapshot.
    pub fn snapshot(&self) -> HashMap<String, ScriptLogs> {
        self.buffers.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_groups_by_script_and_target() {
        let mut cache = OutputCache::new();
        assert!(cache.append("e1", "StartScript", StreamTarget::Stdout, "Server "));
        assert!(cache.append("e1", "StartScript", StreamTarget::Stdout, "ready"));
        assert!(cache.append("e1", "StartScript", StreamTarget::Stderr, "warn"));

        let snapshot = cache.snapshot();
        let logs = &snapshot["StartScript"];
        assert_eq!(logs.stdout, "Server ready");
        assert_eq!(logs.stderr, "warn");
    }

    #[test]
    fn test_distinct_scripts_do_not_leak() {
        let mut cache = OutputCache::new();
        cache.append("e1", "StartScript", StreamTarget::Stdout, "alpha");
        cache.append("e2", "backup", StreamTarget::Stdout, "beta");

        let snapshot = cache.snapshot();
        assert_eq!(snapshot["StartScript"].stdout, "alpha");
        assert_eq!(snapshot["backup"].stdout, "beta");
        assert_eq!(snapshot["StartScript"].stderr, "");
    }

    #[test]
    fn test_sealed_exec_rejects_fragments_but_stays_readable() {
        let mut cache = OutputCache::new();
        cache.append("e1", "StartScript", StreamTarget::Stdout, "Server ready");
        cache.seal("e1");

        assert!(!cache.append("e1", "StartScript", StreamTarget::Stdout, "late"));
        let snapshot = cache.snapshot();
        assert_eq!(snapshot["StartScript"].stdout, "Server ready");
        assert_eq!(snapshot["StartScript"].stderr, "");
    }

    #[test]
    fn test_seal_does_not_block_other_execs() {
        let mut cache = OutputCache::new();
        cache.seal("e1");
        assert!(cache.append("e2", "backup", StreamTarget::Stdout, "ok"));
    }

    #[test]
    fn test_remove_is_selective() {
        let mut cache = OutputCache::new();
        cache.append("e1", "StartScript", StreamTarget::Stdout, "alpha");
        cache.append("e2", "backup", StreamTarget::Stdout, "beta");

        cache.remove("backup");
        let snapshot = cache.snapshot();
        assert!(snapshot.contains_key("StartScript"));
        assert!(!snapshot.contains_key("backup"));
    }

    #[test]
    fn test_snapshot_is_value_copied() {
        let mut cache = OutputCache::new();
        cache.append("e1", "StartScript", StreamTarget::Stdout, "before");
        let snapshot = cache.snapshot();

        cache.append("e1", "StartScript", StreamTarget::Stdout, " after");
        assert_eq!(snapshot["StartScript"].stdout, "before");
    }

    #[test]
    fn test_clear_evicts_everything() {
        let mut cache = OutputCache::new();
        cache.append("e1", "StartScript", StreamTarget::Stdout, "alpha");
        cache.seal("e1");
        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.snapshot().is_empty());
        // A fresh session may reuse the exec id space after a clear.
        assert!(cache.append("e1", "StartScript", StreamTarget::Stdout, "new"));
    }
}
