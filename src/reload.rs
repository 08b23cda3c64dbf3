//! Full-page live reload
//!
//! Watches backend build artifacts and pushes a reload signal to connected
//! browser sessions when they change. The signal travels over an SSE stream
//! served inside the asset prefix; the browser side is a small script that
//! calls `location.reload()` on every event.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// SSE payload sent for each reload signal
pub const RELOAD_EVENT: &str = "data: reload\n\n";

/// Browser-side reload client. EventSource reconnects on its own, so a
/// backend restart that drops the stream does not kill live reload.
pub fn client_script(asset_base: &str) -> String {
    format!(
        r#"(() => {{
  const source = new EventSource("{}/@reload");
  source.addEventListener("message", () => {{ location.reload() }});
}})();
"#,
        asset_base
    )
}

/// Fan-out point for reload signals. Cloned into every SSE session; a
/// lagged or dropped receiver only costs that session one reload.
#[derive(Clone)]
pub struct ReloadHub {
    tx: broadcast::Sender<()>,
}

impl ReloadHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Signal all connected sessions to reload. Returns how many were
    /// listening.
    pub fn notify_reload(&self) -> usize {
        self.tx.send(()).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

/// What a configured watch path resolves to
#[derive(Debug, Clone)]
enum WatchTarget {
    /// Watch the parent directory, react only to this file
    File(PathBuf),
    /// Watch the whole directory recursively
    Dir(PathBuf),
}

impl WatchTarget {
    fn matches(&self, event_path: &Path) -> bool {
        match self {
            WatchTarget::File(file) => event_path == file,
            WatchTarget::Dir(dir) => event_path.starts_with(dir),
        }
    }
}

/// Filesystem watcher feeding the reload hub.
///
/// On a matching change the watcher waits the configured delay, swallows any
/// further events that arrive during the wait, then emits exactly one reload
/// signal. The delay gives the backend process time to finish restarting
/// before the reloaded page hits the proxy again.
pub struct ReloadWatcher {
    _watcher: RecommendedWatcher,
}

impl ReloadWatcher {
    /// Start watching the given paths. Returns `None` when there is nothing
    /// to watch. Files are watched via their parent directory so the signal
    /// survives rename-into-place rebuilds; directories are watched
    /// recursively.
    pub fn spawn(
        paths: &[PathBuf],
        delay: Duration,
        hub: ReloadHub,
    ) -> anyhow::Result<Option<Self>> {
        if paths.is_empty() {
            return Ok(None);
        }

        let mut targets = Vec::new();
        for path in paths {
            targets.push(resolve_target(path)?);
        }

        let (tx, rx) = mpsc::channel::<()>(16);

        let event_targets = targets.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Watch error");
                    return;
                }
            };

            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }

            if event
                .paths
                .iter()
                .any(|p| event_targets.iter().any(|t| t.matches(p)))
            {
                // Channel full means a signal is already pending; drop this one
                let _ = tx.try_send(());
            }
        })?;

        for target in &targets {
            match target {
                WatchTarget::File(file) => {
                    let parent = file
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| PathBuf::from("."));
                    watcher.watch(&parent, RecursiveMode::NonRecursive)?;
                    info!(path = %file.display(), "Watching file for reload");
                }
                WatchTarget::Dir(dir) => {
                    watcher.watch(dir, RecursiveMode::Recursive)?;
                    info!(path = %dir.display(), "Watching directory for reload");
                }
            }
        }

        tokio::spawn(signal_loop(rx, delay, hub));

        Ok(Some(Self { _watcher: watcher }))
    }
}

/// Resolve a configured path to an absolute watch target. The path itself
/// may not exist yet (the backend binary appears after its first build);
/// for files only the parent directory has to exist.
fn resolve_target(path: &Path) -> anyhow::Result<WatchTarget> {
    if path.is_dir() {
        let dir = path
            .canonicalize()
            .map_err(|e| anyhow::anyhow!("Cannot watch '{}': {}", path.display(), e))?;
        return Ok(WatchTarget::Dir(dir));
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Watch path '{}' has no file name", path.display()))?;
    let parent = parent.canonicalize().map_err(|e| {
        anyhow::anyhow!(
            "Cannot watch '{}': parent directory is missing: {}",
            path.display(),
            e
        )
    })?;
    Ok(WatchTarget::File(parent.join(file_name)))
}

async fn signal_loop(mut rx: mpsc::Receiver<()>, delay: Duration, hub: ReloadHub) {
    while rx.recv().await.is_some() {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        // Coalesce everything that arrived during the delay into one reload
        while rx.try_recv().is_ok() {}

        let sessions = hub.notify_reload();
        debug!(sessions, delay_ms = delay.as_millis() as u64, "Reload signal sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_client_script_targets_asset_base() {
        let script = client_script("/assets");
        assert!(script.contains(r#"new EventSource("/assets/@reload")"#));
        assert!(script.contains("location.reload()"));
    }

    #[test]
    fn test_watch_target_matching() {
        let file = WatchTarget::File(PathBuf::from("/build/bin/app"));
        assert!(file.matches(Path::new("/build/bin/app")));
        assert!(!file.matches(Path::new("/build/bin/app.tmp")));

        let dir = WatchTarget::Dir(PathBuf::from("/build/bin"));
        assert!(dir.matches(Path::new("/build/bin/app")));
        assert!(dir.matches(Path::new("/build/bin/nested/other")));
        assert!(!dir.matches(Path::new("/build/lib/app")));
    }

    #[test]
    fn test_resolve_target_missing_parent() {
        let err = resolve_target(Path::new("/definitely/not/here/app")).unwrap_err();
        assert!(err.to_string().contains("parent directory is missing"));
    }

    #[tokio::test]
    async fn test_hub_fans_out() {
        let hub = ReloadHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.notify_reload(), 2);
        a.recv().await.unwrap();
        b.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_hub_without_sessions() {
        let hub = ReloadHub::new();
        assert_eq!(hub.notify_reload(), 0);
    }

    #[tokio::test]
    async fn test_watcher_signals_on_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("backend-bin");
        std::fs::write(&artifact, b"v1").unwrap();

        let hub = ReloadHub::new();
        let mut rx = hub.subscribe();
        let _watcher = ReloadWatcher::spawn(&[artifact.clone()], Duration::ZERO, hub)
            .unwrap()
            .unwrap();

        // Give the watcher a moment to register before touching the file
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut f = std::fs::OpenOptions::new().write(true).open(&artifact).unwrap();
        f.write_all(b"v2").unwrap();
        f.sync_all().unwrap();
        drop(f);

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reload signal within timeout")
            .unwrap();
    }

    #[tokio::test]
    async fn test_watcher_honors_delay() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("backend-bin");
        std::fs::write(&artifact, b"v1").unwrap();

        let delay = Duration::from_millis(250);
        let hub = ReloadHub::new();
        let mut rx = hub.subscribe();
        let _watcher = ReloadWatcher::spawn(&[artifact.clone()], delay, hub)
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let start = std::time::Instant::now();
        std::fs::write(&artifact, b"v2").unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reload signal within timeout")
            .unwrap();
        assert!(start.elapsed() >= delay);
    }

    #[tokio::test]
    async fn test_rapid_changes_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("backend-bin");
        std::fs::write(&artifact, b"v1").unwrap();

        let hub = ReloadHub::new();
        let mut rx = hub.subscribe();
        let _watcher =
            ReloadWatcher::spawn(&[artifact.clone()], Duration::from_millis(200), hub)
                .unwrap()
                .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&artifact, b"v2").unwrap();
        std::fs::write(&artifact, b"v3").unwrap();
        std::fs::write(&artifact, b"v4").unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reload signal within timeout")
            .unwrap();

        // The burst collapsed into a single signal
        let second = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(second.is_err(), "expected exactly one reload signal");
    }
}
