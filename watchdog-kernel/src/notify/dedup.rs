use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Mémorise la date du dernier envoi par clé, pendant `window`.
///
/// Les entrées expirées sont invisibles pour les lookups et récupérées par
/// un balayage périodique (`spawn_sweeper`).
pub struct Deduplicator {
    recent: Mutex<HashMap<String, Instant>>,
    window: Duration,
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            recent: Mutex::new(HashMap::new()),
            window,
        }
    }

    pub fn is_duplicate(&self, key: &str) -> bool {
        let recent = self.recent.lock();
        match recent.get(key) {
            Some(last) => last.elapsed() < self.window,
            None => false,
        }
    }

    pub fn mark(&self, key: &str) {
        self.recent.lock().insert(key.to_string(), Instant::now());
    }

    /// Lookup + marquage en une seule section critique.
    /// Retourne `true` si la clé était libre (et vient d'être marquée).
    pub fn check_and_mark(&self, key: &str) -> bool {
        let mut recent = self.recent.lock();
        let now = Instant::now();
        if let Some(last) = recent.get(key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        recent.insert(key.to_string(), now);
        true
    }

    /// Oublie une clé (message marqué mais finalement pas livré).
    pub fn forget(&self, key: &str) {
        self.recent.lock().remove(key);
    }

    /// Supprime les entrées plus vieilles que la fenêtre, retourne le nombre retiré.
    pub fn sweep(&self) -> usize {
        let mut recent = self.recent.lock();
        let before = recent.len();
        let window = self.window;
        recent.retain(|_, last| last.elapsed() <= window);
        before - recent.len()
    }

    pub fn len(&self) -> usize {
        self.recent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Balayage toutes les `window` jusqu'à annulation.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let dedup = self.clone();
        tokio::spawn(async move {
            let period = dedup.window.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = dedup.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = dedup.len(), "dedup sweep");
                        }
                    }
                }
            }
        })
    }
}
