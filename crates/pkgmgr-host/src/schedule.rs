//! Interval-based schedule manager.
//!
//! Supports `@every <duration>` plus the `@hourly` and `@daily` shorthands.
//! Each distinct crontab gets one ticking task, shared by every binding
//! that registered it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use pkgmgr_runtime::ScheduleManager;
use pkgmgr_runtime::package::kube::ScheduleEvent;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::parse_duration;
use crate::error::HostError;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct Entry {
    refs: usize,
    cancel: CancellationToken,
}

pub struct IntervalScheduleManager {
    entries: Mutex<HashMap<String, Entry>>,
    tx: mpsc::Sender<ScheduleEvent>,
    rx: Mutex<Option<mpsc::Receiver<ScheduleEvent>>>,
}

impl Default for IntervalScheduleManager {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

pub fn parse_crontab(crontab: &str) -> Result<Duration, HostError> {
    let crontab = crontab.trim();
    let period = match crontab {
        "@hourly" => Ok(Duration::from_secs(3600)),
        "@daily" => Ok(Duration::from_secs(24 * 3600)),
        _ => match crontab.strip_prefix("@every ") {
            Some(raw) => parse_duration(raw).map_err(|_| HostError::Crontab(crontab.to_string())),
            None => Err(HostError::Crontab(crontab.to_string())),
        },
    }?;
    if period.is_zero() {
        return Err(HostError::Crontab(crontab.to_string()));
    }
    Ok(period)
}

impl IntervalScheduleManager {
    pub fn crontabs(&self) -> Vec<String> {
        let mut crontabs: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        crontabs.sort();
        crontabs
    }

    /// Stop every ticking task.
    pub fn stop(&self) {
        for (_, entry) in self.entries.lock().unwrap().drain() {
            entry.cancel.cancel();
        }
    }
}

impl ScheduleManager for IntervalScheduleManager {
    fn add(&self, crontab: &str) -> anyhow::Result<()> {
        let period = parse_crontab(crontab)?;
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(crontab) {
            entry.refs += 1;
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let tx = self.tx.clone();
        let name = crontab.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!(crontab = %name, "schedule tick");
                        if tx.send(ScheduleEvent { crontab: name.clone() }).await.is_err() {
                            warn!(crontab = %name, "schedule event receiver dropped");
                            break;
                        }
                    }
                }
            }
        });
        entries.insert(crontab.to_string(), Entry { refs: 1, cancel });
        Ok(())
    }

    fn remove(&self, crontab: &str) {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(crontab) else {
            return;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            if let Some(entry) = entries.remove(crontab) {
                entry.cancel.cancel();
            }
        }
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ScheduleEvent>> {
        self.rx.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_crontabs() {
        assert_eq!(parse_crontab("@every 30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_crontab("@every 5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_crontab("@hourly").unwrap(), Duration::from_secs(3600));
        assert!(parse_crontab("*/5 * * * *").is_err());
        assert!(parse_crontab("@every 0s").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shared_crontab_ticks_until_last_removal() {
        let manager = IntervalScheduleManager::default();
        let mut rx = manager.take_events().unwrap();
        manager.add("@every 1m").unwrap();
        manager.add("@every 1m").unwrap();
        assert_eq!(manager.crontabs(), vec!["@every 1m".to_string()]);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.crontab, "@every 1m");

        manager.remove("@every 1m");
        assert_eq!(manager.crontabs().len(), 1);
        manager.remove("@every 1m");
        assert!(manager.crontabs().is_empty());
    }
}
