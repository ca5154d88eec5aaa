//! Fallback-chain alert sink (C11, §4.11): audio playback, then OS
//! notification, then a console write. Each stage is best-effort; a total
//! failure is logged and swallowed, never returned to the caller.

use crate::domain::bbw::{AlertEvent, AlertType};
use crate::domain::ports::AlertSink;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

const AUDIO_FORMATS: [&str; 4] = ["wav", "mp3", "ogg", "aiff"];
const AUDIO_PLAYERS: [&str; 5] = ["afplay", "paplay", "aplay", "mpg123", "mpg321"];
const NOTIFIERS: [&str; 3] = ["osascript", "notify-send", "growlnotify"];
const AUDIO_TIMEOUT: Duration = Duration::from_secs(10);
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SubprocessAlertSink {
    base_path: PathBuf,
}

impl SubprocessAlertSink {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into() }
    }

    fn audio_file_stem(alert_type: AlertType) -> &'static str {
        match alert_type {
            AlertType::Threshold => "bb_range_alert",
            AlertType::Squeeze => "bb_squeeze_alert",
            AlertType::Pattern => "bb_expansion_alert",
        }
    }

    fn candidate_audio_files(&self, alert_type: AlertType) -> Vec<PathBuf> {
        let stems = [Self::audio_file_stem(alert_type), "alert"];
        stems
            .iter()
            .flat_map(|stem| {
                AUDIO_FORMATS
                    .iter()
                    .map(move |fmt| self.base_path.join(format!("{stem}.{fmt}")))
            })
            .collect()
    }

    async fn try_play_audio(&self, event: &AlertEvent) -> bool {
        for path in self.candidate_audio_files(event.alert_type) {
            if !path.exists() {
                continue;
            }
            for player in AUDIO_PLAYERS {
                if run_with_timeout(player, &[path.as_path()], AUDIO_TIMEOUT).await {
                    info!(player, path = %path.display(), "played alert audio");
                    return true;
                }
            }
        }
        false
    }

    async fn try_notify(&self, event: &AlertEvent) -> bool {
        for notifier in NOTIFIERS {
            let args: Vec<&Path> = Vec::new();
            let ok = match notifier {
                "osascript" => {
                    let script = format!("display notification \"{}\" with title \"BBW Alert\"", event.message);
                    run_script_with_timeout(notifier, &["-e", &script], NOTIFY_TIMEOUT).await
                }
                "notify-send" => {
                    run_script_with_timeout(notifier, &["BBW Alert", &event.message], NOTIFY_TIMEOUT).await
                }
                "growlnotify" => {
                    run_script_with_timeout(notifier, &["-m", &event.message], NOTIFY_TIMEOUT).await
                }
                _ => run_with_timeout(notifier, &args, NOTIFY_TIMEOUT).await,
            };
            if ok {
                info!(notifier, "sent alert notification");
                return true;
            }
        }
        false
    }

    fn console_fallback(&self, event: &AlertEvent) {
        info!(
            symbol = %event.symbol,
            bb_width = event.bb_width,
            lowest_min_bb_width = event.lowest_min_bb_width,
            alert_type = ?event.alert_type,
            "\n=== BBW ALERT ===\n{}\n=================",
            event.message
        );
    }
}

async fn run_with_timeout(program: &str, args: &[&Path], limit: Duration) -> bool {
    let mut cmd = Command::new(program);
    cmd.args(args);
    run_command(cmd, limit).await
}

async fn run_script_with_timeout(program: &str, args: &[&str], limit: Duration) -> bool {
    let mut cmd = Command::new(program);
    cmd.args(args);
    run_command(cmd, limit).await
}

async fn run_command(mut cmd: Command, limit: Duration) -> bool {
    match timeout(limit, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(_)) => false,
        Err(_) => false,
    }
}

#[async_trait]
impl AlertSink for SubprocessAlertSink {
    async fn play(&self, event: &AlertEvent) -> Result<()> {
        if self.try_play_audio(event).await {
            return Ok(());
        }
        if self.try_notify(event).await {
            return Ok(());
        }
        warn!(symbol = %event.symbol, "no audio player or notifier available, falling back to console");
        self.console_fallback(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event() -> AlertEvent {
        AlertEvent {
            symbol: "TEST".into(),
            bb_width: 0.02,
            lowest_min_bb_width: 0.019,
            pattern_length: 5,
            alert_type: AlertType::Squeeze,
            timestamp: Utc::now(),
            group_id: None,
            message: "BBW squeeze on TEST".into(),
        }
    }

    #[tokio::test]
    async fn falls_back_to_console_when_nothing_is_installed() {
        let sink = SubprocessAlertSink::new("/nonexistent/alert/assets");
        sink.play(&event()).await.unwrap();
    }

    #[test]
    fn audio_file_stem_maps_each_alert_type() {
        assert_eq!(SubprocessAlertSink::audio_file_stem(AlertType::Threshold), "bb_range_alert");
        assert_eq!(SubprocessAlertSink::audio_file_stem(AlertType::Squeeze), "bb_squeeze_alert");
        assert_eq!(SubprocessAlertSink::audio_file_stem(AlertType::Pattern), "bb_expansion_alert");
    }

    #[test]
    fn candidate_audio_files_cover_all_formats() {
        let sink = SubprocessAlertSink::new("/assets");
        let files = sink.candidate_audio_files(AlertType::Squeeze);
        assert_eq!(files.len(), AUDIO_FORMATS.len() * 2);
        assert!(files.iter().any(|p| p.ends_with("bb_squeeze_alert.wav")));
        assert!(files.iter().any(|p| p.ends_with("alert.mp3")));
    }
}
