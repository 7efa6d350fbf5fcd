use anyhow::anyhow;
use async_trait::async_trait;
use std::io::{BufRead, Write};
use std::sync::Mutex;
use tokio::sync::mpsc;
use voicelink_engine::traits::ApprovalGate;

/// Asks approval questions on a text stream and reads one line per answer.
///
/// Questions are serialized: a second request waits until the first has been
/// answered or abandoned. Lines typed before a question is shown are
/// discarded so type-ahead never answers the wrong question.
pub struct LineApprovalGate {
    lines: tokio::sync::Mutex<mpsc::Receiver<String>>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl LineApprovalGate {
    pub fn new(lines: mpsc::Receiver<String>, out: Box<dyn Write + Send>) -> Self {
        Self {
            lines: tokio::sync::Mutex::new(lines),
            out: Mutex::new(out),
        }
    }

    /// Prompts on stdout and reads answers from stdin.
    pub fn stdio() -> anyhow::Result<Self> {
        let rx = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))?;
        Ok(Self::new(rx, Box::new(std::io::stdout())))
    }

    fn show(&self, prompt: &str) -> anyhow::Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("prompt output poisoned"))?;
        out.write_all(prompt.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

/// Reads lines on a dedicated thread; blocking reads never touch the runtime.
pub fn spawn_line_reader<R>(reader: R) -> anyhow::Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<String>(8);
    std::thread::Builder::new()
        .name("voicelink-approval-input".into())
        .spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| anyhow!("spawn input reader: {e}"))?;
    Ok(rx)
}

#[async_trait]
impl ApprovalGate for LineApprovalGate {
    async fn ask(&self, prompt: &str) -> anyhow::Result<String> {
        let mut lines = self.lines.lock().await;

        while let Ok(stale) = lines.try_recv() {
            log::debug!("Discarding input typed before the prompt ({} chars)", stale.len());
        }

        self.show(prompt)?;
        lines
            .recv()
            .await
            .ok_or_else(|| anyhow!("approval input closed"))
    }
}
