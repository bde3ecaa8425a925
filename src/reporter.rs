//! Append-only status log owned by a single actor task.
//!
//! Producers on any thread (CLI handlers, platform watchers, the blocking
//! verification pool) send messages; the actor applies them in arrival order
//! so lines never interleave and `clear` never races an `append`.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

const EVENT_BUFFER: usize = 256;

/// Live feed of what the reporter applied, for display front ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    Line(String),
    Cleared,
    CurrentNetwork(String),
}

/// Immutable copy of the reporter state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub lines: Vec<String>,
    pub current_network: String,
}

impl StatusSnapshot {
    /// The log as displayed: every line followed by a newline
    pub fn text(&self) -> String {
        self.lines.iter().map(|l| format!("{l}\n")).collect()
    }
}

enum Command {
    Append(String),
    Clear,
    SetCurrentNetwork(String),
    Snapshot(oneshot::Sender<StatusSnapshot>),
}

/// Cheap, cloneable handle to the reporter actor
#[derive(Clone)]
pub struct StatusReporter {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ReportEvent>,
}

impl StatusReporter {
    /// Spawn the actor on the current tokio runtime.
    /// The actor stops once every handle is dropped.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let actor = ReporterActor {
            rx,
            events: events.clone(),
            state: StatusSnapshot::default(),
        };
        let task = tokio::spawn(actor.run());
        (Self { tx, events }, task)
    }

    pub fn append(&self, line: impl Into<String>) {
        self.send(Command::Append(line.into()));
    }

    pub fn clear(&self) {
        self.send(Command::Clear);
    }

    pub fn set_current_network(&self, name: impl Into<String>) {
        self.send(Command::SetCurrentNetwork(name.into()));
    }

    /// State after every message sent before this call has been applied
    pub async fn snapshot(&self) -> StatusSnapshot {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply));
        rx.await.unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReportEvent> {
        self.events.subscribe()
    }

    fn send(&self, cmd: Command) {
        if self.tx.send(cmd).is_err() {
            trace!("Status reporter is gone, dropping message");
        }
    }
}

struct ReporterActor {
    rx: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<ReportEvent>,
    state: StatusSnapshot,
}

impl ReporterActor {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Append(line) => {
                    debug!(target: "nexus_hop::log", "{}", line);
                    self.state.lines.push(line.clone());
                    let _ = self.events.send(ReportEvent::Line(line));
                }
                Command::Clear => {
                    self.state.lines.clear();
                    let _ = self.events.send(ReportEvent::Cleared);
                }
                Command::SetCurrentNetwork(name) => {
                    self.state.current_network = name.clone();
                    let _ = self.events.send(ReportEvent::CurrentNetwork(name));
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.state.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clear_then_appends_in_call_order() {
        let (reporter, _task) = StatusReporter::spawn();
        reporter.append("stale");
        reporter.clear();
        reporter.append("one");
        reporter.append("two");
        reporter.append("three");

        let snapshot = reporter.snapshot().await;
        assert_eq!(snapshot.lines, vec!["one", "two", "three"]);
        assert_eq!(snapshot.text(), "one\ntwo\nthree\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_never_lose_or_split_lines() {
        let (reporter, _task) = StatusReporter::spawn();
        reporter.clear();

        let mut tasks = Vec::new();
        for producer in 0..8 {
            let reporter = reporter.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    reporter.append(format!("p{producer}-{i}"));
                    tokio::task::yield_now().await;
                }
            }));
        }
        // Plain OS threads, like a blocking HTTP worker
        let threads: Vec<_> = (8..10)
            .map(|producer| {
                let reporter = reporter.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        reporter.append(format!("p{producer}-{i}"));
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        for thread in threads {
            thread.join().unwrap();
        }

        let snapshot = reporter.snapshot().await;
        assert_eq!(snapshot.lines.len(), 500);
        for producer in 0..10 {
            let prefix = format!("p{producer}-");
            let own: Vec<_> = snapshot
                .lines
                .iter()
                .filter(|l| l.starts_with(&prefix))
                .collect();
            let expected: Vec<_> = (0..50).map(|i| format!("p{producer}-{i}")).collect();
            assert_eq!(own.len(), 50);
            assert!(own.iter().zip(&expected).all(|(a, b)| *a == b));
        }
    }

    #[tokio::test]
    async fn current_network_survives_clear() {
        let (reporter, _task) = StatusReporter::spawn();
        let mut events = reporter.subscribe();
        reporter.set_current_network("HomeAP");
        reporter.append("WIFI: HomeAP CONNECTED");
        reporter.clear();

        let snapshot = reporter.snapshot().await;
        assert!(snapshot.lines.is_empty());
        assert_eq!(snapshot.current_network, "HomeAP");

        assert_eq!(
            events.recv().await.unwrap(),
            ReportEvent::CurrentNetwork("HomeAP".into())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ReportEvent::Line("WIFI: HomeAP CONNECTED".into())
        );
        assert_eq!(events.recv().await.unwrap(), ReportEvent::Cleared);
    }
}
