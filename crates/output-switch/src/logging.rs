//! Tracing setup.
//!
//! While the terminal UI owns the screen, events are formatted into single lines and
//! sent over a channel to the log panel. `--list-devices` logs to stderr instead.

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;

const DEFAULT_FILTER: &str = "info,output_player=info,output_switch=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the channel-backed subscriber and return the receiving end for the UI.
pub(crate) fn init_channel() -> Receiver<String> {
    let (tx, rx) = unbounded();
    tracing_subscriber::registry()
        .with(env_filter())
        .with(ChannelLayer::new(tx))
        .init();
    rx
}

pub(crate) fn init_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Forwards each event as one formatted line.
pub(crate) struct ChannelLayer {
    tx: Sender<String>,
}

impl ChannelLayer {
    pub(crate) fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }
}

impl<S> Layer<S> for ChannelLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        let mut line = format!(
            "{:>5} {}: {}",
            meta.level(),
            meta.target(),
            visitor.message.unwrap_or_default()
        );
        if !visitor.fields.is_empty() {
            line.push(' ');
            line.push_str(&visitor.fields.join(" "));
        }
        // The UI may already be gone during shutdown.
        let _ = self.tx.send(line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: Option<String>,
    fields: Vec<String>,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let formatted = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(formatted.trim_matches('"').to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), formatted));
        }
    }
}
