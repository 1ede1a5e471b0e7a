//! Decode-and-render dispatch for delivered events.

use futures::{Stream, StreamExt};

use crate::event::EntryEvent;
use crate::record::{ConnectionRecord, time_of_day};

/// Renders one decoded record per delivered event.
pub trait Renderer: Send + Sync {
    fn render(&self, record: &ConnectionRecord);
}

/// The canonical one-line rendering of a connection.
#[must_use]
pub fn format_connection(record: &ConnectionRecord) -> String {
    format!(
        "{} ARRIVING {} AT GATE {} CONNECTING TO {} DEPARTING {} FROM GATE {} ({} of {} minutes) {}",
        record.arriving_flight,
        time_of_day(&record.arrival_time),
        record.arrival_gate,
        record.departing_flight,
        time_of_day(&record.departure_time),
        record.departure_gate,
        record.connection_minutes,
        record.mct,
        record.derived_status(),
    )
}

/// Prints the canonical line form to stdout.
pub struct LineRenderer;

impl Renderer for LineRenderer {
    fn render(&self, record: &ConnectionRecord) {
        println!("{}", format_connection(record));
    }
}

/// Forwards each delivered event to a renderer, one line per event,
/// synchronously, in delivery order.
///
/// Stateless: safe to invoke concurrently from multiple delivery
/// streams.
pub struct Dispatcher<R> {
    renderer: R,
}

impl<R: Renderer> Dispatcher<R> {
    #[must_use]
    pub const fn new(renderer: R) -> Self {
        Self { renderer }
    }

    /// Handle one delivered event. A malformed payload logs a single
    /// diagnostic line referencing the raw payload and the subscription
    /// carries on; it never propagates.
    pub fn handle(&self, event: &EntryEvent) {
        match ConnectionRecord::decode(&event.value) {
            Ok(record) => self.renderer.render(&record),
            Err(error) => tracing::warn!("error printing connection status: {error}"),
        }
    }

    /// Drain a delivery stream to completion.
    pub async fn run<S>(&self, events: S)
    where
        S: Stream<Item = EntryEvent> + Send,
    {
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            self.handle(&event);
        }
    }
}
