//! Engine → shell event surface
//!
//! Any number of UI shells can subscribe; each receives every event. Events
//! are plain serde values so shells can forward them over whatever bridge
//! they use (IPC, websocket, FFI).

use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::types::PlaybackState;

/// One stem's peak level in a levels event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemLevel {
    pub stem_id: String,
    pub peak: f32,
}

/// Events pushed from the engine to UI shells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AppEvent {
    #[serde(rename = "playback:position")]
    PlaybackPosition { seconds: f64 },

    #[serde(rename = "playback:state")]
    PlaybackStateChanged { state: PlaybackState },

    #[serde(rename = "playback:levels")]
    PlaybackLevels { stems: Vec<StemLevel>, master: f32 },

    #[serde(rename = "load:progress")]
    LoadProgress {
        song_id: String,
        current: usize,
        total: usize,
    },

    #[serde(rename = "load:complete")]
    LoadComplete { song_id: String },

    #[serde(rename = "preload:progress")]
    PreloadProgress {
        setlist_id: String,
        current: usize,
        total: usize,
    },

    #[serde(rename = "preload:complete")]
    PreloadComplete { setlist_id: String },

    #[serde(rename = "import:progress")]
    ImportProgress {
        current: usize,
        total: usize,
        file: String,
    },

    #[serde(rename = "cache:warning")]
    CacheWarning { kind: String, message: String },

    #[serde(rename = "audio:error")]
    AudioError { kind: String, message: String },
}

/// Fan-out event bus
///
/// `emit` never blocks: subscribers get unbounded channels and dead
/// subscribers are dropped on the next emission.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<AppEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> Receiver<AppEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .expect("event bus mutex poisoned")
            .push(tx);
        rx
    }

    /// Broadcast an event to every live subscriber
    pub fn emit(&self, event: AppEvent) {
        let mut subscribers = self.subscribers.lock().expect("event bus mutex poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_subscribers_receive_events() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.emit(AppEvent::LoadComplete {
            song_id: "s1".to_string(),
        });

        assert_eq!(a.try_recv().unwrap(), b.try_recv().unwrap());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        drop(bus.subscribe());

        bus.emit(AppEvent::PlaybackPosition { seconds: 1.0 });
        bus.emit(AppEvent::PlaybackPosition { seconds: 2.0 });

        assert_eq!(a.iter().take(2).count(), 2);
    }

    #[test]
    fn test_event_serialization_uses_stable_names() {
        let json = serde_json::to_value(AppEvent::LoadProgress {
            song_id: "s1".to_string(),
            current: 2,
            total: 8,
        })
        .unwrap();
        assert_eq!(json["type"], "load:progress");
        assert_eq!(json["current"], 2);

        let json = serde_json::to_value(AppEvent::PlaybackStateChanged {
            state: PlaybackState::Playing,
        })
        .unwrap();
        assert_eq!(json["type"], "playback:state");
        assert_eq!(json["state"], "playing");

        let json = serde_json::to_value(AppEvent::CacheWarning {
            kind: "BudgetBelowPinnedSet".to_string(),
            message: "pinned songs exceed the cache budget".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "cache:warning");
        assert_eq!(json["kind"], "BudgetBelowPinnedSet");
    }
}
