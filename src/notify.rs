/// Authorized-detection event fan-out.
///
/// Subscribers are borrowed callbacks kept in registration order. [`EventNotifier::fire`]
/// calls every one of them synchronously on the caller's context; there is no
/// deferral, retry, or isolation between subscribers.
use heapless::Vec;
use thiserror::Error;

use crate::defaults::MAX_SUBSCRIBERS;
use crate::mac::MacAddress;
use crate::registry::KeyName;

/// The key whose detection fired the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub name: KeyName,
    pub mac: MacAddress,
}

pub type DetectionCallback<'a> = &'a dyn Fn(&Detection);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("too many detection subscribers")]
pub struct SubscribersFull;

#[derive(Default)]
pub struct EventNotifier<'a> {
    subscribers: Vec<DetectionCallback<'a>, MAX_SUBSCRIBERS>,
}

impl<'a> EventNotifier<'a> {
    pub const fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, callback: DetectionCallback<'a>) -> Result<(), SubscribersFull> {
        self.subscribers.push(callback).map_err(|_| SubscribersFull)
    }

    pub fn fire(&self, detection: &Detection) {
        for callback in &self.subscribers {
            callback(detection);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
