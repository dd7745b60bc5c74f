//! Category to handler mapping fixed at construction time.

use std::sync::Arc;

use super::EventCategory;
use crate::domain::ports::OutboxHandler;

/// One optional handler per [`EventCategory`].
///
/// A category left empty dead-letters its events instead of delivering them.
#[derive(Clone, Default)]
pub struct OutboxHandlers {
    notification: Option<Arc<dyn OutboxHandler>>,
    webhook: Option<Arc<dyn OutboxHandler>>,
    analytics: Option<Arc<dyn OutboxHandler>>,
}

impl OutboxHandlers {
    /// Start with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `category`, replacing any previous one.
    #[must_use]
    pub fn with_handler(mut self, category: EventCategory, handler: Arc<dyn OutboxHandler>) -> Self {
        *self.slot_mut(category) = Some(handler);
        self
    }

    /// Handler serving `category`, if registered.
    pub fn for_category(&self, category: EventCategory) -> Option<&Arc<dyn OutboxHandler>> {
        match category {
            EventCategory::Notification => self.notification.as_ref(),
            EventCategory::Webhook => self.webhook.as_ref(),
            EventCategory::Analytics => self.analytics.as_ref(),
        }
    }

    /// Categories that have a handler.
    pub fn registered(&self) -> Vec<EventCategory> {
        EventCategory::ALL
            .into_iter()
            .filter(|category| self.for_category(*category).is_some())
            .collect()
    }

    fn slot_mut(&mut self, category: EventCategory) -> &mut Option<Arc<dyn OutboxHandler>> {
        match category {
            EventCategory::Notification => &mut self.notification,
            EventCategory::Webhook => &mut self.webhook,
            EventCategory::Analytics => &mut self.analytics,
        }
    }
}

impl std::fmt::Debug for OutboxHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxHandlers")
            .field("registered", &self.registered())
            .finish()
    }
}
