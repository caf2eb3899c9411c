//! Profile change relay
//!
//! A single [`ProfileCallback`] is shared by every controller bound to a card.
//! It has no state of its own; notifications are republished on the event bus.

use std::sync::Arc;
use tracing::info;

use super::hal::{ProfileInfo, ProfileNotifications};
use crate::events::{DeckLinkEvent, EventBus, ProfileChangeNotice};

pub struct ProfileCallback {
    events: Arc<EventBus>,
}

impl ProfileCallback {
    pub fn new(events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { events })
    }
}

impl ProfileNotifications for ProfileCallback {
    fn profile_changing(&self, profile: &ProfileInfo, stream_will_be_forced_to_stop: bool) {
        // Changes that leave running streams alone are of no interest
        if !stream_will_be_forced_to_stop {
            return;
        }
        info!(
            "Profile {:?} on {} will stop running streams",
            profile.id, profile.device_name
        );
        self.events
            .publish(DeckLinkEvent::ProfileChanging(ProfileChangeNotice {
                profile: profile.clone(),
                stream_will_be_forced_to_stop,
            }));
    }

    fn profile_activated(&self, profile: &ProfileInfo) {
        info!("Profile {:?} activated on {}", profile.id, profile.device_name);
        self.events.publish(DeckLinkEvent::ProfileActivated {
            profile: profile.clone(),
        });
    }
}
