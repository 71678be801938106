// Fan-out: classify -> look up -> suppress self -> spawn delivery.
//
// Everything up to the spawn runs inline on the event path: in-memory
// checks plus one store lookup per target. Composition and the notifier
// call happen in an independent task per (subscription, reason), so a
// slow or failing push gateway never holds up the next event.
//
// There is no bound on outstanding delivery tasks. If the
// notifier is slower than the firehose, tasks accumulate; that is the
// known scaling limit of this design.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::tracker::{DeliveryTracker, DispatchStats};
use crate::bluesky::handles::ActorLabeler;
use crate::classify::{classify, InteractionContext};
use crate::events::{CommitEvent, CommitHandler};
use crate::identity::same_did;
use crate::notify::compose::compose;
use crate::notify::{InteractionReason, PushNotifier};
use crate::subscriptions::{Subscriber, SubscriptionStore};

/// The per-event processing path, shared by all four collection handlers.
pub struct FanOut<S: Subscriber> {
    pub(crate) store: Arc<dyn SubscriptionStore<S>>,
    pub(crate) notifier: Arc<dyn PushNotifier<S>>,
    pub(crate) labeler: Option<Arc<dyn ActorLabeler>>,
    pub(crate) stats: Arc<DispatchStats>,
    pub(crate) deliveries: Arc<DeliveryTracker>,
}

impl<S: Subscriber> Clone for FanOut<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            labeler: self.labeler.clone(),
            stats: self.stats.clone(),
            deliveries: self.deliveries.clone(),
        }
    }
}

/// Everything a delivery task needs, moved into the task.
struct Delivery<S> {
    subscription: S,
    reason: InteractionReason,
    actor_did: String,
    context: InteractionContext,
}

impl<S: Subscriber> FanOut<S> {
    /// Process one commit event. Returns the number of deliveries spawned.
    pub async fn process(&self, event: CommitEvent) -> usize {
        self.stats.record_received();

        let Some(interaction) = classify(&event) else {
            return 0;
        };
        self.stats.record_matched();

        let mut spawned = 0;
        for target in &interaction.targets {
            let subscription = match self.store.get(Some(target.as_str())).await {
                Ok(Some(subscription)) => subscription,
                Ok(None) => {
                    debug!(target = %target, reason = %interaction.reason, "No subscription");
                    continue;
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "Subscription lookup failed");
                    continue;
                }
            };

            // Targets were already filtered against the actor; this catches
            // a store that maps a target onto the actor's own record
            if same_did(subscription.did(), &interaction.actor_did) {
                continue;
            }

            self.spawn_delivery(Delivery {
                subscription,
                reason: interaction.reason,
                actor_did: interaction.actor_did.clone(),
                context: interaction.context.clone(),
            });
            spawned += 1;
        }
        spawned
    }

    fn spawn_delivery(&self, delivery: Delivery<S>) {
        let notifier = self.notifier.clone();
        let labeler = self.labeler.clone();
        let stats = self.stats.clone();
        let guard = self.deliveries.begin();
        self.stats.record_dispatched();

        tokio::spawn(async move {
            let _guard = guard;
            let Delivery {
                subscription,
                reason,
                actor_did,
                context,
            } = delivery;

            let label = match &labeler {
                Some(labeler) => labeler.label(&actor_did).await,
                None => None,
            };
            let label = label.as_deref().unwrap_or(&actor_did);
            let message = compose(reason, &actor_did, label, &context);

            match notifier.send(&subscription, &message).await {
                Ok(()) => {
                    stats.record_delivery(true);
                    debug!(to = %subscription.did(), reason = %reason, "Notification delivered");
                }
                Err(e) => {
                    stats.record_delivery(false);
                    warn!(
                        to = %subscription.did(),
                        reason = %reason,
                        actor = %actor_did,
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            }
        });
    }
}

#[async_trait]
impl<S: Subscriber> CommitHandler for FanOut<S> {
    async fn on_commit(&self, event: CommitEvent) {
        self.process(event).await;
    }
}
