//! Subscription store contract cases.

use crate::store::SubscriptionStore;

/// Store and remove behave as set operations.
pub async fn add_remove_keeps_set_semantics<S: SubscriptionStore>(store: S) {
    store.store("billing.invoice_paid", "q1").await.unwrap();
    store.store("billing.invoice_paid", "q1").await.unwrap();
    store.store("billing.invoice_paid", "q2").await.unwrap();
    store.remove("billing.invoice_paid", "q1").await.unwrap();

    let subscribers = store.subscribers("billing.invoice_paid").await.unwrap();
    assert_eq!(subscribers, ["q2"]);
}

/// Subscribing N times observes the same state as subscribing once.
pub async fn repeated_store_is_idempotent<S: SubscriptionStore>(store: S) {
    for _ in 0..3 {
        store.store("events.repeated", "q1").await.unwrap();
    }

    let subscribers = store.subscribers("events.repeated").await.unwrap();
    assert_eq!(subscribers, ["q1"]);
}

/// An event nobody subscribed to has no subscribers.
pub async fn unknown_event_has_no_subscribers<S: SubscriptionStore>(store: S) {
    assert!(store.subscribers("events.unknown").await.unwrap().is_empty());
}

/// Removing from an event nobody subscribed to is harmless.
pub async fn remove_from_absent_is_harmless<S: SubscriptionStore>(store: S) {
    store.remove("events.absent", "q1").await.unwrap();
    assert!(store.subscribers("events.absent").await.unwrap().is_empty());
}

/// Expands to one `#[tokio::test]` per subscription store contract case.
///
/// `$provider` is an `async fn(&str) -> Option<impl SubscriptionStore>`
/// receiving the case name; returning `None` skips the case.
#[macro_export]
macro_rules! subscription_store_test {
    ($provider:ident) => {
        $crate::subscription_store_test!(
            $provider,
            add_remove_keeps_set_semantics,
            repeated_store_is_idempotent,
            unknown_event_has_no_subscribers,
            remove_from_absent_is_harmless,
        );
    };
    ($provider:ident, $($case:ident),+ $(,)?) => {
        $(
            #[tokio::test]
            async fn $case() {
                match $provider(stringify!($case)).await {
                    Some(store) => $crate::store::test::subscription::$case(store).await,
                    None => eprintln!(
                        "skipping {}: no subscription store available",
                        stringify!($case)
                    ),
                }
            }
        )+
    };
}
