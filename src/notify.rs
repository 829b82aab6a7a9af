//! Status notices published after payment and product changes.
//!
//! The CRUD layer calls into a [`Notifier`] once an operation has been
//! persisted. Each successful operation produces exactly one submit on the
//! entity's topic; a failed operation produces none.

use std::fmt;

use crate::broker::TopicManager;

/// The human readable status lines subscribers see.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    PaymentCreated,
    PaymentFetched { price_paid: f64 },
    PaymentUpdated,
    PaymentDeleted,
    PaymentsFetched,
    ProductCreated { name: String },
    ProductFound { name: String },
    ProductUpdated { name: String, price: f64 },
    ProductDeleted,
    ProductsFetched,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::PaymentCreated => f.write_str("payment is created"),
            Notice::PaymentFetched { price_paid } => write!(f, "payment price is {price_paid:.2}"),
            Notice::PaymentUpdated => f.write_str("payment is updated"),
            Notice::PaymentDeleted => f.write_str("payment is deleted"),
            Notice::PaymentsFetched => f.write_str("Payments are fetched"),
            Notice::ProductCreated { name } => write!(f, "{name} is created"),
            Notice::ProductFound { name } => write!(f, "{name} is found"),
            Notice::ProductUpdated { name, price } => {
                write!(f, "{name} is updated to price {price:.2}")
            }
            Notice::ProductDeleted => f.write_str("Product is deleted"),
            Notice::ProductsFetched => f.write_str("Products are fetched"),
        }
    }
}

/// Publishes notices on behalf of one sender.
#[derive(Debug, Clone)]
pub struct Notifier {
    manager: TopicManager,
    sender: String,
}

impl Notifier {
    pub fn new(manager: TopicManager, sender: impl Into<String>) -> Self {
        Self {
            manager,
            sender: sender.into(),
        }
    }

    pub async fn announce(&self, topic: &str, notice: &Notice) {
        self.manager
            .submit(&self.sender, topic, &notice.to_string())
            .await;
    }

    /// Announces `notice(&value)` only if `outcome` is `Ok`, then hands the
    /// outcome back untouched.
    pub async fn after<T, E>(
        &self,
        topic: &str,
        outcome: Result<T, E>,
        notice: impl FnOnce(&T) -> Notice,
    ) -> Result<T, E> {
        if let Ok(value) = &outcome {
            self.announce(topic, &notice(value)).await;
        }
        outcome
    }
}
